//! In-process stand-in for an item-limited REST API.
//!
//! Accepts `{"items": [...]}` batches (optionally gzip-compressed), enforces a
//! per-call item limit, rejects invalid and duplicated items with the API's
//! error envelope, and can be scripted to fail the next N calls with a given
//! status. Every call is recorded so tests can assert on what the client sent.

use std::collections::{BTreeMap, VecDeque};
use std::io::Read;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::{net::TcpListener, sync::RwLock};

pub const DEFAULT_MAX_ITEMS_PER_CALL: usize = 1000;

/// A scripted failure for an upcoming call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fault {
    pub status: u16,
    pub auto_retryable: bool,
}

/// What the server saw for one call.
#[derive(Debug, Clone, Serialize)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    /// Number of items in the decoded body, if it had an `items` array.
    pub item_count: Option<usize>,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

#[derive(Deserialize)]
struct ItemsEnvelope {
    items: Vec<Value>,
}

#[derive(Debug)]
pub struct MockState {
    items: RwLock<BTreeMap<String, Value>>,
    faults: Mutex<VecDeque<Fault>>,
    log: Mutex<Vec<RecordedRequest>>,
    max_items_per_call: usize,
}

impl Default for MockState {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ITEMS_PER_CALL)
    }
}

impl MockState {
    pub fn new(max_items_per_call: usize) -> Self {
        Self {
            items: RwLock::new(BTreeMap::new()),
            faults: Mutex::new(VecDeque::new()),
            log: Mutex::new(Vec::new()),
            max_items_per_call,
        }
    }

    /// Fail the next `times` calls with `status`.
    pub fn inject_faults(&self, status: u16, times: usize) {
        let fault = Fault {
            status,
            auto_retryable: false,
        };
        lock(&self.faults).extend(std::iter::repeat(fault).take(times));
    }

    pub fn inject_fault(&self, fault: Fault) {
        lock(&self.faults).push_back(fault);
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        lock(&self.log).clone()
    }

    /// Item counts of every call that carried an items body, in order.
    pub fn batch_sizes(&self) -> Vec<usize> {
        lock(&self.log)
            .iter()
            .filter_map(|request| request.item_count)
            .collect()
    }

    pub async fn stored_external_ids(&self) -> Vec<String> {
        self.items.read().await.keys().cloned().collect()
    }

    fn record(&self, method: &Method, path: &str, headers: &HeaderMap, item_count: Option<usize>) {
        let headers = headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect();
        lock(&self.log).push(RecordedRequest {
            method: method.to_string(),
            path: path.to_string(),
            headers,
            item_count,
        });
    }

    fn next_fault(&self) -> Option<Fault> {
        lock(&self.faults).pop_front()
    }
}

// A panicking handler must not wedge every later test request.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub type SharedState = Arc<MockState>;

pub fn app() -> Router {
    app_with_state(Arc::new(MockState::default()))
}

pub fn app_with_state(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/items", get(list_items).post(create_items))
        .route("/items/delete", post(delete_items))
        .with_state(state)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    run_with_state(listener, Arc::new(MockState::default())).await
}

pub async fn run_with_state(listener: TcpListener, state: SharedState) -> Result<(), std::io::Error> {
    axum::serve(listener, app_with_state(state)).await
}

async fn health(State(state): State<SharedState>, headers: HeaderMap) -> Response {
    state.record(&Method::GET, "/health", &headers, None);
    if let Some(fault) = state.next_fault() {
        return fault_response(fault);
    }
    (StatusCode::OK, Json(json!({"status": "ok"}))).into_response()
}

async fn list_items(State(state): State<SharedState>, headers: HeaderMap) -> Response {
    state.record(&Method::GET, "/items", &headers, None);
    if let Some(fault) = state.next_fault() {
        return fault_response(fault);
    }
    let items: Vec<Value> = state.items.read().await.values().cloned().collect();
    (StatusCode::OK, Json(json!({"items": items}))).into_response()
}

async fn create_items(State(state): State<SharedState>, headers: HeaderMap, body: Bytes) -> Response {
    let envelope = match decode_items(&headers, &body) {
        Ok(envelope) => envelope,
        Err(message) => {
            state.record(&Method::POST, "/items", &headers, None);
            return error_response(StatusCode::BAD_REQUEST, &message, None);
        }
    };
    state.record(&Method::POST, "/items", &headers, Some(envelope.items.len()));

    if let Some(fault) = state.next_fault() {
        return fault_response(fault);
    }
    if envelope.items.len() > state.max_items_per_call {
        return error_response(
            StatusCode::BAD_REQUEST,
            &format!("Request exceeds the limit of {} items", state.max_items_per_call),
            None,
        );
    }

    // The API does not say which item is invalid, only that one is.
    let mut external_ids = Vec::with_capacity(envelope.items.len());
    for item in &envelope.items {
        match item.get("externalId").and_then(Value::as_str) {
            Some(external_id) if !external_id.starts_with("invalid") => {
                external_ids.push(external_id.to_string());
            }
            _ => {
                return error_response(StatusCode::BAD_REQUEST, "Invalid item in request", None);
            }
        }
    }

    let mut stored = state.items.write().await;
    let duplicated: Vec<Value> = external_ids
        .iter()
        .filter(|external_id| stored.contains_key(*external_id))
        .map(|external_id| json!({"externalId": external_id}))
        .collect();
    if !duplicated.is_empty() {
        return error_response(
            StatusCode::CONFLICT,
            "Duplicated external ids",
            Some(("duplicated", duplicated)),
        );
    }

    for (external_id, item) in external_ids.into_iter().zip(envelope.items.iter()) {
        stored.insert(external_id, item.clone());
    }
    (StatusCode::CREATED, Json(json!({"items": envelope.items}))).into_response()
}

async fn delete_items(State(state): State<SharedState>, headers: HeaderMap, body: Bytes) -> Response {
    let envelope = match decode_items(&headers, &body) {
        Ok(envelope) => envelope,
        Err(message) => {
            state.record(&Method::POST, "/items/delete", &headers, None);
            return error_response(StatusCode::BAD_REQUEST, &message, None);
        }
    };
    state.record(&Method::POST, "/items/delete", &headers, Some(envelope.items.len()));

    if let Some(fault) = state.next_fault() {
        return fault_response(fault);
    }

    let mut stored = state.items.write().await;
    let missing: Vec<Value> = envelope
        .items
        .iter()
        .filter(|id| {
            id.get("externalId")
                .and_then(Value::as_str)
                .map_or(true, |external_id| !stored.contains_key(external_id))
        })
        .cloned()
        .collect();
    if !missing.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "Ids not found", Some(("missing", missing)));
    }

    for id in &envelope.items {
        if let Some(external_id) = id.get("externalId").and_then(Value::as_str) {
            stored.remove(external_id);
        }
    }
    (StatusCode::OK, Json(json!({}))).into_response()
}

fn decode_items(headers: &HeaderMap, body: &[u8]) -> Result<ItemsEnvelope, String> {
    let gzipped = headers
        .get("content-encoding")
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.eq_ignore_ascii_case("gzip"));

    let mut decoded = Vec::new();
    let raw: &[u8] = if gzipped {
        GzDecoder::new(body)
            .read_to_end(&mut decoded)
            .map_err(|e| format!("Invalid gzip body: {e}"))?;
        &decoded
    } else {
        body
    };
    serde_json::from_slice(raw).map_err(|e| format!("Invalid JSON body: {e}"))
}

fn fault_response(fault: Fault) -> Response {
    let status = StatusCode::from_u16(fault.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = json!({
        "error": {
            "code": status.as_u16(),
            "message": status.canonical_reason().unwrap_or("Injected fault"),
            "isAutoRetryable": fault.auto_retryable,
        }
    });
    (status, Json(body)).into_response()
}

fn error_response(status: StatusCode, message: &str, detail: Option<(&str, Vec<Value>)>) -> Response {
    let mut error = json!({"code": status.as_u16(), "message": message});
    if let Some((key, values)) = detail {
        error[key] = Value::Array(values);
    }
    (status, Json(json!({"error": error}))).into_response()
}
