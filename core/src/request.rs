//! Logical requests and their bodies.
//!
//! # Design
//! A `Request` is one pending call plus its retry accounting. It never holds
//! wire bytes: the client serializes the body on every attempt, so a request
//! can be split or retried without re-parsing anything.
//!
//! Items bodies compute their identifier list once at construction and carry
//! it through every split, so the ids attached to outcomes always line up
//! with the items that were actually sent.

use std::fmt;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::HttpClientError;
use crate::http::HttpMethod;
use crate::tracker::SplitFailureTracker;

/// Split-failure budget used when the caller does not pick one.
pub const DEFAULT_MAX_FAILURES_BEFORE_ABORT: usize = 50;

/// A record that can be sent in an items body.
///
/// `item_id` is used only to label outcomes, never for serialization.
pub trait BatchItem: Serialize {
    type Id: Clone + fmt::Debug + PartialEq + Send;

    fn item_id(&self) -> Result<Self::Id, HttpClientError>;
}

/// Untyped items use the API's identifier convention: `space` + `externalId`
/// for instances, then `externalId`, then `id`.
impl BatchItem for Value {
    type Id = Value;

    fn item_id(&self) -> Result<Value, HttpClientError> {
        let Some(object) = self.as_object() else {
            return Err(HttpClientError::ItemId(format!(
                "expected a JSON object, got {self}"
            )));
        };

        let mut id = Map::new();
        if let (Some(space), Some(external_id)) = (object.get("space"), object.get("externalId")) {
            if let Some(instance_type) = object.get("instanceType") {
                id.insert("instanceType".to_string(), instance_type.clone());
            }
            id.insert("space".to_string(), space.clone());
            id.insert("externalId".to_string(), external_id.clone());
        } else if let Some(external_id) = object.get("externalId") {
            id.insert("externalId".to_string(), external_id.clone());
        } else if let Some(internal_id) = object.get("id") {
            id.insert("id".to_string(), internal_id.clone());
        } else {
            return Err(HttpClientError::ItemId(format!(
                "item has no externalId or id: {self}"
            )));
        }
        Ok(Value::Object(id))
    }
}

/// An ordered batch of items plus extra top-level envelope fields.
#[derive(Debug, Clone)]
pub struct ItemBody<T: BatchItem> {
    items: Vec<T>,
    ids: Vec<T::Id>,
    extra: Map<String, Value>,
    max_failures_before_abort: usize,
    tracker: Option<SplitFailureTracker>,
}

impl<T: BatchItem> ItemBody<T> {
    /// Fails if any item cannot produce an identifier.
    pub fn new(items: Vec<T>) -> Result<Self, HttpClientError> {
        let ids = items
            .iter()
            .map(BatchItem::item_id)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            items,
            ids,
            extra: Map::new(),
            max_failures_before_abort: DEFAULT_MAX_FAILURES_BEFORE_ABORT,
            tracker: None,
        })
    }

    /// Add a top-level field next to `items`, e.g. `upsert` or `replace`.
    #[must_use]
    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    #[must_use]
    pub fn with_max_failures_before_abort(mut self, limit: usize) -> Self {
        self.max_failures_before_abort = limit;
        self
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn ids(&self) -> &[T::Id] {
        &self.ids
    }

    pub fn extra(&self) -> &Map<String, Value> {
        &self.extra
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn max_failures_before_abort(&self) -> usize {
        self.max_failures_before_abort
    }

    /// The shared tracker, if this body descends from a split.
    pub fn split_tracker(&self) -> Option<&SplitFailureTracker> {
        self.tracker.as_ref()
    }

    /// The shared tracker, created on first use with this body's budget.
    pub fn split_tracker_or_init(&mut self) -> SplitFailureTracker {
        let limit = self.max_failures_before_abort;
        self.tracker
            .get_or_insert_with(|| SplitFailureTracker::new(limit))
            .clone()
    }

    /// Partition into the first `mid` items and the rest.
    ///
    /// Both halves keep the extra fields, the failure budget and the shared
    /// tracker. `mid` past the end yields an empty right half.
    pub fn split(mut self, mid: usize) -> (Self, Self) {
        let mid = mid.min(self.items.len());
        let right_items = self.items.split_off(mid);
        let right_ids = self.ids.split_off(mid);
        let right = Self {
            items: right_items,
            ids: right_ids,
            extra: self.extra.clone(),
            max_failures_before_abort: self.max_failures_before_abort,
            tracker: self.tracker.clone(),
        };
        (self, right)
    }

    /// `{"items": [...], ...extra}`. Each item goes through its own
    /// `Serialize` impl unchanged, so every field it emits reaches the server.
    pub fn envelope(&self) -> Result<Value, serde_json::Error> {
        let mut envelope = self.extra.clone();
        let items = self
            .items
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()?;
        envelope.insert("items".to_string(), Value::Array(items));
        Ok(Value::Object(envelope))
    }
}

/// What is sent as the request body.
#[derive(Debug, Clone)]
pub enum Body<T: BatchItem> {
    Empty,
    /// Sent as-is (before optional compression).
    Raw(Vec<u8>),
    Items(ItemBody<T>),
}

/// One logical HTTP call and its attempt counters.
#[derive(Debug, Clone)]
pub struct Request<T: BatchItem = Value> {
    pub endpoint: String,
    pub method: HttpMethod,
    pub parameters: Vec<(String, String)>,
    /// Overrides the client's default `cdf-version` header.
    pub api_version: Option<String>,
    pub connect_attempts: u32,
    pub read_attempts: u32,
    pub status_attempts: u32,
    pub body: Body<T>,
}

impl Request<Value> {
    pub fn get(endpoint: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, endpoint, Body::Empty)
    }

    pub fn delete(endpoint: impl Into<String>) -> Self {
        Self::new(HttpMethod::Delete, endpoint, Body::Empty)
    }

    /// A request with an opaque body.
    pub fn raw(method: HttpMethod, endpoint: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self::new(method, endpoint, Body::Raw(body.into()))
    }

    /// A request whose body is `value` serialized to JSON, sent opaquely.
    pub fn json<S: Serialize>(
        method: HttpMethod,
        endpoint: impl Into<String>,
        value: &S,
    ) -> Result<Self, HttpClientError> {
        Ok(Self::raw(method, endpoint, serde_json::to_vec(value)?))
    }
}

impl<T: BatchItem> Request<T> {
    pub fn new(method: HttpMethod, endpoint: impl Into<String>, body: Body<T>) -> Self {
        Self {
            endpoint: endpoint.into(),
            method,
            parameters: Vec::new(),
            api_version: None,
            connect_attempts: 0,
            read_attempts: 0,
            status_attempts: 0,
            body,
        }
    }

    /// An items request, typically `POST .../byids` or `POST .../items`.
    pub fn items(method: HttpMethod, endpoint: impl Into<String>, body: ItemBody<T>) -> Self {
        Self::new(method, endpoint, Body::Items(body))
    }

    #[must_use]
    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.push((key.into(), value.into()));
        self
    }

    #[must_use]
    pub fn with_api_version(mut self, version: impl Into<String>) -> Self {
        self.api_version = Some(version.into());
        self
    }

    pub fn total_attempts(&self) -> u32 {
        self.connect_attempts + self.read_attempts + self.status_attempts
    }

    pub fn item_body(&self) -> Option<&ItemBody<T>> {
        match &self.body {
            Body::Items(items) => Some(items),
            _ => None,
        }
    }

    pub(crate) fn item_body_mut(&mut self) -> Option<&mut ItemBody<T>> {
        match &mut self.body {
            Body::Items(items) => Some(items),
            _ => None,
        }
    }

    /// Zero for requests without an items body.
    pub fn item_count(&self) -> usize {
        self.item_body().map_or(0, ItemBody::len)
    }

    /// `None` for requests without an items body.
    pub fn item_ids(&self) -> Option<Vec<T::Id>> {
        self.item_body().map(|items| items.ids().to_vec())
    }

    /// Same call and counters, different body.
    pub(crate) fn with_body(&self, body: Body<T>) -> Self {
        Self {
            endpoint: self.endpoint.clone(),
            method: self.method,
            parameters: self.parameters.clone(),
            api_version: self.api_version.clone(),
            connect_attempts: self.connect_attempts,
            read_attempts: self.read_attempts,
            status_attempts: self.status_attempts,
            body,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Clone, Serialize)]
    #[serde(rename_all = "camelCase")]
    struct Asset {
        external_id: String,
        description: Option<String>,
    }

    impl BatchItem for Asset {
        type Id = String;

        fn item_id(&self) -> Result<String, HttpClientError> {
            Ok(self.external_id.clone())
        }
    }

    fn assets(n: usize) -> Vec<Asset> {
        (0..n)
            .map(|i| Asset {
                external_id: format!("asset-{i}"),
                description: None,
            })
            .collect()
    }

    #[test]
    fn ids_are_computed_in_item_order() {
        let body = ItemBody::new(assets(3)).unwrap();
        assert_eq!(body.ids(), ["asset-0", "asset-1", "asset-2"]);
    }

    #[test]
    fn split_partitions_items_and_ids_in_order() {
        let body = ItemBody::new(assets(5))
            .unwrap()
            .with_extra("upsert", json!(true));
        let (left, right) = body.split(2);

        assert_eq!(left.len(), 2);
        assert_eq!(right.len(), 3);
        assert_eq!(left.ids(), ["asset-0", "asset-1"]);
        assert_eq!(right.ids(), ["asset-2", "asset-3", "asset-4"]);
        assert_eq!(right.items()[0].external_id, "asset-2");
        assert_eq!(left.extra()["upsert"], json!(true));
        assert_eq!(right.extra()["upsert"], json!(true));
    }

    #[test]
    fn split_past_end_leaves_right_empty() {
        let (left, right) = ItemBody::new(assets(2)).unwrap().split(10);
        assert_eq!(left.len(), 2);
        assert!(right.is_empty());
    }

    #[test]
    fn split_children_share_tracker() {
        let mut body = ItemBody::new(assets(4))
            .unwrap()
            .with_max_failures_before_abort(7);
        assert!(body.split_tracker().is_none());

        let tracker = body.split_tracker_or_init();
        assert_eq!(tracker.limit(), 7);

        let (left, right) = body.split(2);
        let left_tracker = left.split_tracker().unwrap();
        let right_tracker = right.split_tracker().unwrap();
        assert!(left_tracker.shares_budget_with(&tracker));
        assert!(right_tracker.shares_budget_with(&tracker));
    }

    #[test]
    fn envelope_keeps_null_fields_and_extra_keys() {
        let body = ItemBody::new(assets(1))
            .unwrap()
            .with_extra("ignoreUnknownIds", json!(true));
        let envelope = body.envelope().unwrap();
        assert_eq!(
            envelope,
            json!({
                "items": [{"externalId": "asset-0", "description": null}],
                "ignoreUnknownIds": true
            })
        );
    }

    #[test]
    fn envelope_items_key_wins_over_extra() {
        let body = ItemBody::new(assets(1))
            .unwrap()
            .with_extra("items", json!("ignored"));
        let envelope = body.envelope().unwrap();
        assert!(envelope["items"].is_array());
    }

    #[test]
    fn json_value_ids_follow_identifier_convention() {
        let instance = json!({"space": "sp", "externalId": "x", "instanceType": "node", "properties": {}});
        assert_eq!(
            instance.item_id().unwrap(),
            json!({"space": "sp", "externalId": "x", "instanceType": "node"})
        );
        assert_eq!(
            json!({"externalId": "ts-1", "id": 5}).item_id().unwrap(),
            json!({"externalId": "ts-1"})
        );
        assert_eq!(json!({"id": 42}).item_id().unwrap(), json!({"id": 42}));
    }

    #[test]
    fn unidentifiable_item_is_rejected() {
        let err = ItemBody::new(vec![json!({"name": "no id"})]).unwrap_err();
        assert!(matches!(err, HttpClientError::ItemId(_)));

        let err = ItemBody::new(vec![json!(3)]).unwrap_err();
        assert!(matches!(err, HttpClientError::ItemId(_)));
    }

    #[test]
    fn request_counters_start_at_zero() {
        let request = Request::get("http://localhost:3000/items").with_parameter("limit", "10");
        assert_eq!(request.total_attempts(), 0);
        assert_eq!(request.item_count(), 0);
        assert!(request.item_ids().is_none());
        assert_eq!(request.parameters, vec![("limit".to_string(), "10".to_string())]);
    }

    #[test]
    fn items_request_exposes_ids() {
        let request = Request::items(
            HttpMethod::Post,
            "http://localhost:3000/items",
            ItemBody::new(assets(2)).unwrap(),
        );
        assert_eq!(request.item_count(), 2);
        assert_eq!(
            request.item_ids(),
            Some(vec!["asset-0".to_string(), "asset-1".to_string()])
        );
    }

    #[test]
    fn json_request_serializes_value() {
        let request = Request::json(
            HttpMethod::Post,
            "http://localhost:3000/items/list",
            &json!({"limit": 5}),
        )
        .unwrap();
        match request.body {
            Body::Raw(bytes) => assert_eq!(bytes, br#"{"limit":5}"#),
            other => panic!("expected raw body, got {other:?}"),
        }
    }
}
