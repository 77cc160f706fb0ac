//! Blocking batch HTTP client with retries and adaptive splitting.
//!
//! # Design
//! `send` performs at most one network call and returns what should happen
//! next as data: terminal outcomes, or requests that must be sent again.
//! `send_with_retries` drains those follow-up requests through a FIFO queue,
//! so stack depth stays flat no matter how deep retries or splits go.
//!
//! Every follow-up strictly consumes a budget: transport and status retries
//! bump a per-class counter bounded by `max_retries`, and splits halve the
//! batch while charging the tree-wide `SplitFailureTracker`.

use std::collections::VecDeque;
use std::io::Write;
use std::sync::Arc;

use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::{debug, warn};

use crate::backoff::backoff;
use crate::config::HttpClientConfig;
use crate::credentials::CredentialProvider;
use crate::error::{HttpClientError, TransportError, TransportErrorKind};
use crate::http::{HttpRequest, HttpResponse};
use crate::outcome::{FailedRequest, FailedResponse, Outcome, SuccessResponse};
use crate::request::{BatchItem, Body, ItemBody, Request};
use crate::transport::{Transport, UreqTransport};
use crate::types::ErrorDetails;

/// Client for an item-limited, rate-limited REST API.
///
/// Safe to share across threads; each `send`/`send_with_retries` call is
/// independent and blocks the calling thread.
pub struct HttpClient<X: Transport = UreqTransport> {
    config: HttpClientConfig,
    credentials: Arc<dyn CredentialProvider>,
    transport: X,
}

impl HttpClient<UreqTransport> {
    /// A client with its own connection pool.
    pub fn new(config: HttpClientConfig, credentials: Arc<dyn CredentialProvider>) -> Self {
        let transport = UreqTransport::new(&config);
        Self::with_transport(config, credentials, transport)
    }
}

impl<X: Transport> HttpClient<X> {
    pub fn with_transport(
        config: HttpClientConfig,
        credentials: Arc<dyn CredentialProvider>,
        transport: X,
    ) -> Self {
        Self {
            config,
            credentials,
            transport,
        }
    }

    pub fn config(&self) -> &HttpClientConfig {
        &self.config
    }

    pub fn transport(&self) -> &X {
        &self.transport
    }

    /// Release the connection pool. Dropping the client does the same.
    pub fn close(self) {
        debug!(product = %self.config.product_name, "closing http client");
    }

    /// Send `request` until every resulting outcome is terminal.
    ///
    /// Only fresh requests are accepted: a request with any non-zero attempt
    /// counter is rejected with [`HttpClientError::AlreadyAttempted`].
    pub fn send_with_retries<T: BatchItem>(
        &self,
        request: Request<T>,
    ) -> Result<Vec<Outcome<T>>, HttpClientError> {
        if request.total_attempts() != 0 {
            return Err(HttpClientError::AlreadyAttempted {
                connect: request.connect_attempts,
                read: request.read_attempts,
                status: request.status_attempts,
            });
        }

        let mut queue = VecDeque::from([request]);
        let mut results = Vec::new();
        while let Some(next) = queue.pop_front() {
            for outcome in self.send(next)? {
                match outcome {
                    Outcome::Request(follow_up) => queue.push_back(follow_up),
                    terminal => results.push(terminal),
                }
            }
        }
        Ok(results)
    }

    /// Make a single attempt.
    ///
    /// Returned `Outcome::Request` values have already waited out their
    /// backoff and can be sent again immediately.
    pub fn send<T: BatchItem>(
        &self,
        request: Request<T>,
    ) -> Result<Vec<Outcome<T>>, HttpClientError> {
        if let Some(tracker) = request.item_body().and_then(|items| items.split_tracker()) {
            if tracker.limit_reached() {
                let failed_splits = tracker.failed_splits();
                debug!(
                    endpoint = %request.endpoint,
                    items = request.item_count(),
                    failed_splits,
                    "split budget exhausted, not sending"
                );
                return Ok(vec![Outcome::FailedToSend(FailedRequest {
                    message: format!(
                        "Request aborted after {failed_splits} failed split attempts"
                    ),
                    ids: request.item_ids(),
                })]);
            }
        }

        let http_request = self.build_http_request(&request)?;
        debug!(
            method = %request.method,
            endpoint = %request.endpoint,
            items = request.item_count(),
            attempt = request.total_attempts(),
            "sending request"
        );

        match self.transport.execute(&http_request) {
            Ok(response) => Ok(self.handle_response(request, response)),
            Err(error) => Ok(vec![self.handle_transport_error(request, error)]),
        }
    }

    fn handle_transport_error<T: BatchItem>(
        &self,
        mut request: Request<T>,
        error: TransportError,
    ) -> Outcome<T> {
        let attempts = match error.kind {
            TransportErrorKind::Connect => {
                request.connect_attempts += 1;
                request.connect_attempts
            }
            TransportErrorKind::Read => {
                request.read_attempts += 1;
                request.read_attempts
            }
            TransportErrorKind::Other => {
                warn!(endpoint = %request.endpoint, %error, "request failed without a response");
                return Outcome::FailedToSend(FailedRequest {
                    message: error.to_string(),
                    ids: request.item_ids(),
                });
            }
        };

        if attempts <= self.config.max_retries {
            debug!(endpoint = %request.endpoint, %error, attempt = attempts, "retrying after transport error");
            self.sleep(request.total_attempts());
            return Outcome::Request(request);
        }

        warn!(endpoint = %request.endpoint, %error, attempts, "giving up after transport errors");
        Outcome::FailedToSend(FailedRequest {
            message: format!("{} error after {attempts} attempts: {}", error.kind, error.message),
            ids: request.item_ids(),
        })
    }

    fn handle_response<T: BatchItem>(
        &self,
        request: Request<T>,
        response: HttpResponse,
    ) -> Vec<Outcome<T>> {
        if response.is_success() {
            return vec![Outcome::Success(SuccessResponse {
                code: response.status,
                ids: request.item_ids(),
                body: response.body,
            })];
        }

        if request.item_count() > 1
            && self.config.splittable_status_codes.contains(&response.status)
        {
            return self.split(request, response);
        }

        vec![self.retry_or_fail(request, response)]
    }

    /// Halve a failed batch, charging the shared split budget once.
    fn split<T: BatchItem>(&self, mut request: Request<T>, response: HttpResponse) -> Vec<Outcome<T>> {
        let items = request.item_count();
        let mid = items / 2;
        if mid == 0 {
            return vec![self.retry_or_fail(request, response)];
        }
        let Some(tracker) = request.item_body_mut().map(ItemBody::split_tracker_or_init) else {
            return vec![self.retry_or_fail(request, response)];
        };

        let failed_splits = tracker.register_failure();
        if tracker.limit_reached() {
            warn!(
                endpoint = %request.endpoint,
                status = response.status,
                items,
                failed_splits,
                "split budget exhausted"
            );
            return vec![Outcome::Failure(failed_response(&request, response))];
        }

        // A 5xx split is also load shedding and counts as a retry. A 4xx
        // split is a search for bad items and leaves the budget alone.
        if response.is_server_error() {
            request.status_attempts += 1;
        }

        let (left, right) = match std::mem::replace(&mut request.body, Body::Empty) {
            Body::Items(body) => body.split(mid),
            other => {
                request.body = other;
                return vec![self.retry_or_fail(request, response)];
            }
        };
        debug!(
            endpoint = %request.endpoint,
            status = response.status,
            items,
            left = left.len(),
            right = right.len(),
            failed_splits,
            "splitting request"
        );
        vec![
            Outcome::Request(request.with_body(Body::Items(left))),
            Outcome::Request(request.with_body(Body::Items(right))),
        ]
    }

    fn retry_or_fail<T: BatchItem>(&self, mut request: Request<T>, response: HttpResponse) -> Outcome<T> {
        let error = ErrorDetails::from_response(response.status, &response.body);
        let retryable = self.config.retryable_status_codes.contains(&response.status)
            || error.auto_retryable();

        if retryable && request.status_attempts < self.config.max_retries {
            request.status_attempts += 1;
            debug!(
                endpoint = %request.endpoint,
                status = response.status,
                attempt = request.status_attempts,
                "retrying after status error"
            );
            self.sleep(request.total_attempts());
            return Outcome::Request(request);
        }

        if retryable {
            warn!(
                endpoint = %request.endpoint,
                status = response.status,
                attempts = request.status_attempts,
                "giving up after status errors"
            );
        }
        Outcome::Failure(FailedResponse {
            code: response.status,
            body: response.body,
            error,
            ids: request.item_ids(),
        })
    }

    fn sleep(&self, attempt: u32) {
        let delay = backoff(attempt, self.config.max_backoff);
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
    }

    fn build_http_request<T: BatchItem>(
        &self,
        request: &Request<T>,
    ) -> Result<HttpRequest, HttpClientError> {
        let body = self.serialize_body(&request.body)?;
        let mut headers = self.build_headers(request.api_version.as_deref())?;
        if body.is_some() && self.config.gzip_enabled() {
            headers.push(("content-encoding".to_string(), "gzip".to_string()));
        }
        Ok(HttpRequest {
            method: request.method,
            url: request.endpoint.clone(),
            query: request.parameters.clone(),
            headers,
            body,
        })
    }

    fn build_headers(&self, api_version: Option<&str>) -> Result<Vec<(String, String)>, HttpClientError> {
        let config = &self.config;
        let (auth_name, auth_value) = self.credentials.authorization_header()?;
        Ok(vec![
            ("user-agent".to_string(), self.user_agent()),
            (auth_name, auth_value),
            ("content-type".to_string(), "application/json".to_string()),
            ("accept".to_string(), "application/json".to_string()),
            (
                "x-cdp-sdk".to_string(),
                format!("{}:{}", config.product_name, config.product_version),
            ),
            (
                "cdf-version".to_string(),
                api_version.unwrap_or(&config.api_version).to_string(),
            ),
        ])
    }

    fn user_agent(&self) -> String {
        format!(
            "{}/{} rust-ureq ({}; {})",
            self.config.product_name,
            self.config.product_version,
            std::env::consts::OS,
            std::env::consts::ARCH,
        )
    }

    fn serialize_body<T: BatchItem>(&self, body: &Body<T>) -> Result<Option<Vec<u8>>, HttpClientError> {
        let bytes = match body {
            Body::Empty => return Ok(None),
            Body::Raw(bytes) => bytes.clone(),
            Body::Items(items) => serde_json::to_vec(&items.envelope()?)?,
        };
        if !self.config.gzip_enabled() {
            return Ok(Some(bytes));
        }
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&bytes)?;
        Ok(Some(encoder.finish()?))
    }
}

fn failed_response<T: BatchItem>(request: &Request<T>, response: HttpResponse) -> FailedResponse<T::Id> {
    FailedResponse {
        code: response.status,
        error: ErrorDetails::from_response(response.status, &response.body),
        body: response.body,
        ids: request.item_ids(),
    }
}
