//! Resilient, blocking batch HTTP client for item-limited REST APIs.
//!
//! # Overview
//! A caller describes one logical call as a [`Request`], optionally carrying
//! a batch of items, and hands it to [`HttpClient::send_with_retries`]. The
//! client retries transport failures and retryable statuses with jittered
//! exponential backoff, and when a multi-item batch is rejected it splits the
//! batch in half and resends both halves, narrowing down to the items the
//! server refuses. Every item ends up in exactly one terminal [`Outcome`].
//!
//! # Design
//! - `send` makes one attempt and returns follow-ups as data; the retry loop
//!   is an explicit queue, never recursion.
//! - The network sits behind the [`Transport`] trait. [`UreqTransport`] owns
//!   a pooled `ureq::Agent`; tests substitute scripted transports.
//! - Splits of one batch share a [`SplitFailureTracker`], which bounds the
//!   total number of failed splits across the whole tree.
//! - Calls block. Run them on worker threads for concurrency; the client is
//!   `Sync` and its pool is shared.

pub mod backoff;
pub mod client;
pub mod config;
pub mod credentials;
pub mod error;
pub mod http;
pub mod outcome;
pub mod request;
pub mod tracker;
pub mod transport;
pub mod types;

pub use backoff::backoff;
pub use client::HttpClient;
pub use config::HttpClientConfig;
pub use credentials::{CredentialProvider, Token};
pub use error::{HttpClientError, TransportError, TransportErrorKind};
pub use http::{HttpMethod, HttpRequest, HttpResponse};
pub use outcome::{FailedRequest, FailedResponse, ItemsSummary, Outcome, SuccessResponse};
pub use request::{BatchItem, Body, ItemBody, Request};
pub use tracker::SplitFailureTracker;
pub use transport::{Transport, UreqTransport};
pub use types::ErrorDetails;
