//! Results of sending a request.
//!
//! # Design
//! `Outcome` is closed: a request either has to be sent again
//! (`Outcome::Request`) or has reached one of three terminal states. Item
//! requests attach the ids of the items they carried, so a split batch
//! reports every item exactly once across its leaves.

use serde_json::Value;

use crate::request::{BatchItem, Request};
use crate::types::ErrorDetails;

/// A 2xx response.
#[derive(Debug, Clone, PartialEq)]
pub struct SuccessResponse<I> {
    pub code: u16,
    pub body: String,
    /// Ids of the items in the request, in request order.
    pub ids: Option<Vec<I>>,
}

impl<I> SuccessResponse<I> {
    pub fn json(&self) -> Result<Value, serde_json::Error> {
        serde_json::from_str(&self.body)
    }
}

/// A non-2xx response that will not be retried or split further.
#[derive(Debug, Clone, PartialEq)]
pub struct FailedResponse<I> {
    pub code: u16,
    pub body: String,
    pub error: ErrorDetails,
    pub ids: Option<Vec<I>>,
}

/// A request that never got an HTTP response, or was abandoned before one.
#[derive(Debug, Clone, PartialEq)]
pub struct FailedRequest<I> {
    pub message: String,
    pub ids: Option<Vec<I>>,
}

#[derive(Debug, Clone)]
pub enum Outcome<T: BatchItem> {
    /// Not terminal: send again.
    Request(Request<T>),
    Success(SuccessResponse<T::Id>),
    Failure(FailedResponse<T::Id>),
    FailedToSend(FailedRequest<T::Id>),
}

impl<T: BatchItem> Outcome<T> {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Outcome::Request(_))
    }

    /// Item ids carried by a terminal outcome of an items request.
    pub fn ids(&self) -> Option<&[T::Id]> {
        match self {
            Outcome::Request(_) => None,
            Outcome::Success(success) => success.ids.as_deref(),
            Outcome::Failure(failure) => failure.ids.as_deref(),
            Outcome::FailedToSend(failed) => failed.ids.as_deref(),
        }
    }
}

/// Terminal outcomes of an items request folded per item.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemsSummary<I> {
    pub succeeded: Vec<I>,
    pub failed: Vec<I>,
    pub unsent: Vec<I>,
    /// Distinct failure messages, in first-seen order.
    pub errors: Vec<String>,
}

impl<I: Clone + PartialEq> ItemsSummary<I> {
    pub fn from_outcomes<T>(outcomes: &[Outcome<T>]) -> Self
    where
        T: BatchItem<Id = I>,
    {
        let mut summary = Self {
            succeeded: Vec::new(),
            failed: Vec::new(),
            unsent: Vec::new(),
            errors: Vec::new(),
        };
        for outcome in outcomes {
            match outcome {
                Outcome::Request(_) => {}
                Outcome::Success(success) => {
                    summary.succeeded.extend(success.ids.iter().flatten().cloned());
                }
                Outcome::Failure(failure) => {
                    summary.failed.extend(failure.ids.iter().flatten().cloned());
                    summary.record_error(&failure.error.message);
                }
                Outcome::FailedToSend(failed) => {
                    summary.unsent.extend(failed.ids.iter().flatten().cloned());
                    summary.record_error(&failed.message);
                }
            }
        }
        summary
    }

    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failed.len() + self.unsent.len()
    }

    fn record_error(&mut self, message: &str) {
        if !self.errors.iter().any(|seen| seen == message) {
            self.errors.push(message.to_string());
        }
    }
}
