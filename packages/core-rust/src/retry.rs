//! Retry tokens: the persisted state of an incomplete delivery.
//!
//! # Wire format
//!
//! Tokens serialize to compact JSON, `{"retryCount":2,"items":["a","b"]}`,
//! and are stored next to the header's task record between queue deliveries.
//! Absent or blank text parses to "no prior token".

use serde::{Deserialize, Serialize};

/// Identifiers of the sub-items of a report that still need delivery.
pub type RetryItems = Vec<String>;

/// Sentinel item meaning "every item of the report".
pub const ALL_ITEMS: &str = "*";

/// A retry item list naming the whole report.
#[must_use]
pub fn all_items() -> RetryItems {
    vec![ALL_ITEMS.to_string()]
}

/// True when `items` is the all-items sentinel.
#[must_use]
pub fn is_all_items(items: &[String]) -> bool {
    matches!(items, [only] if only == ALL_ITEMS)
}

/// True when a transport should (re)send the whole report: either this is a
/// first attempt or the previous attempt asked for everything again.
#[must_use]
pub fn sends_everything(retry_items: Option<&[String]>) -> bool {
    retry_items.is_none_or(is_all_items)
}

/// Errors from decoding a persisted retry token.
#[derive(Debug, thiserror::Error)]
pub enum RetryTokenError {
    #[error("malformed retry token: {0}")]
    Malformed(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// RetryToken
// ---------------------------------------------------------------------------

/// In-flight retry state for one report/receiver pair.
///
/// `items` names what still has to be sent; the next attempt is attempt
/// number `retry_count + 1`. A token with no items is never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryToken {
    pub retry_count: u32,
    pub items: RetryItems,
}

impl RetryToken {
    pub fn new(retry_count: u32, items: RetryItems) -> Self {
        Self { retry_count, items }
    }

    /// The token that follows `prior` after an attempt left `remaining`
    /// undelivered, or `None` when everything went through.
    #[must_use]
    pub fn next(prior: Option<&Self>, remaining: RetryItems) -> Option<Self> {
        if remaining.is_empty() {
            return None;
        }
        let retry_count = prior.map_or(0, |token| token.retry_count) + 1;
        Some(Self::new(retry_count, remaining))
    }

    /// Encode for persistence.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, RetryTokenError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a persisted token. Absent or blank input, and tokens whose item
    /// list is empty, yield `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns [`RetryTokenError::Malformed`] for text that is not a token.
    pub fn from_json(text: Option<&str>) -> Result<Option<Self>, RetryTokenError> {
        let Some(text) = text.map(str::trim).filter(|t| !t.is_empty()) else {
            return Ok(None);
        };
        let token: Self = serde_json::from_str(text)?;
        Ok((!token.items.is_empty()).then_some(token))
    }
}
