//! Error types
//!
//! Slot-level failures are collected into an [`AggregatedError`] instead of
//! aborting the whole registry. Accessor failures use [`RegistryError`].

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Failure of a single slot, during construction or release
#[derive(Debug, Error)]
pub enum SlotError {
    /// A configuration field the slot needs is missing or invalid
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The client constructor itself failed (auth, network, bad option)
    #[error("construction failed: {0:#}")]
    Construction(anyhow::Error),

    #[error("construction timed out after {0:?}")]
    Timeout(Duration),

    #[error("construction cancelled")]
    Cancelled,

    /// Closing a live handle failed
    #[error("release failed: {0:#}")]
    Release(anyhow::Error),
}

impl SlotError {
    pub fn is_configuration(&self) -> bool {
        matches!(self, SlotError::Configuration(_))
    }
}

/// One `(slot, cause)` entry of an aggregated error
#[derive(Debug)]
pub struct SlotFailure {
    pub slot: String,
    pub error: SlotError,
}

impl fmt::Display for SlotFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.slot, self.error)
    }
}

/// Zero or more independent slot failures, ordered by slot name
#[derive(Debug, Default)]
pub struct AggregatedError {
    failures: Vec<SlotFailure>,
}

impl AggregatedError {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failure for `slot`
    pub fn push(&mut self, slot: impl Into<String>, error: SlotError) {
        self.failures.push(SlotFailure {
            slot: slot.into(),
            error,
        });
        // stable: two failures for the same slot keep their insertion order
        self.failures.sort_by(|a, b| a.slot.cmp(&b.slot));
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn len(&self) -> usize {
        self.failures.len()
    }

    pub fn failures(&self) -> &[SlotFailure] {
        &self.failures
    }

    /// Names of the failed slots, in order
    pub fn slots(&self) -> Vec<&str> {
        self.failures.iter().map(|f| f.slot.as_str()).collect()
    }

    /// Error recorded for `slot`, if any
    pub fn get(&self, slot: &str) -> Option<&SlotError> {
        self.failures
            .iter()
            .find(|f| f.slot == slot)
            .map(|f| &f.error)
    }

    /// `Ok(())` when nothing was recorded, otherwise `Err(self)`
    pub fn into_result(self) -> Result<(), AggregatedError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for AggregatedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} slot(s) failed", self.failures.len())?;
        for failure in &self.failures {
            write!(f, "; {}", failure)?;
        }
        Ok(())
    }
}

impl std::error::Error for AggregatedError {}

impl IntoIterator for AggregatedError {
    type Item = SlotFailure;
    type IntoIter = std::vec::IntoIter<SlotFailure>;

    fn into_iter(self) -> Self::IntoIter {
        self.failures.into_iter()
    }
}

/// Errors returned by registry accessors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// Registry never built, or the slot failed / was not selected
    #[error("slot '{0}' is not initialized")]
    NotInitialized(String),

    #[error("registry is closed; slot '{0}' is no longer available")]
    AlreadyClosed(String),

    #[error("unknown slot '{0}'")]
    UnknownSlot(String),

    #[error("slot '{slot}' does not hold a {expected}")]
    HandleType {
        slot: String,
        expected: &'static str,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failures_sorted_by_slot() {
        let mut errors = AggregatedError::new();
        errors.push("speech", SlotError::Cancelled);
        errors.push("iam", SlotError::Configuration("missing project id".into()));
        errors.push("object-storage", SlotError::Timeout(Duration::from_secs(5)));

        assert_eq!(errors.slots(), vec!["iam", "object-storage", "speech"]);
    }

    #[test]
    fn test_display_keeps_slot_and_cause_text() {
        let mut errors = AggregatedError::new();
        errors.push(
            "key-management",
            SlotError::Construction(anyhow::anyhow!("API request failed: 401 Unauthorized")),
        );
        errors.push("firestore", SlotError::Configuration("project id is required".into()));

        let text = errors.to_string();
        assert!(text.starts_with("2 slot(s) failed"));
        let firestore = text.find("firestore: configuration error: project id is required");
        let kms = text.find("key-management: construction failed: API request failed: 401");
        assert!(firestore.is_some() && kms.is_some());
        assert!(firestore < kms);
    }

    #[test]
    fn test_construction_error_renders_context_chain() {
        let cause = anyhow::anyhow!("connection refused").context("Failed to send request");
        let err = SlotError::Construction(cause);
        assert_eq!(
            err.to_string(),
            "construction failed: Failed to send request: connection refused"
        );
    }

    #[test]
    fn test_into_result() {
        assert!(AggregatedError::new().into_result().is_ok());

        let mut errors = AggregatedError::new();
        errors.push("iot", SlotError::Cancelled);
        let err = errors.into_result().unwrap_err();
        assert!(err.get("iot").is_some());
        assert!(err.get("iam").is_none());
    }
}
