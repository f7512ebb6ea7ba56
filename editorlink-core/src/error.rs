//! Error types shared by the coalescer and its callers

use serde::{Deserialize, Serialize};

/// Failure reasons that can be delivered to a waiter.
///
/// Cloneable so a single outcome can be fanned out to every waiter of a key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum CoalesceError {
    #[error("Invalid coalesce key: {reason}")]
    InvalidKey { reason: String },

    #[error("Operation failed: {detail}")]
    OperationFailed { detail: String },

    #[error("Operation for '{key}' timed out after {elapsed_ms}ms")]
    Timeout { key: String, elapsed_ms: u64 },

    #[error("Could not deliver result for request {request_id}")]
    DeliveryFailed { request_id: String },

    #[error("Blueprint {key} is busy with another modification.")]
    Busy { key: String },
}

impl CoalesceError {
    pub fn invalid_key(reason: impl Into<String>) -> Self {
        Self::InvalidKey {
            reason: reason.into(),
        }
    }

    pub fn operation_failed(detail: impl Into<String>) -> Self {
        Self::OperationFailed {
            detail: detail.into(),
        }
    }

    /// Wire error code sent back to automation clients
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidKey { .. } => "INVALID_KEY",
            Self::OperationFailed { .. } => "OPERATION_FAILED",
            Self::Timeout { .. } => "TIMEOUT",
            Self::DeliveryFailed { .. } => "DELIVERY_FAILED",
            Self::Busy { .. } => "BLUEPRINT_BUSY",
        }
    }
}

/// Result of a coalesced operation, identical for every waiter of a key
pub type Outcome = Result<serde_json::Value, CoalesceError>;
