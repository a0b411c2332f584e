//! Order failures as seen by the strategy.

use crate::exchange::{ErrorClass, ExchangeError};
use thiserror::Error;

/// Why an order did not result in a confirmed position change.
#[derive(Debug, Error)]
pub enum OrderFailure {
    /// Balance or margin too small. Terminal for this decision.
    #[error("insufficient margin: {0}")]
    InsufficientMargin(String),

    /// Signature, timestamp or key problem.
    #[error("session error: {0}")]
    Session(String),

    /// Connectivity failure before a response arrived.
    #[error("network error: {0}")]
    Network(String),

    /// Exchange refused the order for another reason.
    #[error("order rejected ({code:?}): {reason}")]
    Rejected { code: Option<i64>, reason: String },

    /// Order may have reached the exchange but no usable answer came back.
    #[error("order outcome unknown: {0}")]
    Indeterminate(String),

    /// Order was accepted but the position never reflected it.
    #[error("position change not confirmed after {attempts} checks")]
    Unconfirmed { attempts: u32 },
}

/// Flat tag for an `OrderFailure`, used in logs and matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    InsufficientMargin,
    Session,
    Network,
    Rejected,
    Indeterminate,
    Unconfirmed,
}

impl OrderFailure {
    pub fn kind(&self) -> FailureKind {
        match self {
            OrderFailure::InsufficientMargin(_) => FailureKind::InsufficientMargin,
            OrderFailure::Session(_) => FailureKind::Session,
            OrderFailure::Network(_) => FailureKind::Network,
            OrderFailure::Rejected { .. } => FailureKind::Rejected,
            OrderFailure::Indeterminate(_) => FailureKind::Indeterminate,
            OrderFailure::Unconfirmed { .. } => FailureKind::Unconfirmed,
        }
    }

    /// Terminal failures are never resubmitted.
    ///
    /// Indeterminate and unconfirmed orders may already be live on the
    /// exchange, so sending them again could double the position.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderFailure::InsufficientMargin(_)
                | OrderFailure::Indeterminate(_)
                | OrderFailure::Unconfirmed { .. }
        )
    }
}

impl From<ExchangeError> for OrderFailure {
    fn from(error: ExchangeError) -> Self {
        let message = error.to_string();
        match error.class() {
            ErrorClass::InsufficientFunds => OrderFailure::InsufficientMargin(message),
            ErrorClass::Session => OrderFailure::Session(message),
            ErrorClass::Network => OrderFailure::Network(message),
            ErrorClass::Rejected => OrderFailure::Rejected {
                code: match &error {
                    ExchangeError::Api { code, .. } => Some(*code),
                    _ => None,
                },
                reason: message,
            },
        }
    }
}
