//! Typed errors for exchange calls.
//!
//! Every REST call returns `ExchangeError` so callers can tell causes that a
//! session renewal may fix apart from terminal rejections.

use serde::Deserialize;
use thiserror::Error;

/// Binance error codes for rejected orders due to missing funds.
const INSUFFICIENT_FUNDS_CODES: &[i64] = &[-2018, -2019, -2027, -2028];

/// Binance error codes for an invalid or expired signed session.
const SESSION_CODES: &[i64] = &[-1021, -1022, -2014, -2015];

#[derive(Debug, Error)]
pub enum ExchangeError {
    /// Request never produced a usable HTTP response.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Exchange answered with an error body.
    #[error("binance error {code}: {msg}")]
    Api { code: i64, msg: String },

    /// Response arrived but could not be interpreted.
    #[error("unexpected response: {0}")]
    Decode(String),

    /// Client could not be built from the supplied settings.
    #[error("invalid client configuration: {0}")]
    Config(String),
}

/// Coarse classification driving retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Connectivity failure; a fresh session may succeed.
    Network,
    /// Expired timestamp, bad signature or revoked key.
    Session,
    /// Margin or balance too small for the order. Never retried.
    InsufficientFunds,
    /// Any other exchange-side refusal.
    Rejected,
}

impl ExchangeError {
    pub fn class(&self) -> ErrorClass {
        match self {
            ExchangeError::Transport(_) => ErrorClass::Network,
            ExchangeError::Api { code, .. } if INSUFFICIENT_FUNDS_CODES.contains(code) => {
                ErrorClass::InsufficientFunds
            }
            ExchangeError::Api { code, .. } if SESSION_CODES.contains(code) => ErrorClass::Session,
            ExchangeError::Api { .. } => ErrorClass::Rejected,
            ExchangeError::Decode(_) => ErrorClass::Rejected,
            ExchangeError::Config(_) => ErrorClass::Session,
        }
    }

    /// Whether the exchange may have acted on the request even though no
    /// usable answer came back.
    ///
    /// Refused connections never reached Binance. Timeouts, dropped
    /// responses and unreadable bodies leave the outcome open.
    pub fn outcome_unknown(&self) -> bool {
        match self {
            ExchangeError::Transport(e) => !(e.is_connect() || e.is_builder()),
            ExchangeError::Decode(_) => true,
            ExchangeError::Api { .. } | ExchangeError::Config(_) => false,
        }
    }
}

/// Error body returned by Binance on non-2xx responses.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ApiErrorBody {
    pub code: i64,
    pub msg: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api(code: i64) -> ExchangeError {
        ExchangeError::Api {
            code,
            msg: "test".to_string(),
        }
    }

    #[test]
    fn test_margin_codes_are_insufficient_funds() {
        assert_eq!(api(-2019).class(), ErrorClass::InsufficientFunds);
        assert_eq!(api(-2018).class(), ErrorClass::InsufficientFunds);
    }

    #[test]
    fn test_timestamp_and_key_codes_are_session() {
        assert_eq!(api(-1021).class(), ErrorClass::Session);
        assert_eq!(api(-2015).class(), ErrorClass::Session);
    }

    #[test]
    fn test_unknown_codes_are_rejections() {
        assert_eq!(api(-4164).class(), ErrorClass::Rejected);
        assert_eq!(
            ExchangeError::Decode("garbage".into()).class(),
            ErrorClass::Rejected
        );
    }

    #[test]
    fn test_answered_requests_have_known_outcome() {
        assert!(!api(-1021).outcome_unknown());
        assert!(!ExchangeError::Config("no key".into()).outcome_unknown());
        assert!(ExchangeError::Decode("truncated".into()).outcome_unknown());
    }

    #[tokio::test]
    async fn test_refused_connection_has_known_outcome() {
        let err = reqwest::Client::new()
            .get("http://127.0.0.1:1/fapi/v1/order")
            .send()
            .await
            .unwrap_err();
        let err = ExchangeError::from(err);
        assert_eq!(err.class(), ErrorClass::Network);
        assert!(!err.outcome_unknown());
    }

    #[test]
    fn test_error_body_parses() {
        let body: ApiErrorBody =
            serde_json::from_str(r#"{"code":-2019,"msg":"Margin is insufficient."}"#).unwrap();
        assert_eq!(body.code, -2019);
        assert_eq!(body.msg, "Margin is insufficient.");
    }
}
