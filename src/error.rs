//! Error types for the DOM bridge.
//!
//! This module defines error codes, the serializable host-call failure, the
//! failure record for isolated script callbacks, and the main error type used
//! throughout the bridge.

use crate::value::HostValue;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes for categorizing errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// The host rejected or failed a foreign call
    HostCallFailed,
    /// The host answered with a value of the wrong shape
    UnexpectedReply,
    /// The host re-entered with a token this environment never minted
    UnknownToken,
    /// A script callback returned an error
    CallbackFailed,
    /// Operation invoked on an object in the wrong state
    InvalidState,
    /// Host call budget exhausted
    ResourceLimit,
    /// Serialization/deserialization error
    SerializationError,
    /// Invalid configuration
    InvalidConfig,
    /// Internal bridge error (bug)
    InternalError,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::HostCallFailed => write!(f, "HOST_CALL_FAILED"),
            ErrorCode::UnexpectedReply => write!(f, "UNEXPECTED_REPLY"),
            ErrorCode::UnknownToken => write!(f, "UNKNOWN_TOKEN"),
            ErrorCode::CallbackFailed => write!(f, "CALLBACK_FAILED"),
            ErrorCode::InvalidState => write!(f, "INVALID_STATE"),
            ErrorCode::ResourceLimit => write!(f, "RESOURCE_LIMIT"),
            ErrorCode::SerializationError => write!(f, "SERIALIZATION_ERROR"),
            ErrorCode::InvalidConfig => write!(f, "INVALID_CONFIG"),
            ErrorCode::InternalError => write!(f, "INTERNAL_ERROR"),
        }
    }
}

/// A foreign call the host refused or failed.
///
/// Carries the operation name and the exact arguments so the failure can be
/// reported back across the boundary without losing context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostCallError {
    /// Wire name of the operation (e.g. `querySelectorAll`)
    pub operation: String,

    /// Arguments passed to the host
    pub args: Vec<HostValue>,

    /// Host-supplied failure message
    pub message: String,
}

impl HostCallError {
    /// Create a new host call error
    pub fn new(
        operation: impl Into<String>,
        args: Vec<HostValue>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            operation: operation.into(),
            args,
            message: message.into(),
        }
    }
}

impl fmt::Display for HostCallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "host call '{}' failed ({} args): {}",
            self.operation,
            self.args.len(),
            self.message
        )
    }
}

impl std::error::Error for HostCallError {}

/// Where a failing script callback was registered
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum CallbackSite {
    /// Event listener for the given event type
    Listener {
        /// Event type being dispatched
        event_type: String,
    },
    /// Timer callback
    Timer,
    /// Animation-frame handler
    AnimationFrame,
    /// XHR `onload` handler
    XhrLoad,
}

impl fmt::Display for CallbackSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallbackSite::Listener { event_type } => write!(f, "'{}' listener", event_type),
            CallbackSite::Timer => write!(f, "timer"),
            CallbackSite::AnimationFrame => write!(f, "animation frame"),
            CallbackSite::XhrLoad => write!(f, "xhr onload"),
        }
    }
}

/// A script callback that returned an error.
///
/// Listener and frame failures are collected instead of aborting the
/// remaining callbacks of the same pass.
#[derive(Debug, thiserror::Error)]
#[error("{site} #{index} failed: {error:#}")]
pub struct CallbackFailure {
    /// Where the callback was registered
    pub site: CallbackSite,
    /// Position of the callback within its pass
    pub index: usize,
    /// The error the callback returned
    pub error: anyhow::Error,
}

impl CallbackFailure {
    /// Create a new callback failure
    pub fn new(site: CallbackSite, index: usize, error: anyhow::Error) -> Self {
        Self { site, index, error }
    }
}

/// Main error type for the bridge
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// Host-side failure of a foreign call
    #[error("{0}")]
    HostCall(#[from] HostCallError),

    /// Host answered with the wrong shape
    #[error("Unexpected reply to '{operation}': expected {expected}")]
    UnexpectedReply {
        /// Operation wire name
        operation: String,
        /// Description of the expected shape
        expected: String,
    },

    /// Host re-entered with a token never minted here
    #[error("Unknown {kind} token {token}")]
    UnknownToken {
        /// Registry kind (`timer`, `xhr`)
        kind: &'static str,
        /// Raw token value
        token: u64,
    },

    /// A single script callback failed
    #[error("Callback failed: {0}")]
    Callback(#[from] CallbackFailure),

    /// Invalid state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Host call budget exhausted
    #[error("Resource limit exceeded: {resource} (limit: {limit})")]
    ResourceLimit {
        /// The exhausted resource
        resource: String,
        /// The configured limit
        limit: u32,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// General error
    #[error("{0}")]
    General(String),
}

impl BridgeError {
    /// Categorize this error
    pub fn code(&self) -> ErrorCode {
        match self {
            BridgeError::HostCall(_) => ErrorCode::HostCallFailed,
            BridgeError::UnexpectedReply { .. } => ErrorCode::UnexpectedReply,
            BridgeError::UnknownToken { .. } => ErrorCode::UnknownToken,
            BridgeError::Callback(_) => ErrorCode::CallbackFailed,
            BridgeError::InvalidState(_) => ErrorCode::InvalidState,
            BridgeError::ResourceLimit { .. } => ErrorCode::ResourceLimit,
            BridgeError::Config(_) => ErrorCode::InvalidConfig,
            BridgeError::Serialization(_) => ErrorCode::SerializationError,
            BridgeError::General(_) => ErrorCode::InternalError,
        }
    }

    /// Build an unexpected-reply error
    pub fn unexpected_reply(operation: impl Into<String>, expected: impl Into<String>) -> Self {
        BridgeError::UnexpectedReply {
            operation: operation.into(),
            expected: expected.into(),
        }
    }
}

impl From<String> for BridgeError {
    fn from(s: String) -> Self {
        BridgeError::General(s)
    }
}

impl From<&str> for BridgeError {
    fn from(s: &str) -> Self {
        BridgeError::General(s.to_string())
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(e: serde_json::Error) -> Self {
        BridgeError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for BridgeError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        BridgeError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for BridgeError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        BridgeError::Serialization(e.to_string())
    }
}

/// Result type alias for bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_display() {
        assert_eq!(ErrorCode::HostCallFailed.to_string(), "HOST_CALL_FAILED");
        assert_eq!(ErrorCode::UnknownToken.to_string(), "UNKNOWN_TOKEN");
    }

    #[test]
    fn test_host_call_error_carries_operation_and_args() {
        let err = HostCallError::new(
            "getAttribute",
            vec![HostValue::from(7u64), HostValue::from("href")],
            "no such node",
        );
        let bridge: BridgeError = err.into();
        assert_eq!(bridge.code(), ErrorCode::HostCallFailed);

        let message = bridge.to_string();
        assert!(message.contains("getAttribute"));
        assert!(message.contains("no such node"));
    }

    #[test]
    fn test_host_call_error_serialization() {
        let err = HostCallError::new("now", vec![], "clock unavailable");
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("\"operation\":\"now\""));
        assert!(json.contains("clock unavailable"));
    }

    #[test]
    fn test_callback_failure_display() {
        let failure = CallbackFailure::new(
            CallbackSite::Listener {
                event_type: "click".into(),
            },
            1,
            anyhow::anyhow!("boom"),
        );
        assert_eq!(failure.to_string(), "'click' listener #1 failed: boom");

        let err: BridgeError = failure.into();
        assert_eq!(err.code(), ErrorCode::CallbackFailed);
    }

    #[test]
    fn test_unknown_token_message() {
        let err = BridgeError::UnknownToken {
            kind: "timer",
            token: 42,
        };
        assert_eq!(err.to_string(), "Unknown timer token 42");
    }
}
