// Error handling module
// Defines the normalized API error and the conversion from raw request failures

use reqwest::StatusCode;
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Code used when no response was received from the backend
pub const NETWORK_ERROR: &str = "NETWORK_ERROR";

/// Code used for failures that are neither server nor network related
pub const UNKNOWN_ERROR: &str = "UNKNOWN_ERROR";

const NETWORK_ERROR_MESSAGE: &str = "Network error. Please check your connection.";
const UNKNOWN_ERROR_MESSAGE: &str = "An unexpected error occurred";
const CANCELLED_MESSAGE: &str = "Request was cancelled";

/// Error code of a normalized error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// The server responded with this HTTP status
    Status(u16),
    /// No response was received
    Network,
    /// Anything else
    Unknown,
}

impl ErrorCode {
    /// HTTP status, when the server responded
    pub fn status(&self) -> Option<u16> {
        match self {
            ErrorCode::Status(status) => Some(*status),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::Status(status) => write!(f, "{}", status),
            ErrorCode::Network => f.write_str(NETWORK_ERROR),
            ErrorCode::Unknown => f.write_str(UNKNOWN_ERROR),
        }
    }
}

/// Failures raised while executing a request, before normalization
#[derive(Error, Debug)]
pub enum RequestFailure {
    /// The server answered with a non-success status
    #[error("Server responded with {status}")]
    Status { status: StatusCode, body: String },

    /// Error from the HTTP transport
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The request was cancelled through its token
    #[error("Request was cancelled")]
    Cancelled,

    /// Failure before sending or after receiving (bad header, decode error, ...)
    #[error("{0:#}")]
    Other(#[from] anyhow::Error),
}

/// Uniform error returned by every failed API call
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{code}: {message}")]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
    pub details: Option<Value>,
    cancelled: bool,
}

impl ApiError {
    fn network() -> Self {
        Self {
            code: ErrorCode::Network,
            message: NETWORK_ERROR_MESSAGE.to_string(),
            details: None,
            cancelled: false,
        }
    }

    fn unknown(message: String) -> Self {
        let message = if message.trim().is_empty() {
            UNKNOWN_ERROR_MESSAGE.to_string()
        } else {
            message
        };

        Self {
            code: ErrorCode::Unknown,
            message,
            details: None,
            cancelled: false,
        }
    }

    /// HTTP status of the failed response, if the server responded
    pub fn status(&self) -> Option<u16> {
        self.code.status()
    }

    /// Whether the call failed because its cancel token fired
    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Whether the server rejected the stored credentials
    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(StatusCode::UNAUTHORIZED.as_u16())
    }
}

/// Convert a raw request failure into the normalized error.
///
/// Never fails: every input maps to exactly one of the three shapes
/// (server status, network, unknown).
pub fn normalize(failure: RequestFailure) -> ApiError {
    match failure {
        RequestFailure::Status { status, body } => from_server_response(status, &body),
        RequestFailure::Transport(err) if is_missing_response(&err) => ApiError::network(),
        RequestFailure::Transport(err) => ApiError::unknown(err.to_string()),
        RequestFailure::Cancelled => ApiError {
            cancelled: true,
            ..ApiError::unknown(CANCELLED_MESSAGE.to_string())
        },
        RequestFailure::Other(err) => ApiError::unknown(format!("{:#}", err)),
    }
}

fn from_server_response(status: StatusCode, body: &str) -> ApiError {
    let details = if body.trim().is_empty() {
        None
    } else {
        Some(serde_json::from_str(body).unwrap_or_else(|_| Value::String(body.to_string())))
    };

    let message = details
        .as_ref()
        .and_then(|d| d.get("message"))
        .and_then(|m| m.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .map(str::to_string)
                .unwrap_or_else(|| format!("Request failed with status {}", status.as_u16()))
        });

    ApiError {
        code: ErrorCode::Status(status.as_u16()),
        message,
        details,
        cancelled: false,
    }
}

/// Transport errors where the request went out (or tried to) but no response came back
fn is_missing_response(err: &reqwest::Error) -> bool {
    err.status().is_none()
        && (err.is_timeout() || err.is_connect() || err.is_request() || err.is_body())
}

/// Result type alias for API operations
pub type Result<T> = std::result::Result<T, ApiError>;
