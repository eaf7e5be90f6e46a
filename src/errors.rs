//! Request failure classification.
//!
//! A request fails when it cannot be completed (connection refused, timeout,
//! TLS error) or when the server answers with a status of 400 or above. Each
//! failure carries a category for metrics and a message that is stable across
//! requests, so the failures table groups identical errors together.

use reqwest::StatusCode;
use std::fmt;

/// Categories of request failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// HTTP 4xx responses
    ClientError,

    /// HTTP 5xx responses
    ServerError,

    /// DNS, connection refused, reset, body read errors
    NetworkError,

    /// Request timed out
    TimeoutError,

    /// TLS handshake or certificate errors
    TlsError,

    /// Anything else
    OtherError,
}

impl ErrorCategory {
    /// Categorize an HTTP status code. Returns `None` for responses below 400.
    pub fn from_status_code(status_code: u16) -> Option<Self> {
        match status_code {
            100..=399 => None,
            400..=499 => Some(ErrorCategory::ClientError),
            500..=599 => Some(ErrorCategory::ServerError),
            _ => Some(ErrorCategory::OtherError),
        }
    }

    /// Categorize a transport-level reqwest error.
    pub fn from_reqwest_error(error: &reqwest::Error) -> Self {
        if error.is_timeout() {
            return ErrorCategory::TimeoutError;
        }

        let error_msg = message_without_url(error).to_lowercase();
        if error_msg.contains("certificate") || error_msg.contains("tls") {
            ErrorCategory::TlsError
        } else if error.is_connect() || error.is_request() || error.is_body() || error.is_decode()
        {
            ErrorCategory::NetworkError
        } else if error.is_redirect() {
            ErrorCategory::ClientError
        } else {
            ErrorCategory::OtherError
        }
    }

    /// Prometheus label for this category.
    pub fn label(&self) -> &'static str {
        match self {
            ErrorCategory::ClientError => "client_error",
            ErrorCategory::ServerError => "server_error",
            ErrorCategory::NetworkError => "network_error",
            ErrorCategory::TimeoutError => "timeout_error",
            ErrorCategory::TlsError => "tls_error",
            ErrorCategory::OtherError => "other_error",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A classified request failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategorizedError {
    pub category: ErrorCategory,

    /// HTTP status code if a response was received
    pub status_code: Option<u16>,

    pub message: String,
}

impl CategorizedError {
    /// Build a failure from a response status. Returns `None` below 400.
    pub fn from_status(status_code: u16) -> Option<Self> {
        ErrorCategory::from_status_code(status_code).map(|category| Self {
            category,
            status_code: Some(status_code),
            message: StatusCode::from_u16(status_code)
                .ok()
                .and_then(|s| s.canonical_reason())
                .unwrap_or("Unknown Status")
                .to_string(),
        })
    }

    /// Build a failure from a transport error.
    ///
    /// The URL is stripped from the message so the same error on different
    /// parameter values aggregates into one failures-table row.
    pub fn from_reqwest(error: &reqwest::Error) -> Self {
        let category = ErrorCategory::from_reqwest_error(error);
        Self {
            category,
            status_code: error.status().map(|s| s.as_u16()),
            message: message_without_url(error),
        }
    }

    pub fn new(category: ErrorCategory, message: String) -> Self {
        Self {
            category,
            status_code: None,
            message,
        }
    }
}

impl fmt::Display for CategorizedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status_code {
            Some(status) => write!(f, "[{}] HTTP {}: {}", self.category, status, self.message),
            None => write!(f, "[{}] {}", self.category, self.message),
        }
    }
}

/// Error text with its source chain, minus the request URL.
fn message_without_url(error: &reqwest::Error) -> String {
    let mut message = error.to_string();
    if let Some(url) = error.url() {
        message = message.replace(&format!(" ({})", url), "");
        message = message.replace(url.as_str(), "");
    }
    let mut source = std::error::Error::source(error);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
