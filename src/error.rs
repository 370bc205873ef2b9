//! Error types for logfuse.
//!
//! This module provides comprehensive error handling following the thiserror
//! pattern. Error types are designed to be informative, actionable, and
//! suitable for both programmatic handling and user-facing display.

use thiserror::Error;

/// Primary error type for logfuse operations.
#[derive(Error, Debug)]
pub enum FuseError {
    /// A required backend option is missing from the search.
    #[error("Missing required option '{option}' for {backend} backend")]
    MissingOption {
        /// Name of the missing option.
        option: String,
        /// Backend that requires the option.
        backend: &'static str,
    },

    /// The filter tree failed validation.
    #[error("Invalid filter: {message}")]
    InvalidFilter {
        /// Reason why the filter is invalid.
        message: String,
    },

    /// A filter leaf uses an operator outside the closed set.
    #[error("Unknown filter operator: {op}")]
    UnknownOperator {
        /// The unknown operator string.
        op: String,
    },

    /// A pagination token could not be interpreted by the backend.
    #[error("Invalid page token '{token}': {reason}")]
    InvalidPageToken {
        /// The rejected token.
        token: String,
        /// Reason why the token is invalid.
        reason: String,
    },

    /// The requested capability is not supported by the backend.
    #[error("Unsupported: {feature}")]
    Unsupported {
        /// Name of the unsupported feature.
        feature: String,
    },

    /// A search could not be translated into the backend's native form.
    #[error("Translation failed: {message}")]
    Translation {
        /// Human-readable error message.
        message: String,
    },

    /// HTTP transport failure.
    #[error("HTTP request failed: {context}")]
    Http {
        /// Context describing the request that failed.
        context: String,
        /// Underlying reqwest error.
        #[source]
        source: reqwest::Error,
    },

    /// Upstream backend returned an error status; the body surfaces verbatim.
    #[error("Upstream returned status {status}: {body}")]
    UpstreamStatus {
        /// HTTP status code.
        status: u16,
        /// Raw response body.
        body: String,
    },

    /// A Splunk search job did not reach a usable state.
    #[error("Search job {sid} failed with dispatch state {state}")]
    JobFailed {
        /// Splunk search id.
        sid: String,
        /// Last observed dispatch state.
        state: String,
    },

    /// A Splunk search job did not complete within the retry budget.
    #[error("Search job {sid} still running after {retries} status polls")]
    JobTimeout {
        /// Splunk search id.
        sid: String,
        /// Number of polls performed.
        retries: u32,
    },

    /// Configuration error.
    #[error("Configuration error: {message}")]
    Config {
        /// Human-readable error message.
        message: String,
    },

    /// A named context or search template does not exist in the config.
    #[error("Unknown {kind} '{name}' in configuration")]
    UnknownName {
        /// Kind of entry ("context" or "search").
        kind: &'static str,
        /// The missing name.
        name: String,
    },

    /// I/O error.
    #[error("I/O error: {context}")]
    Io {
        /// Context describing the operation that failed.
        context: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Serialization error.
    #[error("Serialization error: {context}")]
    Serialization {
        /// Context describing the operation that failed.
        context: String,
        /// Underlying serde error.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The operation was cancelled through its cancellation token.
    #[error("Operation cancelled")]
    Cancelled,
}

impl FuseError {
    /// Create a missing-option configuration error.
    #[must_use]
    pub fn missing_option(option: impl Into<String>, backend: &'static str) -> Self {
        Self::MissingOption {
            option: option.into(),
            backend,
        }
    }

    /// Create a filter validation error.
    #[must_use]
    pub fn invalid_filter(message: impl Into<String>) -> Self {
        Self::InvalidFilter {
            message: message.into(),
        }
    }

    /// Create a translation error.
    #[must_use]
    pub fn translation(message: impl Into<String>) -> Self {
        Self::Translation {
            message: message.into(),
        }
    }

    /// Create an unsupported-capability error.
    #[must_use]
    pub fn unsupported(feature: impl Into<String>) -> Self {
        Self::Unsupported {
            feature: feature.into(),
        }
    }

    /// Create a configuration error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a new I/O error with context.
    #[must_use]
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a new HTTP error with request context.
    #[must_use]
    pub fn http(context: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Http {
            context: context.into(),
            source,
        }
    }

    /// Get the exit code for this error.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Config { .. } | Self::UnknownName { .. } | Self::MissingOption { .. } => 5,
            Self::InvalidFilter { .. }
            | Self::UnknownOperator { .. }
            | Self::InvalidPageToken { .. }
            | Self::Translation { .. } => 2,
            Self::Http { .. } | Self::UpstreamStatus { .. } => 6,
            Self::JobFailed { .. } | Self::JobTimeout { .. } => 7,
            Self::Cancelled => 130,
            Self::Io { .. } => 74,
            _ => 1,
        }
    }

    /// Check if this error is recoverable within a follow loop.
    ///
    /// Recoverable errors are forwarded on the result's error channel while
    /// the loop keeps polling; the rest terminate the loop.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Http { .. } | Self::UpstreamStatus { .. } | Self::JobTimeout { .. }
        )
    }
}

/// Result type alias for logfuse operations.
pub type Result<T> = std::result::Result<T, FuseError>;

impl From<std::io::Error> for FuseError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            context: "I/O operation failed".to_string(),
            source: err,
        }
    }
}

impl From<serde_json::Error> for FuseError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            context: "JSON operation failed".to_string(),
            source: Box::new(err),
        }
    }
}

impl From<serde_yaml::Error> for FuseError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Serialization {
            context: "YAML operation failed".to_string(),
            source: Box::new(err),
        }
    }
}

impl From<reqwest::Error> for FuseError {
    fn from(err: reqwest::Error) -> Self {
        Self::Http {
            context: "HTTP request failed".to_string(),
            source: err,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        let missing = FuseError::missing_option("index", "opensearch");
        assert_eq!(missing.exit_code(), 5);

        let filter = FuseError::invalid_filter("leaf with children");
        assert_eq!(filter.exit_code(), 2);

        let cancelled = FuseError::Cancelled;
        assert_eq!(cancelled.exit_code(), 130);
    }

    #[test]
    fn test_is_recoverable() {
        let status = FuseError::UpstreamStatus {
            status: 502,
            body: "bad gateway".to_string(),
        };
        assert!(status.is_recoverable());

        let filter = FuseError::invalid_filter("bad");
        assert!(!filter.is_recoverable());
    }
}
