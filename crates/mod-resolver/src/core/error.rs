//! Error types for the mod resolution pipeline
//!
//! Only catalog and configuration failures surface as [`ResolveError`].
//! Script failures are [`ScriptError`] and stay inside the evaluator, where
//! they degrade to "no configuration options" for the affected mod.

use std::error::Error;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that abort a resolution run
#[derive(Error, Debug)]
pub enum ResolveError {
    /// Transport-level failure talking to the mod catalog
    #[error("Catalog request to '{url}' failed")]
    HttpRequest {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// Catalog answered with a non-success status
    #[error("Catalog request to '{url}' returned HTTP {status}")]
    HttpStatus {
        url: String,
        status: u16,
    },

    /// Catalog did not answer in time
    #[error("Catalog request to '{url}' timed out after {duration_secs}s")]
    NetworkTimeout {
        url: String,
        duration_secs: u64,
    },

    /// Catalog response body was not the expected JSON
    #[error("Could not decode catalog response from '{url}': {message}")]
    Decode {
        url: String,
        message: String,
    },

    #[error("Invalid catalog URL '{url}': {suggestion}")]
    InvalidUrl {
        url: String,
        suggestion: String,
        #[source]
        source: url::ParseError,
    },

    #[error("Invalid configuration: {message}")]
    Configuration {
        message: String,
        field: Option<String>,
        suggestion: Option<String>,
    },

    /// Deployment file could not be read
    #[error("Failed to read deployment file '{path}'")]
    FileSystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Deployment file '{path}' is not a valid deployment: {message}")]
    InvalidDeploy {
        path: PathBuf,
        message: String,
    },

    /// The hosting view went away before the run finished
    #[error("Resolution cancelled: {reason}")]
    Cancelled {
        reason: String,
    },
}

pub type Result<T> = std::result::Result<T, ResolveError>;

impl ResolveError {
    /// Whether this is a catalog transport failure (the only user-visible kind)
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ResolveError::HttpRequest { .. }
                | ResolveError::HttpStatus { .. }
                | ResolveError::NetworkTimeout { .. }
                | ResolveError::Decode { .. }
        )
    }

    /// Check if re-triggering the load has a chance of succeeding
    pub fn is_recoverable(&self) -> bool {
        match self {
            ResolveError::HttpRequest { source, .. } => source
                .status()
                .map_or(true, |status| status.is_server_error() || status == 429),
            ResolveError::HttpStatus { status, .. } => *status >= 500 || *status == 429,
            ResolveError::NetworkTimeout { .. } => true,
            ResolveError::Decode { .. } => false,
            ResolveError::InvalidUrl { .. } => false,
            ResolveError::Configuration { .. } => false,
            ResolveError::FileSystem { .. } => false,
            ResolveError::InvalidDeploy { .. } => false,
            ResolveError::Cancelled { .. } => false,
        }
    }

    /// Get error category for metrics and logging
    pub fn category(&self) -> &'static str {
        match self {
            ResolveError::HttpRequest { .. } => "http_request",
            ResolveError::HttpStatus { .. } => "http_status",
            ResolveError::NetworkTimeout { .. } => "network_timeout",
            ResolveError::Decode { .. } => "decode",
            ResolveError::InvalidUrl { .. } => "invalid_url",
            ResolveError::Configuration { .. } => "configuration",
            ResolveError::FileSystem { .. } => "file_system",
            ResolveError::InvalidDeploy { .. } => "invalid_deploy",
            ResolveError::Cancelled { .. } => "cancelled",
        }
    }

    /// Get user-friendly suggestion for resolving the error
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            ResolveError::NetworkTimeout { .. } => Some(
                "Check that the catalog service is reachable or raise MOD_CATALOG_TIMEOUT_SECS",
            ),
            ResolveError::HttpStatus { .. } => {
                Some("Reload the mod list once the catalog service is healthy")
            }
            ResolveError::InvalidUrl { suggestion, .. } => Some(suggestion),
            ResolveError::Configuration { suggestion, .. } => suggestion.as_deref(),
            _ => None,
        }
    }

    /// Create a detailed error report for debugging
    pub fn detailed_report(&self) -> String {
        let mut report = format!("Error: {}\n", self);
        report.push_str(&format!("Category: {}\n", self.category()));
        report.push_str(&format!("Recoverable: {}\n", self.is_recoverable()));

        if let Some(suggestion) = self.suggestion() {
            report.push_str(&format!("Suggestion: {}\n", suggestion));
        }

        if let Some(source) = self.source() {
            report.push_str(&format!("Root cause: {}\n", source));
        }

        report
    }
}

impl From<reqwest::Error> for ResolveError {
    fn from(error: reqwest::Error) -> Self {
        let url = error.url().map(|u| u.to_string()).unwrap_or_else(|| "<unknown>".to_string());

        if error.is_timeout() {
            ResolveError::NetworkTimeout {
                url,
                duration_secs: 30,
            }
        } else if error.is_decode() {
            ResolveError::Decode {
                url,
                message: error.to_string(),
            }
        } else {
            ResolveError::HttpRequest { url, source: error }
        }
    }
}

impl From<url::ParseError> for ResolveError {
    fn from(error: url::ParseError) -> Self {
        let suggestion = match error {
            url::ParseError::EmptyHost => "URL must have a valid hostname",
            url::ParseError::InvalidPort => "Port number must be between 1 and 65535",
            url::ParseError::RelativeUrlWithoutBase => {
                "URL must be absolute (include http:// or https://)"
            }
            _ => "Check URL format and try again",
        }
        .to_string();

        ResolveError::InvalidUrl {
            url: "<unparseable>".to_string(),
            suggestion,
            source: error,
        }
    }
}

/// Failure while evaluating one mod's configuration script
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScriptError {
    #[error("syntax error: {0}")]
    Syntax(String),

    #[error("runtime error: {0}")]
    Runtime(String),

    /// The instruction hook stopped the script
    #[error("script exceeded its {limit} budget")]
    BudgetExceeded {
        limit: String,
    },

    #[error("script exceeded the {limit_bytes} byte memory limit")]
    MemoryExceeded {
        limit_bytes: usize,
    },

    /// Options value could not be converted to plain data
    #[error("could not convert options value: {0}")]
    Conversion(String),

    #[error("interpreter session unavailable: {0}")]
    Session(String),
}

impl ScriptError {
    pub fn category(&self) -> &'static str {
        match self {
            ScriptError::Syntax(_) => "syntax",
            ScriptError::Runtime(_) => "runtime",
            ScriptError::BudgetExceeded { .. } => "budget_exceeded",
            ScriptError::MemoryExceeded { .. } => "memory_exceeded",
            ScriptError::Conversion(_) => "conversion",
            ScriptError::Session(_) => "session",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_classification() {
        let status = ResolveError::HttpStatus {
            url: "http://catalog/api/mod".to_string(),
            status: 503,
        };
        assert!(status.is_transport());
        assert!(status.is_recoverable());
        assert_eq!(status.category(), "http_status");

        let not_found = ResolveError::HttpStatus {
            url: "http://catalog/api/mod".to_string(),
            status: 404,
        };
        assert!(!not_found.is_recoverable());

        let cancelled = ResolveError::Cancelled {
            reason: "view closed".to_string(),
        };
        assert!(!cancelled.is_transport());
        assert!(!cancelled.is_recoverable());
    }

    #[test]
    fn test_url_parse_conversion() {
        let err: ResolveError = url::Url::parse("catalog.local").unwrap_err().into();
        match &err {
            ResolveError::InvalidUrl { suggestion, .. } => {
                assert!(suggestion.contains("absolute"));
            }
            other => panic!("Expected InvalidUrl, got {:?}", other),
        }
        let report = err.detailed_report();
        assert!(report.contains("Category: invalid_url"));
        assert!(report.contains("Root cause:"));
    }

    #[test]
    fn test_configuration_suggestion() {
        let err = ResolveError::Configuration {
            message: "script timeout must be non-zero".to_string(),
            field: Some("MOD_SCRIPT_TIMEOUT_MS".to_string()),
            suggestion: Some("Use a value such as 2000".to_string()),
        };
        assert_eq!(err.suggestion(), Some("Use a value such as 2000"));
    }

    #[test]
    fn test_script_error_display() {
        let err = ScriptError::BudgetExceeded {
            limit: "2000ms time".to_string(),
        };
        assert_eq!(err.to_string(), "script exceeded its 2000ms time budget");
        assert_eq!(err.category(), "budget_exceeded");
    }
}
