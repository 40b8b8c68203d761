//! Unified error handling for folio
//!
//! Registry-level operations report failures through these values rather than
//! panicking; only pipeline execution routes them to a per-request error handler.

use std::fmt;

/// Unified error types for the site core
#[derive(Debug)]
pub enum SiteError {
    /// Malformed version strings or missing registration fields
    Validation(String),

    /// A module transition handler reported failure
    Lifecycle(String),

    /// A stage handler or state callback failed while serving a request
    Pipeline(String),

    /// Invalid pipeline/router/module configuration, fatal at startup
    Configuration(String),

    /// Components that depend on each other in a loop
    CycleDetected(Vec<String>),

    /// A request exceeded its execution path deadline
    Timeout(String),

    /// Resource not found errors
    NotFound(String),

    /// File and socket errors
    Io(std::io::Error),

    /// Internal system errors
    Internal(String),

    /// Pingora framework errors
    Pingora(Box<pingora_error::Error>),
}

impl fmt::Display for SiteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SiteError::Validation(msg) => write!(f, "Validation error: {msg}"),
            SiteError::Lifecycle(msg) => write!(f, "Lifecycle error: {msg}"),
            SiteError::Pipeline(msg) => write!(f, "Pipeline error: {msg}"),
            SiteError::Configuration(msg) => write!(f, "Configuration error: {msg}"),
            SiteError::CycleDetected(path) => {
                write!(f, "Dependency cycle detected: {}", path.join(" -> "))
            }
            SiteError::Timeout(msg) => write!(f, "Request timed out: {msg}"),
            SiteError::NotFound(msg) => write!(f, "Resource not found: {msg}"),
            SiteError::Io(err) => write!(f, "I/O error: {err}"),
            SiteError::Internal(msg) => write!(f, "Internal error: {msg}"),
            SiteError::Pingora(err) => write!(f, "Pingora error: {err}"),
        }
    }
}

impl std::error::Error for SiteError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SiteError::Io(err) => Some(err),
            SiteError::Pingora(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl SiteError {
    /// Suggested HTTP status for an error that reaches the default error handler
    pub fn status_code(&self) -> http::StatusCode {
        match self {
            SiteError::NotFound(_) => http::StatusCode::NOT_FOUND,
            SiteError::Timeout(_) => http::StatusCode::GATEWAY_TIMEOUT,
            SiteError::Validation(_) => http::StatusCode::BAD_REQUEST,
            _ => http::StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

// Error conversions
impl From<std::io::Error> for SiteError {
    fn from(err: std::io::Error) -> Self {
        SiteError::Io(err)
    }
}

impl From<Box<pingora_error::Error>> for SiteError {
    fn from(err: Box<pingora_error::Error>) -> Self {
        SiteError::Pingora(err)
    }
}

impl From<serde_json::Error> for SiteError {
    fn from(err: serde_json::Error) -> Self {
        SiteError::Validation(err.to_string())
    }
}

impl From<SiteError> for Box<pingora_error::Error> {
    fn from(err: SiteError) -> Self {
        match err {
            SiteError::Pingora(pingora_err) => pingora_err,
            _ => pingora_error::Error::explain(
                pingora_error::ErrorType::InternalError,
                err.to_string(),
            ),
        }
    }
}

/// Result type alias for site operations
pub type SiteResult<T> = std::result::Result<T, SiteError>;

/// Helper trait for adding context to errors
pub trait ErrorContext<T> {
    fn with_context(self, context: &str) -> SiteResult<T>;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: fmt::Display,
{
    fn with_context(self, context: &str) -> SiteResult<T> {
        self.map_err(|e| SiteError::Internal(format!("{context}: {e}")))
    }
}

/// Convenience macros for error creation
#[macro_export]
macro_rules! config_error {
    ($msg:expr) => {
        $crate::core::error::SiteError::Configuration($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::core::error::SiteError::Configuration(format!($fmt, $($arg)*))
    };
}

#[macro_export]
macro_rules! internal_error {
    ($msg:expr) => {
        $crate::core::error::SiteError::Internal($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::core::error::SiteError::Internal(format!($fmt, $($arg)*))
    };
}

#[macro_export]
macro_rules! validation_error {
    ($msg:expr) => {
        $crate::core::error::SiteError::Validation($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::core::error::SiteError::Validation(format!($fmt, $($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_prefixes() {
        let err = SiteError::Configuration("duplicate stage".to_string());
        assert!(err.to_string().starts_with("Configuration error"));

        let err = SiteError::CycleDetected(vec!["module/a".into(), "module/b".into(), "module/a".into()]);
        assert_eq!(
            err.to_string(),
            "Dependency cycle detected: module/a -> module/b -> module/a"
        );
    }

    #[test]
    fn test_io_conversion() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: SiteError = io_error.into();
        assert!(matches!(err, SiteError::Io(_)));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_macros_and_context() {
        let err = config_error!("missing handler for stage {}", "render");
        assert!(matches!(err, SiteError::Configuration(ref m) if m.contains("render")));

        let result: Result<(), &str> = Err("boom");
        let err = result.with_context("loading").unwrap_err();
        assert_eq!(err.to_string(), "Internal error: loading: boom");
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            SiteError::NotFound("x".into()).status_code(),
            http::StatusCode::NOT_FOUND
        );
        assert_eq!(
            SiteError::Timeout("x".into()).status_code(),
            http::StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            SiteError::Pipeline("x".into()).status_code(),
            http::StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
