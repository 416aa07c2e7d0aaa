//! Driver error types and retry classification.

use thiserror::Error;

// ============================================================================
// DriverError
// ============================================================================

/// Driver error.
///
/// Errors are `Clone` because a single failure may have to resolve several
/// completion handles (e.g. the RUN and PULL handlers of one statement).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    /// Connection severed, terminated or otherwise unusable
    #[error("Connection error: {0}")]
    Connection(String),

    /// Protocol violation (unexpected message, broken correlation)
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Transaction error
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Client misuse of the API (operating on released/terminated resources)
    #[error("Client usage error: {0}")]
    ClientUsage(String),

    /// Failure reported by the server for a request message
    #[error("Server error: {code} - {message}")]
    Server {
        /// Structured server error code
        code: String,
        /// Human-readable message
        message: String,
    },

    /// Timeout
    #[error("Timeout: {0}")]
    Timeout(String),

    /// I/O error (message kept, source dropped so the error stays `Clone`)
    #[error("I/O error: {0}")]
    Io(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl DriverError {
    /// Connection error
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Protocol error
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Transaction error
    pub fn transaction(msg: impl Into<String>) -> Self {
        Self::Transaction(msg.into())
    }

    /// Client usage error
    pub fn client_usage(msg: impl Into<String>) -> Self {
        Self::ClientUsage(msg.into())
    }

    /// Server-reported error
    pub fn server(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Server {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Whether a retry-orchestration loop may retry the failed work.
    ///
    /// This is the classification contract consumed by the session's
    /// transaction functions; the core never retries on its own.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connection(_) | Self::Timeout(_) => true,
            Self::Server { code, .. } => is_retryable_code(code),
            _ => false,
        }
    }

    /// Whether the error is caused by client misuse (never retried).
    pub fn is_client_usage(&self) -> bool {
        matches!(self, Self::ClientUsage(_))
    }

    /// Structured server error code, for server-reported failures.
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Server { code, .. } => Some(code),
            _ => None,
        }
    }
}

impl From<std::io::Error> for DriverError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Server error codes that indicate a transient condition.
fn is_retryable_code(code: &str) -> bool {
    code.starts_with("GraphWire.TransientError")
        || code == "GraphWire.ClientError.Cluster.NotALeader"
        || code == "GraphWire.ClientError.General.ForbiddenOnReadOnlyDatabase"
}

// ============================================================================
// Result Type
// ============================================================================

/// Driver result type
pub type DriverResult<T> = Result<T, DriverError>;

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = DriverError::connection("Connection refused");
        assert!(matches!(err, DriverError::Connection(_)));

        let err = DriverError::client_usage("Connection has been released");
        assert!(matches!(err, DriverError::ClientUsage(_)));

        let err = DriverError::server("GraphWire.ClientError.Statement.SyntaxError", "bad syntax");
        assert!(matches!(err, DriverError::Server { .. }));
    }

    #[test]
    fn test_error_display() {
        let err = DriverError::connection("Connection refused");
        assert_eq!(err.to_string(), "Connection error: Connection refused");

        let err = DriverError::server("GraphWire.ClientError.Statement.SyntaxError", "bad syntax");
        assert_eq!(
            err.to_string(),
            "Server error: GraphWire.ClientError.Statement.SyntaxError - bad syntax"
        );
    }

    #[test]
    fn test_retryable_classification() {
        assert!(DriverError::connection("Connection reset by peer").is_retryable());
        assert!(DriverError::timeout("acquisition timeout").is_retryable());
        assert!(DriverError::server(
            "GraphWire.TransientError.General.TemporarilyUnavailable",
            "busy"
        )
        .is_retryable());
        assert!(
            DriverError::server("GraphWire.ClientError.Cluster.NotALeader", "moved").is_retryable()
        );

        assert!(!DriverError::client_usage("released").is_retryable());
        assert!(
            !DriverError::server("GraphWire.ClientError.Statement.SyntaxError", "bad").is_retryable()
        );
        assert!(!DriverError::transaction("terminated").is_retryable());
    }

    #[test]
    fn test_client_usage_classification() {
        assert!(DriverError::client_usage("can't commit").is_client_usage());
        assert!(!DriverError::connection("refused").is_client_usage());
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe");
        let err: DriverError = io.into();
        assert!(matches!(err, DriverError::Io(_)));
        // conversion keeps the message so a cloned error still reads well
        assert!(err.to_string().contains("pipe"));
    }
}
