//! Error types for docwire

use std::fmt;
use thiserror::Error;

/// Result type alias for docwire operations
pub type Result<T> = std::result::Result<T, DocWireError>;

/// Longest slice of offending input echoed back in a parse error message
const PARSE_PREVIEW_LEN: usize = 64;

/// Classification of a server-reported failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    /// Insert, update, replace or delete rejected by the server
    WriteFailed,
    /// Find or count rejected by the server
    QueryFailed,
    /// Any other command failure reported by the server
    ServerError,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            OperationKind::WriteFailed => "write failed",
            OperationKind::QueryFailed => "query failed",
            OperationKind::ServerError => "server error",
        };
        f.write_str(label)
    }
}

/// Unified error type for all docwire operations
///
/// "Not found" is never represented here: lookups that match nothing
/// return `Ok(None)`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DocWireError {
    /// Textual document input was not well-formed
    #[error("Parse error: {message} (input: {})", preview(.text))]
    Parse { text: String, message: String },

    /// Document could not be converted to the wire format
    #[error("Encode error: {0}")]
    Encode(String),

    /// Wire bytes could not be converted back to a document
    #[error("Decode error: {0}")]
    Decode(String),

    /// Connection could not be established or was lost
    #[error("Connection error: {0}")]
    Connection(String),

    /// Server rejected a CRUD or query operation
    #[error("Operation error ({kind}): {message}")]
    Operation { kind: OperationKind, message: String },

    /// Operation attempted on a closed cursor
    #[error("Cursor error: {0}")]
    CursorState(String),
}

fn preview(text: &str) -> String {
    if text.chars().count() <= PARSE_PREVIEW_LEN {
        text.to_string()
    } else {
        let head: String = text.chars().take(PARSE_PREVIEW_LEN).collect();
        format!("{}...", head)
    }
}

impl DocWireError {
    /// Build a parse error carrying the offending text
    pub fn parse(text: impl Into<String>, message: impl Into<String>) -> Self {
        DocWireError::Parse {
            text: text.into(),
            message: message.into(),
        }
    }

    /// Build an operation error of the given kind
    pub fn operation(kind: OperationKind, message: impl Into<String>) -> Self {
        DocWireError::Operation {
            kind,
            message: message.into(),
        }
    }

    pub fn write_failed(message: impl Into<String>) -> Self {
        Self::operation(OperationKind::WriteFailed, message)
    }

    pub fn query_failed(message: impl Into<String>) -> Self {
        Self::operation(OperationKind::QueryFailed, message)
    }

    pub fn server(message: impl Into<String>) -> Self {
        Self::operation(OperationKind::ServerError, message)
    }

    /// Returns the operation kind when this is a server-reported failure
    pub fn operation_kind(&self) -> Option<OperationKind> {
        match self {
            DocWireError::Operation { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Returns true if the underlying connection is unusable
    pub fn is_connection_error(&self) -> bool {
        matches!(self, DocWireError::Connection(_))
    }

    /// Returns true if the document could not cross the wire boundary
    pub fn is_codec_error(&self) -> bool {
        matches!(self, DocWireError::Encode(_) | DocWireError::Decode(_))
    }
}

// MongoDB-specific error conversions (when mongodb-errors feature is enabled)
#[cfg(feature = "mongodb-errors")]
impl From<mongodb::error::Error> for DocWireError {
    fn from(err: mongodb::error::Error) -> Self {
        use mongodb::error::ErrorKind;

        match err.kind.as_ref() {
            ErrorKind::Write { .. } | ErrorKind::InsertMany { .. } => {
                DocWireError::write_failed(err.to_string())
            }
            ErrorKind::Command { .. } => DocWireError::server(err.to_string()),
            ErrorKind::Io { .. }
            | ErrorKind::ServerSelection { .. }
            | ErrorKind::ConnectionPoolCleared { .. }
            | ErrorKind::DnsResolve { .. }
            | ErrorKind::Authentication { .. } => DocWireError::Connection(err.to_string()),
            ErrorKind::BsonSerialization { .. } => DocWireError::Encode(err.to_string()),
            ErrorKind::BsonDeserialization { .. } => DocWireError::Decode(err.to_string()),
            _ => DocWireError::server(err.to_string()),
        }
    }
}

#[cfg(feature = "mongodb-errors")]
impl From<bson::extjson::de::Error> for DocWireError {
    fn from(err: bson::extjson::de::Error) -> Self {
        DocWireError::Encode(format!("invalid extended JSON: {}", err))
    }
}
