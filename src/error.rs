//! Error types for the torrent client
//!
//! Every failure the client can report is a `TorrentError`. The variants carry
//! enough context (peer address, file path, underlying cause) to be logged on
//! their own, and `kind()` folds them into the four handling classes the
//! sessions act on.

use std::fmt;

/// How a failure is handled by the session that observes it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad handshake magic/length, info hash mismatch, malformed frame.
    /// Fatal for the connection only.
    ProtocolViolation,
    /// Socket read/write failure or unexpected close. Fatal for the connection only.
    IoFailure,
    /// Source file or descriptor missing. Fatal for the session start.
    ResourceMissing,
    /// Unreadable or foreign progress record. Degrades to a fresh start.
    StateInconsistency,
    /// Bad input handed to the library (descriptor content, configuration).
    Invalid,
}

/// Comprehensive error type for torrent operations
#[derive(Debug, Clone)]
pub enum TorrentError {
    /// Descriptor parsing errors
    ParseError {
        message: String,
        source: Option<String>,
    },

    /// Peer-wire protocol errors
    ProtocolError {
        message: String,
        source: Option<String>,
    },

    /// Peer connection errors
    PeerError {
        message: String,
        peer: Option<String>,
        source: Option<String>,
    },

    /// File I/O and storage errors
    StorageError {
        message: String,
        path: Option<String>,
        source: Option<String>,
    },

    /// A file the session needs does not exist
    ResourceMissing {
        message: String,
        path: String,
    },

    /// Persisted state that cannot be trusted
    StateError {
        message: String,
        source: Option<String>,
    },

    /// Configuration errors
    ConfigError {
        message: String,
        field: Option<String>,
    },

    /// Network errors
    NetworkError {
        message: String,
        address: Option<String>,
        source: Option<String>,
    },

    /// Validation errors
    ValidationError {
        message: String,
        field: Option<String>,
    },
}

impl TorrentError {
    // Constructors, one per variant shape used by the client

    pub fn parse_error(message: impl Into<String>) -> Self {
        TorrentError::ParseError {
            message: message.into(),
            source: None,
        }
    }

    pub fn parse_error_with_source(message: impl Into<String>, source: impl Into<String>) -> Self {
        TorrentError::ParseError {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    pub fn protocol_error(message: impl Into<String>) -> Self {
        TorrentError::ProtocolError {
            message: message.into(),
            source: None,
        }
    }

    pub fn protocol_error_with_source(message: impl Into<String>, source: impl Into<String>) -> Self {
        TorrentError::ProtocolError {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    pub fn peer_error_with_peer(message: impl Into<String>, peer: impl Into<String>) -> Self {
        TorrentError::PeerError {
            message: message.into(),
            peer: Some(peer.into()),
            source: None,
        }
    }

    pub fn peer_error_full(message: impl Into<String>, peer: impl Into<String>, source: impl Into<String>) -> Self {
        TorrentError::PeerError {
            message: message.into(),
            peer: Some(peer.into()),
            source: Some(source.into()),
        }
    }

    pub fn storage_error_full(message: impl Into<String>, path: impl Into<String>, source: impl Into<String>) -> Self {
        TorrentError::StorageError {
            message: message.into(),
            path: Some(path.into()),
            source: Some(source.into()),
        }
    }

    pub fn resource_missing(message: impl Into<String>, path: impl Into<String>) -> Self {
        TorrentError::ResourceMissing {
            message: message.into(),
            path: path.into(),
        }
    }

    pub fn state_error_with_source(message: impl Into<String>, source: impl Into<String>) -> Self {
        TorrentError::StateError {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    pub fn state_error(message: impl Into<String>) -> Self {
        TorrentError::StateError {
            message: message.into(),
            source: None,
        }
    }

    pub fn config_error_with_field(message: impl Into<String>, field: impl Into<String>) -> Self {
        TorrentError::ConfigError {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    pub fn network_error_full(message: impl Into<String>, address: impl Into<String>, source: impl Into<String>) -> Self {
        TorrentError::NetworkError {
            message: message.into(),
            address: Some(address.into()),
            source: Some(source.into()),
        }
    }

    pub fn validation_error_with_field(message: impl Into<String>, field: impl Into<String>) -> Self {
        TorrentError::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Handling class of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            TorrentError::ProtocolError { .. } => ErrorKind::ProtocolViolation,
            TorrentError::PeerError { .. }
            | TorrentError::NetworkError { .. }
            | TorrentError::StorageError { .. } => ErrorKind::IoFailure,
            TorrentError::ResourceMissing { .. } => ErrorKind::ResourceMissing,
            TorrentError::StateError { .. } => ErrorKind::StateInconsistency,
            TorrentError::ParseError { .. }
            | TorrentError::ConfigError { .. }
            | TorrentError::ValidationError { .. } => ErrorKind::Invalid,
        }
    }

    /// Handling class of an `anyhow` error, if it wraps a `TorrentError`
    pub fn kind_of(err: &anyhow::Error) -> Option<ErrorKind> {
        err.downcast_ref::<TorrentError>().map(TorrentError::kind)
    }
}

impl TorrentError {
    fn label(&self) -> &'static str {
        match self {
            TorrentError::ParseError { .. } => "Parse error",
            TorrentError::ProtocolError { .. } => "Protocol error",
            TorrentError::PeerError { .. } => "Peer error",
            TorrentError::StorageError { .. } => "Storage error",
            TorrentError::ResourceMissing { .. } => "Missing resource",
            TorrentError::StateError { .. } => "State error",
            TorrentError::ConfigError { .. } => "Config error",
            TorrentError::NetworkError { .. } => "Network error",
            TorrentError::ValidationError { .. } => "Validation error",
        }
    }

    fn message(&self) -> &str {
        match self {
            TorrentError::ParseError { message, .. }
            | TorrentError::ProtocolError { message, .. }
            | TorrentError::PeerError { message, .. }
            | TorrentError::StorageError { message, .. }
            | TorrentError::ResourceMissing { message, .. }
            | TorrentError::StateError { message, .. }
            | TorrentError::ConfigError { message, .. }
            | TorrentError::NetworkError { message, .. }
            | TorrentError::ValidationError { message, .. } => message,
        }
    }

    /// Labelled context fields that are present, in display order
    fn details(&self) -> Vec<(&'static str, &str)> {
        let pairs: [(&'static str, Option<&String>); 2] = match self {
            TorrentError::ParseError { source, .. }
            | TorrentError::ProtocolError { source, .. }
            | TorrentError::StateError { source, .. } => [("source", source.as_ref()), ("", None)],
            TorrentError::PeerError { peer, source, .. } => [("peer", peer.as_ref()), ("source", source.as_ref())],
            TorrentError::StorageError { path, source, .. } => [("path", path.as_ref()), ("source", source.as_ref())],
            TorrentError::ResourceMissing { path, .. } => [("path", Some(path)), ("", None)],
            TorrentError::NetworkError { address, source, .. } => [("address", address.as_ref()), ("source", source.as_ref())],
            TorrentError::ConfigError { field, .. }
            | TorrentError::ValidationError { field, .. } => [("field", field.as_ref()), ("", None)],
        };
        pairs
            .into_iter()
            .filter_map(|(name, value)| value.map(|v| (name, v.as_str())))
            .collect()
    }
}

impl fmt::Display for TorrentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.label(), self.message())?;
        let details = self.details();
        if details.is_empty() {
            return Ok(());
        }
        let joined: Vec<String> = details.iter().map(|(name, value)| format!("{}: {}", name, value)).collect();
        write!(f, " ({})", joined.join(", "))
    }
}

impl std::error::Error for TorrentError {}

impl From<std::io::Error> for TorrentError {
    fn from(err: std::io::Error) -> Self {
        TorrentError::storage_error_full(err.to_string(), "unknown".to_string(), err.kind().to_string())
    }
}

impl From<serde_bencode::Error> for TorrentError {
    fn from(err: serde_bencode::Error) -> Self {
        TorrentError::parse_error_with_source("Failed to parse bencode data", err.to_string())
    }
}

impl From<serde_json::Error> for TorrentError {
    fn from(err: serde_json::Error) -> Self {
        TorrentError::state_error_with_source("Failed to parse progress record", err.to_string())
    }
}

impl From<std::net::AddrParseError> for TorrentError {
    fn from(err: std::net::AddrParseError) -> Self {
        TorrentError::network_error_full("Failed to parse address", "unknown".to_string(), err.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for TorrentError {
    fn from(err: tokio::time::error::Elapsed) -> Self {
        TorrentError::NetworkError {
            message: "Operation timed out".to_string(),
            address: None,
            source: Some(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error() {
        let err = TorrentError::parse_error("Invalid descriptor");
        assert_eq!(err.to_string(), "Parse error: Invalid descriptor");
    }

    #[test]
    fn test_peer_error_with_peer() {
        let err = TorrentError::peer_error_with_peer("Connection failed", "127.0.0.1:6881");
        assert!(err.to_string().contains("Peer error"));
        assert!(err.to_string().contains("127.0.0.1:6881"));
        assert_eq!(err.kind(), ErrorKind::IoFailure);
    }

    #[test]
    fn test_resource_missing() {
        let err = TorrentError::resource_missing("Source file not found", "/tmp/nope");
        assert!(err.to_string().contains("/tmp/nope"));
        assert_eq!(err.kind(), ErrorKind::ResourceMissing);
    }

    #[test]
    fn test_kind_of_anyhow() {
        let err: anyhow::Error = TorrentError::protocol_error("Invalid protocol string").into();
        assert_eq!(TorrentError::kind_of(&err), Some(ErrorKind::ProtocolViolation));

        let other = anyhow::anyhow!("plain");
        assert_eq!(TorrentError::kind_of(&other), None);
    }

    #[test]
    fn test_display_details() {
        let err = TorrentError::storage_error_full("Write failed", "/tmp/out.bin", "disk full");
        assert_eq!(err.to_string(), "Storage error: Write failed (path: /tmp/out.bin, source: disk full)");
        assert_eq!(TorrentError::state_error("Progress record unreadable").kind(), ErrorKind::StateInconsistency);
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "File not found");
        let err: TorrentError = io_err.into();
        assert!(matches!(err, TorrentError::StorageError { .. }));
    }

    #[test]
    fn test_from_json_error_is_state_inconsistency() {
        let json_err = serde_json::from_slice::<serde_json::Value>(b"{not json").unwrap_err();
        let err: TorrentError = json_err.into();
        assert_eq!(err.kind(), ErrorKind::StateInconsistency);
    }

    #[test]
    fn test_config_error_with_field() {
        let err = TorrentError::config_error_with_field("Invalid value", "max_connections");
        assert!(err.to_string().contains("Config error"));
        assert!(err.to_string().contains("max_connections"));
    }
}
