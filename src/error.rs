//! Error types for the IRC ebook engine
//!
//! This module defines the error taxonomy shared by the connection,
//! search and transfer layers. Every variant carries a stable reason code
//! (see [`IrcBookError::reason`]) that is forwarded to progress consumers.

use serde::Serialize;
use std::fmt;

/// Result alias used throughout the library
pub type Result<T> = std::result::Result<T, IrcBookError>;

/// Why a connection could not be established
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionErrorKind {
    /// The server refused or reset the socket
    Refused,
    /// Connect or registration did not finish in time
    Timeout,
    /// The server rejected registration (nick exhaustion, ERROR, closed link)
    RegistrationFailed,
}

impl ConnectionErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionErrorKind::Refused => "refused",
            ConnectionErrorKind::Timeout => "timeout",
            ConnectionErrorKind::RegistrationFailed => "registration_failed",
        }
    }
}

/// Why a search produced no usable candidates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchErrorKind {
    /// Nothing recognisable arrived inside the response window
    Timeout,
    /// The bot answered, but nothing survived filtering
    NoResults,
}

impl SearchErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchErrorKind::Timeout => "timeout",
            SearchErrorKind::NoResults => "no_results",
        }
    }
}

/// Why a single DCC transfer attempt failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferErrorKind {
    /// No DCC offer arrived after the trigger was sent
    Timeout,
    /// The DCC SEND offer could not be parsed
    MalformedOffer,
    /// The peer stopped sending for longer than the stall timeout
    Stalled,
    /// The peer closed before the declared size was received
    Incomplete,
    /// The archive held no member with the target extension
    NoMatchingContent,
    /// Local disk or socket failure
    IoFailure,
}

impl TransferErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferErrorKind::Timeout => "timeout",
            TransferErrorKind::MalformedOffer => "malformed_offer",
            TransferErrorKind::Stalled => "stalled",
            TransferErrorKind::Incomplete => "incomplete",
            TransferErrorKind::NoMatchingContent => "no_matching_content",
            TransferErrorKind::IoFailure => "io_failure",
        }
    }
}

impl fmt::Display for TransferErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error type for every engine operation
#[derive(Debug, Clone)]
pub enum IrcBookError {
    /// Connecting or registering with the IRC server failed
    Connection {
        kind: ConnectionErrorKind,
        message: String,
        address: Option<String>,
        source: Option<String>,
    },

    /// A search did not yield candidates
    Search {
        kind: SearchErrorKind,
        message: String,
        query: Option<String>,
    },

    /// A single DCC transfer attempt failed
    Transfer {
        kind: TransferErrorKind,
        message: String,
        peer: Option<String>,
        source: Option<String>,
    },

    /// Every candidate was tried and none succeeded
    AllCandidatesFailed {
        attempts: usize,
        last: Box<IrcBookError>,
    },

    /// Session lookup or usage errors
    Session {
        message: String,
        session: Option<String>,
    },

    /// IRC line level protocol errors
    Protocol {
        message: String,
        source: Option<String>,
    },

    /// Configuration errors
    Config {
        message: String,
        field: Option<String>,
    },

    /// The caller cancelled the operation
    Cancelled {
        operation: String,
    },
}

impl IrcBookError {
    /// Create a new connection error
    pub fn connection_error(kind: ConnectionErrorKind, message: impl Into<String>) -> Self {
        IrcBookError::Connection {
            kind,
            message: message.into(),
            address: None,
            source: None,
        }
    }

    /// Create a new connection error with address and source
    pub fn connection_error_full(
        kind: ConnectionErrorKind,
        message: impl Into<String>,
        address: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        IrcBookError::Connection {
            kind,
            message: message.into(),
            address: Some(address.into()),
            source: Some(source.into()),
        }
    }

    /// Create a new search error
    pub fn search_error(kind: SearchErrorKind, message: impl Into<String>) -> Self {
        IrcBookError::Search {
            kind,
            message: message.into(),
            query: None,
        }
    }

    /// Create a new search error with the query text
    pub fn search_error_with_query(
        kind: SearchErrorKind,
        message: impl Into<String>,
        query: impl Into<String>,
    ) -> Self {
        IrcBookError::Search {
            kind,
            message: message.into(),
            query: Some(query.into()),
        }
    }

    /// Create a new transfer error
    pub fn transfer_error(kind: TransferErrorKind, message: impl Into<String>) -> Self {
        IrcBookError::Transfer {
            kind,
            message: message.into(),
            peer: None,
            source: None,
        }
    }

    /// Create a new transfer error with peer address
    pub fn transfer_error_with_peer(
        kind: TransferErrorKind,
        message: impl Into<String>,
        peer: impl Into<String>,
    ) -> Self {
        IrcBookError::Transfer {
            kind,
            message: message.into(),
            peer: Some(peer.into()),
            source: None,
        }
    }

    /// Create a new transfer error with peer and source
    pub fn transfer_error_full(
        kind: TransferErrorKind,
        message: impl Into<String>,
        peer: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        IrcBookError::Transfer {
            kind,
            message: message.into(),
            peer: Some(peer.into()),
            source: Some(source.into()),
        }
    }

    /// Create a new session error
    pub fn session_error(message: impl Into<String>) -> Self {
        IrcBookError::Session {
            message: message.into(),
            session: None,
        }
    }

    /// Create a new session error naming the session
    pub fn session_error_with_id(message: impl Into<String>, session: impl Into<String>) -> Self {
        IrcBookError::Session {
            message: message.into(),
            session: Some(session.into()),
        }
    }

    /// Create a new protocol error
    pub fn protocol_error(message: impl Into<String>) -> Self {
        IrcBookError::Protocol {
            message: message.into(),
            source: None,
        }
    }

    /// Create a new protocol error with source
    pub fn protocol_error_with_source(message: impl Into<String>, source: impl Into<String>) -> Self {
        IrcBookError::Protocol {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Create a new config error
    pub fn config_error(message: impl Into<String>) -> Self {
        IrcBookError::Config {
            message: message.into(),
            field: None,
        }
    }

    /// Create a new config error with field
    pub fn config_error_with_field(message: impl Into<String>, field: impl Into<String>) -> Self {
        IrcBookError::Config {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create a cancellation error for the named operation
    pub fn cancelled(operation: impl Into<String>) -> Self {
        IrcBookError::Cancelled {
            operation: operation.into(),
        }
    }

    /// Stable snake_case reason code for progress events
    pub fn reason(&self) -> &'static str {
        match self {
            IrcBookError::Connection { kind, .. } => kind.as_str(),
            IrcBookError::Search { kind, .. } => kind.as_str(),
            IrcBookError::Transfer { kind, .. } => kind.as_str(),
            IrcBookError::AllCandidatesFailed { last, .. } => last.reason(),
            IrcBookError::Session { .. } => "session",
            IrcBookError::Protocol { .. } => "protocol",
            IrcBookError::Config { .. } => "config",
            IrcBookError::Cancelled { .. } => "cancelled",
        }
    }

    /// Transfer failure kind, if this is a transfer error
    pub fn transfer_kind(&self) -> Option<TransferErrorKind> {
        match self {
            IrcBookError::Transfer { kind, .. } => Some(*kind),
            IrcBookError::AllCandidatesFailed { last, .. } => last.transfer_kind(),
            _ => None,
        }
    }

    /// Whether the caller cancelled the operation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, IrcBookError::Cancelled { .. })
    }

    /// Add context to the error
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        let ctx = context.into();
        match &mut self {
            IrcBookError::Connection { source, .. }
            | IrcBookError::Transfer { source, .. }
            | IrcBookError::Protocol { source, .. } => {
                *source = Some(source.as_ref().map_or_else(|| ctx.clone(), |s| format!("{}: {}", s, ctx)));
            }
            _ => {}
        }
        self
    }
}

impl fmt::Display for IrcBookError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IrcBookError::Connection { kind, message, address, source } => {
                write!(f, "Connection error ({}): {}", kind.as_str(), message)?;
                match (address, source) {
                    (Some(a), Some(s)) => write!(f, " (address: {}, source: {})", a, s),
                    (Some(a), None) => write!(f, " (address: {})", a),
                    (None, Some(s)) => write!(f, " (source: {})", s),
                    (None, None) => Ok(()),
                }
            }
            IrcBookError::Search { kind, message, query } => {
                if let Some(q) = query {
                    write!(f, "Search error ({}): {} (query: {})", kind.as_str(), message, q)
                } else {
                    write!(f, "Search error ({}): {}", kind.as_str(), message)
                }
            }
            IrcBookError::Transfer { kind, message, peer, source } => {
                write!(f, "Transfer error ({}): {}", kind.as_str(), message)?;
                match (peer, source) {
                    (Some(p), Some(s)) => write!(f, " (peer: {}, source: {})", p, s),
                    (Some(p), None) => write!(f, " (peer: {})", p),
                    (None, Some(s)) => write!(f, " (source: {})", s),
                    (None, None) => Ok(()),
                }
            }
            IrcBookError::AllCandidatesFailed { attempts, last } => {
                write!(f, "All {} sources failed; last error: {}", attempts, last)
            }
            IrcBookError::Session { message, session } => {
                if let Some(id) = session {
                    write!(f, "Session error: {} (session: {})", message, id)
                } else {
                    write!(f, "Session error: {}", message)
                }
            }
            IrcBookError::Protocol { message, source } => {
                if let Some(src) = source {
                    write!(f, "Protocol error: {} (source: {})", message, src)
                } else {
                    write!(f, "Protocol error: {}", message)
                }
            }
            IrcBookError::Config { message, field } => {
                if let Some(field_val) = field {
                    write!(f, "Config error: {} (field: {})", message, field_val)
                } else {
                    write!(f, "Config error: {}", message)
                }
            }
            IrcBookError::Cancelled { operation } => {
                write!(f, "Cancelled: {}", operation)
            }
        }
    }
}

impl std::error::Error for IrcBookError {}

// Conversions from the library errors the engine touches

impl From<std::io::Error> for IrcBookError {
    fn from(err: std::io::Error) -> Self {
        IrcBookError::Transfer {
            kind: TransferErrorKind::IoFailure,
            message: err.to_string(),
            peer: None,
            source: Some(err.kind().to_string()),
        }
    }
}

impl From<tokio::time::error::Elapsed> for IrcBookError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        IrcBookError::connection_error(ConnectionErrorKind::Timeout, "Operation timed out")
    }
}

impl From<std::net::AddrParseError> for IrcBookError {
    fn from(err: std::net::AddrParseError) -> Self {
        IrcBookError::protocol_error_with_source("Failed to parse address", err.to_string())
    }
}

impl From<serde_json::Error> for IrcBookError {
    fn from(err: serde_json::Error) -> Self {
        IrcBookError::protocol_error_with_source("Failed to encode JSON", err.to_string())
    }
}

impl From<toml::de::Error> for IrcBookError {
    fn from(err: toml::de::Error) -> Self {
        IrcBookError::config_error(format!("Failed to parse config file: {}", err))
    }
}

impl From<url::ParseError> for IrcBookError {
    fn from(err: url::ParseError) -> Self {
        IrcBookError::config_error_with_field(format!("Invalid server URL: {}", err), "server")
    }
}

impl From<zip::result::ZipError> for IrcBookError {
    fn from(err: zip::result::ZipError) -> Self {
        IrcBookError::Transfer {
            kind: TransferErrorKind::IoFailure,
            message: "Failed to read archive".to_string(),
            peer: None,
            source: Some(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_error_display() {
        let err = IrcBookError::connection_error_full(
            ConnectionErrorKind::Refused,
            "Failed to connect",
            "irc.example.net:6697",
            "connection refused",
        );
        let text = err.to_string();
        assert!(text.contains("Connection error (refused)"));
        assert!(text.contains("irc.example.net:6697"));
        assert_eq!(err.reason(), "refused");
    }

    #[test]
    fn test_transfer_error_with_peer() {
        let err = IrcBookError::transfer_error_with_peer(TransferErrorKind::Stalled, "No data for 30s", "10.0.0.1:2050");
        assert!(err.to_string().contains("Transfer error (stalled)"));
        assert!(err.to_string().contains("10.0.0.1:2050"));
        assert_eq!(err.transfer_kind(), Some(TransferErrorKind::Stalled));
    }

    #[test]
    fn test_all_candidates_failed_carries_last_reason() {
        let last = IrcBookError::transfer_error(TransferErrorKind::Stalled, "peer went quiet");
        let err = IrcBookError::AllCandidatesFailed { attempts: 3, last: Box::new(last) };
        assert_eq!(err.reason(), "stalled");
        assert!(err.to_string().starts_with("All 3 sources failed; last error:"));
    }

    #[test]
    fn test_search_error_reason() {
        let err = IrcBookError::search_error_with_query(SearchErrorKind::NoResults, "Nothing matched", "@search dune");
        assert_eq!(err.reason(), "no_results");
        assert!(err.to_string().contains("@search dune"));
    }

    #[test]
    fn test_with_context() {
        let err = IrcBookError::protocol_error("Bad line").with_context("while registering");
        assert!(err.to_string().contains("while registering"));
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "File not found");
        let err: IrcBookError = io_err.into();
        assert_eq!(err.transfer_kind(), Some(TransferErrorKind::IoFailure));
    }

    #[test]
    fn test_transfer_kind_serializes_as_reason() {
        for kind in [
            TransferErrorKind::Timeout,
            TransferErrorKind::MalformedOffer,
            TransferErrorKind::Stalled,
            TransferErrorKind::Incomplete,
            TransferErrorKind::NoMatchingContent,
            TransferErrorKind::IoFailure,
        ] {
            assert_eq!(serde_json::to_string(&kind).unwrap(), format!("\"{}\"", kind.as_str()));
        }
    }

    #[test]
    fn test_from_addr_parse_error() {
        let addr_err = "invalid:address".parse::<std::net::SocketAddr>().unwrap_err();
        let err: IrcBookError = addr_err.into();
        assert!(matches!(err, IrcBookError::Protocol { .. }));
    }

    #[test]
    fn test_config_error_with_field() {
        let err = IrcBookError::config_error_with_field("Invalid value", "min_command_interval_ms");
        assert!(err.to_string().contains("Config error"));
        assert!(err.to_string().contains("min_command_interval_ms"));
    }

    #[test]
    fn test_cancelled() {
        let err = IrcBookError::cancelled("search");
        assert!(err.is_cancelled());
        assert_eq!(err.reason(), "cancelled");
    }
}
