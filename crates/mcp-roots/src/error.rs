//! Error types for the roots cache

use thiserror::Error;

/// Result type for roots operations
pub type RootsResult<T> = Result<T, RootsError>;

/// JSON-RPC code for a malformed or stale client request
pub const INVALID_REQUEST: i32 = -32600;
/// JSON-RPC code for internal errors
pub const INTERNAL_ERROR: i32 = -32603;
/// MCP code for access outside the allowed resources
pub const RESOURCE_ACCESS_DENIED: i32 = -32005;
/// Application code for transport failures
pub const TRANSPORT_ERROR: i32 = -32014;

/// Errors surfaced by the roots cache
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RootsError {
    /// The client answered `roots/list` with something that is not a roots listing
    #[error("Malformed roots/list response: {0}")]
    ProtocolResponse(String),

    /// Pagination cursor could not be decoded
    #[error("Invalid cursor: {0}")]
    InvalidCursor(String),

    /// Pagination cursor was issued for an older snapshot
    #[error("Stale cursor: roots changed during pagination (expected version {expected}, received {received})")]
    StaleCursor {
        /// Version currently cached for the connection
        expected: u64,
        /// Version embedded in the cursor
        received: u64,
    },

    /// Pagination cursor carried a negative offset
    #[error("Invalid cursor offset: {0}")]
    InvalidOffset(i64),

    /// Path is not inside any root declared by the client
    #[error("Path outside allowed roots: {0}")]
    OutsideRoots(String),

    /// The roots/list round trip itself failed
    #[error("Roots request failed: {0}")]
    Rpc(String),
}

impl RootsError {
    /// Create an RPC failure, for use by [`crate::RootsClient`] implementations
    pub fn rpc(message: impl Into<String>) -> Self {
        Self::Rpc(message.into())
    }

    /// Whether the error maps to the client-visible "invalid request" class
    pub fn is_invalid_request(&self) -> bool {
        matches!(
            self,
            Self::InvalidCursor(_) | Self::StaleCursor { .. } | Self::InvalidOffset(_)
        )
    }

    /// JSON-RPC error code for the outer protocol layer
    pub const fn jsonrpc_code(&self) -> i32 {
        match self {
            Self::InvalidCursor(_) | Self::StaleCursor { .. } | Self::InvalidOffset(_) => {
                INVALID_REQUEST
            }
            Self::ProtocolResponse(_) => INTERNAL_ERROR,
            Self::OutsideRoots(_) => RESOURCE_ACCESS_DENIED,
            Self::Rpc(_) => TRANSPORT_ERROR,
        }
    }

    /// Get error category for metrics and logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::ProtocolResponse(_) => "protocol_response",
            Self::InvalidCursor(_) => "invalid_cursor",
            Self::StaleCursor { .. } => "stale_cursor",
            Self::InvalidOffset(_) => "invalid_offset",
            Self::OutsideRoots(_) => "outside_roots",
            Self::Rpc(_) => "rpc",
        }
    }
}
