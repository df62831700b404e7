//! Wire types for `roots/list`

use serde::{Deserialize, Serialize};

/// JSON-RPC method a server sends to list the client's roots
pub const LIST_ROOTS_METHOD: &str = "roots/list";

/// Notification a client sends when its roots may have changed
pub const ROOTS_LIST_CHANGED_NOTIFICATION: &str = "notifications/roots/list_changed";

/// A location the client has declared accessible
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Root {
    /// Root URI (typically a file:// URI)
    pub uri: String,
    /// Optional human-readable name for this root
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Root {
    /// Create a root from its URI
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            name: None,
        }
    }

    /// Attach a display name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Parameters for a continued `roots/list` request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListRootsParams {
    /// Continuation token from the previous page
    pub cursor: String,
}

/// One page of a `roots/list` result
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListRootsResult {
    /// Roots on this page
    pub roots: Vec<Root>,
    /// Token for the next page, absent on the last one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}
