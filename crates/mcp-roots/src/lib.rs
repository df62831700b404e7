//! # MCP Roots
//!
//! Per-connection cache of the roots an MCP client has declared, and the
//! path guard derived from them.
//!
//! A server asks each client for its roots with `roots/list`, keeps the
//! answer as a versioned [`Snapshot`], and checks every filesystem path a
//! tool touches against the [`Guard`] built from that snapshot.
//!
//! ## Features
//!
//! - **Fail closed**: a client with no roots grants access to nothing
//! - **Canonical comparison**: symlinks, `..`, `~` and percent-encoding are
//!   resolved before comparing, component by component
//! - **Debounced refresh**: a burst of `notifications/roots/list_changed`
//!   costs one `roots/list` round trip
//! - **Versioned pagination**: cursors are bound to the snapshot version and
//!   rejected once the roots change
//! - **Non-owning**: entries go away with their connection; the cache never
//!   keeps a connection alive
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use mcp_roots::{ListRootsParams, RootsCache, RootsClient, RootsConfig, RootsResult};
//!
//! struct Session;
//!
//! #[async_trait]
//! impl RootsClient for Session {
//!     async fn list_roots(
//!         &self,
//!         _params: Option<ListRootsParams>,
//!     ) -> RootsResult<serde_json::Value> {
//!         Ok(serde_json::json!({ "roots": [{ "uri": "file:///workspace" }] }))
//!     }
//! }
//!
//! # async fn run() -> RootsResult<()> {
//! let cache = RootsCache::new(RootsConfig::default());
//! let session = Arc::new(Session);
//!
//! cache.on_session_open(&session).await?;
//! assert!(cache.guard(&session).within("/workspace/src/main.rs"));
//!
//! // Later, when the client reports a change:
//! cache.on_list_changed(&session);
//! # Ok(())
//! # }
//! ```
//!
//! ## Residual risk
//!
//! Guard checks are made at call time and are not atomic with the file
//! operation that follows; see [`guard`] for details.

#![deny(missing_docs)]
#![warn(missing_debug_implementations)]
#![warn(clippy::all)]

pub mod cache;
pub mod config;
pub mod cursor;
mod debounce;
pub mod error;
pub mod fetch;
pub mod guard;
pub mod lifecycle;
pub mod path;
pub mod snapshot;
pub mod types;

pub use cache::{CacheEntry, RootsCache};
pub use config::{ConfigError, RootsConfig};
pub use error::{RootsError, RootsResult};
pub use fetch::{RootsClient, fetch_snapshot};
pub use guard::Guard;
pub use lifecycle::{ConnectionKey, LifecycleHook};
pub use snapshot::Snapshot;
pub use types::{
    LIST_ROOTS_METHOD, ListRootsParams, ListRootsResult, ROOTS_LIST_CHANGED_NOTIFICATION, Root,
};
