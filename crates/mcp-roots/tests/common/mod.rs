//! Scripted roots clients shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use mcp_roots::{ListRootsParams, RootsError, RootsResult};
use serde_json::{Value, json};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Client whose root list can be changed between fetches
///
/// Serves the current list in pages of `page_size`, counting every
/// `roots/list` call so tests can assert how many round trips happened.
#[derive(Debug)]
pub struct MockClient {
    uris: Mutex<Vec<String>>,
    page_size: usize,
    latency: Mutex<Duration>,
    fail_next: Mutex<Option<RootsError>>,
    calls: AtomicUsize,
    fetches: AtomicUsize,
}

impl MockClient {
    pub fn new(uris: &[&str]) -> Self {
        Self::paged(uris, usize::MAX)
    }

    pub fn paged(uris: &[&str], page_size: usize) -> Self {
        Self {
            uris: Mutex::new(uris.iter().map(|uri| uri.to_string()).collect()),
            page_size,
            latency: Mutex::new(Duration::ZERO),
            fail_next: Mutex::new(None),
            calls: AtomicUsize::new(0),
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn set_roots(&self, uris: &[&str]) {
        *self.uris.lock().unwrap() = uris.iter().map(|uri| uri.to_string()).collect();
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = latency;
    }

    pub fn fail_next(&self, error: RootsError) {
        *self.fail_next.lock().unwrap() = Some(error);
    }

    /// Number of `roots/list` requests received
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Number of complete fetches started (first-page requests)
    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl mcp_roots::RootsClient for MockClient {
    async fn list_roots(&self, params: Option<ListRootsParams>) -> RootsResult<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if params.is_none() {
            self.fetches.fetch_add(1, Ordering::SeqCst);
        }
        if let Some(error) = self.fail_next.lock().unwrap().take() {
            return Err(error);
        }

        // Snapshot the list before suspending so a fetch sees one consistent state
        let uris = self.uris.lock().unwrap().clone();
        let latency = *self.latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let start = params
            .map(|p| p.cursor.parse::<usize>().unwrap_or(0))
            .unwrap_or(0);
        let end = start.saturating_add(self.page_size).min(uris.len());
        let roots: Vec<Value> = uris[start..end]
            .iter()
            .map(|uri| json!({ "uri": uri }))
            .collect();

        if end < uris.len() {
            Ok(json!({ "roots": roots, "nextCursor": end.to_string() }))
        } else {
            Ok(json!({ "roots": roots }))
        }
    }
}

/// Client that replays fixed responses, one per call
#[derive(Debug)]
pub struct ReplayClient {
    responses: Mutex<Vec<Value>>,
}

impl ReplayClient {
    pub fn new(responses: Vec<Value>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().rev().collect()),
        }
    }
}

#[async_trait]
impl mcp_roots::RootsClient for ReplayClient {
    async fn list_roots(&self, _params: Option<ListRootsParams>) -> RootsResult<Value> {
        self.responses
            .lock()
            .unwrap()
            .pop()
            .ok_or_else(|| RootsError::rpc("no scripted response left"))
    }
}

/// Route `tracing` output through the test harness; honours `RUST_LOG`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
