//! Roots cache demo
//!
//! Plays both sides of an MCP session in one process: an in-memory client
//! that declares roots, and a server that caches them and checks paths.
//! Results go to stdout, logs go to stderr (`RUST_LOG=mcp_roots=debug`).

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use clap::Parser;
use mcp_roots::{
    LifecycleHook, ListRootsParams, ROOTS_LIST_CHANGED_NOTIFICATION, Root, RootsCache,
    RootsClient, RootsConfig, RootsResult,
};
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Client roots served per `roots/list` page
const CLIENT_PAGE_SIZE: usize = 2;

#[derive(Parser, Debug)]
#[command(
    name = "mcp-roots-demo",
    version,
    about = "Cache a session's roots and check paths against them"
)]
struct Args {
    /// Root declared by the client (file URI or local path); repeatable
    #[arg(long = "root", short = 'r', value_name = "URI")]
    roots: Vec<String>,

    /// Path to check against the declared roots; repeatable
    #[arg(long = "check", short = 'c', value_name = "PATH")]
    checks: Vec<PathBuf>,

    /// Roots the client switches to before announcing a change; repeatable
    #[arg(long = "changed", value_name = "URI")]
    changed: Vec<String>,

    /// Cache configuration file (TOML, YAML or JSON)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
}

/// In-memory stand-in for a connected client
#[derive(Debug)]
struct Session {
    roots: Mutex<Vec<Root>>,
    // Released with the session, taking its cache entry along
    hook: OnceLock<LifecycleHook>,
}

impl Session {
    fn new(roots: Vec<Root>) -> Self {
        Self {
            roots: Mutex::new(roots),
            hook: OnceLock::new(),
        }
    }

    fn declare(&self, roots: Vec<Root>) {
        *self.roots.lock() = roots;
    }
}

#[async_trait]
impl RootsClient for Session {
    async fn list_roots(&self, params: Option<ListRootsParams>) -> RootsResult<Value> {
        let roots = self.roots.lock().clone();
        let start = params
            .and_then(|p| p.cursor.parse::<usize>().ok())
            .unwrap_or(0)
            .min(roots.len());
        let end = (start + CLIENT_PAGE_SIZE).min(roots.len());

        let mut page = json!({ "roots": &roots[start..end] });
        if end < roots.len() {
            page["nextCursor"] = json!(end.to_string());
        }
        Ok(page)
    }
}

fn to_root(value: &str) -> Result<Root> {
    if value.contains("://") {
        return Ok(Root::new(value));
    }
    let path = Path::new(value);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .context("Failed to resolve current directory")?
            .join(path)
    };
    let uri = url::Url::from_file_path(&absolute)
        .map_err(|()| anyhow::anyhow!("Cannot express {} as a file URI", absolute.display()))?;
    Ok(Root::new(uri.as_str()).with_name(value))
}

fn to_roots(values: &[String]) -> Result<Vec<Root>> {
    values.iter().map(|value| to_root(value)).collect()
}

fn report(cache: &RootsCache<Session>, session: &Arc<Session>, checks: &[PathBuf]) {
    let guard = cache.guard(session);
    println!("version {}", cache.version(session));
    for root in guard.roots() {
        println!("  root  {}", root.display());
    }
    for path in checks {
        match guard.check(path) {
            Ok(resolved) => println!("  allow {} -> {}", path.display(), resolved.display()),
            Err(e) => println!("  deny  {} ({})", path.display(), e),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => RootsConfig::from_file(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => RootsConfig::default(),
    };
    config.validate()?;
    info!(?config, "Starting roots demo");

    let cache: RootsCache<Session> = RootsCache::new(config.clone());
    let session = Arc::new(Session::new(to_roots(&args.roots)?));

    cache.on_session_open(&session).await?;
    if session.hook.set(cache.lifecycle_hook(&session)).is_err() {
        bail!("Session already carries a lifecycle hook");
    }
    report(&cache, &session, &args.checks);

    if !args.changed.is_empty() {
        session.declare(to_roots(&args.changed)?);
        // A burst of notifications costs a single round trip
        for _ in 0..3 {
            cache.handle_notification(&session, ROOTS_LIST_CHANGED_NOTIFICATION);
        }
        tokio::time::sleep(config.debounce * 2 + Duration::from_millis(50)).await;
        report(&cache, &session, &args.checks);
    }

    let mut cursor: Option<String> = None;
    let mut page_number = 1;
    loop {
        let page = cache.list_page(&session, cursor.as_deref())?;
        for root in &page.roots {
            println!("page {} {}", page_number, root.uri);
        }
        match page.next_cursor {
            Some(next) => cursor = Some(next),
            None => break,
        }
        page_number += 1;
    }

    drop(session);
    tokio::time::sleep(Duration::from_millis(50)).await;
    println!("cached connections after close: {}", cache.len());
    Ok(())
}
