//! Paginated `roots/list` fetching

use async_trait::async_trait;
use tracing::{debug, trace};

use crate::error::{RootsError, RootsResult};
use crate::snapshot::Snapshot;
use crate::types::{ListRootsParams, ListRootsResult, Root};

/// The server-to-client `roots/list` round trip
///
/// Implemented by whatever owns the client connection. The cache never
/// retries: errors returned here reach the caller of
/// [`RootsCache::refresh`](crate::RootsCache::refresh) unchanged.
#[async_trait]
pub trait RootsClient: Send + Sync {
    /// Send `roots/list` and return the raw result object
    ///
    /// `params` is `None` for the first page and carries the previous
    /// page's `nextCursor` afterwards.
    async fn list_roots(&self, params: Option<ListRootsParams>)
    -> RootsResult<serde_json::Value>;
}

/// Fetch every page of the client's roots and build a snapshot
///
/// # Errors
///
/// Returns [`RootsError::ProtocolResponse`] if a page is not a roots
/// listing, or whatever error the client's round trip produced.
pub async fn fetch_snapshot<C>(client: &C) -> RootsResult<Snapshot>
where
    C: RootsClient + ?Sized,
{
    let mut collected: Vec<Root> = Vec::new();
    let mut cursor: Option<String> = None;
    let mut pages = 0usize;

    loop {
        let params = cursor.take().map(|cursor| ListRootsParams { cursor });
        let response = client.list_roots(params).await?;
        let page = parse_page(response)?;
        pages += 1;
        trace!(
            page = pages,
            roots = page.roots.len(),
            more = page.next_cursor.is_some(),
            "Received roots page"
        );

        collected.extend(page.roots);
        match page.next_cursor {
            Some(next) if !next.is_empty() => cursor = Some(next),
            _ => break,
        }
    }

    let snapshot = Snapshot::new(collected);
    debug!(pages, roots = snapshot.len(), "Fetched roots snapshot");
    Ok(snapshot)
}

fn parse_page(response: serde_json::Value) -> RootsResult<ListRootsResult> {
    match response.get("roots") {
        None => Err(RootsError::ProtocolResponse(
            "response is missing the 'roots' field".to_string(),
        )),
        Some(_) => serde_json::from_value(response)
            .map_err(|e| RootsError::ProtocolResponse(format!("invalid roots listing: {}", e))),
    }
}
