//! Narrow façade over the external search index.
//!
//! The cache needs two calls from its persistence backend, an idempotent
//! write by document id and a single search, expressed by [`SearchIndex`].
//! Transport, pooling, retries and authentication belong to the
//! implementation. [`IndexAdapter`] adds the process-wide `enableIndex`
//! switch; [`MemoryIndex`] is an in-process backend for tests and for hosts
//! that run without an index.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::document::EncodedDocument;
use crate::error::BgCacheError;

/// Default index name.
pub const DEFAULT_INDEX: &str = "breakglass";

/// Upper bound on hits returned by one reload search.
pub const MAX_PAGE_SIZE: usize = 10_000;

/// One search hit.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub id: String,
    pub source: Value,
}

/// Persistence backend for the cache.
///
/// Implementations must be safe for concurrent use and carry their own
/// timeouts. Transport failures map to `IndexUnavailable`, 4xx responses
/// to `IndexRejected`.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Create or replace the document `id` in `index`.
    async fn bulk_upsert(&self, doc: &Value, index: &str, id: &str) -> Result<(), BgCacheError>;

    /// Run one query against `index`, returning hits in result order.
    async fn search(&self, body: &Value, index: &str) -> Result<Vec<SearchHit>, BgCacheError>;
}

/// The reload query: every document, newest grant first.
pub fn reload_query(page_size: usize) -> Value {
    json!({
        "query": { "match_all": {} },
        "size": page_size.min(MAX_PAGE_SIZE),
        "sort": [
            { "api_keys.last_updated": { "nested_path": "api_keys", "order": "desc" } }
        ]
    })
}

/// A cheap reachability probe.
pub fn probe_query() -> Value {
    json!({ "query": { "match_all": {} }, "size": 0 })
}

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

/// Typed access to the configured backend plus the `enableIndex` flag.
///
/// The flag starts off. Any successful call turns it on; a search that
/// finds the index unavailable turns it off. Writes are skipped while off.
pub struct IndexAdapter {
    backend: Option<Arc<dyn SearchIndex>>,
    index_name: String,
    enabled: Mutex<bool>,
}

impl IndexAdapter {
    pub fn new(backend: Option<Arc<dyn SearchIndex>>, index_name: impl Into<String>) -> Self {
        Self {
            backend,
            index_name: index_name.into(),
            enabled: Mutex::new(false),
        }
    }

    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    /// Whether a backend was configured at all.
    pub fn is_available(&self) -> bool {
        self.backend.is_some()
    }

    pub fn is_enabled(&self) -> bool {
        *self.enabled.lock()
    }

    pub(crate) fn set_enabled(&self, enabled: bool) {
        let mut flag = self.enabled.lock();
        if *flag != enabled {
            info!(index = %self.index_name, enabled, "index persistence toggled");
        }
        *flag = enabled;
    }

    fn backend(&self) -> Result<&Arc<dyn SearchIndex>, BgCacheError> {
        self.backend
            .as_ref()
            .ok_or_else(|| BgCacheError::IndexUnavailable("no index configured".into()))
    }

    /// Write `doc` under its id.
    pub async fn upsert(&self, doc: &EncodedDocument) -> Result<(), BgCacheError> {
        let backend = self.backend()?;
        let body = serde_json::to_value(&doc.body)
            .map_err(|err| BgCacheError::MalformedDocument(err.to_string()))?;
        backend.bulk_upsert(&body, &self.index_name, &doc.id).await?;
        debug!(index = %self.index_name, id = %doc.id, "document indexed");
        self.set_enabled(true);
        Ok(())
    }

    /// Run `body` against the configured index.
    pub async fn search(&self, body: &Value) -> Result<Vec<SearchHit>, BgCacheError> {
        let backend = self.backend()?;
        match backend.search(body, &self.index_name).await {
            Ok(hits) => {
                self.set_enabled(true);
                Ok(hits)
            }
            Err(err @ BgCacheError::IndexUnavailable(_)) => {
                self.set_enabled(false);
                Err(err)
            }
            Err(err) => Err(err),
        }
    }
}

impl std::fmt::Debug for IndexAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexAdapter")
            .field("index_name", &self.index_name)
            .field("available", &self.is_available())
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// In-memory backend
// ---------------------------------------------------------------------------

/// An in-process [`SearchIndex`].
///
/// Supports the `match_all` query with `size` and a descending sort on
/// `api_keys.last_updated` (maximum over the nested elements, ties by id).
/// It can be switched unavailable or made to reject requests, and it counts
/// calls, which makes it the test double for the cache.
#[derive(Default)]
pub struct MemoryIndex {
    indices: RwLock<HashMap<String, HashMap<String, Value>>>,
    unavailable: AtomicBool,
    rejection: Mutex<Option<(u16, String)>>,
    upserts: AtomicUsize,
    searches: AtomicUsize,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a raw document directly, bypassing availability and counters.
    pub fn insert(&self, index: &str, id: &str, doc: Value) {
        self.indices
            .write()
            .entry(index.to_string())
            .or_default()
            .insert(id.to_string(), doc);
    }

    pub fn get(&self, index: &str, id: &str) -> Option<Value> {
        self.indices.read().get(index)?.get(id).cloned()
    }

    pub fn len(&self, index: &str) -> usize {
        self.indices.read().get(index).map_or(0, HashMap::len)
    }

    pub fn is_empty(&self, index: &str) -> bool {
        self.len(index) == 0
    }

    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Make every following call fail with `IndexRejected`.
    pub fn reject_with(&self, status: u16, reason: impl Into<String>) {
        *self.rejection.lock() = Some((status, reason.into()));
    }

    pub fn clear_rejection(&self) {
        *self.rejection.lock() = None;
    }

    pub fn upsert_count(&self) -> usize {
        self.upserts.load(Ordering::SeqCst)
    }

    pub fn search_count(&self) -> usize {
        self.searches.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), BgCacheError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(BgCacheError::IndexUnavailable("connection refused".into()));
        }
        if let Some((status, reason)) = self.rejection.lock().clone() {
            return Err(BgCacheError::IndexRejected { status, reason });
        }
        Ok(())
    }
}

fn max_last_updated(doc: &Value) -> i64 {
    doc.get("api_keys")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|element| element.get("last_updated").and_then(Value::as_i64))
        .max()
        .unwrap_or(i64::MIN)
}

#[async_trait]
impl SearchIndex for MemoryIndex {
    async fn bulk_upsert(&self, doc: &Value, index: &str, id: &str) -> Result<(), BgCacheError> {
        self.upserts.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        self.insert(index, id, doc.clone());
        Ok(())
    }

    async fn search(&self, body: &Value, index: &str) -> Result<Vec<SearchHit>, BgCacheError> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        self.check()?;

        if body.pointer("/query/match_all").is_none() {
            warn!(index, "memory index only supports match_all");
            return Err(BgCacheError::IndexRejected {
                status: 400,
                reason: "unsupported query".into(),
            });
        }
        let size = body
            .get("size")
            .and_then(Value::as_u64)
            .map_or(MAX_PAGE_SIZE, |size| size as usize);

        let indices = self.indices.read();
        let mut hits: Vec<SearchHit> = indices
            .get(index)
            .into_iter()
            .flatten()
            .map(|(id, source)| SearchHit {
                id: id.clone(),
                source: source.clone(),
            })
            .collect();
        hits.sort_by(|a, b| {
            max_last_updated(&b.source)
                .cmp(&max_last_updated(&a.source))
                .then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(size);
        Ok(hits)
    }
}
