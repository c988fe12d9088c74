//! The cache controller: public surface over the store, codec and index.
//!
//! Reads touch only the in-memory store. Writes update the store first and
//! then, when persistence is enabled, re-encode the owner's whole document
//! and upsert it. No public operation returns an error: failures are logged
//! and reported, and the in-memory state keeps whatever the store step did.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::CacheSettings;
use crate::document::{self, EncodedDocument};
use crate::envelope::Envelope;
use crate::error::BgCacheError;
use crate::index::{probe_query, reload_query, IndexAdapter, SearchHit, SearchIndex};
use crate::model::{ApiKeyGrant, Authorization, AuthorizationKind, UserGrant};
use crate::report::{Reporter, ReportingConfig};
use crate::store::MemoryStore;

/// What one reload observed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReloadSummary {
    /// Whether the full search succeeded.
    pub reachable: bool,
    pub hits: usize,
    pub documents_applied: usize,
    pub documents_discarded: usize,
    pub elements_applied: usize,
    pub elements_discarded: usize,
}

/// Point-in-time sizes and persistence state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub api_entries: usize,
    pub user_entries: usize,
    pub index_enabled: bool,
}

/// The break-glass authorization cache.
pub struct BgCache {
    settings: CacheSettings,
    store: MemoryStore,
    index: IndexAdapter,
    envelope: Envelope,
    reporter: Reporter,
    ready: watch::Sender<bool>,
}

impl BgCache {
    /// Build a cache with empty maps and persistence off. Nothing is loaded
    /// until [`BgCache::reload`] runs.
    pub fn new(
        settings: CacheSettings,
        envelope: Envelope,
        index: Option<Arc<dyn SearchIndex>>,
        reporting: &ReportingConfig,
    ) -> Self {
        let adapter = IndexAdapter::new(index, settings.index_name.clone());
        let (ready, _) = watch::channel(false);
        Self {
            settings,
            store: MemoryStore::new(),
            index: adapter,
            envelope,
            reporter: Reporter::new(reporting),
            ready,
        }
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    pub fn reporter(&self) -> &Reporter {
        &self.reporter
    }

    /// Whether writes are currently persisted.
    pub fn index_enabled(&self) -> bool {
        self.index.is_enabled()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            api_entries: self.store.api_len(),
            user_entries: self.store.user_len(),
            index_enabled: self.index.is_enabled(),
        }
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// The API-key entry, iff it holds `(resource, permission)`. Source is
    /// not consulted.
    pub fn get_authorization(
        &self,
        api_key: &str,
        resource: &str,
        permission: &str,
    ) -> Option<Authorization> {
        self.store.get_api(api_key, resource, permission)
    }

    /// Whether the user holds `(resource, permission)` in realm `source`.
    pub fn is_user_authorized(
        &self,
        iam_id: &str,
        source: &str,
        resource: &str,
        permission: &str,
    ) -> bool {
        self.store.is_user_authorized(iam_id, source, resource, permission)
    }

    /// Copy of a user-identity entry.
    pub fn get_user(&self, iam_id: &str) -> Option<Authorization> {
        self.store.get_user(iam_id)
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Remember an API-key grant and, unless suppressed or persistence is
    /// off, persist the owner's document.
    pub async fn add_authorization(&self, grant: &ApiKeyGrant, suppress_index: bool) {
        if let Err(err) = self.store.upsert_api(grant) {
            warn!(error = %err, "api key grant rejected");
            self.reporter.error(&err, &[("operation", "add_authorization")]);
            return;
        }
        if suppress_index || !self.index.is_enabled() {
            debug!(iam_id = %grant.iam_id, suppress_index, "api key grant kept in memory only");
            return;
        }

        let entries = self.store.api_entries_for(&grant.iam_id);
        let encoded = document::encode_api(&self.envelope, &grant.iam_id, &grant.user, &entries);
        self.persist(encoded, &grant.iam_id, "add_authorization").await;
    }

    /// Remember a user-identity grant and, unless suppressed or persistence
    /// is off, persist the user's document.
    pub async fn add_user(&self, grant: &UserGrant, suppress_index: bool) {
        if let Err(err) = self.store.upsert_user(grant) {
            warn!(error = %err, "user grant rejected");
            self.reporter.error(&err, &[("operation", "add_user")]);
            return;
        }
        if suppress_index || !self.index.is_enabled() {
            debug!(iam_id = %grant.iam_id, suppress_index, "user grant kept in memory only");
            return;
        }

        let Some(entry) = self.store.get_user(&grant.iam_id) else {
            return;
        };
        let encoded = document::encode_user(&self.envelope, &grant.iam_id, &entry);
        self.persist(encoded, &grant.iam_id, "add_user").await;
    }

    async fn persist(
        &self,
        encoded: Result<EncodedDocument, BgCacheError>,
        iam_id: &str,
        operation: &str,
    ) {
        let doc = match encoded {
            Ok(doc) => doc,
            Err(err) => {
                warn!(iam_id, error = %err, "document not encoded; skipping index write");
                self.reporter
                    .error(&err, &[("operation", operation), ("iam_id", iam_id)]);
                return;
            }
        };
        if let Err(err) = self.index.upsert(&doc).await {
            warn!(document_id = %doc.id, error = %err, "index write failed");
            self.reporter
                .error(&err, &[("operation", operation), ("document_id", doc.id.as_str())]);
        }
    }

    // -----------------------------------------------------------------------
    // Reload
    // -----------------------------------------------------------------------

    /// Load every persisted document and merge it into memory.
    ///
    /// Probes first when persistence is off; an unreachable index leaves the
    /// maps untouched. Bad documents and undecryptable elements are skipped
    /// and reported. A successful search turns persistence on.
    pub async fn reload(&self) -> ReloadSummary {
        let summary = self.reload_inner().await;
        self.mark_ready();
        summary
    }

    async fn reload_inner(&self) -> ReloadSummary {
        let mut summary = ReloadSummary::default();

        if !self.index.is_available() {
            debug!("no index configured; running as a pure in-memory cache");
            return summary;
        }
        if !self.index.is_enabled() {
            if let Err(err) = self.index.search(&probe_query()).await {
                warn!(error = %err, "index probe failed; reload skipped");
                self.reporter.error(&err, &[("operation", "reload_probe")]);
                return summary;
            }
        }

        let hits = match self.index.search(&reload_query(self.settings.page_size)).await {
            Ok(hits) => hits,
            Err(err) => {
                warn!(error = %err, "reload search failed");
                self.reporter.error(&err, &[("operation", "reload")]);
                return summary;
            }
        };

        summary.reachable = true;
        summary.hits = hits.len();
        if hits.len() >= self.settings.page_size {
            let page_size = self.settings.page_size.to_string();
            self.reporter
                .anomaly("reload_page_full", &[("page_size", page_size.as_str())]);
        }

        for hit in &hits {
            self.apply_hit(hit, &mut summary);
        }
        self.index.set_enabled(true);

        info!(
            hits = summary.hits,
            documents = summary.documents_applied,
            discarded = summary.documents_discarded,
            elements = summary.elements_applied,
            elements_discarded = summary.elements_discarded,
            "reload complete"
        );
        summary
    }

    fn apply_hit(&self, hit: &SearchHit, summary: &mut ReloadSummary) {
        let decoded = match document::decode(&self.envelope, &hit.id, &hit.source) {
            Ok(decoded) => decoded,
            Err(err) => {
                warn!(document_id = %hit.id, error = %err, "document discarded");
                self.reporter
                    .error(&err, &[("operation", "reload"), ("document_id", hit.id.as_str())]);
                summary.documents_discarded += 1;
                return;
            }
        };

        for (position, err) in &decoded.rejected {
            let position = position.to_string();
            warn!(document_id = %hit.id, element = %position, error = %err, "element discarded");
            self.reporter.error(
                err,
                &[
                    ("operation", "reload"),
                    ("document_id", hit.id.as_str()),
                    ("element", position.as_str()),
                ],
            );
        }
        for (position, name) in &decoded.anomalies {
            let position = position.to_string();
            self.reporter
                .anomaly(name, &[("document_id", hit.id.as_str()), ("element", position.as_str())]);
        }

        summary.elements_discarded += decoded.rejected.len();
        summary.elements_applied += decoded.elements.len();
        summary.documents_applied += 1;

        for element in decoded.elements {
            match decoded.kind {
                AuthorizationKind::ApiKey => {
                    self.store
                        .merge_api(&element.key, element.identity, &element.scope)
                }
                AuthorizationKind::User => self.store.merge_user(element.identity, &element.scope),
            }
        }
    }

    // -----------------------------------------------------------------------
    // Readiness
    // -----------------------------------------------------------------------

    /// Resolves once the first reload attempt has finished, whatever its
    /// outcome.
    pub async fn wait_ready(&self) {
        let mut rx = self.ready.subscribe();
        let _ = rx.wait_for(|ready| *ready).await;
    }

    pub(crate) fn mark_ready(&self) {
        self.ready.send_replace(true);
    }
}

impl std::fmt::Debug for BgCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BgCache")
            .field("index", &self.index)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}
