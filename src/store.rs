//! The two in-memory maps and their merge rule.
//!
//! Each map has its own lock. Writers hold it for exactly one merge;
//! readers for exactly one lookup. Nothing that can suspend (index calls,
//! secret reads, reporting) ever runs while a lock is held: callers copy out
//! what they need and release first.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::error::BgCacheError;
use crate::model::{ApiKeyGrant, Authorization, Scope, UserGrant};

/// Identity fields applied last-writer-wins on every merge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity {
    pub iam_id: String,
    pub user: String,
    pub source: String,
    pub token: String,
}

/// API-map and User-map.
#[derive(Debug, Default)]
pub struct MemoryStore {
    api: RwLock<HashMap<String, Authorization>>,
    users: RwLock<HashMap<String, Authorization>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a grant for an API key. Identity fields are overwritten; the
    /// grant time only moves forward.
    pub fn upsert_api(&self, grant: &ApiKeyGrant) -> Result<(), BgCacheError> {
        if grant.iam_id.is_empty() {
            return Err(BgCacheError::MissingIamId);
        }
        let mut api = self.api.write();
        let entry = api.entry(grant.api_key.clone()).or_default();
        entry.iam_id.clone_from(&grant.iam_id);
        entry.user.clone_from(&grant.user);
        entry.source.clone_from(&grant.source);
        entry.token.clone_from(&grant.token);
        entry.grant(&grant.resource, &grant.permission, grant.time);
        Ok(())
    }

    /// Record a grant for a user identity. The token is always empty.
    pub fn upsert_user(&self, grant: &UserGrant) -> Result<(), BgCacheError> {
        if grant.iam_id.is_empty() {
            return Err(BgCacheError::MissingIamId);
        }
        let mut users = self.users.write();
        let entry = users.entry(grant.iam_id.clone()).or_default();
        entry.iam_id.clone_from(&grant.iam_id);
        entry.user.clone_from(&grant.user);
        entry.source.clone_from(&grant.source);
        entry.token.clear();
        entry.grant(&grant.resource, &grant.permission, grant.time);
        Ok(())
    }

    /// Bulk merge of a whole scope into an API-map entry (reload path).
    pub fn merge_api(&self, api_key: &str, identity: Identity, scope: &Scope) {
        let mut api = self.api.write();
        let entry = api.entry(api_key.to_string()).or_default();
        entry.iam_id = identity.iam_id;
        entry.user = identity.user;
        entry.source = identity.source;
        entry.token = identity.token;
        entry.merge_scope(scope);
    }

    /// Bulk merge of a whole scope into a User-map entry (reload path).
    pub fn merge_user(&self, identity: Identity, scope: &Scope) {
        let mut users = self.users.write();
        let entry = users.entry(identity.iam_id.clone()).or_default();
        entry.iam_id = identity.iam_id;
        entry.user = identity.user;
        entry.source = identity.source;
        entry.token.clear();
        entry.merge_scope(scope);
    }

    /// The entry for `api_key` iff it holds `(resource, permission)`.
    pub fn get_api(&self, api_key: &str, resource: &str, permission: &str) -> Option<Authorization> {
        let api = self.api.read();
        api.get(api_key)
            .filter(|entry| entry.has_permission(resource, permission))
            .cloned()
    }

    /// True iff the user exists, its source matches, and it holds
    /// `(resource, permission)`.
    pub fn is_user_authorized(
        &self,
        iam_id: &str,
        source: &str,
        resource: &str,
        permission: &str,
    ) -> bool {
        let users = self.users.read();
        users
            .get(iam_id)
            .is_some_and(|entry| entry.source == source && entry.has_permission(resource, permission))
    }

    /// Copy of a User-map entry.
    pub fn get_user(&self, iam_id: &str) -> Option<Authorization> {
        self.users.read().get(iam_id).cloned()
    }

    /// Copies of every API-map entry owned by `iam_id`, ordered by API key.
    pub fn api_entries_for(&self, iam_id: &str) -> Vec<(String, Authorization)> {
        let api = self.api.read();
        let mut entries: Vec<_> = api
            .iter()
            .filter(|(_, entry)| entry.iam_id == iam_id)
            .map(|(key, entry)| (key.clone(), entry.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    pub fn api_len(&self) -> usize {
        self.api.read().len()
    }

    pub fn user_len(&self) -> usize {
        self.users.read().len()
    }
}
