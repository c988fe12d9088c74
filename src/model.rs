//! In-memory authorization model.
//!
//! An [`Authorization`] is a positive fact: the identity it names was
//! granted each `(resource, permission)` in its scope, most recently at the
//! stored Unix time. Scope timestamps only ever move forward.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Resource -> permission -> Unix seconds of the most recent grant.
pub type Scope = BTreeMap<String, BTreeMap<String, i64>>;

/// Which map an entry lives in, and which document convention it uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuthorizationKind {
    /// Keyed by an opaque API key; carries a bearer token.
    ApiKey,
    /// Keyed by the user's iamID; never carries a token.
    User,
}

/// A cached authorization entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authorization {
    pub iam_id: String,
    pub user: String,
    pub source: String,
    /// Empty for user-identity entries.
    pub token: String,
    pub scope: Scope,
}

impl Authorization {
    /// Time of the grant for `(resource, permission)`, if present.
    pub fn permission_time(&self, resource: &str, permission: &str) -> Option<i64> {
        self.scope.get(resource)?.get(permission).copied()
    }

    pub fn has_permission(&self, resource: &str, permission: &str) -> bool {
        self.permission_time(resource, permission).is_some()
    }

    /// Largest grant time in the scope, or 0 for an empty scope.
    pub fn last_updated(&self) -> i64 {
        scope_last_updated(&self.scope)
    }

    /// Record a grant, keeping the later of the stored and given times.
    pub(crate) fn grant(&mut self, resource: &str, permission: &str, time: i64) {
        let stored = self
            .scope
            .entry(resource.to_string())
            .or_default()
            .entry(permission.to_string())
            .or_insert(time);
        if time > *stored {
            *stored = time;
        }
    }

    /// Fold every grant of `other` into this scope.
    pub(crate) fn merge_scope(&mut self, other: &Scope) {
        for (resource, permissions) in other {
            for (permission, time) in permissions {
                self.grant(resource, permission, *time);
            }
        }
    }
}

pub(crate) fn scope_last_updated(scope: &Scope) -> i64 {
    scope
        .values()
        .flat_map(|permissions| permissions.values())
        .copied()
        .max()
        .unwrap_or(0)
}

/// A grant observed for an API key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiKeyGrant {
    pub api_key: String,
    pub iam_id: String,
    pub user: String,
    pub source: String,
    pub token: String,
    pub resource: String,
    pub permission: String,
    pub time: i64,
}

/// A grant observed for a user identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserGrant {
    pub iam_id: String,
    pub user: String,
    pub source: String,
    pub resource: String,
    pub permission: String,
    pub time: i64,
}
