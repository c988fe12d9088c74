//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use parking_lot::Mutex;

use bgcache::document::EncodedDocument;
use bgcache::report::{EventKind, ReportEvent, ReportSink, ReportingConfig};
use bgcache::{
    ApiKeyGrant, Authorization, BgCache, CacheSettings, Envelope, MasterKeyStore, MemoryIndex,
    SearchIndex, StaticSecretProvider, UserGrant, MASTER_KEY_SECRET,
};

pub const KEY_A: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";
pub const KEY_B: &str = "1f1e1d1c1b1a191817161514131211100f0e0d0c0b0a09080706050403020100";

pub const API_KEY: &str = "1234567890";
pub const IAM_ID: &str = "IBMid-1234567890";
pub const USER: &str = "fred@ibm.com";
pub const SOURCE: &str = "public-iam";
pub const TOKEN: &str = "2345678901";
pub const RESOURCE: &str = "gcor1-segments";
pub const PERMISSION: &str = "pnp-api-oss.rest.get";

/// Key-ids 1 and 1_000_000 are both in the past for any real clock.
pub fn key_secret() -> String {
    format!(r#"{{"keys":{{"1":"{KEY_A}","1000000":"{KEY_B}"}}}}"#)
}

pub fn envelope() -> Envelope {
    let provider = Arc::new(StaticSecretProvider::new(MASTER_KEY_SECRET, key_secret()));
    Envelope::new(Arc::new(MasterKeyStore::load(provider, MASTER_KEY_SECRET)))
}

/// A sink that collects events into a shared Vec.
#[derive(Default)]
pub struct SharedVecSink {
    pub events: Mutex<Vec<ReportEvent>>,
}

impl SharedVecSink {
    pub fn errors(&self) -> Vec<ReportEvent> {
        self.by_kind(EventKind::Error)
    }

    pub fn anomalies(&self) -> Vec<ReportEvent> {
        self.by_kind(EventKind::Anomaly)
    }

    fn by_kind(&self, kind: EventKind) -> Vec<ReportEvent> {
        self.events
            .lock()
            .iter()
            .filter(|event| event.kind == kind)
            .cloned()
            .collect()
    }
}

impl ReportSink for SharedVecSink {
    fn report_error(&self, event: &ReportEvent) {
        self.events.lock().push(event.clone());
    }

    fn report_anomaly(&self, event: &ReportEvent) {
        self.events.lock().push(event.clone());
    }
}

pub struct Harness {
    pub cache: BgCache,
    pub index: Arc<MemoryIndex>,
    pub sink: Arc<SharedVecSink>,
}

pub fn harness() -> Harness {
    harness_with(Arc::new(MemoryIndex::new()), envelope())
}

pub fn harness_with(index: Arc<MemoryIndex>, envelope: Envelope) -> Harness {
    harness_full(CacheSettings::default(), index, envelope)
}

pub fn harness_full(
    settings: CacheSettings,
    index: Arc<MemoryIndex>,
    envelope: Envelope,
) -> Harness {
    let sink = Arc::new(SharedVecSink::default());
    let reporting = ReportingConfig {
        environment: Some("test".into()),
        region: None,
        service_name: Some("bgcache-tests".into()),
        sinks: vec![sink.clone()],
    };
    let backend: Arc<dyn SearchIndex> = index.clone();
    let cache = BgCache::new(settings, envelope, Some(backend), &reporting);
    Harness { cache, index, sink }
}

pub fn api_grant(time: i64) -> ApiKeyGrant {
    ApiKeyGrant {
        api_key: API_KEY.into(),
        iam_id: IAM_ID.into(),
        user: USER.into(),
        source: SOURCE.into(),
        token: TOKEN.into(),
        resource: RESOURCE.into(),
        permission: PERMISSION.into(),
        time,
    }
}

pub fn user_grant(time: i64) -> UserGrant {
    UserGrant {
        iam_id: IAM_ID.into(),
        user: USER.into(),
        source: SOURCE.into(),
        resource: RESOURCE.into(),
        permission: PERMISSION.into(),
        time,
    }
}

/// An entry owned by [`IAM_ID`] holding the given `(resource, permission, time)` grants.
pub fn authorization(source: &str, token: &str, grants: &[(&str, &str, i64)]) -> Authorization {
    let mut auth = Authorization {
        iam_id: IAM_ID.into(),
        user: USER.into(),
        source: source.into(),
        token: token.into(),
        ..Default::default()
    };
    for (resource, permission, time) in grants {
        auth.scope
            .entry(resource.to_string())
            .or_default()
            .insert(permission.to_string(), *time);
    }
    auth
}

/// Store an encoded document in the default index under `id`.
pub fn store_as(index: &MemoryIndex, id: &str, doc: &EncodedDocument) {
    index.insert(
        "breakglass",
        id,
        serde_json::to_value(&doc.body).expect("document serializes"),
    );
}
