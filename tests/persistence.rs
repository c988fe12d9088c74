mod common;

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bgcache::{
    Envelope, MasterKeyStore, MemoryIndex, StaticSecretProvider, MASTER_KEY_SECRET,
};
use common::*;

#[tokio::test]
async fn test_api_document_shape() {
    let h = harness();
    h.cache.reload().await;
    h.cache.add_authorization(&api_grant(100), false).await;

    let mut second = api_grant(250);
    second.api_key = "0987654321".into();
    second.resource = "other-resource".into();
    h.cache.add_authorization(&second, false).await;

    let doc = h.index.get("breakglass", "api+IBMid-1234567890").unwrap();
    assert_eq!(doc["user"], USER);
    assert_eq!(doc["isapi"], "true");

    // Both keys owned by the iamID share one document, ordered by key.
    let elements = doc["api_keys"].as_array().unwrap();
    assert_eq!(elements.len(), 2);
    assert_eq!(elements[0]["last_updated"], 250);
    assert_eq!(elements[1]["last_updated"], 100);
    assert_eq!(elements[1]["source"], SOURCE);
    assert_eq!(elements[1]["key_id"], 1_000_000);
    assert_eq!(elements[1]["resources"][0]["resource"], RESOURCE);
    assert_eq!(
        elements[1]["resources"][0]["permissions"][0]["permission"],
        PERMISSION
    );

    // Secrets never hit the index in clear.
    let sealed = elements[1]["api_key"].as_str().unwrap();
    assert_ne!(sealed, API_KEY);
    let bytes = STANDARD.decode(sealed).unwrap();
    let plain = envelope().open(&bytes, 1_000_000).unwrap();
    assert_eq!(plain, API_KEY.as_bytes());
    assert!(!doc.to_string().contains(TOKEN));
}

#[tokio::test]
async fn test_user_document_shape() {
    let h = harness();
    h.cache.reload().await;
    h.cache.add_user(&user_grant(77), false).await;

    let doc = h.index.get("breakglass", IAM_ID).unwrap();
    assert_eq!(doc["isapi"], "false");
    let elements = doc["api_keys"].as_array().unwrap();
    assert_eq!(elements.len(), 1);
    assert_eq!(elements[0]["last_updated"], 77);

    // The sealed fields are empty strings under encryption.
    let bytes = STANDARD.decode(elements[0]["token"].as_str().unwrap()).unwrap();
    assert!(envelope().open(&bytes, 1_000_000).unwrap().is_empty());
}

#[tokio::test]
async fn test_missing_master_key_keeps_memory_and_reports() {
    let provider = Arc::new(StaticSecretProvider::new("SOMETHING_ELSE", key_secret()));
    let envelope = Envelope::new(Arc::new(MasterKeyStore::load(provider, MASTER_KEY_SECRET)));
    let h = harness_with(Arc::new(MemoryIndex::new()), envelope);
    h.cache.reload().await;

    h.cache.add_authorization(&api_grant(5), false).await;

    assert!(h.cache.get_authorization(API_KEY, RESOURCE, PERMISSION).is_some());
    assert_eq!(h.index.upsert_count(), 0);
    let errors = h.sink.errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].name, "config_missing");
    assert_eq!(errors[0].attributes["operation"], "add_authorization");
    assert_eq!(errors[0].attributes["iam_id"], IAM_ID);
}

#[tokio::test]
async fn test_index_write_failure_keeps_memory_and_reports() {
    let h = harness();
    h.cache.reload().await;
    h.index.reject_with(400, "mapping conflict");

    h.cache.add_user(&user_grant(3), false).await;

    assert!(h.cache.is_user_authorized(IAM_ID, SOURCE, RESOURCE, PERMISSION));
    assert_eq!(h.index.upsert_count(), 1);
    assert!(h.index.get("breakglass", IAM_ID).is_none());

    let errors = h.sink.errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].name, "index_rejected");
    assert_eq!(errors[0].attributes["document_id"], IAM_ID);
}

#[tokio::test]
async fn test_write_before_reload_stays_in_memory() {
    let h = harness();
    h.cache.add_authorization(&api_grant(1), false).await;

    assert_eq!(h.index.upsert_count(), 0);
    assert!(!h.cache.index_enabled());
}

#[tokio::test]
async fn test_rewrite_carries_whole_entry() {
    let h = harness();
    h.cache.reload().await;
    h.cache.add_authorization(&api_grant(10), true).await;

    let mut later = api_grant(20);
    later.permission = "pnp-api-oss.rest.put".into();
    h.cache.add_authorization(&later, false).await;

    let doc = h.index.get("breakglass", "api+IBMid-1234567890").unwrap();
    let permissions = doc["api_keys"][0]["resources"][0]["permissions"]
        .as_array()
        .unwrap();
    assert_eq!(permissions.len(), 2);
    assert_eq!(doc["api_keys"][0]["last_updated"], 20);
}
