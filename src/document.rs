//! Translation between in-memory entries and persisted index documents.
//!
//! One document exists per owning iamID:
//!
//! ```text
//! _id  = "api+<iamID>"   (API-key document, isapi = "true")
//!      | "<iamID>"       (user-identity document, isapi = "false")
//! {
//!   "user": "...",
//!   "isapi": "true" | "false",
//!   "api_keys": [{
//!     "source": "...",
//!     "api_key": base64(seal(api key)),
//!     "token":   base64(seal(bearer token)),
//!     "key_id":  <u64>,
//!     "last_updated": <max time below>,
//!     "resources": [{ "resource": "...",
//!                     "permissions": [{ "permission": "...", "time": <i64> }] }]
//!   }]
//! }
//! ```
//!
//! Both encrypted fields of one element are sealed with the same key-id.
//! Encoding always uses the key active now, so re-writing an unchanged
//! entry moves it onto the newest key.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::envelope::Envelope;
use crate::error::BgCacheError;
use crate::model::{scope_last_updated, Authorization, AuthorizationKind, Scope};
use crate::store::Identity;

/// Document-id prefix marking API-key documents.
pub const API_ID_PREFIX: &str = "api+";

const IS_API: &str = "true";
const IS_USER: &str = "false";

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BgDocument {
    #[serde(default)]
    pub user: String,
    pub isapi: String,
    #[serde(default)]
    pub api_keys: Vec<ApiKeyRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiKeyRecord {
    #[serde(default)]
    pub source: String,
    pub api_key: String,
    pub token: String,
    pub key_id: u64,
    #[serde(default)]
    pub last_updated: i64,
    #[serde(default)]
    pub resources: Vec<ResourceRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRecord {
    pub resource: String,
    #[serde(default)]
    pub permissions: Vec<PermissionRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionRecord {
    pub permission: String,
    pub time: i64,
}

/// Decode-side view of [`BgDocument`]. Elements stay raw so that one bad
/// element is rejected on its own.
#[derive(Deserialize)]
struct RawDocument {
    #[serde(default)]
    user: String,
    isapi: String,
    #[serde(default)]
    api_keys: Vec<serde_json::Value>,
}

/// A document ready to be written under `id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedDocument {
    pub id: String,
    pub body: BgDocument,
}

/// Document id for an owning iamID.
pub fn document_id(kind: AuthorizationKind, iam_id: &str) -> String {
    match kind {
        AuthorizationKind::ApiKey => format!("{API_ID_PREFIX}{iam_id}"),
        AuthorizationKind::User => iam_id.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Encode
// ---------------------------------------------------------------------------

/// Encode every API-map entry owned by `iam_id` into its document.
pub fn encode_api(
    envelope: &Envelope,
    iam_id: &str,
    user: &str,
    entries: &[(String, Authorization)],
) -> Result<EncodedDocument, BgCacheError> {
    let api_keys = entries
        .iter()
        .map(|(api_key, auth)| encode_element(envelope, api_key, auth))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(EncodedDocument {
        id: document_id(AuthorizationKind::ApiKey, iam_id),
        body: BgDocument {
            user: user.to_string(),
            isapi: IS_API.to_string(),
            api_keys,
        },
    })
}

/// Encode a User-map entry into its document.
pub fn encode_user(
    envelope: &Envelope,
    iam_id: &str,
    entry: &Authorization,
) -> Result<EncodedDocument, BgCacheError> {
    let element = encode_element(envelope, "", entry)?;
    Ok(EncodedDocument {
        id: document_id(AuthorizationKind::User, iam_id),
        body: BgDocument {
            user: entry.user.clone(),
            isapi: IS_USER.to_string(),
            api_keys: vec![element],
        },
    })
}

fn encode_element(
    envelope: &Envelope,
    api_key: &str,
    auth: &Authorization,
) -> Result<ApiKeyRecord, BgCacheError> {
    // One instant for both fields so they cannot straddle a key activation.
    let now = u64::try_from(Utc::now().timestamp()).unwrap_or_default();
    let sealed_key = envelope.seal_at(api_key.as_bytes(), now)?;
    let sealed_token = envelope.seal_at(auth.token.as_bytes(), now)?;

    let resources = auth
        .scope
        .iter()
        .map(|(resource, permissions)| ResourceRecord {
            resource: resource.clone(),
            permissions: permissions
                .iter()
                .map(|(permission, time)| PermissionRecord {
                    permission: permission.clone(),
                    time: *time,
                })
                .collect(),
        })
        .collect();

    Ok(ApiKeyRecord {
        source: auth.source.clone(),
        api_key: STANDARD.encode(&sealed_key.ciphertext),
        token: STANDARD.encode(&sealed_token.ciphertext),
        key_id: sealed_key.key_id,
        last_updated: scope_last_updated(&auth.scope),
        resources,
    })
}

// ---------------------------------------------------------------------------
// Decode
// ---------------------------------------------------------------------------

/// One accepted element, ready to merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedElement {
    /// The API key for API-key documents; the iamID for user documents.
    pub key: String,
    pub identity: Identity,
    pub scope: Scope,
}

/// Outcome of decoding one document.
#[derive(Debug)]
pub struct DecodedDocument {
    pub kind: AuthorizationKind,
    pub iam_id: String,
    /// Accepted elements, in document order.
    pub elements: Vec<DecodedElement>,
    /// Elements that were discarded, with the reason.
    pub rejected: Vec<(usize, BgCacheError)>,
    /// Accepted-but-suspicious findings, by element position.
    pub anomalies: Vec<(usize, &'static str)>,
}

/// Split a document id into its kind and iamID.
pub fn parse_document_id(id: &str) -> (AuthorizationKind, &str) {
    match id.strip_prefix(API_ID_PREFIX) {
        Some(rest) => (AuthorizationKind::ApiKey, rest),
        None => (AuthorizationKind::User, id),
    }
}

/// Decode a search hit. Document-level problems fail the whole document;
/// element-level problems discard only that element.
pub fn decode(
    envelope: &Envelope,
    id: &str,
    source: &serde_json::Value,
) -> Result<DecodedDocument, BgCacheError> {
    let (kind, iam_id) = parse_document_id(id);
    if iam_id.is_empty() || iam_id.chars().any(char::is_whitespace) {
        return Err(BgCacheError::MalformedDocument(format!(
            "invalid iamID in document id {id:?}"
        )));
    }

    let doc = RawDocument::deserialize(source)
        .map_err(|err| BgCacheError::MalformedDocument(format!("{id}: {err}")))?;

    let declared = match doc.isapi.as_str() {
        IS_API => AuthorizationKind::ApiKey,
        IS_USER => AuthorizationKind::User,
        other => {
            return Err(BgCacheError::MalformedDocument(format!(
                "{id}: isapi must be \"true\" or \"false\", got {other:?}"
            )))
        }
    };
    if declared != kind {
        return Err(BgCacheError::MalformedDocument(format!(
            "{id}: isapi={} does not match the document id",
            doc.isapi
        )));
    }

    let mut decoded = DecodedDocument {
        kind,
        iam_id: iam_id.to_string(),
        elements: Vec::with_capacity(doc.api_keys.len()),
        rejected: Vec::new(),
        anomalies: Vec::new(),
    };

    for (position, raw) in doc.api_keys.iter().enumerate() {
        let record = match ApiKeyRecord::deserialize(raw) {
            Ok(record) => record,
            Err(err) => {
                decoded.rejected.push((
                    position,
                    BgCacheError::MalformedDocument(format!("{id}: element {position}: {err}")),
                ));
                continue;
            }
        };
        let (api_key, token) = match open_pair(envelope, &record) {
            Ok(pair) => pair,
            Err(err) => {
                decoded.rejected.push((position, err));
                continue;
            }
        };

        let element = match kind {
            AuthorizationKind::ApiKey => DecodedElement {
                key: api_key,
                identity: Identity {
                    iam_id: iam_id.to_string(),
                    user: doc.user.clone(),
                    source: record.source.clone(),
                    token,
                },
                scope: scope_from_records(&record.resources),
            },
            AuthorizationKind::User => {
                if !api_key.is_empty() || !token.is_empty() {
                    decoded.anomalies.push((position, "user_element_with_secrets"));
                }
                DecodedElement {
                    key: iam_id.to_string(),
                    identity: Identity {
                        iam_id: iam_id.to_string(),
                        user: doc.user.clone(),
                        source: record.source.clone(),
                        token: String::new(),
                    },
                    scope: scope_from_records(&record.resources),
                }
            }
        };
        decoded.elements.push(element);
    }

    Ok(decoded)
}

fn open_pair(envelope: &Envelope, record: &ApiKeyRecord) -> Result<(String, String), BgCacheError> {
    let api_key = open_field(envelope, &record.api_key, record.key_id)?;
    let token = open_field(envelope, &record.token, record.key_id)?;
    Ok((api_key, token))
}

fn open_field(envelope: &Envelope, encoded: &str, key_id: u64) -> Result<String, BgCacheError> {
    let ciphertext = STANDARD
        .decode(encoded)
        .map_err(|_| BgCacheError::MalformedCiphertext)?;
    let plaintext = envelope.open(&ciphertext, key_id)?;
    String::from_utf8(plaintext).map_err(|_| BgCacheError::MalformedCiphertext)
}

fn scope_from_records(resources: &[ResourceRecord]) -> Scope {
    let mut holder = Authorization::default();
    for resource in resources {
        for permission in &resource.permissions {
            holder.grant(&resource.resource, &permission.permission, permission.time);
        }
    }
    holder.scope
}
