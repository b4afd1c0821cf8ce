//! Publish key resolution.
//!
//! The publish key is the broker partition key and the downstream dedup key:
//! `"{tenant_id}-{entity_id}"`. Two entry points exist:
//!
//! - [`resolve`] for direct publication, which fails fast on missing input;
//! - [`resolve_for_recovery`] for the retry consumer's recovery branch, which never fails
//!   so that a fail-topic record is never key-less.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use catalog_core::{DomainError, DomainResult};

use crate::DomainEvent;

const KEY_SEPARATOR: &str = "-";
const SYNTHETIC_KEY_PREFIX: &str = "unknown-";

/// Broker message key for a domain event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PublishKey(String);

impl PublishKey {
    /// Wrap a key received from the broker as-is.
    pub fn from_inbound(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this key was synthesized because no real key inputs were available.
    pub fn is_synthetic(&self) -> bool {
        self.0.starts_with(SYNTHETIC_KEY_PREFIX)
    }
}

impl core::fmt::Display for PublishKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for PublishKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

fn present(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

fn join(tenant_id: &str, entity_id: &str) -> PublishKey {
    PublishKey(format!("{tenant_id}{KEY_SEPARATOR}{entity_id}"))
}

/// Resolve the key for a direct publication.
///
/// Missing or blank input is a caller error.
pub fn resolve(tenant_id: Option<&str>, entity_id: Option<&str>) -> DomainResult<PublishKey> {
    match (present(tenant_id), present(entity_id)) {
        (Some(tenant_id), Some(entity_id)) => Ok(join(tenant_id, entity_id)),
        _ => Err(DomainError::validation(
            "tenant id and entity id must not be blank",
        )),
    }
}

/// Resolve the key for a direct publication of `event`.
pub fn resolve_event<E: DomainEvent>(event: &E) -> DomainResult<PublishKey> {
    resolve(Some(event.tenant_id()), Some(event.entity_id()))
}

/// Resolve the key used when parking a record in the fail topic.
///
/// Preference order: the inbound record key, then `tenant-entity` from the payload,
/// then a synthetic `unknown-<epoch millis>` key. The synthetic key is not reproducible.
pub fn resolve_for_recovery(
    inbound_key: Option<&str>,
    tenant_id: Option<&str>,
    entity_id: Option<&str>,
) -> PublishKey {
    if let Some(key) = present(inbound_key) {
        return PublishKey::from_inbound(key);
    }
    if let Ok(key) = resolve(tenant_id, entity_id) {
        return key;
    }
    PublishKey(format!(
        "{SYNTHETIC_KEY_PREFIX}{}",
        Utc::now().timestamp_millis()
    ))
}
