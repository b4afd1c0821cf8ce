use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Lifecycle transition described by a domain event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionKind {
    Created,
    Updated,
    Deleted,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Created => "created",
            ActionKind::Updated => "updated",
            ActionKind::Deleted => "deleted",
        }
    }
}

impl core::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A catalog domain event.
///
/// Events are:
/// - **immutable** (treat them as facts about a committed change)
/// - **tenant-scoped** (every event names its tenant)
/// - **self-describing on the wire** (JSON via serde)
///
/// The two field-name constants tell the retry consumer where to find the key inputs
/// inside a payload that no longer deserializes into `Self`.
pub trait DomainEvent:
    Clone + core::fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// JSON field holding the tenant id.
    const TENANT_FIELD: &'static str = "tenantId";

    /// JSON field holding the entity id.
    const ENTITY_FIELD: &'static str = "id";

    /// Stable event name/type identifier (e.g. "catalog.product.upserted").
    fn event_type(&self) -> &'static str;

    fn entity_id(&self) -> &str;

    fn tenant_id(&self) -> &str;

    fn action(&self) -> ActionKind;

    /// When the change was committed (business time).
    fn occurred_at(&self) -> DateTime<Utc>;
}
