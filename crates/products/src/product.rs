use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use catalog_core::{EntityId, TenantId};
use catalog_events::{ActionKind, DomainEvent};

/// Product category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Category {
    Electronics,
    Food,
    Drinks,
    Household,
    Sports,
    Fashion,
    Health,
    Toys,
    Office,
    Automotive,
    Other,
}

/// Unit a product is sold in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Unit {
    Piece,
    Kilogram,
    Liter,
    Gram,
    Meter,
    Box,
    Package,
    Pair,
    Dozen,
}

/// Event: a product was created or updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductUpserted {
    pub id: EntityId,
    pub name: String,
    pub article_number: String,
    pub category: Category,
    pub unit: Unit,
    pub price: f64,
    pub description: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub product_action: ActionKind,
    pub tenant_id: TenantId,
}

/// Event: a product was deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductDeleted {
    pub id: EntityId,
    pub timestamp: DateTime<Utc>,
    pub product_action: ActionKind,
    pub tenant_id: TenantId,
}

impl DomainEvent for ProductUpserted {
    fn event_type(&self) -> &'static str {
        "catalog.product.upserted"
    }

    fn entity_id(&self) -> &str {
        self.id.as_str()
    }

    fn tenant_id(&self) -> &str {
        self.tenant_id.as_str()
    }

    fn action(&self) -> ActionKind {
        self.product_action
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

impl DomainEvent for ProductDeleted {
    fn event_type(&self) -> &'static str {
        "catalog.product.deleted"
    }

    fn entity_id(&self) -> &str {
        self.id.as_str()
    }

    fn tenant_id(&self) -> &str {
        self.tenant_id.as_str()
    }

    fn action(&self) -> ActionKind {
        ActionKind::Deleted
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.timestamp
    }
}
