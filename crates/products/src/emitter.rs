//! Boundary between the catalog's CRUD layer and the publication pipeline.
//!
//! The CRUD layer calls the emitter after its own transaction commits. The emitter
//! builds the event, resolves the publish key (failing fast on blank ids, which is a
//! caller bug) and hands the event to the publisher. Broker health never influences
//! the returned value.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;

use catalog_core::{DomainError, DomainResult, EntityId, TenantId};
use catalog_events::{ActionKind, BrokerProducer, EventPublisher, PublishKey, key};

use crate::product::{Category, ProductDeleted, ProductUpserted, Unit};

/// Persisted state of a product, as handed over by the CRUD layer.
#[derive(Debug, Clone, PartialEq)]
pub struct ProductSnapshot {
    pub id: String,
    pub name: String,
    pub article_number: String,
    pub category: Category,
    pub unit: Unit,
    pub price: f64,
    pub description: Option<String>,
}

/// Emits product lifecycle events for one tenant.
#[derive(Debug)]
pub struct ProductEventEmitter<P> {
    tenant_id: TenantId,
    upserts: Arc<EventPublisher<ProductUpserted, P>>,
    deletes: Arc<EventPublisher<ProductDeleted, P>>,
}

impl<P: BrokerProducer> ProductEventEmitter<P> {
    pub fn new(
        tenant_id: TenantId,
        upserts: Arc<EventPublisher<ProductUpserted, P>>,
        deletes: Arc<EventPublisher<ProductDeleted, P>>,
    ) -> Self {
        Self {
            tenant_id,
            upserts,
            deletes,
        }
    }

    pub fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }

    /// Publish a created/updated event for a saved product.
    ///
    /// `existed` tells whether the save updated an existing row (Updated) or inserted a
    /// new one (Created). A non-finite price is rejected: JSON has no encoding for it.
    pub fn product_saved(
        &self,
        snapshot: &ProductSnapshot,
        existed: bool,
        occurred_at: DateTime<Utc>,
    ) -> DomainResult<PublishKey> {
        let publish_key = key::resolve(Some(self.tenant_id.as_str()), Some(snapshot.id.as_str()))?;
        if !snapshot.price.is_finite() {
            return Err(DomainError::validation(format!(
                "price of product {} must be a finite number, got {}",
                snapshot.id, snapshot.price
            )));
        }
        let product_action = if existed {
            ActionKind::Updated
        } else {
            ActionKind::Created
        };

        let event = ProductUpserted {
            id: EntityId::new(snapshot.id.as_str())?,
            name: snapshot.name.clone(),
            article_number: snapshot.article_number.clone(),
            category: snapshot.category,
            unit: snapshot.unit,
            price: snapshot.price,
            description: snapshot.description.clone(),
            timestamp: occurred_at,
            product_action,
            tenant_id: self.tenant_id.clone(),
        };

        info!(key = %publish_key, action = %product_action, "publishing product upserted event");
        self.upserts.publish(&publish_key, &event);
        Ok(publish_key)
    }

    /// Publish a deleted event for a removed product.
    pub fn product_deleted(
        &self,
        product_id: &str,
        occurred_at: DateTime<Utc>,
    ) -> DomainResult<PublishKey> {
        let publish_key = key::resolve(Some(self.tenant_id.as_str()), Some(product_id))?;

        let event = ProductDeleted {
            id: EntityId::new(product_id)?,
            timestamp: occurred_at,
            product_action: ActionKind::Deleted,
            tenant_id: self.tenant_id.clone(),
        };

        info!(key = %publish_key, "publishing product deleted event");
        self.deletes.publish(&publish_key, &event);
        Ok(publish_key)
    }
}
