//! Topic names for product events.

use serde::{Deserialize, Serialize};

use catalog_events::PublisherChannels;

use crate::product::{ProductDeleted, ProductUpserted};

/// Main/fail/retry topics for each product event type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductTopics {
    pub upsert: String,
    pub upsert_fail: String,
    pub upsert_retry: String,
    pub delete: String,
    pub delete_fail: String,
    pub delete_retry: String,
}

impl Default for ProductTopics {
    fn default() -> Self {
        Self {
            upsert: "product-upsert".to_string(),
            upsert_fail: "product-upsert-fail".to_string(),
            upsert_retry: "product-upsert-retry".to_string(),
            delete: "product-delete".to_string(),
            delete_fail: "product-delete-fail".to_string(),
            delete_retry: "product-delete-retry".to_string(),
        }
    }
}

pub fn upsert_channels(topics: &ProductTopics) -> PublisherChannels<ProductUpserted> {
    PublisherChannels {
        main_topic: topics.upsert.clone(),
        fail_topic: topics.upsert_fail.clone(),
        retry_topic: topics.upsert_retry.clone(),
        event_id: |event| event.id.to_string(),
    }
}

pub fn delete_channels(topics: &ProductTopics) -> PublisherChannels<ProductDeleted> {
    PublisherChannels {
        main_topic: topics.delete.clone(),
        fail_topic: topics.delete_fail.clone(),
        retry_topic: topics.delete_retry.clone(),
        event_id: |event| event.id.to_string(),
    }
}
