//! Subscription registry.
//!
//! Tracks live feed subscriptions so they can be counted, inspected and shut
//! down together.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

/// A single live subscription.
#[derive(Debug)]
pub struct SubscriptionInfo {
    /// Unique identifier for this subscription
    pub id: String,
    /// Label of the query it follows
    pub query: String,
    pub created_at: DateTime<Utc>,
    /// Stops the delivery task
    pub token: CancellationToken,
}

/// Manages active subscriptions.
///
/// Thread-safe and shared between the feed and its subscriptions via `Arc`.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    entries: DashMap<String, SubscriptionInfo>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Register a subscription and return its id.
    pub fn register(&self, query: &str, token: CancellationToken) -> String {
        let id = uuid::Uuid::new_v4().to_string();

        self.entries.insert(
            id.clone(),
            SubscriptionInfo {
                id: id.clone(),
                query: query.to_string(),
                created_at: Utc::now(),
                token,
            },
        );

        tracing::debug!(subscription = %id, query = %query, "Feed subscription registered");

        id
    }

    /// Unregister a subscription and stop its delivery task.
    pub fn unregister(&self, id: &str) {
        if let Some((_, info)) = self.entries.remove(id) {
            info.token.cancel();
            tracing::debug!(subscription = %id, query = %info.query, "Feed subscription unregistered");
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Labels of the followed queries, one per subscription.
    pub fn queries(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.value().query.clone()).collect()
    }

    /// Stop every subscription.
    pub fn cancel_all(&self) -> usize {
        let ids: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        for id in &ids {
            self.unregister(id);
        }
        ids.len()
    }
}
