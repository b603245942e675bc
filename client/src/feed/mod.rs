//! Change feed: live query snapshots over the record store.
//!
//! Every write to the store bumps a revision number on a `watch` channel.
//! Each subscription owns a small delivery task that waits for the revision
//! to move, lets a burst of writes settle for the debounce window, re-runs its
//! query and sends the full result set. Subscribers therefore only ever see
//! complete snapshots, and after a burst they see at least the final state.
//!
//! A query that fails (the store went away) is delivered as
//! [`FeedEvent::Error`]; the subscription stays open and recovers on the
//! next successful read.
//!
//! Dropping a [`Subscription`] unregisters it and stops its task.

use crate::config::FeedSettings;
use crate::error::ClientError;
use crate::store::RecordStore;
use catalog_engine::{CatalogSnapshot, ProductQuery};
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

pub mod registry;

pub use registry::{SubscriptionInfo, SubscriptionRegistry};

/// One delivery to a subscriber.
#[derive(Debug, Clone)]
pub enum FeedEvent {
    /// The complete current result set of the query
    Snapshot(CatalogSnapshot),
    /// Reading the store failed
    Error(Arc<ClientError>),
}

/// Publishes store changes to live query subscriptions.
pub struct ChangeFeed {
    store: Arc<dyn RecordStore>,
    revisions: watch::Sender<u64>,
    registry: Arc<SubscriptionRegistry>,
    settings: FeedSettings,
    closed: CancellationToken,
}

impl ChangeFeed {
    pub fn new(store: Arc<dyn RecordStore>, settings: FeedSettings) -> Self {
        let (revisions, _) = watch::channel(0);
        Self {
            store,
            revisions,
            registry: Arc::new(SubscriptionRegistry::new()),
            settings,
            closed: CancellationToken::new(),
        }
    }

    /// Signal that the store changed, or may have.
    pub fn notify(&self) {
        self.revisions.send_modify(|revision| *revision += 1);
    }

    /// Number of changes signalled so far.
    pub fn revision(&self) -> u64 {
        *self.revisions.borrow()
    }

    /// Follow `query`. The first snapshot is delivered right away.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn subscribe(&self, query: ProductQuery) -> Subscription {
        let token = self.closed.child_token();
        let (tx, rx) = mpsc::channel(self.settings.buffer.max(1));
        let id = self.registry.register(query.label(), token.clone());

        tokio::spawn(deliver(
            Arc::clone(&self.store),
            query.clone(),
            self.revisions.subscribe(),
            tx,
            token,
            self.settings.debounce,
        ));

        Subscription {
            id,
            query,
            events: rx,
            registry: Arc::clone(&self.registry),
        }
    }

    pub fn active_subscriptions(&self) -> usize {
        self.registry.len()
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    /// Stop every subscription. Subscribing afterwards yields closed
    /// subscriptions.
    pub fn close(&self) {
        self.closed.cancel();
        let stopped = self.registry.cancel_all();
        tracing::debug!(stopped, "Change feed closed");
    }
}

async fn deliver(
    store: Arc<dyn RecordStore>,
    query: ProductQuery,
    mut revisions: watch::Receiver<u64>,
    events: mpsc::Sender<FeedEvent>,
    token: CancellationToken,
    debounce: Duration,
) {
    let mut last: Option<CatalogSnapshot> = None;

    loop {
        let revision = *revisions.borrow_and_update();

        let event = match store.query_all(&query).await {
            Ok(products) => {
                let snapshot = CatalogSnapshot::new(revision, products);
                if last.as_ref().is_some_and(|prev| prev.same_contents(&snapshot)) {
                    None
                } else {
                    last = Some(snapshot.clone());
                    Some(FeedEvent::Snapshot(snapshot))
                }
            }
            Err(err) => {
                tracing::warn!(query = %query.label(), error = %err, "Feed query failed");
                last = None;
                Some(FeedEvent::Error(Arc::new(err)))
            }
        };

        if let Some(event) = event {
            tokio::select! {
                _ = token.cancelled() => break,
                sent = events.send(event) => {
                    if sent.is_err() {
                        break;
                    }
                }
            }
        }

        tokio::select! {
            _ = token.cancelled() => break,
            changed = revisions.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }

        if !debounce.is_zero() {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(debounce) => {}
            }
        }
    }
}

/// A live registration with the change feed.
///
/// Owns the receiving end of its snapshots. Dropping it, or calling
/// [`Subscription::unsubscribe`], stops delivery and releases the task.
#[derive(Debug)]
pub struct Subscription {
    id: String,
    query: ProductQuery,
    events: mpsc::Receiver<FeedEvent>,
    registry: Arc<SubscriptionRegistry>,
}

impl Subscription {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn query(&self) -> &ProductQuery {
        &self.query
    }

    /// Wait for the next delivery. `None` once the feed is closed.
    pub async fn recv(&mut self) -> Option<FeedEvent> {
        self.events.recv().await
    }

    /// Take a delivery that is already waiting.
    pub fn try_recv(&mut self) -> Option<FeedEvent> {
        self.events.try_recv().ok()
    }

    pub fn is_active(&self) -> bool {
        self.registry.contains(&self.id)
    }

    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.events.close();
        self.registry.unregister(&self.id);
    }
}

impl Stream for Subscription {
    type Item = FeedEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.events.poll_recv(cx)
    }
}
