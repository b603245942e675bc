//! Local writes not yet acknowledged by the remote store.

use crate::{Product, ProductId, Sequence, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::Duration;

/// The write to replay remotely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PendingWrite {
    /// Replace the remote document with this one
    Upsert { product: Product },
    /// Remove the remote document, and its image blob if it had one
    #[serde(rename_all = "camelCase")]
    Delete { image_path: Option<String> },
}

impl PendingWrite {
    pub fn is_delete(&self) -> bool {
        matches!(self, PendingWrite::Delete { .. })
    }

    /// The image blob the written state refers to.
    pub fn image_path(&self) -> Option<&str> {
        match self {
            PendingWrite::Upsert { product } => product.image_path.as_deref(),
            PendingWrite::Delete { image_path } => image_path.as_deref(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PendingWrite::Upsert { .. } => "upsert",
            PendingWrite::Delete { .. } => "delete",
        }
    }
}

/// A pending write and its retry bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingOp {
    pub product_id: ProductId,
    /// Increases with every enqueue; acknowledgements must match it
    pub seq: Sequence,
    pub write: PendingWrite,
    pub queued_at: Timestamp,
    /// Failed push attempts so far
    pub attempts: u32,
    /// Earliest time the next push attempt may run
    pub next_attempt_at: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Image blobs no longer referenced once this write is pushed
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stale_images: Vec<String>,
}

impl PendingOp {
    /// The product being written, for upserts.
    pub fn product(&self) -> Option<&Product> {
        match &self.write {
            PendingWrite::Upsert { product } => Some(product),
            PendingWrite::Delete { .. } => None,
        }
    }
}

/// Exponential retry delay: `base * 2^(attempts - 1)`, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Backoff {
    pub base_ms: u64,
    pub max_ms: u64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base_ms: 1_000,
            max_ms: 300_000,
        }
    }
}

impl Backoff {
    pub fn new(base_ms: u64, max_ms: u64) -> Self {
        Self { base_ms, max_ms }
    }

    /// Delay before the attempt that follows `attempts` failures.
    pub fn delay_ms(&self, attempts: u32) -> u64 {
        if attempts == 0 {
            return 0;
        }
        let factor = 1u64.checked_shl(attempts - 1).unwrap_or(u64::MAX);
        self.base_ms.saturating_mul(factor).min(self.max_ms)
    }

    pub fn delay(&self, attempts: u32) -> Duration {
        Duration::from_millis(self.delay_ms(attempts))
    }
}

/// At most one pending write per product id.
///
/// Enqueuing a write for an id that already has one replaces it. Only the
/// latest write matters remotely since every write is a full replacement or
/// a removal.
#[derive(Debug, Clone)]
pub struct Outbox {
    ops: HashMap<ProductId, PendingOp>,
    next_seq: Sequence,
}

impl Default for Outbox {
    fn default() -> Self {
        Self::new()
    }
}

impl Outbox {
    pub fn new() -> Self {
        Self {
            ops: HashMap::new(),
            next_seq: 1,
        }
    }

    /// Rebuild from persisted ops. For duplicate ids the highest sequence wins.
    pub fn restore(ops: impl IntoIterator<Item = PendingOp>) -> Self {
        let mut outbox = Self::new();
        for op in ops {
            outbox.next_seq = outbox.next_seq.max(op.seq + 1);
            match outbox.ops.get(&op.product_id) {
                Some(existing) if existing.seq > op.seq => {}
                _ => {
                    outbox.ops.insert(op.product_id.clone(), op);
                }
            }
        }
        outbox
    }

    /// Queue a remote upsert of `product`, replacing any pending write for it.
    pub fn enqueue_upsert(&mut self, product: Product, now: Timestamp) -> PendingOp {
        self.enqueue_upsert_replacing(product, None, now)
    }

    /// Like [`Outbox::enqueue_upsert`], where the stored copy being replaced
    /// referred to `replaced_image`.
    pub fn enqueue_upsert_replacing(
        &mut self,
        product: Product,
        replaced_image: Option<String>,
        now: Timestamp,
    ) -> PendingOp {
        let id = product.id.clone();
        self.enqueue(id, PendingWrite::Upsert { product }, replaced_image, now)
    }

    /// Queue a remote delete, replacing any pending write for `product_id`.
    pub fn enqueue_delete(
        &mut self,
        product_id: impl Into<ProductId>,
        image_path: Option<String>,
        now: Timestamp,
    ) -> PendingOp {
        self.enqueue(product_id.into(), PendingWrite::Delete { image_path }, None, now)
    }

    fn enqueue(
        &mut self,
        product_id: ProductId,
        write: PendingWrite,
        replaced_image: Option<String>,
        now: Timestamp,
    ) -> PendingOp {
        // Blobs the replaced op would have released are released by this one.
        let mut stale_images = Vec::new();
        if let Some(previous) = self.ops.get(&product_id) {
            stale_images.extend(previous.stale_images.iter().cloned());
            if previous.write.is_delete() {
                stale_images.extend(previous.write.image_path().map(str::to_string));
            }
        }
        stale_images.extend(replaced_image);
        let mut seen = HashSet::new();
        stale_images.retain(|path| {
            Some(path.as_str()) != write.image_path() && seen.insert(path.clone())
        });

        let seq = self.next_seq;
        self.next_seq += 1;
        let op = PendingOp {
            product_id: product_id.clone(),
            seq,
            write,
            queued_at: now,
            attempts: 0,
            next_attempt_at: now,
            last_error: None,
            stale_images,
        };
        self.ops.insert(product_id, op.clone());
        op
    }

    /// Put back an op taken out by a write that could not be persisted.
    ///
    /// Sequence numbers already handed out are not reused.
    pub fn reinstate(&mut self, op: PendingOp) {
        self.next_seq = self.next_seq.max(op.seq + 1);
        self.ops.insert(op.product_id.clone(), op);
    }

    pub fn get(&self, product_id: &str) -> Option<&PendingOp> {
        self.ops.get(product_id)
    }

    pub fn has_pending_delete(&self, product_id: &str) -> bool {
        self.ops
            .get(product_id)
            .is_some_and(|op| op.write.is_delete())
    }

    /// Ops whose next attempt is due at `now`, oldest first.
    pub fn due(&self, now: Timestamp) -> Vec<PendingOp> {
        let mut due: Vec<_> = self
            .ops
            .values()
            .filter(|op| op.next_attempt_at <= now)
            .cloned()
            .collect();
        due.sort_by_key(|op| op.seq);
        due
    }

    /// All pending ops, oldest first.
    pub fn all(&self) -> Vec<PendingOp> {
        let mut all: Vec<_> = self.ops.values().cloned().collect();
        all.sort_by_key(|op| op.seq);
        all
    }

    /// Clear the op for `product_id` if it is still the one pushed as `seq`.
    ///
    /// A newer write queued while the push was in flight stays pending.
    pub fn acknowledge(&mut self, product_id: &str, seq: Sequence) -> bool {
        if self.ops.get(product_id).is_some_and(|op| op.seq == seq) {
            self.ops.remove(product_id);
            true
        } else {
            false
        }
    }

    /// Schedule a retry for a failed push of `seq`.
    ///
    /// Returns the updated op, or `None` if it was replaced in the meantime.
    pub fn record_failure(
        &mut self,
        product_id: &str,
        seq: Sequence,
        error: impl Into<String>,
        now: Timestamp,
        backoff: &Backoff,
    ) -> Option<PendingOp> {
        let op = self.ops.get_mut(product_id).filter(|op| op.seq == seq)?;
        op.attempts = op.attempts.saturating_add(1);
        op.next_attempt_at = now.saturating_add(backoff.delay_ms(op.attempts));
        op.last_error = Some(error.into());
        Some(op.clone())
    }

    /// Drop the pending op for `product_id`, whatever its sequence.
    pub fn discard(&mut self, product_id: &str) -> Option<PendingOp> {
        self.ops.remove(product_id)
    }

    /// When the earliest pending op becomes due.
    pub fn next_due_at(&self) -> Option<Timestamp> {
        self.ops.values().map(|op| op.next_attempt_at).min()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}
