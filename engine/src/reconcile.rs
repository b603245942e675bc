//! Last-write-wins reconciliation of pulled documents.
//!
//! Given a batch of remote documents, the locally stored copies and the
//! outbox of unacknowledged local writes, this module decides which remote
//! documents are written locally and which pending local writes are dropped.
//! It never touches storage itself.
//!
//! # Rules
//!
//! For each incoming document, in batch order:
//!
//! 1. A pending local delete suppresses it. The delete has not reached the
//!    remote store yet, so the document would be resurrected.
//! 2. A pending local upsert with a strictly later `updated_at` keeps its
//!    place; the incoming document is rejected. Otherwise the remote copy
//!    wins (ties included) and the pending upsert is discarded.
//! 3. Without a pending write, the incoming document is applied unless it is
//!    older than the stored copy or identical to it.

use crate::{Outbox, PendingOp, PendingWrite, Product, ProductId, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// How a conflict was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConflictResolution {
    /// Local pending write won
    LocalWins,
    /// Remote document won
    RemoteWins,
}

/// A pending local upsert and a remote document disagreeing about one product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    pub product_id: ProductId,
    pub local_updated_at: Timestamp,
    pub remote_updated_at: Timestamp,
    pub resolution: ConflictResolution,
}

/// Why an incoming document was not applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SkipReason {
    /// Older than the stored copy
    Stale,
    /// Identical to the stored copy
    Unchanged,
    /// A local delete for this id is still pending
    PendingDelete,
    /// A newer local upsert for this id is still pending
    LocalPending,
}

/// What to do with one incoming document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Upsert it locally. `discard_pending` drops a superseded local write.
    Apply { discard_pending: bool },
    Skip(SkipReason),
}

/// Decide the fate of one incoming document.
pub fn decide(
    stored: Option<&Product>,
    pending: Option<&PendingOp>,
    incoming: &Product,
) -> (Decision, Option<Conflict>) {
    match pending.map(|op| &op.write) {
        Some(PendingWrite::Delete { .. }) => (Decision::Skip(SkipReason::PendingDelete), None),
        Some(PendingWrite::Upsert { product: local }) => {
            if local == incoming {
                return (Decision::Apply { discard_pending: true }, None);
            }
            let local_wins = local.updated_at > incoming.updated_at;
            let conflict = Conflict {
                product_id: incoming.id.clone(),
                local_updated_at: local.updated_at,
                remote_updated_at: incoming.updated_at,
                resolution: if local_wins {
                    ConflictResolution::LocalWins
                } else {
                    ConflictResolution::RemoteWins
                },
            };
            let decision = if local_wins {
                Decision::Skip(SkipReason::LocalPending)
            } else {
                Decision::Apply {
                    discard_pending: true,
                }
            };
            (decision, Some(conflict))
        }
        None => {
            let decision = match stored {
                Some(current) if incoming.updated_at < current.updated_at => {
                    Decision::Skip(SkipReason::Stale)
                }
                Some(current) if current == incoming => Decision::Skip(SkipReason::Unchanged),
                _ => Decision::Apply {
                    discard_pending: false,
                },
            };
            (decision, None)
        }
    }
}

/// Outcome summary of one pulled batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileResult {
    /// Remote documents written locally
    pub applied: Vec<ProductId>,
    /// Remote documents older than the local copy
    pub stale: Vec<ProductId>,
    /// Remote documents identical to the local copy
    pub unchanged: Vec<ProductId>,
    /// Remote documents held back by a pending local delete
    pub suppressed: Vec<ProductId>,
    /// Remote documents that lost to a newer pending local upsert
    pub rejected_remote: Vec<ProductId>,
    /// Pending local upserts superseded by a remote document
    pub rejected_local: Vec<ProductId>,
    pub conflicts: Vec<Conflict>,
}

impl ReconcileResult {
    fn record_skip(&mut self, id: ProductId, reason: SkipReason) {
        match reason {
            SkipReason::Stale => self.stale.push(id),
            SkipReason::Unchanged => self.unchanged.push(id),
            SkipReason::PendingDelete => self.suppressed.push(id),
            SkipReason::LocalPending => self.rejected_remote.push(id),
        }
    }

    /// Number of incoming documents that were not applied.
    pub fn skipped(&self) -> usize {
        self.stale.len() + self.unchanged.len() + self.suppressed.len() + self.rejected_remote.len()
    }
}

/// The writes a pulled batch turns into.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PullPlan {
    /// Documents to upsert, one per id, in first-seen order
    pub apply: Vec<Product>,
    /// Ids whose pending local write must be dropped from the outbox
    pub discard_pending: Vec<ProductId>,
    pub result: ReconcileResult,
}

impl PullPlan {
    pub fn is_empty(&self) -> bool {
        self.apply.is_empty() && self.discard_pending.is_empty()
    }
}

/// Plans pulled batches against an outbox.
pub struct Reconciler<'a> {
    outbox: &'a Outbox,
}

impl<'a> Reconciler<'a> {
    pub fn new(outbox: &'a Outbox) -> Self {
        Self { outbox }
    }

    /// Plan the local writes for `incoming`.
    ///
    /// `stored` holds the current local copy of each incoming id that exists
    /// locally. A batch may carry several versions of one id; each is decided
    /// against the outcome of the previous ones.
    pub fn plan(&self, incoming: Vec<Product>, stored: &HashMap<ProductId, Product>) -> PullPlan {
        let mut plan = PullPlan::default();
        let mut working: HashMap<ProductId, usize> = HashMap::new();
        let mut discarded: HashSet<ProductId> = HashSet::new();

        for product in incoming {
            let current = working
                .get(&product.id)
                .map(|&i| &plan.apply[i])
                .or_else(|| stored.get(&product.id));
            let pending = if discarded.contains(&product.id) {
                None
            } else {
                self.outbox.get(&product.id)
            };

            let (decision, conflict) = decide(current, pending, &product);
            if let Some(conflict) = conflict {
                plan.result.conflicts.push(conflict);
            }

            match decision {
                Decision::Skip(reason) => plan.result.record_skip(product.id, reason),
                Decision::Apply { discard_pending } => {
                    if discard_pending && discarded.insert(product.id.clone()) {
                        plan.discard_pending.push(product.id.clone());
                        if pending.is_some_and(|op| op.product() != Some(&product)) {
                            plan.result.rejected_local.push(product.id.clone());
                        }
                    }
                    if !plan.result.applied.contains(&product.id) {
                        plan.result.applied.push(product.id.clone());
                    }
                    match working.get(&product.id) {
                        Some(&i) => plan.apply[i] = product,
                        None => {
                            working.insert(product.id.clone(), plan.apply.len());
                            plan.apply.push(product);
                        }
                    }
                }
            }
        }

        plan
    }
}
