//! The sync reconciler: one background task per catalog that pushes pending
//! local writes and pulls remote changes.
//!
//! A cycle pulls first, then pushes; a pending upsert is only written over a
//! remote copy with an older `updated_at`. Remote failures never leave the task;
//! they are retried with backoff while local reads and writes keep working,
//! and they are published through [`SyncStatus`] so a screen can tell the
//! user an edit has not reached the server yet.

use crate::catalog::Catalog;
use crate::config::SyncSettings;
use crate::error::{ClientError, Result};
use crate::remote::{RemoteError, RemoteServices};
use catalog_engine::SyncCursor;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

mod pull;
mod push;

/// How far back a cycle pulls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleMode {
    /// From the saved cursor
    Incremental,
    /// From the origin, then drop local products missing remotely
    FullResync,
}

/// What one sync cycle did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    pub pushed: usize,
    /// Local writes dropped in favour of a newer remote copy
    pub superseded: usize,
    pub push_failed: usize,
    /// Remote changes received
    pub pulled: usize,
    pub applied: usize,
    pub skipped: usize,
    pub malformed: usize,
    pub pruned: usize,
    /// The remote failure that ended or degraded the cycle
    pub remote_error: Option<RemoteError>,
}

impl CycleReport {
    pub fn is_success(&self) -> bool {
        self.remote_error.is_none()
    }
}

/// Sync state as seen from the outside.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncStatus {
    /// The last cycle reached the remote store
    pub online: bool,
    /// Local writes not yet acknowledged remotely
    pub pending: usize,
    pub last_push_at: Option<DateTime<Utc>>,
    pub last_pull_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
    pub cursor: SyncCursor,
}

impl SyncStatus {
    pub fn has_unsynced_changes(&self) -> bool {
        self.pending > 0
    }
}

/// Holds the single reconciler slot of a catalog.
struct Lease(Arc<Catalog>);

impl Drop for Lease {
    fn drop(&mut self) {
        self.0.release_reconciler();
    }
}

pub struct SyncReconciler {
    catalog: Arc<Catalog>,
    remote: RemoteServices,
    settings: SyncSettings,
    status: watch::Sender<SyncStatus>,
    last_resync: Instant,
    _lease: Lease,
}

impl SyncReconciler {
    /// Create the reconciler of `catalog`. Fails if it already has one.
    pub fn new(
        catalog: Arc<Catalog>,
        remote: RemoteServices,
        settings: SyncSettings,
    ) -> Result<Self> {
        if !catalog.claim_reconciler() {
            return Err(ClientError::ReconcilerAlreadyRunning);
        }
        let lease = Lease(Arc::clone(&catalog));
        let (status, _) = watch::channel(SyncStatus::default());

        Ok(Self {
            catalog,
            remote,
            settings,
            status,
            last_resync: Instant::now(),
            _lease: lease,
        })
    }

    pub fn status(&self) -> SyncStatus {
        self.status.borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<SyncStatus> {
        self.status.subscribe()
    }

    /// Run one pull-then-push cycle.
    ///
    /// Remote failures are reported in the returned [`CycleReport`]; `Err`
    /// means the local store failed.
    pub async fn run_cycle(&mut self, mode: CycleMode) -> Result<CycleReport> {
        if !self.remote.is_configured() {
            let report = CycleReport {
                remote_error: Some(RemoteError::NotConfigured),
                ..CycleReport::default()
            };
            self.publish(&report, None).await;
            return Ok(report);
        }

        let result = self.exchange(mode).await;
        match result {
            Ok((report, cursor)) => {
                if mode == CycleMode::FullResync && report.is_success() {
                    self.last_resync = Instant::now();
                }
                self.publish(&report, cursor).await;
                Ok(report)
            }
            Err(err) => {
                tracing::error!(error = %err, "Sync cycle aborted by a local storage fault");
                self.status.send_modify(|status| {
                    status.last_error = Some(err.to_string());
                });
                Err(err)
            }
        }
    }

    async fn exchange(&self, mode: CycleMode) -> Result<(CycleReport, Option<SyncCursor>)> {
        let mut report = CycleReport::default();
        let mut cursor = None;

        // Pulling first lets newer remote copies retire losing local writes.
        match pull::pull_changes(
            &self.catalog,
            self.remote.store.as_ref(),
            self.settings.page_size,
            mode,
        )
        .await
        {
            Ok(pulled) => {
                report.pulled = pulled.pulled;
                report.applied = pulled.applied;
                report.skipped = pulled.skipped;
                report.malformed = pulled.malformed;
                report.pruned = pulled.pruned;
                cursor = Some(pulled.cursor);
            }
            Err(ClientError::Remote(err)) => {
                let unreachable = err.is_transient();
                report.remote_error = Some(err);
                if unreachable {
                    return Ok((report, None));
                }
            }
            Err(err) => return Err(err),
        }

        let pushed =
            push::push_pending(&self.catalog, &self.remote, &self.settings.backoff).await?;
        report.pushed = pushed.pushed;
        report.superseded = pushed.superseded;
        report.push_failed = pushed.failed;
        if let Some(err) = pushed.error {
            report.remote_error = Some(err);
        }

        tracing::debug!(
            mode = ?mode,
            pulled = report.pulled,
            applied = report.applied,
            pushed = report.pushed,
            superseded = report.superseded,
            "Sync cycle complete"
        );
        Ok((report, cursor))
    }

    async fn publish(&self, report: &CycleReport, cursor: Option<SyncCursor>) {
        let pending = self.catalog.pending_count().await;
        let now = Utc::now();
        let alert_after = self.settings.alert_after;

        self.status.send_modify(|status| {
            status.pending = pending;
            if report.pushed > 0 {
                status.last_push_at = Some(now);
            }
            if let Some(cursor) = cursor {
                status.last_pull_at = Some(now);
                status.cursor = cursor;
            }

            match &report.remote_error {
                None => {
                    if status.consecutive_failures >= alert_after {
                        tracing::info!(
                            failures = status.consecutive_failures,
                            "Remote store reachable again"
                        );
                    }
                    status.online = true;
                    status.consecutive_failures = 0;
                    status.last_error = None;
                }
                Some(RemoteError::NotConfigured) => {
                    status.online = false;
                    status.last_error = Some(RemoteError::NotConfigured.to_string());
                }
                Some(err) => {
                    status.online = !err.is_transient();
                    status.consecutive_failures = status.consecutive_failures.saturating_add(1);
                    status.last_error = Some(err.to_string());
                    if status.consecutive_failures == alert_after {
                        tracing::error!(
                            failures = status.consecutive_failures,
                            pending,
                            error = %err,
                            "Sync keeps failing; local changes are not reaching the server"
                        );
                    } else {
                        tracing::warn!(
                            failures = status.consecutive_failures,
                            error = %err,
                            "Sync cycle failed"
                        );
                    }
                }
            }
        });
    }

    fn resync_due(&self) -> bool {
        !self.settings.resync_interval.is_zero()
            && self.last_resync.elapsed() >= self.settings.resync_interval
    }

    /// Pause before the next scheduled cycle.
    async fn next_wait(&self) -> Duration {
        let failures = self.status.borrow().consecutive_failures;
        if failures > 0 && self.remote.is_configured() {
            return self.settings.backoff.delay(failures);
        }

        let mut wait = self.settings.interval;
        if let Some(due_at) = self.catalog.next_due_at().await {
            let until_due = Duration::from_millis(due_at.saturating_sub(self.catalog.now()));
            wait = wait.min(until_due);
        }
        wait
    }

    /// Run the reconciler in the background.
    ///
    /// The first cycle starts right away.
    pub fn spawn(self) -> SyncHandle {
        let (commands, receiver) = mpsc::channel(8);
        let status = self.watch_status();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(self.run(receiver, cancel.clone()));

        SyncHandle {
            commands,
            status,
            cancel,
            task: Arc::new(Mutex::new(Some(task))),
        }
    }

    async fn run(mut self, mut commands: mpsc::Receiver<Command>, cancel: CancellationToken) {
        tracing::info!(
            interval_secs = self.settings.interval.as_secs(),
            configured = self.remote.is_configured(),
            "Sync reconciler started"
        );
        let mut next = Some(Command::Nudge);

        loop {
            let command = match next.take() {
                Some(command) => command,
                None => {
                    let wait = self.next_wait().await;
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        received = commands.recv() => match received {
                            Some(command) => command,
                            None => break,
                        },
                        _ = tokio::time::sleep(wait) => Command::Nudge,
                    }
                }
            };

            let (mode, reply) = match command {
                Command::Nudge => (CycleMode::Incremental, None),
                Command::Run { mode, reply } => (mode, Some(reply)),
            };
            let mode = if mode == CycleMode::Incremental && self.resync_due() {
                CycleMode::FullResync
            } else {
                mode
            };

            let result = tokio::select! {
                _ = cancel.cancelled() => break,
                result = self.run_cycle(mode) => result,
            };
            if let Some(reply) = reply {
                let _ = reply.send(result);
            }
        }

        tracing::info!("Sync reconciler stopped");
    }
}

enum Command {
    Nudge,
    Run {
        mode: CycleMode,
        reply: oneshot::Sender<Result<CycleReport>>,
    },
}

/// Control handle of a running reconciler.
#[derive(Clone)]
pub struct SyncHandle {
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<SyncStatus>,
    cancel: CancellationToken,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl SyncHandle {
    /// Ask for a cycle soon. Never waits; a queued request already covers it.
    pub fn sync_now(&self) {
        let _ = self.commands.try_send(Command::Nudge);
    }

    /// Run an incremental cycle and wait for its report.
    pub async fn sync(&self) -> Result<CycleReport> {
        self.request(CycleMode::Incremental).await
    }

    /// Pull everything from the origin and drop products deleted remotely.
    pub async fn resync(&self) -> Result<CycleReport> {
        self.request(CycleMode::FullResync).await
    }

    async fn request(&self, mode: CycleMode) -> Result<CycleReport> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Run { mode, reply })
            .await
            .map_err(|_| ClientError::SyncStopped)?;
        response.await.map_err(|_| ClientError::SyncStopped)?
    }

    pub fn status(&self) -> SyncStatus {
        self.status.borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<SyncStatus> {
        self.status.clone()
    }

    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// Stop the reconciler and wait for it to exit.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        if let Some(task) = self.task.lock().await.take() {
            if let Err(err) = task.await {
                tracing::error!(error = %err, "Sync reconciler panicked");
            }
        }
    }
}

impl std::fmt::Debug for SyncHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncHandle")
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FeedSettings;
    use crate::remote::MemoryRemote;
    use catalog_engine::{Backoff, ManualClock, Product, PRODUCTS};
    use serde_json::json;

    async fn setup() -> (Arc<Catalog>, Arc<MemoryRemote>, SyncReconciler) {
        let clock = Arc::new(ManualClock::new(1_000));
        let catalog = Catalog::in_memory(clock, FeedSettings::default())
            .await
            .unwrap();
        let remote = Arc::new(MemoryRemote::new());
        let reconciler = SyncReconciler::new(
            Arc::clone(&catalog),
            RemoteServices::memory(remote.clone()),
            SyncSettings::default(),
        )
        .unwrap();
        (catalog, remote, reconciler)
    }

    #[tokio::test]
    async fn pulls_then_pushes() {
        let (catalog, remote, mut reconciler) = setup().await;
        catalog
            .upsert_local(Product::new("local", "Latte", 1_000))
            .await
            .unwrap();
        remote.put_document(PRODUCTS, "other", json!({"name": "Bun", "updatedAt": 900}));

        let report = reconciler.run_cycle(CycleMode::Incremental).await.unwrap();

        assert_eq!(report.pushed, 1);
        assert!(report.is_success());
        assert!(remote.document(PRODUCTS, "local").is_some());
        assert!(catalog.find_by_id("other").await.unwrap().is_some());
        assert_eq!(catalog.pending_count().await, 0);

        let status = reconciler.status();
        assert!(status.online);
        assert!(!status.has_unsynced_changes());
        assert!(status.last_pull_at.is_some());
        assert!(!status.cursor.is_origin());
    }

    #[tokio::test]
    async fn push_yields_to_a_newer_remote_copy() {
        let (catalog, remote, _reconciler) = setup().await;
        let mut local = Product::new("p1", "Latte", 1_000);
        local.sale_price = 10.0;
        catalog.upsert_local(local).await.unwrap();
        // Written remotely after this device last pulled.
        remote.put_document(
            PRODUCTS,
            "p1",
            json!({"name": "Latte", "salePrice": 12.0, "updatedAt": 1_500}),
        );

        let services = RemoteServices::memory(remote.clone());
        let outcome = push::push_pending(&catalog, &services, &Backoff::default())
            .await
            .unwrap();

        assert_eq!(outcome.pushed, 0);
        assert_eq!(outcome.superseded, 1);
        assert_eq!(remote.document(PRODUCTS, "p1").unwrap()["updatedAt"], 1_500);
        let stored = catalog.find_by_id("p1").await.unwrap().unwrap();
        assert_eq!(stored.sale_price, 12.0);
        assert_eq!(catalog.pending_count().await, 0);
    }

    #[tokio::test]
    async fn push_overwrites_an_older_remote_copy() {
        let (catalog, remote, _reconciler) = setup().await;
        remote.put_document(PRODUCTS, "p1", json!({"name": "Latte", "updatedAt": 900}));
        catalog
            .upsert_local(Product::new("p1", "Latte v2", 1_000))
            .await
            .unwrap();

        let services = RemoteServices::memory(remote.clone());
        let outcome = push::push_pending(&catalog, &services, &Backoff::default())
            .await
            .unwrap();

        assert_eq!(outcome.pushed, 1);
        assert_eq!(remote.document(PRODUCTS, "p1").unwrap()["name"], "Latte v2");
    }

    #[tokio::test]
    async fn malformed_documents_are_skipped() {
        let (catalog, remote, mut reconciler) = setup().await;
        remote.put_document(PRODUCTS, "bad", json!({"name": 42, "updatedAt": 1}));
        remote.put_document(PRODUCTS, "good", json!({"name": "Tea", "updatedAt": 1}));

        let report = reconciler.run_cycle(CycleMode::Incremental).await.unwrap();

        assert_eq!(report.malformed, 1);
        assert_eq!(report.applied, 1);
        assert!(catalog.find_by_id("good").await.unwrap().is_some());

        // The cursor moved past the bad document.
        let again = reconciler.run_cycle(CycleMode::Incremental).await.unwrap();
        assert_eq!(again.pulled, 0);
    }

    #[tokio::test]
    async fn offline_cycles_count_failures() {
        let (catalog, remote, mut reconciler) = setup().await;
        catalog
            .upsert_local(Product::new("p1", "Latte", 1_000))
            .await
            .unwrap();
        remote.set_online(false);

        let report = reconciler.run_cycle(CycleMode::Incremental).await.unwrap();
        assert_eq!(report.pushed, 0);
        assert_eq!(report.remote_error, Some(RemoteError::Offline));
        reconciler.run_cycle(CycleMode::Incremental).await.unwrap();

        let status = reconciler.status();
        assert!(!status.online);
        assert_eq!(status.consecutive_failures, 2);
        assert_eq!(status.pending, 1);
        assert!(catalog.find_by_id("p1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn unconfigured_remote_idles() {
        let catalog = Catalog::in_memory(Arc::new(ManualClock::new(1)), FeedSettings::default())
            .await
            .unwrap();
        let mut reconciler = SyncReconciler::new(
            catalog,
            RemoteServices::unconfigured(),
            SyncSettings::default(),
        )
        .unwrap();

        let report = reconciler.run_cycle(CycleMode::Incremental).await.unwrap();
        assert_eq!(report.remote_error, Some(RemoteError::NotConfigured));
        assert_eq!(reconciler.status().consecutive_failures, 0);
    }

    #[tokio::test]
    async fn full_resync_prunes_remote_deletions() {
        let (catalog, remote, mut reconciler) = setup().await;
        remote.put_document(PRODUCTS, "keep", json!({"name": "Tea", "updatedAt": 1}));
        remote.put_document(PRODUCTS, "gone", json!({"name": "Bun", "updatedAt": 1}));
        reconciler.run_cycle(CycleMode::Incremental).await.unwrap();

        remote.remove_document(PRODUCTS, "gone");
        let report = reconciler.run_cycle(CycleMode::FullResync).await.unwrap();

        assert_eq!(report.pruned, 1);
        assert!(catalog.find_by_id("gone").await.unwrap().is_none());
        assert!(catalog.find_by_id("keep").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn one_reconciler_per_catalog() {
        let (catalog, _remote, reconciler) = setup().await;
        let second = SyncReconciler::new(
            Arc::clone(&catalog),
            RemoteServices::unconfigured(),
            SyncSettings::default(),
        );
        assert!(matches!(second, Err(ClientError::ReconcilerAlreadyRunning)));

        drop(reconciler);
        assert!(SyncReconciler::new(
            catalog,
            RemoteServices::unconfigured(),
            SyncSettings::default()
        )
        .is_ok());
    }
}
