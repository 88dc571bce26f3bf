use crate::diff::diff_catalogues;
use crate::error::{Error, Result};
use crate::metrics::{KindMetrics, MetricsSnapshot};
use crate::replicator::Replicator;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Repeated failures are logged at warn level until this many consecutive
/// backoffs, then elevate to error.
const ESCALATE_AFTER: u32 = 5;

#[derive(Debug, Clone)]
pub struct ReplicationConfig {
    /// Base delay between ticks.
    pub poll_interval: Duration,
    /// Upper bound on summed estimated body size per upsert apply.
    pub max_batch_bytes: usize,
    /// Upper bound on entries per apply, deletes and upserts alike.
    pub max_batch_count: usize,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            max_batch_bytes: 256 * 1024,
            max_batch_count: 64,
            backoff_base: Duration::from_millis(500),
            backoff_max: Duration::from_secs(60),
        }
    }
}

/// What one non-empty tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Index the primary reported for this kind; committed by the loop only
    /// after every apply in the tick succeeded.
    pub remote_index: u64,
    pub deletes: usize,
    pub upserts: usize,
    pub delete_applies: usize,
    pub upsert_applies: usize,
}

/// Progress cell shared between a running loop and status readers.
#[derive(Debug, Default)]
pub struct KindState {
    pub metrics: KindMetrics,
    progress: RwLock<Progress>,
}

#[derive(Debug, Default, Clone)]
struct Progress {
    last_success: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct KindStatus {
    pub last_observed_index: u64,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub metrics: MetricsSnapshot,
}

impl KindState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&self, index: u64) {
        self.metrics.set_last_observed_index(index);
        let mut progress = self.progress.write();
        progress.last_success = Some(Utc::now());
        progress.last_error = None;
    }

    pub fn record_error(&self, err: &Error) {
        self.progress.write().last_error = Some(err.to_string());
    }

    #[must_use]
    pub fn status(&self) -> KindStatus {
        let metrics = self.metrics.snapshot();
        let progress = self.progress.read().clone();
        KindStatus {
            last_observed_index: metrics.last_observed_index,
            last_success: progress.last_success,
            last_error: progress.last_error,
            metrics,
        }
    }
}

fn ensure_live(cancel: &watch::Receiver<bool>) -> Result<()> {
    if *cancel.borrow() {
        Err(Error::Cancelled)
    } else {
        Ok(())
    }
}

/// One tick: poll, diff, apply. Returns `None` when the primary's index did
/// not advance and no summaries came back, in which case the FSM was never
/// touched. Re-running a tick is a no-op once the catalogues agree.
pub async fn reconcile(
    r: &mut dyn Replicator,
    cfg: &ReplicationConfig,
    last_remote_index: u64,
    cancel: &watch::Receiver<bool>,
) -> Result<Option<TickReport>> {
    let noun = r.singular_noun();
    let max_count = cfg.max_batch_count.max(1);

    let (remote_count, remote_index) = r.fetch_remote(last_remote_index).await?;
    if remote_index == last_remote_index && remote_count == 0 {
        debug!("{noun} catalogue unchanged at index {remote_index}");
        return Ok(None);
    }

    ensure_live(cancel)?;

    r.fetch_local().await?;
    let (local_len, remote_len) = r.sort_state();
    let diff = diff_catalogues(r, local_len, remote_len)?;
    debug!(
        "{noun} diff at remote index {remote_index}: {} deletions, {} updates",
        diff.deletions.len(),
        diff.updates.len()
    );

    let mut report = TickReport {
        remote_index,
        deletes: diff.deletions.len(),
        ..TickReport::default()
    };

    // Deletes land first so a stale entry is gone before anything that
    // replaces it in the same tick.
    for chunk in diff.deletions.chunks(max_count) {
        ensure_live(cancel)?;
        r.delete_local_batch(chunk).await?;
        report.delete_applies += 1;
    }

    if !diff.updates.is_empty() {
        ensure_live(cancel)?;
        let fetched = r.fetch_updated(&diff.updates).await?;
        if fetched < diff.updates.len() {
            // The primary deleted some of them between the list and the
            // batch fetch; the next tick picks that up.
            debug!(
                "{noun} batch fetch returned {fetched} of {} requested bodies",
                diff.updates.len()
            );
        }

        let pending = r.len_pending_updates();
        let mut start = 0;
        while start < pending {
            ensure_live(cancel)?;

            let mut end = start;
            let mut batch_bytes = 0usize;
            while end < pending && end - start < max_count {
                let size = r.pending_update_estimated_size(end);
                // An oversized single body still ships, alone.
                if end > start && batch_bytes + size > cfg.max_batch_bytes {
                    break;
                }
                batch_bytes += size;
                end += 1;
            }

            r.update_local_batch(start, end).await?;
            report.upsert_applies += 1;
            start = end;
        }
        report.upserts = pending;
    }

    Ok(Some(report))
}

fn backoff_delay(cfg: &ReplicationConfig, failures: u32) -> Duration {
    let exp = failures.saturating_sub(1).min(30);
    cfg.backoff_base
        .saturating_mul(2u32.saturating_pow(exp))
        .min(cfg.backoff_max)
}

/// Sleep that wakes early on cancellation. Returns true when the loop
/// should exit.
async fn sleep_or_cancelled(delay: Duration, cancel: &mut watch::Receiver<bool>) -> bool {
    if *cancel.borrow() {
        return true;
    }
    tokio::select! {
        () = tokio::time::sleep(delay) => *cancel.borrow(),
        res = cancel.changed() => res.is_err() || *cancel.borrow(),
    }
}

/// Drive one kind until cancelled. Never advances the observed index on a
/// failed tick; a corrupt catalogue stops this kind entirely until the
/// supervisor restarts it.
pub async fn run(
    mut replicator: Box<dyn Replicator>,
    cfg: ReplicationConfig,
    state: Arc<KindState>,
    mut cancel: watch::Receiver<bool>,
) {
    let singular = replicator.singular_noun();
    let plural = replicator.plural_noun();
    info!("{plural} replication started");

    let mut last_remote_index = 0u64;
    let mut failures: u32 = 0;

    loop {
        if *cancel.borrow() {
            break;
        }

        state.metrics.record_poll();
        match reconcile(replicator.as_mut(), &cfg, last_remote_index, &cancel).await {
            Ok(None) => {
                failures = 0;
                state.record_success(last_remote_index);
                if sleep_or_cancelled(cfg.poll_interval, &mut cancel).await {
                    break;
                }
            }
            Ok(Some(report)) => {
                failures = 0;
                last_remote_index = report.remote_index;

                state.metrics.record_deletes(report.deletes as u64);
                state.metrics.record_upserts(report.upserts as u64);
                state
                    .metrics
                    .record_applies((report.delete_applies + report.upsert_applies) as u64);
                state.record_success(last_remote_index);
                debug!(
                    "{plural} reconciled at index {last_remote_index}: \
                     {} deleted, {} upserted",
                    report.deletes, report.upserts
                );

                if sleep_or_cancelled(cfg.poll_interval, &mut cancel).await {
                    break;
                }
            }
            Err(Error::Cancelled) => break,
            Err(err @ Error::Corrupt { .. }) => {
                state.metrics.record_failure();
                state.record_error(&err);
                error!("{singular} replication halted: {err}");
                break;
            }
            Err(err) => {
                failures += 1;
                state.metrics.record_failure();
                state.record_error(&err);
                let delay = backoff_delay(&cfg, failures);
                if failures > ESCALATE_AFTER {
                    error!("{singular} replication still failing after {failures} attempts: {err}");
                } else {
                    warn!("{singular} replication error (will retry in {delay:?}): {err}");
                }
                if sleep_or_cancelled(delay, &mut cancel).await {
                    break;
                }
            }
        }
    }

    info!("{plural} replication stopped");
}
