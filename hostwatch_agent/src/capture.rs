//! Capture loop: one tick samples, persists, alerts, syncs and checks the
//! rotation boundary, then sleeps until the next tick.
//!
//! Shutdown is cooperative. The cancellation token is observed at the two
//! waits (process settle and inter-tick sleep) and between ticks; a tick that
//! is already persisting or syncing runs to completion.

use crate::alert::{breaches, Notifier, Thresholds};
use crate::audit::AuditLog;
use crate::chunk::{Chunk, ChunkStore, Rotation};
use crate::metrics::{MetricsSource, Sampler};
use crate::sync::RemoteSynchronizer;
use crate::types::{ChunkKind, Timestamp};
use anyhow::{Context, Result};
use chrono::Local;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// What one tick did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub processes: usize,
    pub alerts: usize,
    pub synced: usize,
    pub sync_failures: usize,
    pub rotated: bool,
    pub interrupted: bool,
    /// Closed chunks still waiting for a successful sync after this tick.
    pub pending: usize,
}

pub struct Capture<M> {
    sampler: Sampler<M>,
    chunks: ChunkStore,
    sync: Option<RemoteSynchronizer>,
    notifier: Arc<dyn Notifier>,
    thresholds: Thresholds,
    audit: AuditLog,
    tick: Duration,
    cancel: CancellationToken,
    // closed chunks whose last rows have not reached the bucket, oldest first
    pending: Vec<Chunk>,
    // consecutive ticks with at least one failed sync
    failing_ticks: u32,
}

impl<M: MetricsSource> Capture<M> {
    /// Chunk files of this host that an earlier run left unsynced are queued
    /// for sync on the first tick.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        sampler: Sampler<M>,
        chunks: ChunkStore,
        sync: Option<RemoteSynchronizer>,
        notifier: Arc<dyn Notifier>,
        thresholds: Thresholds,
        audit: AuditLog,
        tick: Duration,
        cancel: CancellationToken,
    ) -> Self {
        let mut capture = Self {
            sampler,
            chunks,
            sync,
            notifier,
            thresholds,
            audit,
            tick,
            cancel,
            pending: Vec::new(),
            failing_ticks: 0,
        };
        capture.adopt_leftovers();
        capture
    }

    fn adopt_leftovers(&mut self) {
        let done = self.audit.finalized_chunks();
        let leftovers = match self.chunks.leftovers(&done) {
            Ok(found) => found,
            Err(e) => {
                let dir = self.chunks.dir().display();
                warn!(%dir, error = %e, "scanning for unsynced chunks failed");
                return;
            }
        };
        if leftovers.is_empty() {
            return;
        }
        if self.sync.is_some() {
            info!(count = leftovers.len(), "chunks from an earlier run queued for sync");
            self.pending = leftovers;
        } else {
            // nothing to publish them to; they are closed, so they are done
            for chunk in &leftovers {
                self.audit.chunk_finalized(&chunk.file_name());
            }
        }
    }

    pub fn chunks(&self) -> &ChunkStore {
        &self.chunks
    }

    /// Closed chunks still waiting for a successful sync.
    pub fn pending(&self) -> &[Chunk] {
        &self.pending
    }

    /// Run one tick at `now`. Errors are fatal to the loop; sync and alert
    /// failures are not errors.
    pub async fn tick_at(&mut self, now: Timestamp) -> Result<TickReport> {
        let mut report = TickReport::default();

        let hw = self.sampler.sample_hardware(&now);
        for breach in breaches(&hw, &self.thresholds) {
            report.alerts += 1;
            let message = breach.to_string();
            if let Err(e) = self.notifier.notify(&message).await {
                warn!(error = %e, "alert delivery failed");
                self.audit.event(&format!("ERROR SENDING ALERT: {e}"));
            }
        }

        let processes = match self.sampler.sample_processes(&now, &self.cancel).await {
            Some(p) => p,
            None => {
                report.interrupted = true;
                Vec::new()
            }
        };
        report.processes = processes.len();

        self.chunks
            .append(std::slice::from_ref(&hw))
            .context("persisting hardware sample")?;
        self.chunks
            .append(&processes)
            .context("persisting process samples")?;

        // kinds whose open chunk did not sync this tick
        let mut unsynced = Vec::new();
        if let Some(sync) = &self.sync {
            let mut kept = Vec::with_capacity(self.pending.len());
            for chunk in std::mem::take(&mut self.pending) {
                match sync.sync(&chunk).await {
                    Ok(_) => {
                        report.synced += 1;
                        self.audit.chunk_finalized(&chunk.file_name());
                    }
                    Err(e) => {
                        report.sync_failures += 1;
                        let file = chunk.file_name();
                        self.audit.event(&format!("SYNC ERROR ({file}): {e}"));
                        if e.is_permanent() {
                            error!(%file, error = %e, "giving up on closed chunk");
                        } else {
                            warn!(%file, error = %e, "closed chunk sync failed");
                            kept.push(chunk);
                        }
                    }
                }
            }
            self.pending = kept;

            for kind in ChunkKind::ALL {
                let chunk = self.chunks.chunk(kind);
                match sync.sync(chunk).await {
                    Ok(_) => report.synced += 1,
                    Err(e) => {
                        report.sync_failures += 1;
                        unsynced.push(kind);
                        warn!(%kind, key = %chunk.remote_key, error = %e, "sync failed");
                        self.audit.event(&format!("SYNC ERROR ({}): {e}", chunk.remote_key));
                    }
                }
            }
            if report.sync_failures > 0 {
                self.failing_ticks += 1;
                if self.failing_ticks > 1 {
                    warn!(ticks = self.failing_ticks, "remote sync failing on consecutive ticks");
                }
            } else {
                self.failing_ticks = 0;
            }
        }

        if self.chunks.should_rotate(&now) {
            let rotation = self.chunks.rotate(now);
            self.finalize(rotation, &unsynced);
            report.rotated = true;
        }
        report.pending = self.pending.len();
        Ok(report)
    }

    /// Closed chunks that synced this tick (or need no sync) go to the
    /// ledger; the rest wait in `pending` for a later tick.
    fn finalize(&mut self, rotation: Rotation, unsynced: &[ChunkKind]) {
        for new in &rotation.opened {
            self.audit.event(&format!("New data file created: {}", new.file_name()));
        }
        let paths: Vec<_> = rotation
            .closed
            .iter()
            .map(|c| c.local_path.display().to_string())
            .collect();
        info!(closed = ?paths, "capture window finished");

        for old in rotation.closed {
            if unsynced.contains(&old.kind) {
                warn!(file = %old.file_name(), "closed chunk kept for sync on a later tick");
                self.pending.push(old);
            } else {
                self.audit.chunk_finalized(&old.file_name());
            }
        }
    }

    /// Tick until cancelled (or once). Returns the number of completed ticks.
    pub async fn run(&mut self, once: bool) -> Result<u64> {
        info!(
            host = %self.sampler.host(),
            dir = %self.chunks.dir().display(),
            tick_secs = self.tick.as_secs(),
            remote = self.sync.is_some(),
            "monitoring started, press Ctrl+C to stop"
        );
        self.audit.event("Monitoring started.");
        let mut ticks = 0u64;

        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            match self.tick_at(Local::now()).await {
                Ok(report) => {
                    ticks += 1;
                    tracing::debug!(?report, "tick done");
                }
                Err(e) => {
                    error!(error = ?e, "tick failed, stopping");
                    self.audit.event(&format!("ERROR: {e:#}"));
                    return Err(e);
                }
            }
            if once {
                return Ok(ticks);
            }
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.tick) => {}
            }
        }

        info!(ticks, "monitoring interrupted by user");
        self.audit.event("Monitoring interrupted manually.");
        Ok(ticks)
    }
}
