//! Metrics collection using sysinfo for hostwatch_agent.
//!
//! Per-process CPU is a rate, so process sampling is two-phase: one refresh to
//! seed the CPU counters, a settle wait, then a second refresh that reads the
//! delta. Everything that can go wrong per process (exit, permission) is
//! reported as a [`ProcessRead::Skipped`] instead of an error.

use crate::rank::rank;
use crate::types::{capture_time, HardwareSample, HostIdentity, HostMeta, ProcessSample, Timestamp};
use std::path::Path;
use std::time::Duration;
use sysinfo::{
    CpuRefreshKind, Disks, MemoryRefreshKind, Process, ProcessRefreshKind, ProcessStatus,
    ProcessesToUpdate, RefreshKind, System, MINIMUM_CPU_UPDATE_INTERVAL,
};
use tokio_util::sync::CancellationToken;
use tracing::debug;

const BYTES_PER_MB: f64 = (1u64 << 20) as f64;

// Windows reports the idle counter as a process; it is never interesting.
const IDLE_PSEUDO_PROCESS: &str = "System Idle Process";

/// Raw host counters as read from the OS. Zero means "unknown".
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct HostReading {
    pub cpu_percent: f32,
    pub mem_total: u64,
    pub mem_used: u64,
    pub disk_total: u64,
    pub disk_available: u64,
    pub process_count: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawProcess {
    pub pid: u32,
    pub name: String,
    // sum over cores, may exceed 100
    pub cpu_usage: f32,
    pub mem_bytes: u64,
    pub written_bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Vanished,
    AccessDenied,
    Unnamed,
    IdlePseudoProcess,
    Thread,
}

/// Outcome of reading one process in the measure phase.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessRead {
    Ok(RawProcess),
    Skipped(SkipReason),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessBatch {
    pub logical_cores: usize,
    pub mem_total: u64,
    pub reads: Vec<ProcessRead>,
}

/// OS access used by [`Sampler`]. Implementations never fail; unreadable
/// values come back as zero.
pub trait MetricsSource {
    fn host(&mut self) -> HostReading;
    /// Phase 1: seed per-process CPU accounting. Returns how many processes were seen.
    fn warm_up(&mut self) -> usize;
    /// Phase 2: read every live process.
    fn read_processes(&mut self) -> ProcessBatch;
}

/// Process listing only: no per-task entries, so every thread of a process
/// does not show up as a process of its own.
fn listing() -> ProcessRefreshKind {
    ProcessRefreshKind::nothing().without_tasks()
}

/// [`MetricsSource`] backed by a persistent sysinfo `System`, so CPU deltas
/// carry over between refreshes.
pub struct SysinfoSource {
    sys: System,
    disks: Disks,
}

impl SysinfoSource {
    /// Blocks for [`MINIMUM_CPU_UPDATE_INTERVAL`] so the first host reading
    /// already has a CPU delta to report.
    pub fn new() -> Self {
        let refresh_kind = RefreshKind::nothing()
            .with_cpu(CpuRefreshKind::everything())
            .with_memory(MemoryRefreshKind::everything());
        let mut sys = System::new_with_specifics(refresh_kind);
        sys.refresh_processes_specifics(ProcessesToUpdate::All, true, listing());
        std::thread::sleep(MINIMUM_CPU_UPDATE_INTERVAL);
        sys.refresh_cpu_usage();
        Self {
            sys,
            disks: Disks::new_with_refreshed_list(),
        }
    }
}

impl Default for SysinfoSource {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsSource for SysinfoSource {
    fn host(&mut self) -> HostReading {
        self.sys.refresh_cpu_usage();
        self.sys.refresh_memory();
        // listing only: keeps the process count current without touching CPU counters
        self.sys.refresh_processes_specifics(ProcessesToUpdate::All, true, listing());
        self.disks.refresh(true);

        let mem_total = self.sys.total_memory();
        let root = self
            .disks
            .list()
            .iter()
            .find(|d| d.mount_point() == Path::new("/"))
            .or_else(|| self.disks.list().first());

        HostReading {
            cpu_percent: self.sys.global_cpu_usage(),
            mem_total,
            mem_used: mem_total.saturating_sub(self.sys.available_memory()),
            disk_total: root.map(|d| d.total_space()).unwrap_or(0),
            disk_available: root.map(|d| d.available_space()).unwrap_or(0),
            process_count: self.sys.processes().len(),
        }
    }

    fn warm_up(&mut self) -> usize {
        self.sys.refresh_processes_specifics(ProcessesToUpdate::All, true, listing().with_cpu())
    }

    fn read_processes(&mut self) -> ProcessBatch {
        let kind = listing().with_cpu().with_memory().with_disk_usage();
        // dead processes are dropped from the table here
        self.sys.refresh_processes_specifics(ProcessesToUpdate::All, true, kind);
        ProcessBatch {
            logical_cores: self.sys.cpus().len().max(1),
            mem_total: self.sys.total_memory(),
            reads: self.sys.processes().values().map(read_process).collect(),
        }
    }
}

fn read_process(p: &Process) -> ProcessRead {
    // a thread that slipped into the table carries its parent's memory
    if p.thread_kind().is_some() {
        return ProcessRead::Skipped(SkipReason::Thread);
    }
    if matches!(p.status(), ProcessStatus::Zombie | ProcessStatus::Dead) {
        return ProcessRead::Skipped(SkipReason::Vanished);
    }
    let name = p.name().to_string_lossy().into_owned();
    if name.is_empty() {
        return ProcessRead::Skipped(SkipReason::Unnamed);
    }
    if name == IDLE_PSEUDO_PROCESS {
        return ProcessRead::Skipped(SkipReason::IdlePseudoProcess);
    }
    ProcessRead::Ok(RawProcess {
        pid: p.pid().as_u32(),
        name,
        cpu_usage: p.cpu_usage(),
        mem_bytes: p.memory(),
        written_bytes: p.disk_usage().total_written_bytes,
    })
}

pub fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        round1(part as f64 * 100.0 / whole as f64)
    }
}

/// Per-process figures after normalization and rounding.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Usage {
    pub cpu: f64,
    pub ram: f64,
    pub disk_mb: f64,
}

pub fn measure(raw: &RawProcess, logical_cores: usize, mem_total: u64) -> Usage {
    let cpu = f64::from(raw.cpu_usage).max(0.0) / logical_cores.max(1) as f64;
    Usage {
        cpu: round1(cpu),
        ram: percent(raw.mem_bytes, mem_total),
        disk_mb: round1(raw.written_bytes as f64 / BYTES_PER_MB),
    }
}

/// Keep a process iff `cpu > 0 || ram > 1 || disk > 1`; kept processes get
/// ram and disk zeroed when individually below 1.
pub fn significant(u: Usage) -> Option<Usage> {
    if !(u.cpu > 0.0 || u.ram > 1.0 || u.disk_mb > 1.0) {
        return None;
    }
    Some(Usage {
        cpu: u.cpu,
        ram: if u.ram < 1.0 { 0.0 } else { u.ram },
        disk_mb: if u.disk_mb < 1.0 { 0.0 } else { u.disk_mb },
    })
}

/// Turns OS readings into typed samples stamped with the host's identity.
pub struct Sampler<M> {
    source: M,
    host: HostIdentity,
    meta: HostMeta,
    settle: Duration,
}

impl<M: MetricsSource> Sampler<M> {
    pub fn new(source: M, host: HostIdentity, meta: HostMeta, settle: Duration) -> Self {
        Self {
            source,
            host,
            meta,
            settle,
        }
    }

    pub fn host(&self) -> HostIdentity {
        self.host
    }

    pub fn sample_hardware(&mut self, now: &Timestamp) -> HardwareSample {
        let r = self.source.host();
        HardwareSample {
            capture_time: capture_time(now),
            cpu_percent: round1(f64::from(r.cpu_percent).clamp(0.0, 100.0)),
            ram_percent: percent(r.mem_used, r.mem_total),
            disk_percent: percent(r.disk_total.saturating_sub(r.disk_available), r.disk_total),
            process_count: r.process_count,
            host_identity: self.host,
            host_model: self.meta.model.clone(),
            owner_id: self.meta.owner_id,
        }
    }

    /// Two-phase process sample, filtered and ranked. Returns `None` when
    /// `cancel` fires during the settle wait.
    pub async fn sample_processes(
        &mut self,
        now: &Timestamp,
        cancel: &CancellationToken,
    ) -> Option<Vec<ProcessSample>> {
        let seen = self.source.warm_up();

        tokio::select! {
            _ = cancel.cancelled() => return None,
            _ = tokio::time::sleep(self.settle) => {}
        }

        let batch = self.source.read_processes();
        let mut skipped = 0usize;
        let ts = capture_time(now);
        let kept: Vec<ProcessSample> = batch
            .reads
            .iter()
            .filter_map(|read| match read {
                ProcessRead::Ok(raw) => Some(raw),
                ProcessRead::Skipped(_) => {
                    skipped += 1;
                    None
                }
            })
            .filter_map(|raw| {
                let u = significant(measure(raw, batch.logical_cores, batch.mem_total))?;
                Some(ProcessSample {
                    capture_time: ts.clone(),
                    process_name: raw.name.clone(),
                    cpu_percent: u.cpu,
                    ram_percent: u.ram,
                    disk_write_mb: u.disk_mb,
                    host_identity: self.host,
                    host_model: self.meta.model.clone(),
                    owner_id: self.meta.owner_id,
                })
            })
            .collect();
        debug!(
            warmed = seen,
            read = batch.reads.len(),
            skipped,
            significant = kept.len(),
            "process sample"
        );
        Some(rank(kept))
    }
}
