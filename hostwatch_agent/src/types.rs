//! Sample types written to the local chunks and mirrored to the bucket.
//! The CSV headers below are the on-disk format.

use chrono::{DateTime, Local};
use std::fmt;

/// Wall-clock instant used for capture times and the rotation clock.
pub type Timestamp = DateTime<Local>;

/// Format of the `capture_time` column (and of chunk ids).
pub const CAPTURE_TIME_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

pub fn capture_time(now: &Timestamp) -> String {
    now.format(CAPTURE_TIME_FORMAT).to_string()
}

/// 48-bit hardware address of the machine, as an integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HostIdentity(pub u64);

impl fmt::Display for HostIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Owner metadata resolved once at startup and stamped on every row.
#[derive(Debug, Clone, PartialEq)]
pub struct HostMeta {
    pub model: String,
    pub owner_id: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChunkKind {
    Hardware,
    Process,
}

impl ChunkKind {
    pub const ALL: [ChunkKind; 2] = [ChunkKind::Hardware, ChunkKind::Process];

    /// Fixed object name of this kind under the host's remote prefix.
    pub fn object_name(self) -> &'static str {
        match self {
            ChunkKind::Hardware => "dados.csv",
            ChunkKind::Process => "processos.csv",
        }
    }

    /// Stem used in local chunk file names.
    pub fn file_stem(self) -> &'static str {
        match self {
            ChunkKind::Hardware => "dados",
            ChunkKind::Process => "processos",
        }
    }

    pub fn header(self) -> &'static [&'static str] {
        match self {
            ChunkKind::Hardware => HardwareSample::HEADER,
            ChunkKind::Process => ProcessSample::HEADER,
        }
    }
}

impl fmt::Display for ChunkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChunkKind::Hardware => f.write_str("hardware"),
            ChunkKind::Process => f.write_str("process"),
        }
    }
}

/// A row that can be appended to a chunk of its kind.
pub trait Record {
    const KIND: ChunkKind;
    const HEADER: &'static [&'static str];

    fn fields(&self) -> Vec<String>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct HardwareSample {
    pub capture_time: String,
    pub cpu_percent: f64,
    pub ram_percent: f64,
    pub disk_percent: f64,
    pub process_count: usize,
    pub host_identity: HostIdentity,
    pub host_model: String,
    pub owner_id: i64,
}

impl Record for HardwareSample {
    const KIND: ChunkKind = ChunkKind::Hardware;
    const HEADER: &'static [&'static str] = &[
        "capture_time",
        "cpu_percent",
        "ram_percent",
        "disk_percent",
        "process_count",
        "host_identity",
        "host_model",
        "owner_id",
    ];

    fn fields(&self) -> Vec<String> {
        vec![
            self.capture_time.clone(),
            self.cpu_percent.to_string(),
            self.ram_percent.to_string(),
            self.disk_percent.to_string(),
            self.process_count.to_string(),
            self.host_identity.to_string(),
            self.host_model.clone(),
            self.owner_id.to_string(),
        ]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProcessSample {
    pub capture_time: String,
    pub process_name: String,
    pub cpu_percent: f64,
    pub ram_percent: f64,
    pub disk_write_mb: f64,
    pub host_identity: HostIdentity,
    pub host_model: String,
    pub owner_id: i64,
}

impl Record for ProcessSample {
    const KIND: ChunkKind = ChunkKind::Process;
    const HEADER: &'static [&'static str] = &[
        "capture_time",
        "process_name",
        "cpu_percent",
        "ram_percent",
        "disk_write_mb",
        "host_identity",
        "host_model",
        "owner_id",
    ];

    fn fields(&self) -> Vec<String> {
        vec![
            self.capture_time.clone(),
            self.process_name.clone(),
            self.cpu_percent.to_string(),
            self.ram_percent.to_string(),
            self.disk_write_mb.to_string(),
            self.host_identity.to_string(),
            self.host_model.clone(),
            self.owner_id.to_string(),
        ]
    }
}

/// Columns that together identify a row for deduplication.
pub const KEY_COLUMNS: [&str; 2] = ["capture_time", "host_identity"];

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn headers_match_field_counts() {
        let hw = HardwareSample {
            capture_time: "t".into(),
            cpu_percent: 1.5,
            ram_percent: 2.0,
            disk_percent: 3.0,
            process_count: 4,
            host_identity: HostIdentity(5),
            host_model: "m".into(),
            owner_id: 6,
        };
        assert_eq!(hw.fields().len(), HardwareSample::HEADER.len());
        assert_eq!(hw.fields()[1], "1.5");
        assert_eq!(hw.fields()[2], "2");

        for kind in ChunkKind::ALL {
            for key in KEY_COLUMNS {
                assert!(kind.header().contains(&key), "{kind} header lacks {key}");
            }
        }
    }

    #[test]
    fn capture_time_is_second_resolution() {
        let t = Local.with_ymd_and_hms(2026, 10, 18, 12, 5, 9).unwrap();
        assert_eq!(capture_time(&t), "2026-10-18_12-05-09");
    }
}
