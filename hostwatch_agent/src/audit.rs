//! Append-only audit trail kept next to the chunks.
//!
//! `log_processamento_{host}.csv` records notable events (startup, rotation,
//! sync and alert failures, shutdown); `chunks_processados_{host}.csv`
//! lists every chunk file that is closed and, when a bucket is configured,
//! fully synced. Chunk files missing from that ledger are picked up again on
//! the next start.

use crate::csv::{self, encode_row};
use crate::types::{capture_time, HostIdentity};
use chrono::Local;
use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

const EVENT_HEADER: &[&str] = &["timestamp", "evento", "mac"];
const LEDGER_HEADER: &[&str] = &["timestamp", "nome_arquivo"];

fn append_row(path: &Path, header: &[&str], row: &[String]) -> io::Result<()> {
    let mut buf = String::new();
    if !path.exists() {
        buf.push_str(&encode_row(header));
    }
    buf.push_str(&encode_row(row));
    let mut f = OpenOptions::new().create(true).append(true).open(path)?;
    f.write_all(buf.as_bytes())
}

#[derive(Debug, Clone)]
pub struct AuditLog {
    events: PathBuf,
    ledger: PathBuf,
    host: HostIdentity,
}

impl AuditLog {
    pub fn new(dir: &Path, host: HostIdentity) -> Self {
        Self {
            events: dir.join(format!("log_processamento_{host}.csv")),
            ledger: dir.join(format!("chunks_processados_{host}.csv")),
            host,
        }
    }

    pub fn events_path(&self) -> &Path {
        &self.events
    }

    pub fn ledger_path(&self) -> &Path {
        &self.ledger
    }

    /// Record an event. Failures are logged and swallowed.
    pub fn event(&self, message: &str) {
        let row = [
            capture_time(&Local::now()),
            message.to_string(),
            self.host.to_string(),
        ];
        if let Err(e) = append_row(&self.events, EVENT_HEADER, &row) {
            warn!(path = %self.events.display(), error = %e, "audit log write failed");
        }
    }

    /// Register a chunk file that needs no further work. Failures are logged
    /// and swallowed.
    pub fn chunk_finalized(&self, file_name: &str) {
        let row = [capture_time(&Local::now()), file_name.to_string()];
        if let Err(e) = append_row(&self.ledger, LEDGER_HEADER, &row) {
            warn!(path = %self.ledger.display(), error = %e, "chunk ledger write failed");
        }
    }

    /// File names already in the ledger. An unreadable ledger counts as
    /// empty, which only costs a redundant re-sync.
    pub fn finalized_chunks(&self) -> HashSet<String> {
        let text = match fs::read_to_string(&self.ledger) {
            Ok(t) => t,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return HashSet::new(),
            Err(e) => {
                warn!(path = %self.ledger.display(), error = %e, "chunk ledger unreadable");
                return HashSet::new();
            }
        };
        let table = match csv::parse(&text) {
            Ok(t) => t,
            Err(e) => {
                warn!(path = %self.ledger.display(), error = %e, "chunk ledger malformed");
                return HashSet::new();
            }
        };
        let Some(col) = table.column(LEDGER_HEADER[1]) else {
            return HashSet::new();
        };
        table.rows.into_iter().map(|mut r| r.swap_remove(col)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn events_get_one_header() {
        let td = tempfile::tempdir().unwrap();
        let log = AuditLog::new(td.path(), HostIdentity(5));
        log.event("started");
        log.event("ERROR: disk full, retrying");
        let text = fs::read_to_string(log.events_path()).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "timestamp,evento,mac");
        assert!(lines[2].ends_with(",\"ERROR: disk full, retrying\",5"));
        assert!(log.events_path().ends_with("log_processamento_5.csv"));
    }

    #[test]
    fn ledger_lists_closed_files() {
        let td = tempfile::tempdir().unwrap();
        let log = AuditLog::new(td.path(), HostIdentity(5));
        log.chunk_finalized("a-dados-5.csv");
        let text = fs::read_to_string(log.ledger_path()).unwrap();
        assert!(text.starts_with("timestamp,nome_arquivo\n"));
        assert!(text.trim_end().ends_with(",a-dados-5.csv"));
    }

    #[test]
    fn finalized_chunks_reads_the_ledger_back() {
        let td = tempfile::tempdir().unwrap();
        let log = AuditLog::new(td.path(), HostIdentity(5));
        assert!(log.finalized_chunks().is_empty());
        log.chunk_finalized("a-dados-5.csv");
        log.chunk_finalized("a-processos-5.csv");
        let done = log.finalized_chunks();
        assert_eq!(done.len(), 2);
        assert!(done.contains("a-processos-5.csv"));
    }

    #[test]
    fn write_failures_do_not_panic() {
        let td = tempfile::tempdir().unwrap();
        let log = AuditLog::new(&td.path().join("missing/dir"), HostIdentity(5));
        log.event("lost");
        assert!(!log.events_path().exists());
    }
}
