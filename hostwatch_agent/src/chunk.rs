//! Time-windowed local chunks.
//!
//! One chunk per [`ChunkKind`] is open at a time. Rows are appended to its CSV
//! file every tick; once the rotation window has elapsed the store closes both
//! chunks and opens fresh ones named after the rotation time. Closed chunk
//! files stay on disk.

use crate::csv::encode_row;
use crate::types::{ChunkKind, HostIdentity, Record, Timestamp, CAPTURE_TIME_FORMAT};
use chrono::{Local, NaiveDateTime, TimeZone};
use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChunkError {
    #[error("chunk {0} is closed")]
    Closed(String),
    #[error("writing chunk {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkState {
    Open,
    Closed,
}

#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub kind: ChunkKind,
    pub local_path: PathBuf,
    pub remote_key: String,
    pub opened_at: Timestamp,
    window: Duration,
    state: ChunkState,
    rows: usize,
}

impl Chunk {
    fn open(
        dir: &Path,
        host: HostIdentity,
        kind: ChunkKind,
        id: String,
        now: Timestamp,
        window: Duration,
    ) -> Self {
        let file = format!("{id}-{}-{host}.csv", kind.file_stem());
        Self {
            local_path: dir.join(file),
            remote_key: remote_key(host, kind),
            id,
            kind,
            opened_at: now,
            window,
            state: ChunkState::Open,
            rows: 0,
        }
    }

    pub fn state(&self) -> ChunkState {
        self.state
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Rows appended through this handle since the chunk opened.
    pub fn row_count(&self) -> usize {
        self.rows
    }

    pub fn file_name(&self) -> String {
        self.local_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Append rows, writing the header first when the file does not exist yet.
    /// An empty slice still materializes the file with its header.
    pub fn append<R: Record>(&mut self, rows: &[R]) -> Result<usize, ChunkError> {
        debug_assert_eq!(R::KIND, self.kind);
        if self.state == ChunkState::Closed {
            return Err(ChunkError::Closed(self.id.clone()));
        }
        let io_err = |source| ChunkError::Io {
            path: self.local_path.clone(),
            source,
        };
        let fresh = !self.local_path.exists();
        let mut buf = String::new();
        if fresh {
            buf.push_str(&encode_row(R::HEADER));
        }
        for r in rows {
            buf.push_str(&encode_row(&r.fields()));
        }
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.local_path)
            .map_err(io_err)?;
        f.write_all(buf.as_bytes()).map_err(io_err)?;
        self.rows += rows.len();
        Ok(rows.len())
    }

    fn close(&mut self) {
        self.state = ChunkState::Closed;
    }
}

/// `registros/{host}/{object}`.
pub fn remote_key(host: HostIdentity, kind: ChunkKind) -> String {
    format!("{}{}", remote_prefix(host), kind.object_name())
}

/// Prefix marker for a host's namespace in the bucket.
pub fn remote_prefix(host: HostIdentity) -> String {
    format!("registros/{host}/")
}

/// Splits `{id}-{stem}-{host}.csv` back into id and kind.
fn parse_file_name(name: &str, host: HostIdentity) -> Option<(&str, ChunkKind)> {
    ChunkKind::ALL.into_iter().find_map(|kind| {
        let suffix = format!("-{}-{host}.csv", kind.file_stem());
        name.strip_suffix(suffix.as_str())
            .filter(|id| !id.is_empty())
            .map(|id| (id, kind))
    })
}

/// Opening time encoded in a chunk id, ignoring any `.N` suffix.
fn id_time(id: &str) -> Option<Timestamp> {
    let base = id.split('.').next()?;
    let naive = NaiveDateTime::parse_from_str(base, CAPTURE_TIME_FORMAT).ok()?;
    Local.from_local_datetime(&naive).earliest()
}

/// Chunks closed and opened by one rotation.
#[derive(Debug)]
pub struct Rotation {
    pub closed: Vec<Chunk>,
    pub opened: Vec<Chunk>,
}

pub struct ChunkStore {
    dir: PathBuf,
    host: HostIdentity,
    window: Duration,
    hardware: Chunk,
    process: Chunk,
    // last id handed out and how many times it was reused within that second
    last_id: String,
    collisions: u32,
}

impl ChunkStore {
    /// Opens the first pair of chunks at `now`, creating `dir` if needed.
    pub fn open(
        dir: impl Into<PathBuf>,
        host: HostIdentity,
        window: Duration,
        now: Timestamp,
    ) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        let id = now.format(CAPTURE_TIME_FORMAT).to_string();
        Ok(Self {
            hardware: Chunk::open(&dir, host, ChunkKind::Hardware, id.clone(), now, window),
            process: Chunk::open(&dir, host, ChunkKind::Process, id.clone(), now, window),
            dir,
            host,
            window,
            last_id: id,
            collisions: 0,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn chunk(&self, kind: ChunkKind) -> &Chunk {
        match kind {
            ChunkKind::Hardware => &self.hardware,
            ChunkKind::Process => &self.process,
        }
    }

    fn chunk_mut(&mut self, kind: ChunkKind) -> &mut Chunk {
        match kind {
            ChunkKind::Hardware => &mut self.hardware,
            ChunkKind::Process => &mut self.process,
        }
    }

    /// Append to the open chunk of `R`'s kind.
    pub fn append<R: Record>(&mut self, rows: &[R]) -> Result<usize, ChunkError> {
        self.chunk_mut(R::KIND).append(rows)
    }

    /// True once the open chunks have been open for at least their window.
    /// A clock that moved backwards never triggers rotation.
    pub fn should_rotate(&self, now: &Timestamp) -> bool {
        let elapsed = now.signed_duration_since(self.hardware.opened_at);
        match elapsed.to_std() {
            Ok(e) => e >= self.hardware.window,
            Err(_) => false,
        }
    }

    /// Close both open chunks and open fresh ones at `now`. Ids come from the
    /// rotation time; a second rotation within the same second gets a `.N` suffix.
    pub fn rotate(&mut self, now: Timestamp) -> Rotation {
        let id = self.next_id(&now);
        let mut closed = Vec::with_capacity(2);
        let mut opened = Vec::with_capacity(2);
        for kind in ChunkKind::ALL {
            let fresh = Chunk::open(&self.dir, self.host, kind, id.clone(), now, self.window);
            let mut old = std::mem::replace(self.chunk_mut(kind), fresh);
            old.close();
            closed.push(old);
            opened.push(self.chunk(kind).clone());
        }
        Rotation { closed, opened }
    }

    /// Closed chunks of this host left in the directory by an earlier run,
    /// oldest first. Files named in `done` and the open chunks are skipped.
    pub fn leftovers(&self, done: &HashSet<String>) -> io::Result<Vec<Chunk>> {
        let mut found = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if done.contains(&name) {
                continue;
            }
            let Some((id, kind)) = parse_file_name(&name, self.host) else {
                continue;
            };
            if entry.path() == self.chunk(kind).local_path {
                continue;
            }
            let opened_at = id_time(id).unwrap_or(self.hardware.opened_at);
            let mut chunk =
                Chunk::open(&self.dir, self.host, kind, id.to_string(), opened_at, self.window);
            chunk.close();
            found.push(chunk);
        }
        found.sort_by(|a, b| {
            a.opened_at
                .cmp(&b.opened_at)
                .then_with(|| a.id.cmp(&b.id))
                .then_with(|| a.file_name().cmp(&b.file_name()))
        });
        Ok(found)
    }

    fn next_id(&mut self, now: &Timestamp) -> String {
        let base = now.format(CAPTURE_TIME_FORMAT).to_string();
        let stem = self.last_id.split('.').next().unwrap_or_default();
        if base == stem {
            self.collisions += 1;
            self.last_id = format!("{base}.{}", self.collisions);
        } else {
            self.collisions = 0;
            self.last_id = base;
        }
        self.last_id.clone()
    }
}
