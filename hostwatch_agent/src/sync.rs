//! Merge-sync of local chunks into their remote objects.
//!
//! The bucket has no append primitive, so every sync downloads the current
//! object, unions it with the local chunk, drops duplicate
//! `(capture_time, host_identity)` keys keeping the later row, and overwrites
//! the object. Re-running a sync with the same or a grown local file
//! converges to the same remote content.

use crate::chunk::{remote_prefix, Chunk};
use crate::csv::{self, CsvError, Table};
use crate::remote::{ObjectStore, StoreError};
use crate::types::{HostIdentity, KEY_COLUMNS};
use bytes::Bytes;
use std::collections::HashMap;
use std::hash::Hash;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("reading local chunk {path}: {source}")]
    Local {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("malformed {which} data for {key}: {reason}")]
    Malformed {
        which: &'static str,
        key: String,
        reason: String,
    },
}

impl SyncError {
    /// Failures that retrying the same local file cannot fix.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            SyncError::Local { .. } | SyncError::Malformed { which: "local", .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// No remote object existed; the local bytes were uploaded as-is.
    Created { rows: usize },
    /// Remote rows were merged with local rows and the object rewritten.
    Merged {
        remote_rows: usize,
        local_rows: usize,
        merged_rows: usize,
    },
}

/// Concatenate `existing` then `incoming` and keep, for every key, only the
/// last occurrence. Survivors keep the relative order of their last
/// occurrence.
pub fn merge<T, K, F>(existing: Vec<T>, incoming: Vec<T>, key_fn: F) -> Vec<T>
where
    K: Eq + Hash,
    F: Fn(&T) -> K,
{
    let all: Vec<T> = existing.into_iter().chain(incoming).collect();
    let mut last: HashMap<K, usize> = HashMap::with_capacity(all.len());
    for (i, row) in all.iter().enumerate() {
        last.insert(key_fn(row), i);
    }
    all.into_iter()
        .enumerate()
        .filter(|(i, row)| last.get(&key_fn(row)) == Some(i))
        .map(|(_, row)| row)
        .collect()
}

pub struct RemoteSynchronizer {
    store: Arc<dyn ObjectStore>,
    host: HostIdentity,
}

impl RemoteSynchronizer {
    pub fn new(store: Arc<dyn ObjectStore>, host: HostIdentity) -> Self {
        Self { store, host }
    }

    /// Make the host's prefix visible to listings. Best effort.
    async fn ensure_prefix(&self) {
        let prefix = remote_prefix(self.host);
        match self.store.count_prefix(&prefix, 1).await {
            Ok(0) => {
                if let Err(e) = self.store.put(&prefix, Bytes::new()).await {
                    warn!(%prefix, error = %e, "creating remote prefix marker failed");
                } else {
                    debug!(%prefix, "created remote prefix marker");
                }
            }
            Ok(_) => {}
            Err(e) => warn!(%prefix, error = %e, "listing remote prefix failed"),
        }
    }

    /// Publish `chunk`'s current local contents to its remote key.
    pub async fn sync(&self, chunk: &Chunk) -> Result<SyncOutcome, SyncError> {
        self.ensure_prefix().await;

        let key = chunk.remote_key.as_str();
        let local_bytes = tokio::fs::read(&chunk.local_path)
            .await
            .map_err(|source| SyncError::Local {
                path: chunk.local_path.clone(),
                source,
            })?;

        let remote_bytes = match self.store.get(key).await {
            Ok(b) => b,
            Err(StoreError::NotFound(_)) => {
                let local = parse("local", key, &local_bytes)?;
                let read = local.rows.len();
                let (deduped, _) = merge_tables(key, Table::default(), local)?;
                let rows = deduped.rows.len();
                // already unique: ship the file byte for byte
                let body = if rows == read {
                    Bytes::from(local_bytes)
                } else {
                    Bytes::from(deduped.to_bytes())
                };
                self.store.put(key, body).await?;
                info!(key, rows, "initial upload");
                return Ok(SyncOutcome::Created { rows });
            }
            Err(e) => return Err(e.into()),
        };

        let local = parse("local", key, &local_bytes)?;
        let remote = parse("remote", key, &remote_bytes)?;
        let (merged, outcome) = merge_tables(key, remote, local)?;
        self.store.put(key, Bytes::from(merged.to_bytes())).await?;
        info!(key, ?outcome, "merged upload");
        Ok(outcome)
    }
}

fn parse(which: &'static str, key: &str, bytes: &[u8]) -> Result<Table, SyncError> {
    let malformed = |reason: String| SyncError::Malformed {
        which,
        key: key.to_string(),
        reason,
    };
    let text = std::str::from_utf8(bytes).map_err(|e| malformed(e.to_string()))?;
    csv::parse(text).map_err(|e: CsvError| malformed(e.to_string()))
}

fn key_indices(which: &'static str, key: &str, t: &Table) -> Result<[usize; 2], SyncError> {
    let mut idx = [0usize; 2];
    for (slot, col) in idx.iter_mut().zip(KEY_COLUMNS) {
        *slot = t.column(col).ok_or_else(|| SyncError::Malformed {
            which,
            key: key.to_string(),
            reason: format!("missing column {col}"),
        })?;
    }
    Ok(idx)
}

/// Remote first, local second, so local rows win on duplicate keys.
fn merge_tables(key: &str, remote: Table, local: Table) -> Result<(Table, SyncOutcome), SyncError> {
    // a zero-byte remote (e.g. truncated upload) carries no header
    let header = if local.header.is_empty() {
        remote.header.clone()
    } else {
        local.header.clone()
    };
    if !remote.header.is_empty() && !local.header.is_empty() && remote.header != local.header {
        return Err(SyncError::Malformed {
            which: "remote",
            key: key.to_string(),
            reason: format!(
                "header {:?} does not match local header {:?}",
                remote.header, local.header
            ),
        });
    }
    let merged_table = Table {
        header,
        rows: Vec::new(),
    };
    if merged_table.header.is_empty() {
        return Ok((
            merged_table,
            SyncOutcome::Merged {
                remote_rows: 0,
                local_rows: 0,
                merged_rows: 0,
            },
        ));
    }
    let [a, b] = key_indices("local", key, &merged_table)?;

    let remote_rows = remote.rows.len();
    let local_rows = local.rows.len();
    let rows = merge(remote.rows, local.rows, |r: &Vec<String>| (r[a].clone(), r[b].clone()));
    let merged_rows = rows.len();
    Ok((
        Table {
            header: merged_table.header,
            rows,
        },
        SyncOutcome::Merged {
            remote_rows,
            local_rows,
            merged_rows,
        },
    ))
}
