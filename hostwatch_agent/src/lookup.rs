//! Startup lookup of the host's model and owning organization.

use crate::types::{HostIdentity, HostMeta};
use async_trait::async_trait;
use thiserror::Error;

const QUERY: &str = "SELECT m.nome, m.fk_empresa \
                     FROM totem t \
                     INNER JOIN modelo m ON t.fk_modelo = m.id_modelo \
                     WHERE t.num_mac = $1";

#[derive(Debug, Error)]
pub enum LookupError {
    #[error("host {0} is not registered")]
    NotFound(HostIdentity),
    #[error("host id {0} does not fit the database's bigint column")]
    OutOfRange(HostIdentity),
    #[error("database: {0}")]
    Database(#[from] postgres::Error),
    #[error("lookup task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

#[async_trait]
pub trait MetadataLookup: Send + Sync {
    async fn lookup(&self, host: HostIdentity) -> Result<HostMeta, LookupError>;
}

/// Fixed metadata, used when no database is configured.
pub struct StaticLookup(pub HostMeta);

#[async_trait]
impl MetadataLookup for StaticLookup {
    async fn lookup(&self, _host: HostIdentity) -> Result<HostMeta, LookupError> {
        Ok(self.0.clone())
    }
}

pub struct PostgresLookup {
    url: String,
}

impl PostgresLookup {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl MetadataLookup for PostgresLookup {
    async fn lookup(&self, host: HostIdentity) -> Result<HostMeta, LookupError> {
        let mac = i64::try_from(host.0).map_err(|_| LookupError::OutOfRange(host))?;
        let url = self.url.clone();
        // the blocking client spins its own runtime; keep it off ours
        tokio::task::spawn_blocking(move || -> Result<HostMeta, LookupError> {
            let mut client = postgres::Client::connect(&url, postgres::NoTls)?;
            let row = client
                .query_opt(QUERY, &[&mac])?
                .ok_or(LookupError::NotFound(host))?;
            Ok(HostMeta {
                model: row.try_get(0)?,
                owner_id: i64::from(row.try_get::<_, i32>(1)?),
            })
        })
        .await?
    }
}
