//! hostwatch_agent: samples host and process usage on a fixed cadence, keeps
//! the samples in rotating local CSV chunks and merge-syncs each chunk into
//! an S3 bucket under `registros/{host}/`.

pub mod alert;
pub mod audit;
pub mod capture;
pub mod chunk;
pub mod config;
pub mod csv;
pub mod identity;
pub mod lookup;
pub mod metrics;
pub mod rank;
pub mod remote;
pub mod sync;
pub mod types;
