//! Entry point for the hostwatch agent. Parses args, resolves the host, runs the capture loop.

use anyhow::{Context, Result};
use chrono::Local;
use hostwatch_agent::alert::{LogNotifier, Notifier, SlackNotifier};
use hostwatch_agent::audit::AuditLog;
use hostwatch_agent::capture::Capture;
use hostwatch_agent::chunk::ChunkStore;
use hostwatch_agent::config::{parse_args, AgentConfig, USAGE};
use hostwatch_agent::identity;
use hostwatch_agent::lookup::{MetadataLookup, PostgresLookup, StaticLookup};
use hostwatch_agent::metrics::{Sampler, SysinfoSource};
use hostwatch_agent::remote::S3Store;
use hostwatch_agent::sync::RemoteSynchronizer;
use hostwatch_agent::types::HostMeta;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("hostwatch_agent=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn spawn_signal_listener(cancel: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            let mut sigterm =
                match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                    Ok(s) => s,
                    Err(e) => {
                        warn!(error = %e, "SIGTERM handler unavailable");
                        let _ = tokio::signal::ctrl_c().await;
                        info!("received SIGINT, finishing current tick");
                        cancel.cancel();
                        return;
                    }
                };
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("received SIGINT, finishing current tick"),
                _ = sigterm.recv() => info!("received SIGTERM, finishing current tick"),
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
            info!("received Ctrl+C, finishing current tick");
        }
        cancel.cancel();
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = match parse_args(std::env::args()) {
        Ok(a) => a,
        Err(e) => {
            eprintln!("{e}\n{USAGE}");
            std::process::exit(2);
        }
    };
    if args.help {
        println!("{USAGE}");
        return Ok(());
    }

    dotenv::dotenv().ok();
    init_tracing();

    let mut cfg = AgentConfig::from_env().context("reading configuration")?;
    cfg.apply(&args).context("applying command-line flags")?;

    let host = identity::resolve(cfg.host_override);
    let lookup: Box<dyn MetadataLookup> = match &cfg.database_url {
        Some(url) => Box::new(PostgresLookup::new(url.clone())),
        None => {
            warn!("HOSTWATCH_DATABASE_URL not set, rows carry placeholder model/owner");
            Box::new(StaticLookup(HostMeta {
                model: "unknown".into(),
                owner_id: 0,
            }))
        }
    };
    let meta = lookup
        .lookup(host)
        .await
        .with_context(|| format!("resolving metadata for host {host}"))?;
    info!(%host, model = %meta.model, owner = meta.owner_id, "host resolved");

    let chunks = ChunkStore::open(&cfg.data_dir, host, cfg.rotation, Local::now())
        .with_context(|| format!("opening data dir {}", cfg.data_dir.display()))?;
    let audit = AuditLog::new(&cfg.data_dir, host);

    let sync = match cfg.s3.clone() {
        Some(s3) => {
            let store = S3Store::new(s3).await;
            info!(bucket = store.bucket(), "remote sync enabled");
            Some(RemoteSynchronizer::new(Arc::new(store), host))
        }
        None => {
            warn!("BUCKET_NAME not set, running local-only");
            None
        }
    };
    let notifier: Arc<dyn Notifier> = match cfg.slack.clone() {
        Some(s) => Arc::new(SlackNotifier::new(s.token, s.channel)),
        None => Arc::new(LogNotifier),
    };

    let cancel = CancellationToken::new();
    spawn_signal_listener(cancel.clone());

    let source = tokio::task::spawn_blocking(SysinfoSource::new)
        .await
        .context("priming system metrics")?;
    let sampler = Sampler::new(source, host, meta, cfg.settle);
    let mut capture = Capture::new(
        sampler,
        chunks,
        sync,
        notifier,
        cfg.thresholds,
        audit,
        cfg.tick,
        cancel,
    );
    capture.run(cfg.once).await?;
    Ok(())
}
