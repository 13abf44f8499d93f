use anyhow::{bail, Context, Result};
use geo_batch::geoip::FreeGeoIpClient;
use geo_batch::{
    load_config, resolve_config_path, BatchEngine, BatchService, BatchStore, EngineConfig,
    GeoLookup, MemoryStore,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

struct Args {
    config_path: Option<PathBuf>,
    addresses: Vec<String>,
}

fn parse_args() -> Result<Args> {
    let mut args = std::env::args().skip(1);
    let mut config_path = None;
    let mut addresses = Vec::new();

    while let Some(arg) = args.next() {
        if arg == "--config" {
            let value = args.next().context("--config needs a path")?;
            config_path = Some(PathBuf::from(value));
        } else {
            addresses.push(arg);
        }
    }

    if addresses.is_empty() {
        bail!("usage: geo-batch [--config PATH] ADDRESS...");
    }

    Ok(Args {
        config_path,
        addresses,
    })
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = parse_args()?;
    let config = match resolve_config_path(args.config_path) {
        Some(path) => load_config(&path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => EngineConfig::default(),
    };

    let store: Arc<dyn BatchStore> = Arc::new(MemoryStore::new());
    let lookup: Arc<dyn GeoLookup> = Arc::new(
        FreeGeoIpClient::new(&config.geoip_base_url, config.lookup_timeout())
            .context("failed to build lookup client")?,
    );

    let engine = BatchEngine::start(&config, store.clone(), lookup.clone());
    let service = BatchService::new(store, lookup, engine.enqueuer(), &config.public_base_url)
        .with_cancellation(engine.shutdown_token());

    let submission = service.submit(&args.addresses).await?;
    let batch_id = submission.receipt.batch_id;
    info!(%batch_id, status_url = %submission.receipt.status_url, "Submitted");

    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupted, shutting down");
                break;
            }
            _ = ticker.tick() => {
                let report = service.status(batch_id).await?;
                println!("{}", serde_json::to_string_pretty(&report)?);
                if report.processed == report.total {
                    break;
                }
            }
        }
    }

    engine.shutdown().await;
    Ok(())
}
