//! vior_api - HTTP upload service
//!
//! This daemon:
//! 1. Loads configuration (VIOR_CONFIG file, then VIOR_* overrides)
//! 2. Builds and warms up the detector pool
//! 3. Serves /vior-image, /vior-video and /health until Ctrl-C

use anyhow::{anyhow, Result};
use clap::Parser;
use std::sync::{mpsc, Arc};

use vior::api::{ApiConfig, ApiServer};
use vior::{Pipeline, ViorConfig};

#[derive(Parser, Debug)]
#[command(author, version, about = "Object position reports over HTTP")]
struct Args {
    /// Listen address (overrides configuration).
    #[arg(long, env = "VIOR_API_ADDR")]
    addr: Option<String>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = ViorConfig::load()?;
    let detectors = Arc::new(config.detector.build_pool()?);
    let pipeline = Pipeline::new(detectors).with_sample_stride(config.sample_stride);

    let api_config = ApiConfig {
        addr: args.addr.unwrap_or_else(|| config.api_addr.clone()),
        max_upload_bytes: config.max_upload_bytes,
        max_connections: config.max_connections,
        sample_stride: config.sample_stride,
    };
    let api_handle = ApiServer::new(api_config, pipeline).spawn()?;
    log::info!("vior api listening on {}", api_handle.addr);
    log::info!(
        "sample stride {}, max upload {} bytes, backend {}",
        config.sample_stride,
        config.max_upload_bytes,
        config.detector.backend
    );

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    log::info!("vior_api waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping API server...");
    api_handle.stop()?;

    Ok(())
}
