//! vior_report - one-shot report for a local image or video

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use vior::{Pipeline, ViorConfig};

#[derive(Parser, Debug)]
#[command(name = "vior_report", about = "Print the object position report for a file")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Detect objects in a single image (no identity merging)
    Image { path: PathBuf },

    /// Track objects across a video, sampling every Nth frame
    Video {
        path: PathBuf,
        /// Sampling stride (defaults to the configured stride).
        #[arg(long)]
        stride: Option<u32>,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    let config = ViorConfig::load()?;
    let detectors = Arc::new(config.detector.build_pool()?);
    let pipeline = Pipeline::new(detectors).with_sample_stride(config.sample_stride);

    let report = match args.command {
        Command::Image { path } => {
            let bytes = std::fs::read(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            pipeline.process_image_bytes(&bytes)?
        }
        Command::Video { path, stride } => pipeline.process_video_file(&path, stride)?,
    };

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
