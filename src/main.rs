use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use iris_vision::{Configuration, IrisEye, ParallelPipeline, VisionPipeline};

#[derive(Parser)]
#[command(
    name = "iris_vision",
    version,
    about = "Iris segmentation, normalization, encoding and matching"
)]
struct Cli {
    /// Configuration file, or a directory holding `process.ini`.
    #[arg(default_value = ".")]
    config: PathBuf,

    /// Process work units on this many workers (1 runs sequentially).
    #[arg(short, long, default_value_t = 1)]
    jobs: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config = Configuration::from_path(&cli.config)
        .with_context(|| format!("failed to load configuration from {}", cli.config.display()))?;
    println!("{}", config.describe());
    let config = Arc::new(config);

    let summary = if cli.jobs > 1 {
        ParallelPipeline::<IrisEye>::new(config)
            .with_workers(cli.jobs)
            .run()
            .await?
    } else {
        VisionPipeline::<IrisEye>::new(config).run()?
    };

    println!(
        "{} of {} images processed, {} failed, {} scores",
        summary.processed,
        summary.images,
        summary.failed(),
        summary.scores.len()
    );
    Ok(())
}
