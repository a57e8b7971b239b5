use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use futures::StreamExt;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use scenario_sensors::{
    BevRenderOptions, Config, LidarChannel, ManifestLogIndex, ScenarioSensorAccessor,
    ScenarioWindow, SensorChannel, Timestamp, config::defaults::DEFAULT_CONFIG_FILE,
};

#[derive(Parser)]
#[command(name = "scenario-sensors")]
#[command(version)]
#[command(about = "Fetch and decode camera and lidar data for logged driving scenarios")]
#[command(long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Log level
    #[arg(short = 'v', long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch the sensor bundle at one iteration of a scenario
    Frame {
        /// JSON log manifest
        #[arg(short, long)]
        manifest: PathBuf,

        /// Single-instant mode: fetch exactly this token
        #[arg(long, conflicts_with_all = ["anchor", "duration"])]
        token: Option<String>,

        #[command(flatten)]
        window: WindowArgs,

        /// Iteration within the scenario
        #[arg(short, long, default_value_t = 0)]
        iteration: usize,

        /// Channels to fetch (repeatable); defaults to the configured set
        #[arg(long = "channel", value_name = "CHANNEL")]
        channels: Vec<SensorChannel>,

        /// Write a bird's-eye-view PNG of the lidar sweep to this path
        #[arg(long, value_name = "PNG")]
        render: Option<PathBuf>,
    },
    /// Fetch every bundle in a scenario window, printing one line each
    Window {
        /// JSON log manifest
        #[arg(short, long)]
        manifest: PathBuf,

        #[command(flatten)]
        window: WindowArgs,

        /// Channels to fetch (repeatable); defaults to the configured set
        #[arg(long = "channel", value_name = "CHANNEL")]
        channels: Vec<SensorChannel>,
    },
    /// Show local cache statistics
    Stats,
}

#[derive(Args)]
struct WindowArgs {
    /// Anchor timestamp in microseconds
    #[arg(long, value_name = "MICROS")]
    anchor: Option<i64>,

    /// Seconds from the anchor to the window start
    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    offset: f64,

    /// Window length in seconds
    #[arg(long)]
    duration: Option<f64>,

    /// Fraction of records to keep, in (0, 1]
    #[arg(long, default_value_t = 1.0)]
    subsample: f64,
}

impl WindowArgs {
    fn to_window(&self) -> Result<ScenarioWindow> {
        let duration = self
            .duration
            .context("--duration is required when selecting a scenario window")?;
        Ok(ScenarioWindow::new(
            self.anchor.map(Timestamp::from_micros),
            self.offset,
            duration,
            self.subsample,
        )?)
    }
}

fn channel_override(channels: &[SensorChannel]) -> Option<&[SensorChannel]> {
    (!channels.is_empty()).then_some(channels)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_filter = format!("scenario_sensors={}", cli.log_level);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting scenario-sensors v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::load_from_file(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    info!("Configuration loaded from: {}", cli.config.display());

    let cache = config.build_cache().await?;

    match cli.command {
        Command::Frame {
            manifest,
            token,
            window,
            iteration,
            channels,
            render,
        } => {
            let index = Arc::new(ManifestLogIndex::load(&manifest).await?);
            let builder = ScenarioSensorAccessor::builder()
                .log_index(index)
                .cache(cache.clone())
                .config(&config);
            let builder = match token {
                Some(token) => builder.initial_token(token),
                None => builder.window(window.to_window()?),
            };
            let accessor = builder.build()?;

            let iterations = accessor.number_of_iterations().await?;
            info!("Scenario has {} iterations", iterations);

            let bundle = accessor
                .get_sensors_at_iteration(iteration, channel_override(&channels))
                .await?;
            println!("{}", bundle.summary());

            if let Some(path) = render {
                let Some(cloud) = bundle.pointclouds.get(LidarChannel::MergedPc) else {
                    bail!("--render needs a MERGED_PC point cloud; request that channel");
                };
                cloud
                    .render_bev(&BevRenderOptions::default())
                    .save(&path)
                    .with_context(|| format!("writing {}", path.display()))?;
                println!("Wrote bird's-eye view to {}", path.display());
            }
        }
        Command::Window {
            manifest,
            window,
            channels,
        } => {
            let window = window.to_window()?;
            let index = Arc::new(ManifestLogIndex::load(&manifest).await?);
            let accessor = ScenarioSensorAccessor::builder()
                .log_index(index)
                .cache(cache.clone())
                .config(&config)
                .window(window)
                .build()?;

            let mut bundles =
                Box::pin(accessor.get_past_sensors(window, channel_override(&channels)));
            let mut count = 0usize;
            while let Some(bundle) = bundles.next().await {
                println!("{}", bundle?.summary());
                count += 1;
            }
            info!("Fetched {} bundles", count);
        }
        Command::Stats => {
            let stats = cache.local().stats().await;
            println!("Cache directory: {}", stats.base_directory.display());
            println!("Entries:         {}", stats.total_entries);
            println!("Size:            {} bytes", stats.total_size_bytes);
            println!(
                "Remote tier:     {}",
                if cache.has_remote() { "configured" } else { "not configured" }
            );
        }
    }

    let stats = cache.stats();
    info!(
        "Cache: {} local hits, {} remote hits, {} remote misses, {} coalesced, {} written locally, {} write failures",
        stats.local_hits,
        stats.remote_hits,
        stats.remote_misses,
        stats.coalesced_waiters,
        stats.local_writes,
        stats.write_failures
    );

    Ok(())
}
