use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{Days, Local};
use clap::{Parser, Subcommand, ValueEnum};
use timelapse_core::{
    CameraDirectory, CameraSource, CaptureScheduler, Config, ProtectApiSource, RtspsSource, SourceKind,
    VideoAssembler,
};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod report;

#[derive(Debug, Parser)]
#[command(name = "timelapsed", version)]
#[command(about = "Multi-interval camera snapshot scheduler with daily timelapse assembly")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// KEY=VALUE file layered under the process environment.
    #[arg(long, global = true)]
    env_file: Option<PathBuf>,

    #[arg(long, value_enum, default_value = "human", global = true)]
    format: OutputFormat,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start the capture scheduler and the daily video schedule.
    Run,
    /// List cameras known to the configured source.
    Cameras {
        /// Include cameras that are not connected.
        #[arg(long)]
        all: bool,
    },
    /// Capture every connected camera once.
    Once,
    /// Check whether the rate limits can carry the camera set.
    Capacity {
        /// Camera count to evaluate instead of asking the source.
        #[arg(long)]
        cameras: Option<usize>,
    },
    /// Assemble videos now.
    Timelapse {
        #[arg(long)]
        days_ago: Option<u32>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub(crate) enum OutputFormat {
    Human,
    Json,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();
    let config = Arc::new(Config::from_env(cli.env_file.as_deref()).context("invalid configuration")?);
    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(&cancel);

    match cli.command {
        Command::Run => run(config, cancel).await?,
        Command::Cameras { all } => {
            let directory = build_directory(&config, &cancel)?;
            let cameras = directory.get(true).await?;
            let cameras: Vec<_> = cameras.iter().filter(|c| all || c.is_connected()).cloned().collect();
            report::emit(cameras.as_slice(), cli.format, report::render_cameras)?;
        }
        Command::Once => {
            let scheduler = CaptureScheduler::new(config.clone(), build_directory(&config, &cancel)?);
            let outcomes = scheduler.capture_all_once(&cancel).await?;
            report::emit(outcomes.as_slice(), cli.format, report::render_outcomes)?;
        }
        Command::Capacity { cameras } => {
            let directory = build_directory(&config, &cancel)?;
            let count = match cameras {
                Some(count) => count,
                None => directory.get(true).await?.iter().filter(|c| c.is_connected()).count(),
            };
            let scheduler = CaptureScheduler::new(config.clone(), directory);
            let capacity = scheduler.validate_capacity(count);
            report::emit(&capacity, cli.format, report::render_capacity)?;
            if !capacity.passed {
                return Ok(ExitCode::from(2));
            }
        }
        Command::Timelapse { days_ago } => {
            let days = days_ago.unwrap_or(config.video.days_ago);
            let today = Local::now().date_naive();
            let date = today
                .checked_sub_days(Days::new(days as u64))
                .context("date out of range")?;
            let assembler = VideoAssembler::new(&config, cancel.clone());
            let assembly = assembler.assemble_date(date).await?;
            report::emit(&assembly, cli.format, report::render_assembly)?;
        }
    }

    Ok(ExitCode::SUCCESS)
}

async fn run(config: Arc<Config>, cancel: CancellationToken) -> Result<()> {
    print_banner(&config);

    let mut services = JoinSet::new();
    if config.fetch_enabled {
        let directory = build_directory(&config, &cancel)?;
        if let Err(err) = directory.refresh(true).await {
            warn!(error = %err, "initial camera discovery failed, retrying on the next firing");
        }
        let scheduler = Arc::new(CaptureScheduler::new(config.clone(), directory));
        services.spawn(scheduler.run(cancel.clone()));
    } else {
        info!("image fetching disabled");
    }
    if config.timelapse_enabled {
        let assembler = VideoAssembler::new(&config, cancel.clone());
        services.spawn(async move { assembler.run_schedule().await });
    } else {
        info!("timelapse creation disabled");
    }
    if services.is_empty() {
        warn!("nothing to do, both fetching and timelapse creation are disabled");
        return Ok(());
    }

    cancel.cancelled().await;
    while let Some(joined) = services.join_next().await {
        if let Err(err) = joined {
            error!(error = %err, "service task aborted");
        }
    }
    info!("shutdown complete");
    Ok(())
}

fn build_source(config: &Config, cancel: &CancellationToken) -> Result<Arc<dyn CameraSource>> {
    let source: Arc<dyn CameraSource> = match config.source.kind {
        SourceKind::Api => Arc::new(ProtectApiSource::new(&config.source)?),
        SourceKind::Rtsps => Arc::new(RtspsSource::new(&config.source, cancel.clone())?),
    };
    Ok(source)
}

fn build_directory(config: &Config, cancel: &CancellationToken) -> Result<Arc<CameraDirectory>> {
    let source = build_source(config, cancel).context("cannot build camera source")?;
    Ok(Arc::new(CameraDirectory::new(source, config.selection.clone())))
}

fn cancel_on_ctrl_c(cancel: &CancellationToken) {
    let cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("received ctrl-c, stopping");
            cancel.cancel();
        }
    });
}

fn print_banner(config: &Config) {
    info!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
    info!(
        source = ?config.source.kind,
        intervals = ?config.fetch.intervals,
        images = %config.image_root.display(),
        videos = %config.video_root.display(),
        reuse = config.reuse.enabled,
        strategy = ?config.reuse.strategy,
        "configuration"
    );
    if config.timelapse_enabled {
        info!(
            at = %config.video.creation_time.format("%H:%M"),
            days_ago = config.video.days_ago,
            preset = ?config.video.quality_preset,
            "daily timelapse"
        );
    }
}
