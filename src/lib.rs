pub mod camera;
pub mod capture;
pub mod clock;
mod commands;
pub mod config;
pub mod db;
pub mod error;
pub mod freshness;
pub mod settings;
pub mod store;
pub mod utils;
pub mod view;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use commands::App;

#[derive(Debug, Parser)]
#[command(name = "camwatch", version, about = "Capture and time-shift frames from Wi-Fi cameras")]
struct Cli {
    /// Path to the JSON configuration file.
    #[arg(short, long, default_value = "camwatch.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Poll every configured device until interrupted.
    Run,
    /// Capture one frame from a device now.
    Capture {
        #[arg(long)]
        device: String,
    },
    /// Resolve every configured viewpoint.
    Views {
        /// Resolve as of this RFC 3339 instant instead of now.
        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },
    /// List stored images for a device, oldest first.
    History {
        #[arg(long)]
        device: String,
        #[arg(long)]
        from: Option<DateTime<Utc>>,
        #[arg(long)]
        to: Option<DateTime<Utc>>,
    },
    /// Show the image a device had `--seconds-ago` seconds ago (0 = latest).
    Past {
        #[arg(long)]
        device: String,
        #[arg(long, default_value_t = 0)]
        seconds_ago: u64,
    },
    /// Fetch a stored frame by record id.
    Image {
        #[arg(long)]
        id: String,
        /// Write here instead of stdout.
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Show recent capture attempts for a device, newest first.
    Log {
        #[arg(long)]
        device: String,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Erase all stored images and capture attempts.
    Reset {
        #[arg(long)]
        confirm: bool,
    },
}

pub fn run() -> Result<()> {
    utils::init_logging();
    let cli = Cli::parse();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;

    runtime.block_on(async move {
        let app = App::open(&cli.config).await?;
        match cli.command {
            Command::Run => commands::run_daemon(app).await,
            Command::Capture { device } => commands::capture_once(app, &device).await,
            Command::Views { at } => commands::show_views(app, at).await,
            Command::History { device, from, to } => {
                commands::show_history(app, &device, from, to).await
            }
            Command::Past {
                device,
                seconds_ago,
            } => commands::show_past(app, &device, seconds_ago).await,
            Command::Image { id, out } => commands::export_image(app, &id, out.as_deref()).await,
            Command::Log { device, limit } => commands::show_log(app, &device, limit).await,
            Command::Reset { confirm } => commands::reset(app, confirm).await,
        }
    })
}
