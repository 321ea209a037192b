// # -----------------------------
// # crates/cli/src/main.rs
// # -----------------------------
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{debug, error};

use djs_common::logging;
use djsd::{shutdown_signal, Daemon, DaemonConfig, Overrides, PushPolicy};
use djsd_client::JournalClient;

#[derive(Parser, Debug)]
#[command(name = "djs", version, about = "Daily journal: drop notes into today's markdown file", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the journal daemon in the foreground
    Start(StartArgs),
    /// Send one note to a running daemon
    Add {
        /// Note text; line breaks are folded to spaces
        #[arg(allow_hyphen_values = true)]
        message: String,
        /// Named pipe the daemon listens on
        #[arg(long, value_name = "PATH")]
        channel: Option<PathBuf>,
    },
}

#[derive(Args, Debug)]
struct StartArgs {
    /// Journal repository root (holds entries/, logs/ and push.sh)
    #[arg(long, value_name = "PATH")]
    repo: PathBuf,
    /// Put current weather into each new day's header
    #[arg(long)]
    with_weather: bool,
    /// Latitude for the weather lookup
    #[arg(long, value_name = "DEGREES", allow_negative_numbers = true)]
    lat: Option<f64>,
    /// Longitude for the weather lookup
    #[arg(long, value_name = "DEGREES", allow_negative_numbers = true)]
    lon: Option<f64>,
    /// Named pipe to listen on
    #[arg(long, value_name = "PATH")]
    channel: Option<PathBuf>,
    /// Day file size in bytes that triggers push.sh
    #[arg(long, value_name = "BYTES")]
    push_threshold: Option<u64>,
    /// When to run push.sh past the threshold: on-crossing or every-append
    #[arg(long, value_name = "POLICY")]
    push_policy: Option<PushPolicy>,
    /// Log level (trace, debug, info, warn, error, off). Overrides RUST_LOG if set.
    #[arg(long = "log-level", value_name = "LEVEL")]
    log_level: Option<String>,
}

impl StartArgs {
    fn overrides(&self) -> Overrides {
        Overrides {
            channel: self.channel.clone(),
            with_weather: self.with_weather,
            latitude: self.lat,
            longitude: self.lon,
            push_threshold: self.push_threshold,
            push_policy: self.push_policy,
            log_level: self.log_level.clone(),
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let code = match cli.command {
        Commands::Start(args) => match start(args).await {
            Ok(()) => 0,
            Err(err) => {
                eprintln!("Error: {:#}", err);
                1
            }
        },
        Commands::Add { message, channel } => add(&message, channel),
    };
    std::process::exit(code);
}

async fn start(args: StartArgs) -> Result<()> {
    let config = DaemonConfig::resolve(&args.repo, args.overrides())?;
    let dispatch = logging::daemon_dispatch(&config.log_dir(), &config.log)
        .with_context(|| format!("failed to open log file in {}", config.log_dir().display()))?;

    let daemon = Daemon::new(config)?;
    let result = daemon.run(dispatch.clone(), shutdown_signal()).await;
    if let Err(err) = &result {
        tracing::dispatcher::with_default(&dispatch, || error!("daemon failed: {:#}", err));
    }
    result
}

fn add(message: &str, channel: Option<PathBuf>) -> i32 {
    let dispatch = logging::stderr_dispatch(None);
    tracing::dispatcher::with_default(&dispatch, || {
        let client = JournalClient::new(djs_common::resolve_channel(channel));
        match client.add(message) {
            Ok(()) => {
                debug!(channel = %client.channel().display(), "note queued");
                println!("Added.");
                0
            }
            Err(err) => {
                eprintln!("Error: {}", err);
                i32::from(err.exit_code())
            }
        }
    })
}
