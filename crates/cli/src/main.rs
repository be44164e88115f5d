mod channel_commands;
mod coordinator_commands;

use std::path::PathBuf;

use {
    clap::{Parser, Subcommand},
    switchboard_config::SwitchboardConfig,
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "switchboard", about = "Switchboard: one platform connection, many workflow triggers")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Config file (default: discovered `switchboard.{toml,yaml,json}`).
    #[arg(long, global = true, env = "SWITCHBOARD_CONFIG")]
    config: Option<PathBuf>,
    /// Messaging channel socket (overrides config value).
    #[arg(long, global = true, env = "SWITCHBOARD_SOCKET")]
    socket: Option<PathBuf>,
    /// Lock directory (overrides config value).
    #[arg(long, global = true, env = "SWITCHBOARD_LOCK_DIR")]
    lock_dir: Option<PathBuf>,
    /// State directory for the disabled channel set (overrides config value).
    #[arg(long, global = true, env = "SWITCHBOARD_STATE_DIR")]
    state_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Become the coordinator (default when no subcommand is provided).
    Serve(coordinator_commands::ServeArgs),
    /// Show the coordinator lock and the processes in the lock directory.
    Status,
    /// Close, open or inspect a channel through the running coordinator.
    Channel {
        #[command(subcommand)]
        action: channel_commands::ChannelAction,
    },
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

/// Load the config file, then apply command line overrides.
fn load_config(cli: &Cli) -> SwitchboardConfig {
    let mut config = match &cli.config {
        Some(path) => switchboard_config::load_or_default(path),
        None => switchboard_config::discover_and_load(),
    };
    if let Some(socket) = &cli.socket {
        config.coordinator.socket_path = socket.clone();
    }
    if let Some(dir) = &cli.lock_dir {
        config.coordinator.lock_dir = dir.clone();
    }
    if let Some(dir) = &cli.state_dir {
        config.coordinator.state_dir = dir.clone();
    }
    config
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    let config = load_config(&cli);
    match cli.command {
        None => {
            info!(version = env!("CARGO_PKG_VERSION"), "switchboard starting");
            coordinator_commands::handle_serve(&config, coordinator_commands::ServeArgs::default())
                .await
        },
        Some(Commands::Serve(args)) => {
            info!(version = env!("CARGO_PKG_VERSION"), "switchboard starting");
            coordinator_commands::handle_serve(&config, args).await
        },
        Some(Commands::Status) => coordinator_commands::handle_status(&config),
        Some(Commands::Channel { action }) => {
            channel_commands::handle_channel(&config, action).await
        },
    }
}
