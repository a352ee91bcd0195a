//! pusher: Pusher Channels command-line client.
//!
//! Subscribes to channels and prints events as JSON lines, or shows the
//! connection URL an app key resolves to.

mod commands;
mod config;

use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::EnvFilter;

/// Pusher Channels command-line client
#[derive(Parser)]
#[command(name = "pusher", version, about = "Listen to Pusher Channels events from a terminal")]
struct Cli {
    /// Cluster to connect to (e.g. eu, us2)
    #[arg(long, global = true)]
    cluster: Option<String>,

    /// Use ws:// on port 80 instead of wss:// on port 443
    #[arg(long, global = true)]
    insecure: bool,

    /// Explicit host, overriding the cluster host
    #[arg(long, global = true)]
    host: Option<String>,

    /// Explicit port
    #[arg(short, long, global = true)]
    port: Option<u16>,

    /// Config file path
    #[arg(long = "config", global = true)]
    config: Option<String>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Subscribe and print events as JSON lines until Ctrl-C
    Listen {
        /// App key (defaults to [connection] app_key)
        app_key: Option<String>,

        /// Channel to subscribe to (repeatable)
        #[arg(short, long = "channel")]
        channels: Vec<String>,

        /// Event name to print (repeatable)
        #[arg(short, long = "event", required = true)]
        events: Vec<String>,

        /// Authorization endpoint for private and presence channels
        #[arg(long)]
        auth_url: Option<String>,
    },

    /// Print the connection URL for an app key
    Url {
        /// App key (defaults to [connection] app_key)
        app_key: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing. RUST_LOG wins over the defaults.
    let default_filter = if cli.verbose {
        "pusher=debug,pusher_cli=debug,pusher_client=debug,pusher_core=debug"
    } else {
        "pusher=info,pusher_cli=info,pusher_client=info,pusher_core=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_target(cli.verbose)
        .with_writer(std::io::stderr)
        .init();

    // Load config file.
    let config_path = cli.config.clone().unwrap_or_else(|| {
        let home = dirs::home_dir().unwrap_or_default();
        home.join(".pusher").join("config.toml").to_string_lossy().to_string()
    });
    let cfg = match config::Config::load(&config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("pusher: {e:#}");
            std::process::exit(1);
        }
    };

    let mut overrides = config::Overrides {
        cluster: cli.cluster.clone(),
        insecure: cli.insecure,
        host: cli.host.clone(),
        port: cli.port,
        auth_url: None,
    };

    let result = match cli.command {
        Command::Listen {
            app_key,
            channels,
            events,
            auth_url,
        } => {
            overrides.auth_url = auth_url;
            match cfg.app_key(app_key.as_deref()) {
                Ok(app_key) => {
                    let client_config = cfg.client_config(&overrides);
                    commands::listen::run(&app_key, client_config, &channels, &events).await
                }
                Err(e) => Err(e),
            }
        }
        Command::Url { app_key } => cfg
            .app_key(app_key.as_deref())
            .and_then(|app_key| commands::url::run(&app_key, &cfg.client_config(&overrides))),
    };

    if let Err(e) = result {
        error!("{:#}", e);
        eprintln!("pusher: {e:#}");
        std::process::exit(1);
    }
}
