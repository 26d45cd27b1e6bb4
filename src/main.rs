//! httptun: tunnel TCP connections through HTTP POST exchanges.
//!
//! ```text
//!  local client ──TCP──▶ forward ──HTTP POST──▶ (CDN / front) ──▶ reverse ──TCP──▶ destination
//!               ◀──────          ◀───────────                 ◀──         ◀──────
//! ```
//!
//! `httptun forward` runs the client end, `httptun reverse` the server end.
//! Both read an optional TOML file and accept a few flag overrides.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tokio::net::TcpListener;

use httptun::config::loader::{load_config, ConfigError};
use httptun::config::validation::{validate_forward, validate_reverse};
use httptun::config::{RemoteConfig, TunnelConfig};
use httptun::lifecycle::signals::forward_ctrl_c;
use httptun::net::Listener;
use httptun::observability::{logging, metrics};
use httptun::{ForwardProxy, ReverseProxy, Shutdown};

/// How long the forward end waits for sessions to send /close on exit.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "httptun")]
#[command(about = "Tunnel TCP connections over HTTP", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Accept local TCP connections and tunnel them to a reverse proxy
    Forward {
        /// Local address to listen on
        #[arg(long)]
        listen: Option<String>,

        /// Reverse proxy base URL; may be repeated
        #[arg(long = "remote")]
        remotes: Vec<String>,

        /// Domain to connect to in place of each remote's host
        #[arg(long)]
        front: Option<String>,

        /// Base poll interval in milliseconds
        #[arg(long)]
        tick: Option<u64>,
    },
    /// Serve the tunnel over HTTP and relay to a fixed destination
    Reverse {
        /// Address to serve HTTP on
        #[arg(long)]
        listen: Option<String>,

        /// Destination TCP address
        #[arg(long)]
        dest: Option<String>,

        /// Route prefix, e.g. /tunnel
        #[arg(long)]
        prefix: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => TunnelConfig::default(),
    };

    logging::init_logging(&config.observability.log_level);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "httptun starting");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let shutdown = Shutdown::new();
    let signal = shutdown.clone();
    tokio::spawn(async move { forward_ctrl_c(&signal).await });

    match cli.command {
        Commands::Forward {
            listen,
            remotes,
            front,
            tick,
        } => {
            let mut forward = config.forward;
            if let Some(listen) = listen {
                forward.listen_address = listen;
            }
            if !remotes.is_empty() {
                forward.remotes = remotes
                    .into_iter()
                    .map(|url| RemoteConfig {
                        url,
                        fronting_domain: None,
                    })
                    .collect();
            }
            if let Some(front) = front {
                for remote in &mut forward.remotes {
                    remote.fronting_domain = Some(front.clone());
                }
            }
            if let Some(tick) = tick {
                forward.poll_interval_ms = tick;
            }
            validate_forward(&forward).map_err(ConfigError::Validation)?;

            let listener = Listener::bind(&forward.listen_address, forward.max_connections).await?;
            let proxy = ForwardProxy::new(forward)?;
            let connections = proxy.connections();
            proxy.run(listener, shutdown.subscribe()).await?;

            if tokio::time::timeout(DRAIN_TIMEOUT, connections.wait_idle())
                .await
                .is_err()
            {
                tracing::warn!(
                    remaining = connections.active_count(),
                    "Sessions still open after drain timeout"
                );
            }
        }
        Commands::Reverse {
            listen,
            dest,
            prefix,
        } => {
            let mut reverse = config.reverse;
            if let Some(listen) = listen {
                reverse.bind_address = listen;
            }
            if let Some(dest) = dest {
                reverse.destination = dest;
            }
            if let Some(prefix) = prefix {
                reverse.prefix = prefix;
            }
            validate_reverse(&reverse).map_err(ConfigError::Validation)?;

            let listener = TcpListener::bind(&reverse.bind_address).await?;
            let proxy = ReverseProxy::new(reverse);
            proxy.run(listener, shutdown.subscribe()).await?;
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
