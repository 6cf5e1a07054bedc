//! trickle - response relay for OpenAI-compatible gateways
//!
//! Forwards completion requests to one upstream and relays the answers,
//! pacing streamed replies one character at a time.

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use trickle::config::{Config, StreamSpeed};

#[derive(Parser)]
#[command(name = "trickle")]
#[command(about = "Response relay for OpenAI-compatible gateways")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the relay server
    Serve {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.toml")]
        config: String,

        /// Override listen address
        #[arg(short, long)]
        listen: Option<String>,

        /// Override the pacing delay per character, in milliseconds
        #[arg(long, env = "STREAM_SPEED")]
        stream_speed: Option<String>,
    },

    /// Validate configuration file
    Check {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.toml")]
        config: String,
    },
}

fn init_tracing(level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("trickle={},tower_http=info", level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            config,
            listen,
            stream_speed,
        } => {
            let mut cfg = Config::from_file(&config)?;
            init_tracing(&cfg.logging.level);
            tracing::info!(config = %config, "Loaded configuration");

            if let Some(addr) = listen {
                tracing::info!(listen = %addr, "Override listen address");
                cfg.server.listen = addr;
            }
            if let Some(setting) = stream_speed {
                cfg.relay.stream_speed = StreamSpeed::from_setting(Some(&setting));
                tracing::info!(
                    stream_speed_ms = cfg.relay.stream_speed.millis(),
                    "Override stream speed"
                );
            }

            trickle::proxy::run_server(cfg).await
        }

        Commands::Check { config } => {
            init_tracing("info");
            let cfg = Config::from_file(&config)?;
            println!("Configuration OK: {}", config);
            println!("  listen:        {}", cfg.server.listen);
            println!("  upstream:      {}", cfg.upstream.url);
            println!(
                "  api key:       {}",
                if cfg.upstream.api_key.is_some() { "configured" } else { "none" }
            );
            println!("  stream speed:  {} ms", cfg.relay.stream_speed.millis());
            println!("  header copy:   {:?}", cfg.relay.header_copy);
            println!("  consume quota: {}", cfg.relay.consume_quota);
            Ok(())
        }
    }
}
