use clap::{Parser, Subcommand};
use quickreply_cli::{describe_config, init_logging, load_config, start_server};
use quickreply_core::config::AppConfig;
use quickreply_server::auth::compute_signature;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "quickreply")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Webhook reply coordinator for a chat platform with a short response deadline")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the webhook server
    Serve {
        /// Config file (defaults to ~/.quickreply/config.toml)
        #[arg(short, long, env = "QUICKREPLY_CONFIG")]
        config: Option<PathBuf>,
        /// Override server.port
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Load and validate the config, then print it with secrets masked
    CheckConfig {
        #[arg(short, long, env = "QUICKREPLY_CONFIG")]
        config: Option<PathBuf>,
    },
    /// Compute the webhook signature for a timestamp and nonce
    Sign {
        #[arg(long)]
        timestamp: String,
        #[arg(long)]
        nonce: String,
        #[arg(short, long, env = "QUICKREPLY_CONFIG")]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config, port } => {
            let mut config = load_config(config)?;
            if let Some(port) = port {
                config.server.port = port;
            }
            let _guard = init_logging(&config.logging);
            start_server(config).await
        }
        Commands::CheckConfig { config } => {
            let path = config.clone().unwrap_or_else(AppConfig::default_path);
            let config = load_config(config)?;
            println!("config ok ({})", path.display());
            for line in describe_config(&config) {
                println!("  {line}");
            }
            Ok(())
        }
        Commands::Sign {
            timestamp,
            nonce,
            config,
        } => {
            let config = AppConfig::load(config)?;
            if config.platform.token.trim().is_empty() {
                anyhow::bail!("platform.token is not set");
            }
            println!(
                "{}",
                compute_signature(&config.platform.token, &timestamp, &nonce)
            );
            Ok(())
        }
    }
}
