use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use request_guard::config::load_config;
use request_guard::security::{sign, WebhookSecret};

#[derive(Parser)]
#[command(name = "guard-cli")]
#[command(about = "Helper CLI for request-guard deployments", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load and validate a configuration file
    CheckConfig {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Print signature headers for a payload file, as a webhook sender would
    Sign {
        /// File holding the exact request body
        #[arg(short, long)]
        file: PathBuf,

        /// Environment variable holding the shared secret
        #[arg(short, long)]
        secret_env: String,

        /// Unix timestamp to sign with; defaults to now
        #[arg(short, long)]
        timestamp: Option<u64>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::CheckConfig { config } => {
            let config = load_config(Some(&config))?;
            println!(
                "ok: {} channels, {} forms, {} webhooks, listening on {}",
                config.channels.len(),
                config.forms.len(),
                config.webhooks.len(),
                config.listener.bind_address
            );
        }
        Commands::Sign {
            file,
            secret_env,
            timestamp,
        } => {
            let secret = std::env::var(&secret_env)
                .map_err(|_| format!("environment variable {secret_env} is unset"))?;
            let payload = std::fs::read(&file)?;
            let timestamp = match timestamp {
                Some(ts) => ts,
                None => SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs(),
            };

            println!("x-timestamp: {timestamp}");
            println!("x-signature: {}", sign(&payload, timestamp, &WebhookSecret::new(secret)));
        }
    }
    Ok(())
}
