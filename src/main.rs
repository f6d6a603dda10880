//! Request guard reference server.
//!
//! ```text
//!     Client ──▶ http::server ──▶ gateway ──▶ sanitizer ─┐
//!                                        └──▶ webhook ───┼──▶ rate_limit ──▶ Outcome
//!     Client ◀── http::response ◀────────────────────────┘
//! ```
//!
//! Mounts the gateway in front of `POST /submit/{form}` and
//! `POST /webhooks/{name}`; the binary holds no guard logic itself.

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;

use request_guard::config::loader::CONFIG_ENV;
use request_guard::lifecycle;

#[derive(Parser)]
#[command(name = "request-guard")]
#[command(about = "Input, rate limit and webhook guard for HTTP routes", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, env = CONFIG_ENV)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match lifecycle::run(cli.config.as_deref()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            // Logging may not be initialized yet.
            eprintln!("request-guard: {error}");
            ExitCode::FAILURE
        }
    }
}
