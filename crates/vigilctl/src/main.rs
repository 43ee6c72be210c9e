//! vigilctl - operator tooling for the stream fallback controller.

mod cli;
mod ensure;
mod status_cmd;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::{Cli, Commands};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "vigilctl=warn".into()),
        ))
        .with(
            tracing_subscriber::fmt::layer()
                .without_time()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let cli = Cli::parse();
    let code = match cli.command {
        Commands::EnsureBroadcast {
            stream_id,
            token_file,
            api_base,
            json,
        } => ensure::run(stream_id, token_file, api_base, json).await,
        Commands::Status { url, token, json } => match status_cmd::run(url, token, json).await {
            Ok(()) => 0,
            Err(err) => {
                eprintln!("error: {err:#}");
                1
            }
        },
    };
    std::process::exit(code);
}
