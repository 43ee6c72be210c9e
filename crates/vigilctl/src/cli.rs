//! Command-line surface.
//!
//! Two commands only: `ensure-broadcast` is wired to a timer before air
//! time, `status` is for humans poking at the monitor.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Operator CLI for the vigil fallback controller.
#[derive(Parser)]
#[command(name = "vigilctl")]
#[command(about = "Operator tooling for the stream fallback controller", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Verify that the platform has an active or upcoming broadcast bound
    /// to the configured stream.
    ///
    /// Exit codes: 0 eligible broadcast found, 2 no broadcast, 3 wrong
    /// binding, 4 API error, 1 unexpected.
    EnsureBroadcast {
        /// Expected ingest stream id (default: $VIGIL_STREAM_ID).
        #[arg(long)]
        stream_id: Option<String>,

        /// OAuth credential file (default: $VIGIL_OAUTH_TOKEN_FILE).
        #[arg(long)]
        token_file: Option<PathBuf>,

        /// Platform API base URL (default: $VIGIL_API_BASE or the public
        /// endpoint).
        #[arg(long)]
        api_base: Option<String>,

        /// Emit the verdict as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show the monitor's current view: fallback state, last decision and
    /// recent heartbeats.
    Status {
        /// Monitor base URL (default: $VIGIL_MONITOR_URL or
        /// http://127.0.0.1:8080).
        #[arg(long)]
        url: Option<String>,

        /// Bearer token (default: $VIGIL_TOKEN).
        #[arg(long)]
        token: Option<String>,

        /// Dump the raw JSON snapshot.
        #[arg(long)]
        json: bool,
    },
}
