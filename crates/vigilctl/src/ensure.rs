//! The ensure-broadcast probe.
//!
//! One shot, run from a timer before air time so a missing or misbound
//! broadcast is caught while someone can still fix it. Never touches the
//! fallback service.

use std::path::PathBuf;

use owo_colors::OwoColorize;
use serde_json::json;
use vigil_common::platform::DEFAULT_API_BASE;
use vigil_common::{ApiClient, BroadcastProbe, PlatformError};

pub const EXIT_OK: i32 = 0;
pub const EXIT_UNEXPECTED: i32 = 1;
pub const EXIT_NO_BROADCAST: i32 = 2;
pub const EXIT_WRONG_BINDING: i32 = 3;
pub const EXIT_API_ERROR: i32 = 4;

/// Map a probe result onto the documented exit codes.
pub fn exit_code(result: &Result<BroadcastProbe, PlatformError>) -> i32 {
    match result {
        Ok(BroadcastProbe::Eligible { .. }) => EXIT_OK,
        Ok(BroadcastProbe::NoBroadcast) => EXIT_NO_BROADCAST,
        Ok(BroadcastProbe::WrongBinding { .. }) => EXIT_WRONG_BINDING,
        Err(_) => EXIT_API_ERROR,
    }
}

pub async fn run(
    stream_id: Option<String>,
    token_file: Option<PathBuf>,
    api_base: Option<String>,
    json: bool,
) -> i32 {
    let Some(stream_id) = stream_id.or_else(|| std::env::var("VIGIL_STREAM_ID").ok()) else {
        eprintln!("stream id missing: pass --stream-id or set VIGIL_STREAM_ID");
        return EXIT_UNEXPECTED;
    };
    let token_file = token_file
        .or_else(|| std::env::var("VIGIL_OAUTH_TOKEN_FILE").ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("/var/lib/vigil/token.json"));
    let api_base = api_base
        .or_else(|| std::env::var("VIGIL_API_BASE").ok())
        .unwrap_or_else(|| DEFAULT_API_BASE.to_string());

    let client = ApiClient::new(api_base);
    let result = client.probe_broadcasts(&token_file, &stream_id).await;
    let code = exit_code(&result);

    if json {
        println!("{}", verdict_json(&stream_id, &result));
        return code;
    }

    match &result {
        Ok(BroadcastProbe::Eligible {
            broadcast_id,
            lifecycle,
            from_active,
        }) => {
            let listing = if *from_active { "active" } else { "upcoming" };
            println!(
                "{} broadcast {} ({lifecycle}, {listing}) is bound to stream {}",
                "[ok]".green(),
                broadcast_id.bold(),
                stream_id
            );
        }
        Ok(BroadcastProbe::NoBroadcast) => {
            println!(
                "{} no active or upcoming broadcast on the channel",
                "[!!]".red()
            );
        }
        Ok(BroadcastProbe::WrongBinding { broadcasts_seen }) => {
            println!(
                "{} {broadcasts_seen} broadcast(s) found, none bound to stream {}",
                "[!!]".red(),
                stream_id
            );
        }
        Err(err) => {
            println!("{} platform API error: {err}", "[!!]".red());
        }
    }
    code
}

fn verdict_json(stream_id: &str, result: &Result<BroadcastProbe, PlatformError>) -> String {
    let value = match result {
        Ok(BroadcastProbe::Eligible {
            broadcast_id,
            lifecycle,
            from_active,
        }) => json!({
            "verdict": "eligible",
            "streamId": stream_id,
            "broadcastId": broadcast_id,
            "lifecycle": lifecycle,
            "fromActive": from_active,
        }),
        Ok(BroadcastProbe::NoBroadcast) => json!({
            "verdict": "noBroadcast",
            "streamId": stream_id,
        }),
        Ok(BroadcastProbe::WrongBinding { broadcasts_seen }) => json!({
            "verdict": "wrongBinding",
            "streamId": stream_id,
            "broadcastsSeen": broadcasts_seen,
        }),
        Err(err) => json!({
            "verdict": "apiError",
            "streamId": stream_id,
            "error": err.to_string(),
        }),
    };
    value.to_string()
}
