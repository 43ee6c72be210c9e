//! Human view of the monitor's `GET /status`.

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use owo_colors::OwoColorize;
use vigil_common::MonitorSnapshot;

pub async fn run(url: Option<String>, token: Option<String>, json: bool) -> Result<()> {
    let base = url
        .or_else(|| std::env::var("VIGIL_MONITOR_URL").ok())
        .unwrap_or_else(|| "http://127.0.0.1:8080".into());
    let token = token.or_else(|| std::env::var("VIGIL_TOKEN").ok().filter(|t| !t.is_empty()));

    let endpoint = format!("{}/status", base.trim_end_matches('/'));
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()?;

    let mut request = client.get(&endpoint);
    if let Some(token) = &token {
        request = request.bearer_auth(token);
    }
    let response = request
        .send()
        .await
        .with_context(|| format!("querying {endpoint}"))?;
    let status = response.status();
    let body = response.text().await.context("reading monitor response")?;
    if !status.is_success() {
        anyhow::bail!("monitor answered {status}: {body}");
    }

    if json {
        println!("{body}");
        return Ok(());
    }

    let snapshot: MonitorSnapshot =
        serde_json::from_str(&body).context("parsing monitor snapshot")?;
    render(&snapshot);
    Ok(())
}

fn render(snapshot: &MonitorSnapshot) {
    if snapshot.fallback_active {
        println!("{}  slate is on air", "[FALLBACK]".red().bold());
    } else {
        println!("{}  primary is carrying the stream", "[PRIMARY]".green().bold());
    }
    println!(
        "decision: {} ({})",
        snapshot.last_decision,
        snapshot.decided_at.format("%Y-%m-%d %H:%M:%SZ")
    );

    println!();
    match snapshot.records.last() {
        None => println!("no heartbeats on record"),
        Some(latest) => {
            let age = (Utc::now() - latest.received_at).num_seconds().max(0);
            println!(
                "{} heartbeat(s) retained; latest {}s ago from {}",
                snapshot.records.len(),
                age,
                latest.source_address
            );
            println!(
                "  streaming={} ffmpeg={} dayWindow={} camera={} network={}",
                flag(latest.report.streaming_active),
                flag(latest.report.ffmpeg_running),
                flag(latest.report.day_window_active),
                tri(latest.report.camera_signal_available),
                tri(latest.report.camera_network_reachable),
            );
            if let Some(error) = &latest.report.last_error {
                println!("  last error: {}", error.yellow());
            }
        }
    }
}

fn flag(value: bool) -> String {
    if value {
        "yes".green().to_string()
    } else {
        "no".red().to_string()
    }
}

fn tri(value: Option<bool>) -> String {
    match value {
        Some(true) => "yes".green().to_string(),
        Some(false) => "no".red().to_string(),
        None => "unknown".dimmed().to_string(),
    }
}
