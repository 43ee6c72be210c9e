//! Scene classification, encoder argument assembly and child supervision.
//!
//! The encoder child is owned exclusively by this module: nothing else
//! signals it, and every launch goes through the same argument builder so
//! the target URL invariants hold for every scene.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::process::{Child, Command};
use tracing::{info, warn};
use vigil_common::ingest::FallbackMode;

use crate::profile::{EncoderProfile, SCENE_AUTO};

/// How long a signalled child gets to flush and exit before SIGKILL.
const CHILD_WAIT: Duration = Duration::from_secs(10);

/// One entry of the rotation, resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SceneSource {
    /// Local media file, streamed on a loop.
    File(PathBuf),
    /// Filter-graph source consumed by the encoder directly.
    Synthetic(String),
}

/// Resolve a scene entry: `auto` becomes the mode-selected synthetic source,
/// an existing local path is streamed as a file, anything else is assumed to
/// be a filter-graph spec.
pub fn resolve_scene(profile: &EncoderProfile, entry: &str, mode: FallbackMode) -> SceneSource {
    if entry == SCENE_AUTO {
        return SceneSource::Synthetic(profile.synthetic_source(mode));
    }
    let path = Path::new(entry);
    if path.is_file() {
        SceneSource::File(path.to_path_buf())
    } else {
        SceneSource::Synthetic(entry.to_string())
    }
}

/// Assemble the full encoder invocation for one scene.
pub fn build_args(
    profile: &EncoderProfile,
    scene: &SceneSource,
    raw_progress: &Path,
) -> Vec<String> {
    let mut args: Vec<String> = vec!["-hide_banner".into(), "-loglevel".into(), "warning".into()];

    match scene {
        SceneSource::File(path) => {
            args.extend([
                "-re".into(),
                "-stream_loop".into(),
                "-1".into(),
                "-i".into(),
                path.display().to_string(),
            ]);
        }
        SceneSource::Synthetic(spec) => {
            args.extend([
                "-re".into(),
                "-f".into(),
                "lavfi".into(),
                "-i".into(),
                spec.clone(),
            ]);
        }
    }

    // Silent audio bed; an ingest without an audio track is flagged unhealthy
    // by the platform.
    args.extend([
        "-f".into(),
        "lavfi".into(),
        "-i".into(),
        "anullsrc=channel_layout=stereo:sample_rate=44100".into(),
    ]);

    let mut filter = format!(
        "scale={w}:{h}:force_original_aspect_ratio=decrease,pad={w}:{h}:(ow-iw)/2:(oh-ih)/2,format=yuv420p",
        w = profile.width,
        h = profile.height
    );
    if let Some(text) = &profile.overlay_text {
        filter.push_str(&format!(
            ",drawtext=text='{}':x=(w-text_w)/2:y=h-th-48:fontsize=38:fontcolor=white:box=1:boxcolor=black@0.45:boxborderw=12",
            escape_drawtext(text)
        ));
    }
    args.extend(["-vf".into(), filter]);

    args.extend([
        "-map".into(),
        "0:v".into(),
        "-map".into(),
        "1:a".into(),
        "-r".into(),
        profile.fps.to_string(),
        "-c:v".into(),
        "libx264".into(),
        "-preset".into(),
        profile.preset.clone(),
        "-b:v".into(),
        format!("{}k", profile.video_bitrate_kbps),
        "-maxrate".into(),
        format!("{}k", profile.video_bitrate_kbps),
        "-bufsize".into(),
        format!("{}k", profile.video_bitrate_kbps * 2),
        "-g".into(),
        profile.keyint.to_string(),
        "-pix_fmt".into(),
        "yuv420p".into(),
        "-c:a".into(),
        "aac".into(),
        "-b:a".into(),
        format!("{}k", profile.audio_bitrate_kbps),
        "-ar".into(),
        "44100".into(),
        "-progress".into(),
        raw_progress.display().to_string(),
        "-nostats".into(),
        "-f".into(),
        "flv".into(),
        profile.target_url.clone(),
    ]);

    args
}

/// Escape text for a drawtext filter argument.
fn escape_drawtext(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            ':' => out.push_str("\\:"),
            '%' => out.push_str("\\%"),
            _ => out.push(c),
        }
    }
    out
}

/// Why the child stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SceneEnd {
    /// Ran its allotted scene time and was rotated out.
    Rotated,
    /// Exited on its own (success or failure); caller sleeps and retries.
    Died,
    /// A termination signal arrived and was forwarded to the child; the
    /// runner must exit with `128 + signo`.
    Signalled(i32),
}

/// The termination signals the runner honours and forwards.
pub struct TermSignals {
    sigterm: tokio::signal::unix::Signal,
    sigint: tokio::signal::unix::Signal,
    sighup: tokio::signal::unix::Signal,
}

impl TermSignals {
    pub fn install() -> Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};
        Ok(Self {
            sigterm: signal(SignalKind::terminate()).context("installing SIGTERM handler")?,
            sigint: signal(SignalKind::interrupt()).context("installing SIGINT handler")?,
            sighup: signal(SignalKind::hangup()).context("installing SIGHUP handler")?,
        })
    }

    /// Wait for any of the handled signals.
    pub async fn recv(&mut self) -> Signal {
        tokio::select! {
            _ = self.sigterm.recv() => Signal::SIGTERM,
            _ = self.sigint.recv() => Signal::SIGINT,
            _ = self.sighup.recv() => Signal::SIGHUP,
        }
    }
}

/// Launch one scene and supervise it for at most the scene duration,
/// reacting to termination signals at any point.
pub async fn run_scene(
    profile: &EncoderProfile,
    scene: &SceneSource,
    raw_progress: &Path,
    signals: &mut TermSignals,
) -> Result<SceneEnd> {
    let args = build_args(profile, scene, raw_progress);
    info!("launching encoder for scene {scene:?}");

    let mut child = Command::new(&profile.ffmpeg)
        .args(&args)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("spawning {}", profile.ffmpeg))?;

    tokio::select! {
        status = child.wait() => {
            match status {
                Ok(status) => warn!("encoder child exited on its own: {status}"),
                Err(err) => warn!("encoder child wait failed: {err}"),
            }
            Ok(SceneEnd::Died)
        }
        _ = tokio::time::sleep(profile.scene_duration) => {
            stop_child(&mut child, Signal::SIGINT).await;
            Ok(SceneEnd::Rotated)
        }
        signal = signals.recv() => {
            info!("received {signal}; forwarding to encoder child");
            stop_child(&mut child, signal).await;
            Ok(SceneEnd::Signalled(signal as i32))
        }
    }
}

/// Signal the child and give it a bounded wait, escalating to SIGKILL.
pub async fn stop_child(child: &mut Child, signal: Signal) {
    if let Some(pid) = child.id() {
        if let Err(err) = kill(Pid::from_raw(pid as i32), signal) {
            warn!("could not signal encoder child: {err}");
        }
    }
    match tokio::time::timeout(CHILD_WAIT, child.wait()).await {
        Ok(Ok(status)) => info!("encoder child finished: {status}"),
        Ok(Err(err)) => warn!("encoder child wait failed: {err}"),
        Err(_) => {
            warn!(
                "encoder child ignored {signal} for {}s; killing",
                CHILD_WAIT.as_secs()
            );
            let _ = child.kill().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn profile(extra: &[(&str, &str)]) -> EncoderProfile {
        let mut values: BTreeMap<String, String> =
            [("YT_KEY".to_string(), "abcd-1234".to_string())]
                .into_iter()
                .collect();
        for (k, v) in extra {
            values.insert(k.to_string(), v.to_string());
        }
        EncoderProfile::from_values(&values).unwrap()
    }

    #[test]
    fn auto_scene_follows_the_mode() {
        let profile = profile(&[]);
        assert_eq!(
            resolve_scene(&profile, SCENE_AUTO, FallbackMode::Smpte),
            SceneSource::Synthetic(profile.synthetic_source(FallbackMode::Smpte))
        );
        assert_eq!(
            resolve_scene(&profile, SCENE_AUTO, FallbackMode::Life),
            SceneSource::Synthetic(profile.synthetic_source(FallbackMode::Life))
        );
    }

    #[test]
    fn existing_file_becomes_a_file_scene() {
        let dir = tempfile::tempdir().unwrap();
        let clip = dir.path().join("clip.mp4");
        std::fs::write(&clip, b"fake media").unwrap();

        let profile = profile(&[]);
        let entry = clip.display().to_string();
        assert_eq!(
            resolve_scene(&profile, &entry, FallbackMode::Life),
            SceneSource::File(clip)
        );

        // A path that does not exist is treated as a filter spec.
        assert_eq!(
            resolve_scene(&profile, "testsrc2=size=640x360", FallbackMode::Life),
            SceneSource::Synthetic("testsrc2=size=640x360".into())
        );
    }

    #[test]
    fn file_scene_loops_and_synthetic_uses_lavfi() {
        let profile = profile(&[]);
        let raw = Path::new("/run/vigil/slate-progress.raw");

        let file_args = build_args(
            &profile,
            &SceneSource::File(PathBuf::from("/srv/slate.mp4")),
            raw,
        );
        let joined = file_args.join(" ");
        assert!(joined.contains("-stream_loop -1 -i /srv/slate.mp4"));

        let synth_args = build_args(
            &profile,
            &SceneSource::Synthetic("smptehdbars=size=1280x720:rate=30".into()),
            raw,
        );
        let joined = synth_args.join(" ");
        assert!(joined.contains("-f lavfi -i smptehdbars=size=1280x720:rate=30"));
    }

    #[test]
    fn target_url_is_last_and_keeps_its_invariants() {
        let profile = profile(&[]);
        let args = build_args(
            &profile,
            &SceneSource::Synthetic("life=size=1280x720:rate=30".into()),
            Path::new("/tmp/raw"),
        );

        let url = args.last().unwrap();
        assert!(url.starts_with("rtmps://"));
        assert!(!url.contains(char::is_whitespace));
        assert_eq!(url.matches("backup=1/").count(), 1);
        assert_eq!(url.matches('?').count(), 1);
        // flv muxer right before the target.
        assert_eq!(args[args.len() - 2], "flv");
        assert_eq!(args[args.len() - 3], "-f");
    }

    #[test]
    fn overlay_text_is_escaped() {
        let profile = profile(&[("OVERLAY_TEXT", "LIVE: it's 100% on")]);
        let args = build_args(
            &profile,
            &SceneSource::Synthetic("life=size=1280x720:rate=30".into()),
            Path::new("/tmp/raw"),
        );
        let filter = args
            .iter()
            .position(|a| a == "-vf")
            .map(|i| args[i + 1].as_str())
            .unwrap();
        assert!(filter.contains("LIVE\\: it\\'s 100\\% on"));
    }

    #[test]
    fn progress_target_is_wired_in() {
        let profile = profile(&[]);
        let args = build_args(
            &profile,
            &SceneSource::Synthetic("life=size=1280x720:rate=30".into()),
            Path::new("/run/vigil/slate-progress.raw"),
        );
        let idx = args.iter().position(|a| a == "-progress").unwrap();
        assert_eq!(args[idx + 1], "/run/vigil/slate-progress.raw");
        assert!(args.contains(&"-nostats".to_string()));
    }
}
