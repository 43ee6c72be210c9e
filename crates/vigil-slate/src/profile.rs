//! Encoder profile: everything the slate needs to go on air.
//!
//! The profile lives in a shell-style env file so operators can edit it with
//! whatever is at hand on the box. `YT_KEY` is the only required entry; the
//! target URL is always derived, never taken verbatim, so the slate can only
//! ever transmit to the backup ingest.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use vigil_common::envfile;
use vigil_common::ingest::{self, FallbackMode};

/// Default backup ingest endpoint.
pub const DEFAULT_BACKUP_BASE: &str = "rtmps://b.rtmps.youtube.com/live2";

/// Scene entry that expands to the mode-selected synthetic source.
pub const SCENE_AUTO: &str = "auto";

#[derive(Debug, Clone)]
pub struct EncoderProfile {
    pub stream_key: String,
    pub target_url: String,

    /// Ordered scene rotation; never empty.
    pub scenes: Vec<String>,
    pub scene_duration: Duration,

    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub video_bitrate_kbps: u32,
    pub audio_bitrate_kbps: u32,
    pub keyint: u32,
    pub preset: String,
    pub overlay_text: Option<String>,

    /// Pause before the first launch.
    pub start_delay: Duration,
    /// Pause between a dead child and the next scene.
    pub retry_delay: Duration,

    pub default_mode: FallbackMode,
    pub mode_file: PathBuf,
    pub progress_file: PathBuf,
    pub ffmpeg: String,
}

impl EncoderProfile {
    pub fn from_env_file(path: &Path) -> Result<Self> {
        let values = envfile::load_env_file(path)
            .with_context(|| format!("loading encoder profile {}", path.display()))?;
        Self::from_values(&values)
    }

    pub fn from_values(values: &std::collections::BTreeMap<String, String>) -> Result<Self> {
        let raw_key = values
            .get("YT_KEY")
            .map(String::as_str)
            .unwrap_or_default();
        let stream_key =
            ingest::sanitize_stream_key(raw_key).context("YT_KEY failed sanitization")?;

        let base = values
            .get("YT_BACKUP_BASE")
            .map(String::as_str)
            .unwrap_or(DEFAULT_BACKUP_BASE);
        let target_url = ingest::normalize_backup_url(base, &stream_key)
            .context("could not assemble backup ingest URL")?;

        let scenes: Vec<String> = values
            .get("SCENES")
            .map(String::as_str)
            .unwrap_or(SCENE_AUTO)
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        if scenes.is_empty() {
            bail!("SCENES resolves to an empty rotation");
        }

        let default_mode = match values.get("DEFAULT_MODE") {
            Some(raw) => FallbackMode::parse(raw)
                .with_context(|| format!("DEFAULT_MODE {raw:?} is not a known mode"))?,
            None => FallbackMode::Life,
        };

        Ok(Self {
            stream_key,
            target_url,
            scenes,
            scene_duration: Duration::from_secs(positive(values, "SCENE_SECONDS", 300)?),
            width: positive(values, "WIDTH", 1280)? as u32,
            height: positive(values, "HEIGHT", 720)? as u32,
            fps: positive(values, "FPS", 30)? as u32,
            video_bitrate_kbps: positive(values, "VIDEO_BITRATE_KBPS", 2500)? as u32,
            audio_bitrate_kbps: positive(values, "AUDIO_BITRATE_KBPS", 128)? as u32,
            keyint: positive(values, "KEYINT", 60)? as u32,
            preset: values
                .get("PRESET")
                .cloned()
                .unwrap_or_else(|| "veryfast".into()),
            overlay_text: values.get("OVERLAY_TEXT").filter(|t| !t.is_empty()).cloned(),
            start_delay: Duration::from_secs(non_negative(values, "DELAY_SECONDS", 0)?),
            retry_delay: Duration::from_secs(positive(values, "RETRY_DELAY_SECONDS", 10)?),
            default_mode,
            mode_file: values
                .get("MODE_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("/run/vigil/fallback-mode")),
            progress_file: values
                .get("PROGRESS_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("/run/vigil/slate-progress")),
            ffmpeg: values
                .get("FFMPEG")
                .filter(|p| !p.is_empty())
                .cloned()
                .unwrap_or_else(|| "ffmpeg".into()),
        })
    }

    /// Synthetic source for a mode at this profile's geometry.
    pub fn synthetic_source(&self, mode: FallbackMode) -> String {
        match mode {
            FallbackMode::Life => format!(
                "life=size={}x{}:rate={}:mold=10:life_color=#0cb04a:death_color=#1d1d1d",
                self.width, self.height, self.fps
            ),
            FallbackMode::Smpte => format!(
                "smptehdbars=size={}x{}:rate={}",
                self.width, self.height, self.fps
            ),
        }
    }
}

fn parse_u64(values: &std::collections::BTreeMap<String, String>, key: &str, default: u64) -> Result<u64> {
    match values.get(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .with_context(|| format!("{key}={raw:?} is not a number")),
    }
}

fn positive(values: &std::collections::BTreeMap<String, String>, key: &str, default: u64) -> Result<u64> {
    let value = parse_u64(values, key, default)?;
    if value == 0 {
        bail!("{key} must be positive");
    }
    Ok(value)
}

fn non_negative(
    values: &std::collections::BTreeMap<String, String>,
    key: &str,
    default: u64,
) -> Result<u64> {
    parse_u64(values, key, default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn values(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn minimal_profile_gets_documented_defaults() {
        let profile = EncoderProfile::from_values(&values(&[("YT_KEY", "abcd-1234")])).unwrap();
        assert_eq!(
            profile.target_url,
            "rtmps://b.rtmps.youtube.com/live2?backup=1/abcd-1234"
        );
        assert_eq!(profile.scenes, vec![SCENE_AUTO.to_string()]);
        assert_eq!(profile.scene_duration, Duration::from_secs(300));
        assert_eq!(profile.retry_delay, Duration::from_secs(10));
        assert_eq!((profile.width, profile.height, profile.fps), (1280, 720, 30));
        assert_eq!(profile.default_mode, FallbackMode::Life);
    }

    #[test]
    fn pasted_url_fragment_in_key_is_cleaned_up() {
        let profile =
            EncoderProfile::from_values(&values(&[("YT_KEY", " backup=1/abcd-1234 ")])).unwrap();
        assert_eq!(profile.stream_key, "abcd-1234");
        assert_eq!(profile.target_url.matches("backup=1/").count(), 1);
    }

    #[test]
    fn missing_or_unsalvageable_key_is_fatal() {
        assert!(EncoderProfile::from_values(&values(&[])).is_err());
        assert!(EncoderProfile::from_values(&values(&[("YT_KEY", "a?b")])).is_err());
    }

    #[test]
    fn primary_ingest_base_is_refused() {
        let result = EncoderProfile::from_values(&values(&[
            ("YT_KEY", "abcd"),
            ("YT_BACKUP_BASE", "rtmp://a.rtmp.youtube.com/live2"),
        ]));
        assert!(result.is_err());
    }

    #[test]
    fn scene_list_is_split_and_trimmed() {
        let profile = EncoderProfile::from_values(&values(&[
            ("YT_KEY", "abcd"),
            ("SCENES", "/srv/slates/intro.mp4, auto ,"),
        ]))
        .unwrap();
        assert_eq!(profile.scenes, vec!["/srv/slates/intro.mp4", "auto"]);
    }

    #[test]
    fn empty_scene_rotation_is_fatal() {
        let result =
            EncoderProfile::from_values(&values(&[("YT_KEY", "abcd"), ("SCENES", " , ,")]));
        assert!(result.is_err());
    }

    #[test]
    fn synthetic_sources_follow_geometry() {
        let profile = EncoderProfile::from_values(&values(&[
            ("YT_KEY", "abcd"),
            ("WIDTH", "1920"),
            ("HEIGHT", "1080"),
            ("FPS", "25"),
        ]))
        .unwrap();
        assert!(profile
            .synthetic_source(FallbackMode::Smpte)
            .starts_with("smptehdbars=size=1920x1080:rate=25"));
        assert!(profile
            .synthetic_source(FallbackMode::Life)
            .contains("size=1920x1080:rate=25"));
    }

    #[test]
    fn invalid_numbers_are_fatal_not_defaulted() {
        // Unlike the monitor, the slate refuses to start on a bad profile:
        // the service manager surfaces the failure to the operator.
        let result =
            EncoderProfile::from_values(&values(&[("YT_KEY", "abcd"), ("FPS", "fast")]));
        assert!(result.is_err());

        let result = EncoderProfile::from_values(&values(&[("YT_KEY", "abcd"), ("FPS", "0")]));
        assert!(result.is_err());
    }
}
