//! JSON configuration persistence.
//!
//! Settings live at the platform-appropriate per-user location:
//! - Windows:  `%APPDATA%\MacWinBridge\config.json`
//! - macOS:    `~/Library/Application Support/MacWinBridge/config.json`
//! - Linux:    `$XDG_CONFIG_HOME/macwinbridge/config.json` (or `~/.config`)
//!
//! Every field carries a serde default so a config written by an older
//! build (or no file at all) still loads. The session consumes one
//! immutable snapshot at start; nothing re-reads the file mid-session.

use std::path::PathBuf;

use bridge_core::kvm::focus::EdgeSide;
use bridge_core::protocol::handshake::{AudioRoute, DisplayMode, VideoCodec};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

// ── Config schema ─────────────────────────────────────────────────────────────

/// Top-level settings stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub connection: ConnectionSettings,
    #[serde(default)]
    pub video: VideoSettings,
    #[serde(default)]
    pub audio: AudioSettings,
    #[serde(default)]
    pub kvm: KvmSettings,
    /// `tracing` log level: `"error"`, `"warn"`, `"info"`, `"debug"`, `"trace"`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// How to reach the companion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectionSettings {
    /// Static companion address. When absent, UDP discovery resolves it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub companion_host: Option<String>,
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,
    #[serde(default = "default_connect_retry_ms")]
    pub connect_retry_ms: u64,
    #[serde(default = "default_discovery_timeout_ms")]
    pub discovery_timeout_ms: u64,
}

/// Video pipeline tunables and the last selected display mode.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VideoSettings {
    #[serde(default = "default_target_fps")]
    pub target_fps: u32,
    #[serde(default = "default_codec")]
    pub codec: VideoCodec,
    #[serde(default)]
    pub display_mode: DisplayMode,
    #[serde(default)]
    pub monitor_index: u32,
}

/// Audio format and routing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AudioSettings {
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "default_channels")]
    pub channels: u16,
    #[serde(default = "default_bits_per_sample")]
    pub bits_per_sample: u16,
    #[serde(default = "default_buffer_ms")]
    pub buffer_ms: u32,
    #[serde(default)]
    pub route: AudioRoute,
}

/// Smart KVM edge parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KvmSettings {
    #[serde(default = "default_edge")]
    pub edge: EdgeSide,
    #[serde(default = "default_dead_zone")]
    pub dead_zone_px: i32,
    #[serde(default)]
    pub edge_offset: f32,
    /// Virtual-key code of the manual toggle (with Ctrl+Alt held).
    /// Defaults to 'K'.
    #[serde(default = "default_hotkey_vk")]
    pub hotkey_vk: u16,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

fn default_log_level() -> String {
    "info".to_string()
}
fn default_connect_attempts() -> u32 {
    3
}
fn default_connect_retry_ms() -> u64 {
    1000
}
fn default_discovery_timeout_ms() -> u64 {
    500
}
fn default_target_fps() -> u32 {
    30
}
fn default_codec() -> VideoCodec {
    VideoCodec::RawBgra
}
fn default_sample_rate() -> u32 {
    48_000
}
fn default_channels() -> u16 {
    2
}
fn default_bits_per_sample() -> u16 {
    16
}
fn default_buffer_ms() -> u32 {
    50
}
fn default_edge() -> EdgeSide {
    EdgeSide::Right
}
fn default_dead_zone() -> i32 {
    2
}
fn default_hotkey_vk() -> u16 {
    0x4B // 'K'
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            companion_host: None,
            connect_attempts: default_connect_attempts(),
            connect_retry_ms: default_connect_retry_ms(),
            discovery_timeout_ms: default_discovery_timeout_ms(),
        }
    }
}

impl Default for VideoSettings {
    fn default() -> Self {
        Self {
            target_fps: default_target_fps(),
            codec: default_codec(),
            display_mode: DisplayMode::default(),
            monitor_index: 0,
        }
    }
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            channels: default_channels(),
            bits_per_sample: default_bits_per_sample(),
            buffer_ms: default_buffer_ms(),
            route: AudioRoute::default(),
        }
    }
}

impl Default for KvmSettings {
    fn default() -> Self {
        Self {
            edge: default_edge(),
            dead_zone_px: default_dead_zone(),
            edge_offset: 0.0,
            hotkey_vk: default_hotkey_vk(),
        }
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Resolves the full path to the config file.
///
/// # Errors
///
/// [`ConfigError::NoPlatformConfigDir`] when the platform base directory
/// cannot be determined from the environment.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    platform_config_dir()
        .map(|dir| dir.join("config.json"))
        .ok_or(ConfigError::NoPlatformConfigDir)
}

/// Loads settings, falling back to defaults when no file exists yet.
///
/// # Errors
///
/// [`ConfigError::Io`] for file-system errors other than "not found", and
/// [`ConfigError::Parse`] for malformed JSON.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    let path = config_file_path()?;
    load_config_from(&path)
}

/// [`load_config`] against an explicit path (tests use a temp dir).
pub fn load_config_from(path: &std::path::Path) -> Result<AppConfig, ConfigError> {
    match std::fs::read(path) {
        Ok(content) => Ok(serde_json::from_slice(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AppConfig::default()),
        Err(e) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Persists settings, creating the directory on first save.
///
/// # Errors
///
/// [`ConfigError::Io`] for file-system failures.
pub fn save_config(config: &AppConfig) -> Result<(), ConfigError> {
    let path = config_file_path()?;
    save_config_to(config, &path)
}

/// [`save_config`] against an explicit path.
pub fn save_config_to(config: &AppConfig, path: &std::path::Path) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }
    let content = serde_json::to_vec_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Platform per-user config directory including the app folder.
fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("MacWinBridge"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("MacWinBridge")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("macwinbridge"))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.video.target_fps, 30);
        assert_eq!(cfg.video.codec, VideoCodec::RawBgra);
        assert_eq!(cfg.audio.sample_rate, 48_000);
        assert_eq!(cfg.kvm.edge, EdgeSide::Right);
        assert_eq!(cfg.kvm.dead_zone_px, 2);
        assert_eq!(cfg.kvm.hotkey_vk, 0x4B);
        assert_eq!(cfg.log_level, "info");
    }

    #[test]
    fn test_json_round_trip() {
        let mut cfg = AppConfig::default();
        cfg.connection.companion_host = Some("192.168.7.2".to_string());
        cfg.video.target_fps = 60;
        cfg.kvm.edge = EdgeSide::Left;

        let json = serde_json::to_vec_pretty(&cfg).unwrap();
        let restored: AppConfig = serde_json::from_slice(&json).unwrap();
        assert_eq!(restored, cfg);
    }

    #[test]
    fn test_empty_document_uses_defaults() {
        let cfg: AppConfig = serde_json::from_str("{}").expect("parse");
        assert_eq!(cfg, AppConfig::default());
    }

    #[test]
    fn test_partial_document_overrides_only_named_fields() {
        let cfg: AppConfig =
            serde_json::from_str(r#"{"video": {"target_fps": 75}}"#).expect("parse");
        assert_eq!(cfg.video.target_fps, 75);
        assert_eq!(cfg.video.codec, VideoCodec::RawBgra);
        assert_eq!(cfg.audio.sample_rate, 48_000);
    }

    #[test]
    fn test_absent_companion_host_is_omitted_from_json() {
        let json = serde_json::to_string(&AppConfig::default()).unwrap();
        assert!(!json.contains("companion_host"));
    }

    #[test]
    fn test_load_from_missing_file_yields_defaults() {
        let path = std::env::temp_dir().join("macwinbridge-test-missing/config.json");
        let cfg = load_config_from(&path).expect("defaults");
        assert_eq!(cfg, AppConfig::default());
    }

    #[test]
    fn test_save_and_load_round_trip_via_temp_dir() {
        let dir = std::env::temp_dir().join(format!(
            "macwinbridge-test-{}",
            uuid::Uuid::new_v4()
        ));
        let path = dir.join("config.json");

        let mut cfg = AppConfig::default();
        cfg.audio.buffer_ms = 80;
        cfg.log_level = "debug".to_string();

        save_config_to(&cfg, &path).expect("save");
        let loaded = load_config_from(&path).expect("load");
        assert_eq!(loaded, cfg);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_malformed_json_is_a_parse_error() {
        let dir = std::env::temp_dir().join(format!(
            "macwinbridge-test-{}",
            uuid::Uuid::new_v4()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.json");
        std::fs::write(&path, b"{not json").unwrap();

        assert!(matches!(
            load_config_from(&path),
            Err(ConfigError::Parse(_))
        ));
        std::fs::remove_dir_all(&dir).ok();
    }
}
