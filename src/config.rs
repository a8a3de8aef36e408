use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Lowest output frame rate the analysis service is fed at
pub const MIN_FPS: u32 = 4;
/// Highest output frame rate the analysis service is fed at
pub const MAX_FPS: u32 = 30;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct FormcoachConfig {
    pub server: ServerConfig,
    pub capture: CaptureConfig,
    pub session: SessionTimingConfig,
    pub announcer: AnnouncerConfig,
    pub replay: ReplayConfig,
    pub report: ReportConfig,
    pub system: SystemConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    /// WebSocket endpoint of the analysis service
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Seconds allowed for the TCP/WebSocket connect
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Seconds allowed between sending init and receiving init_success
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_secs: u64,

    /// Seconds to wait for `stopped` after sending stop
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CaptureConfig {
    /// Camera device index (e.g., 0 for /dev/video0)
    #[serde(default = "default_device_index")]
    pub device_index: u32,

    /// Width every sampled frame is scaled to
    #[serde(default = "default_width")]
    pub width: u32,

    /// Height every sampled frame is scaled to
    #[serde(default = "default_height")]
    pub height: u32,

    /// JPEG quality (1-100)
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,

    /// Output frame rate for live capture
    #[serde(default = "default_live_fps")]
    pub live_fps: u32,

    /// Output frame rate for file replay
    #[serde(default = "default_file_fps")]
    pub file_fps: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SessionTimingConfig {
    /// Warmup countdown length; 0 skips warmup
    #[serde(default = "default_warmup_seconds")]
    pub warmup_seconds: u32,

    /// Delay between reaching the target and sending stop
    #[serde(default = "default_stop_delay_ms")]
    pub stop_delay_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AnnouncerConfig {
    /// Directory holding one audio asset per feedback identifier
    #[serde(default = "default_cue_dir")]
    pub cue_dir: String,

    /// File extension of cue assets
    #[serde(default = "default_cue_extension")]
    pub cue_extension: String,

    /// External player invoked as `<command> <cue path>`; cues are only logged when unset
    pub player_command: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ReplayConfig {
    /// Playback rate of the per-repetition replay cursor
    #[serde(default = "default_playback_fps")]
    pub playback_fps: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ReportConfig {
    /// Write a JSON summary after each session
    #[serde(default = "default_report_enabled")]
    pub enabled: bool,

    /// Directory for session summaries
    #[serde(default = "default_report_path")]
    pub path: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SystemConfig {
    /// Event bus capacity
    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,
}

impl ServerConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }
}

impl FormcoachConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("formcoach.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            .set_default("server.endpoint", default_endpoint())?
            .set_default("server.connect_timeout_secs", default_connect_timeout())?
            .set_default("server.handshake_timeout_secs", default_handshake_timeout())?
            .set_default("server.stop_timeout_secs", default_stop_timeout())?
            .set_default("capture.device_index", default_device_index())?
            .set_default("capture.width", default_width())?
            .set_default("capture.height", default_height())?
            .set_default("capture.jpeg_quality", default_jpeg_quality() as u32)?
            .set_default("capture.live_fps", default_live_fps())?
            .set_default("capture.file_fps", default_file_fps())?
            .set_default("session.warmup_seconds", default_warmup_seconds())?
            .set_default("session.stop_delay_ms", default_stop_delay_ms())?
            .set_default("announcer.cue_dir", default_cue_dir())?
            .set_default("announcer.cue_extension", default_cue_extension())?
            .set_default("replay.playback_fps", default_playback_fps())?
            .set_default("report.enabled", default_report_enabled())?
            .set_default("report.path", default_report_path())?
            .set_default(
                "system.event_bus_capacity",
                default_event_bus_capacity() as i64,
            )?
            .add_source(File::with_name(&path_str).required(false))
            // FORMCOACH_SERVER__ENDPOINT=ws://... style overrides
            .add_source(Environment::with_prefix("FORMCOACH").separator("__"))
            .build()?;

        let config: FormcoachConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.server.endpoint.starts_with("ws://") || self.server.endpoint.starts_with("wss://"))
        {
            return Err(ConfigError::Message(format!(
                "Server endpoint must be a ws:// or wss:// URL, got {}",
                self.server.endpoint
            )));
        }

        if self.server.connect_timeout_secs == 0
            || self.server.handshake_timeout_secs == 0
            || self.server.stop_timeout_secs == 0
        {
            return Err(ConfigError::Message(
                "Server timeouts must be greater than 0".to_string(),
            ));
        }

        if self.capture.width == 0 || self.capture.height == 0 {
            return Err(ConfigError::Message(
                "Capture resolution must be greater than 0".to_string(),
            ));
        }

        if !(1..=100).contains(&self.capture.jpeg_quality) {
            return Err(ConfigError::Message(
                "JPEG quality must be between 1 and 100".to_string(),
            ));
        }

        for (name, fps) in [
            ("live_fps", self.capture.live_fps),
            ("file_fps", self.capture.file_fps),
        ] {
            if !(MIN_FPS..=MAX_FPS).contains(&fps) {
                return Err(ConfigError::Message(format!(
                    "capture.{} must be between {} and {}, got {}",
                    name, MIN_FPS, MAX_FPS, fps
                )));
            }
        }

        if self.replay.playback_fps == 0 {
            return Err(ConfigError::Message(
                "Replay playback_fps must be greater than 0".to_string(),
            ));
        }

        if self.system.event_bus_capacity == 0 {
            return Err(ConfigError::Message(
                "Event bus capacity must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for FormcoachConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                endpoint: default_endpoint(),
                connect_timeout_secs: default_connect_timeout(),
                handshake_timeout_secs: default_handshake_timeout(),
                stop_timeout_secs: default_stop_timeout(),
            },
            capture: CaptureConfig {
                device_index: default_device_index(),
                width: default_width(),
                height: default_height(),
                jpeg_quality: default_jpeg_quality(),
                live_fps: default_live_fps(),
                file_fps: default_file_fps(),
            },
            session: SessionTimingConfig {
                warmup_seconds: default_warmup_seconds(),
                stop_delay_ms: default_stop_delay_ms(),
            },
            announcer: AnnouncerConfig {
                cue_dir: default_cue_dir(),
                cue_extension: default_cue_extension(),
                player_command: None,
            },
            replay: ReplayConfig {
                playback_fps: default_playback_fps(),
            },
            report: ReportConfig {
                enabled: default_report_enabled(),
                path: default_report_path(),
            },
            system: SystemConfig {
                event_bus_capacity: default_event_bus_capacity(),
            },
        }
    }
}

// Default value functions
fn default_endpoint() -> String {
    "ws://127.0.0.1:5000/ws".to_string()
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_handshake_timeout() -> u64 {
    10
}
fn default_stop_timeout() -> u64 {
    5
}

fn default_device_index() -> u32 {
    0
}
fn default_width() -> u32 {
    640
}
fn default_height() -> u32 {
    480
}
fn default_jpeg_quality() -> u8 {
    70
}
fn default_live_fps() -> u32 {
    10
}
fn default_file_fps() -> u32 {
    30
}

fn default_warmup_seconds() -> u32 {
    5
}
fn default_stop_delay_ms() -> u64 {
    500
}

fn default_cue_dir() -> String {
    "./cues".to_string()
}
fn default_cue_extension() -> String {
    "mp3".to_string()
}

fn default_playback_fps() -> u32 {
    10
}

fn default_report_enabled() -> bool {
    true
}
fn default_report_path() -> String {
    "./sessions".to_string()
}

fn default_event_bus_capacity() -> usize {
    256
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = FormcoachConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.session.warmup_seconds, 5);
        assert_eq!(config.session.stop_delay_ms, 500);
    }

    #[test]
    fn test_load_from_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[server]\nendpoint = \"ws://10.0.0.2:9000/ws\"\n\n[capture]\nlive_fps = 15\n\n[announcer]\nplayer_command = \"aplay\""
        )
        .unwrap();

        let config = FormcoachConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.server.endpoint, "ws://10.0.0.2:9000/ws");
        assert_eq!(config.capture.live_fps, 15);
        assert_eq!(config.capture.file_fps, default_file_fps());
        assert_eq!(config.announcer.player_command.as_deref(), Some("aplay"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = FormcoachConfig::default();

        config.capture.live_fps = 60;
        assert!(config.validate().is_err());
        config.capture.live_fps = 10;

        config.server.endpoint = "http://localhost:5000".to_string();
        assert!(config.validate().is_err());
        config.server.endpoint = "wss://coach.example.com/ws".to_string();
        assert!(config.validate().is_ok());
        config.server.endpoint = default_endpoint();

        config.capture.jpeg_quality = 0;
        assert!(config.validate().is_err());
        config.capture.jpeg_quality = 70;

        assert!(config.validate().is_ok());
    }
}
