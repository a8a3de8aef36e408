use crate::config::AnnouncerConfig;
use crate::error::PlaybackError;
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::SystemTime;
use tokio::process::Command;
use tracing::{debug, info};

/// One queued audio cue
#[derive(Debug, Clone, PartialEq)]
pub struct AudioCue {
    pub identifier: String,
    pub asset: PathBuf,
    pub enqueued_at: SystemTime,
}

/// Maps feedback identifiers to audio assets on disk
#[derive(Debug, Clone)]
pub struct CueMap {
    dir: PathBuf,
    extension: String,
}

impl CueMap {
    pub fn new(dir: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            extension: extension.into(),
        }
    }

    pub fn from_config(config: &AnnouncerConfig) -> Self {
        Self::new(&config.cue_dir, &config.cue_extension)
    }

    /// `<dir>/<identifier>.<extension>`, with path separators neutralised
    pub fn resolve(&self, identifier: &str) -> PathBuf {
        let file_stem: String = identifier
            .chars()
            .map(|c| if c == '/' || c == '\\' { '_' } else { c })
            .collect();
        self.dir.join(format!("{}.{}", file_stem, self.extension))
    }

    pub fn cue(&self, identifier: &str) -> AudioCue {
        AudioCue {
            identifier: identifier.to_string(),
            asset: self.resolve(identifier),
            enqueued_at: SystemTime::now(),
        }
    }
}

/// Plays one cue to completion
#[async_trait]
pub trait CuePlayer: Send + Sync {
    async fn play(&self, cue: &AudioCue) -> Result<(), PlaybackError>;
}

/// Writes cues to the log instead of playing audio
#[derive(Debug, Default)]
pub struct LogCuePlayer;

#[async_trait]
impl CuePlayer for LogCuePlayer {
    async fn play(&self, cue: &AudioCue) -> Result<(), PlaybackError> {
        info!("Feedback: {}", cue.identifier);
        Ok(())
    }
}

/// Runs an external player as `<program> [args..] <asset>` and waits for it
#[derive(Debug, Clone)]
pub struct CommandCuePlayer {
    program: String,
    args: Vec<String>,
}

impl CommandCuePlayer {
    /// Parse a whitespace-separated command line such as `"mpv --no-video"`
    pub fn from_command_line(command: &str) -> Option<Self> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self {
            program,
            args: parts.collect(),
        })
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }
}

#[async_trait]
impl CuePlayer for CommandCuePlayer {
    async fn play(&self, cue: &AudioCue) -> Result<(), PlaybackError> {
        if !tokio::fs::try_exists(&cue.asset).await.unwrap_or(false) {
            return Err(PlaybackError::AssetMissing {
                path: cue.asset.display().to_string(),
            });
        }

        debug!("Playing {} with {}", cue.asset.display(), self.program);
        let status = Command::new(&self.program)
            .args(&self.args)
            .arg(&cue.asset)
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|e| PlaybackError::Player {
                details: format!("{}: {}", self.program, e),
            })?;

        if status.success() {
            Ok(())
        } else {
            Err(PlaybackError::Player {
                details: format!("{} exited with {}", self.program, status),
            })
        }
    }
}
