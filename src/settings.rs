use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::audio::CaptureConfig;
use crate::streaming::stream_endpoint;
use crate::transport::TransportMode;

const SETTINGS_DIR_NAME: &str = "voice-chat-client";
const SETTINGS_FILE_NAME: &str = "settings.json";

pub const ENV_SERVER_URL: &str = "VOICE_CHAT_SERVER_URL";
pub const ENV_TRANSPORT: &str = "VOICE_CHAT_TRANSPORT";

/// Errors reading or writing the settings file
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Could not determine config directory")]
    NoConfigDir,
    #[error("Failed to serialize settings: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("Settings I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> SettingsError + '_ {
    move |source| SettingsError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// What happens to queued assistant audio when the chat ends
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum EndPlaybackPolicy {
    /// Cancel the current batch and drop everything queued
    #[default]
    Discard,
    /// Let already-queued audio play out; nothing new is accepted
    Finish,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    /// HTTP base URL of the agent server.
    pub server_url: String,

    /// Path of the streaming WebSocket endpoint on the same server.
    pub stream_path: String,

    pub transport: TransportMode,

    /// Capture rate sent to the agent (Hz).
    pub sample_rate: u32,

    /// Samples per transmitted frame.
    pub frame_samples: usize,

    /// Start a new recording as soon as the assistant finishes speaking.
    pub auto_restart_after_playback: bool,

    pub end_playback_policy: EndPlaybackPolicy,

    /// Fetch the server-side history when the session starts.
    pub load_history_on_start: bool,

    /// Captured frames buffered for the session loop before new ones are dropped.
    pub frame_queue_capacity: usize,

    /// Sample rate assumed for agent audio that arrives as headerless PCM16.
    pub raw_audio_sample_rate: u32,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:8000".to_string(),
            stream_path: "/ws/audio".to_string(),
            transport: TransportMode::StreamingDuplex,
            sample_rate: 16000,
            frame_samples: 4096,
            auto_restart_after_playback: false,
            end_playback_policy: EndPlaybackPolicy::Discard,
            load_history_on_start: true,
            frame_queue_capacity: 32,
            raw_audio_sample_rate: 24000,
        }
    }
}

impl ClientSettings {
    /// WebSocket URL for the streaming transport
    pub fn stream_endpoint(&self) -> String {
        stream_endpoint(&self.server_url, &self.stream_path)
    }

    pub fn capture_config(&self) -> CaptureConfig {
        CaptureConfig {
            sample_rate: self.sample_rate,
            frame_samples: self.frame_samples,
        }
    }

    /// Apply environment overrides. `lookup` returns the value of a variable.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_SERVER_URL).filter(|v| !v.trim().is_empty()) {
            self.server_url = url.trim().to_string();
        }
        if let Some(raw) = lookup(ENV_TRANSPORT) {
            match TransportMode::parse(&raw) {
                Some(mode) => self.transport = mode,
                None => log::warn!("Settings: ignoring unknown {}={:?}", ENV_TRANSPORT, raw),
            }
        }
    }

    /// Clamp values that would make the session unusable
    pub fn sanitize(&mut self) {
        if self.sample_rate == 0 {
            self.sample_rate = 16000;
        }
        if self.frame_samples == 0 {
            self.frame_samples = 4096;
        }
        self.frame_queue_capacity = self.frame_queue_capacity.max(1);
        if self.raw_audio_sample_rate == 0 {
            self.raw_audio_sample_rate = 24000;
        }
    }
}

pub fn settings_path() -> Result<PathBuf, SettingsError> {
    let dir = dirs::config_dir().ok_or(SettingsError::NoConfigDir)?;
    Ok(dir.join(SETTINGS_DIR_NAME).join(SETTINGS_FILE_NAME))
}

pub fn load_settings() -> ClientSettings {
    match settings_path() {
        Ok(path) => load_settings_from(&path),
        Err(e) => {
            log::warn!("Settings: {}", e);
            ClientSettings::default()
        }
    }
}

pub fn load_settings_from(path: &Path) -> ClientSettings {
    let mut settings = match std::fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str::<ClientSettings>(&contents) {
            Ok(settings) => settings,
            Err(e) => {
                log::warn!("Settings: failed to parse {:?}: {}", path, e);
                ClientSettings::default()
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => ClientSettings::default(),
        Err(e) => {
            log::warn!("Settings: failed to read {:?}: {}", path, e);
            ClientSettings::default()
        }
    };
    settings.sanitize();
    settings
}

pub fn save_settings(settings: &ClientSettings) -> Result<(), SettingsError> {
    save_settings_to(&settings_path()?, settings)
}

pub fn save_settings_to(path: &Path, settings: &ClientSettings) -> Result<(), SettingsError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(io_error(parent))?;
    }

    let contents = serde_json::to_string_pretty(settings)?;

    // Write to a temp file in the same directory, then rename over the target.
    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, &contents).map_err(io_error(&tmp_path))?;

    // On Windows, rename fails if the destination exists.
    if cfg!(windows) && path.exists() {
        if let Err(e) = std::fs::remove_file(path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                return Err(io_error(path)(e));
            }
        }
    }

    std::fs::rename(&tmp_path, path).map_err(io_error(path))?;
    Ok(())
}
