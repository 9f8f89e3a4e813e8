//! Layered configuration: built-in defaults, then an optional TOML file,
//! then environment variables. Precedence: env `NODCAM_CONFIG` path >
//! `config/nodcam.toml` > defaults; individual keys override via
//! `NODCAM_<SECTION>__<KEY>` (e.g. `NODCAM_CAMERA__HOST`).

use crate::analysis::AnalysisConfig;
use crate::error::CoreResult;
use crate::gesture::GestureConfig;
use crate::mic::MicConfig;
use crate::reasoner::ReasonerMode;
use crate::retry::RetryConfig;
use crate::wake::WakeConfig;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Which microphone a voice session records from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MicSource {
    /// The camera's own microphone, over the digest-authenticated endpoint.
    Camera,
    /// The local default input device.
    Local,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct NodcamConfig {
    pub camera: CameraSettings,
    pub reasoner: ReasonerSettings,
    pub recognizer: RecognizerSettings,
    pub mic: MicSettings,
    pub gesture: GestureConfig,
    pub analysis: AnalysisSettings,
    pub wake: WakeSettings,
}

impl NodcamConfig {
    /// Load from file and environment. Precedence: env `NODCAM_CONFIG` path >
    /// `config/nodcam` > defaults.
    pub fn load() -> CoreResult<Self> {
        let config_path =
            std::env::var("NODCAM_CONFIG").unwrap_or_else(|_| "config/nodcam".to_string());
        let builder = config::Config::builder();

        let path = Path::new(&config_path);
        let builder = if path.exists() || Path::new(&format!("{config_path}.toml")).exists() {
            builder.add_source(config::File::with_name(&config_path))
        } else {
            builder
        };

        let built = builder
            .add_source(config::Environment::with_prefix("NODCAM").separator("__"))
            .build()?;
        Ok(built.try_deserialize()?)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CameraSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// RTSP stream for frame/audio extraction. Empty means derive the
    /// device's main-stream URL from host and credentials.
    pub stream_url: String,
    /// ONVIF PTZ service path on the device.
    pub onvif_path: String,
    pub profile_token: String,
    /// Channel identifier on the audio endpoints.
    pub audio_channel: u32,
    /// Extractor binary.
    pub ffmpeg: String,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            host: "192.168.0.42".to_string(),
            port: 80,
            username: "admin".to_string(),
            password: String::new(),
            stream_url: String::new(),
            onvif_path: "/onvif/ptz_service".to_string(),
            profile_token: "Profile_1".to_string(),
            audio_channel: 1,
            ffmpeg: "ffmpeg".to_string(),
        }
    }
}

impl CameraSettings {
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    pub fn onvif_endpoint(&self) -> String {
        format!("{}{}", self.base_url(), self.onvif_path)
    }

    pub fn effective_stream_url(&self) -> String {
        if !self.stream_url.is_empty() {
            return self.stream_url.clone();
        }
        format!(
            "rtsp://{}:{}@{}:554/cam/realmonitor?channel=1&subtype=0",
            self.username, self.password, self.host
        )
    }

    pub fn audio_fetch_path(&self) -> String {
        format!(
            "/cgi-bin/audio.cgi?action=getAudio&httptype=singlepart&channel={}",
            self.audio_channel
        )
    }

    pub fn audio_push_path(&self) -> String {
        format!(
            "/cgi-bin/audio.cgi?action=postAudio&httptype=singlepart&channel={}",
            self.audio_channel
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReasonerSettings {
    /// "mock" answers locally without an API key; "live" calls the API.
    pub mode: String,
    pub base_url: String,
    /// Empty means fall back to `OPENROUTER_API_KEY` / `OPENAI_API_KEY`.
    pub api_key: String,
    pub model: String,
}

impl Default for ReasonerSettings {
    fn default() -> Self {
        Self {
            mode: "mock".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            model: "gpt-4o-mini".to_string(),
        }
    }
}

impl ReasonerSettings {
    pub fn mode(&self) -> ReasonerMode {
        match self.mode.as_str() {
            "live" => ReasonerMode::Live,
            _ => ReasonerMode::Mock,
        }
    }

    pub fn resolve_api_key(&self) -> Option<String> {
        if !self.api_key.trim().is_empty() {
            return Some(self.api_key.trim().to_string());
        }
        std::env::var("OPENROUTER_API_KEY")
            .or_else(|_| std::env::var("OPENAI_API_KEY"))
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecognizerSettings {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    /// Transcript string the recognizer emits when it heard nothing.
    pub no_speech_sentinel: String,
}

impl Default for RecognizerSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            model: "whisper-1".to_string(),
            no_speech_sentinel: "no speech detected".to_string(),
        }
    }
}

impl RecognizerSettings {
    pub fn resolve_api_key(&self) -> Option<String> {
        if !self.api_key.trim().is_empty() {
            return Some(self.api_key.trim().to_string());
        }
        std::env::var("OPENROUTER_API_KEY")
            .or_else(|_| std::env::var("OPENAI_API_KEY"))
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MicSettings {
    /// "local" or "camera".
    pub source: String,
    pub record_max_secs: u64,
    pub silence_gap_ms: u64,
    pub silence_threshold: f32,
}

impl Default for MicSettings {
    fn default() -> Self {
        Self {
            source: "local".to_string(),
            record_max_secs: 6,
            silence_gap_ms: 800,
            silence_threshold: 0.015,
        }
    }
}

impl MicSettings {
    pub fn source(&self) -> MicSource {
        match self.source.as_str() {
            "camera" => MicSource::Camera,
            _ => MicSource::Local,
        }
    }

    pub fn record_max(&self) -> Duration {
        Duration::from_secs(self.record_max_secs.max(1))
    }

    pub fn to_mic_config(&self) -> MicConfig {
        MicConfig {
            max_duration: self.record_max(),
            silence_gap: Duration::from_millis(self.silence_gap_ms),
            silence_threshold: self.silence_threshold,
            ..MicConfig::default()
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnalysisSettings {
    /// Start the polling loop at launch.
    pub enabled: bool,
    pub interval_secs: u64,
    pub failure_cooldown_secs: u64,
    pub system_prompt: String,
    pub prompt: String,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        let d = AnalysisConfig::default();
        Self {
            enabled: true,
            interval_secs: d.interval.as_secs(),
            failure_cooldown_secs: d.failure_cooldown.as_secs(),
            system_prompt: d.system_prompt,
            prompt: d.prompt,
        }
    }
}

impl AnalysisSettings {
    pub fn to_config(&self) -> AnalysisConfig {
        AnalysisConfig {
            interval: Duration::from_secs(self.interval_secs.max(1)),
            failure_cooldown: Duration::from_secs(self.failure_cooldown_secs.max(1)),
            system_prompt: self.system_prompt.clone(),
            prompt: self.prompt.clone(),
            ..AnalysisConfig::default()
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WakeSettings {
    pub phrase: String,
    pub variants: Vec<String>,
    pub listen_window_secs: u64,
    pub idle_delay_ms: u64,
}

impl Default for WakeSettings {
    fn default() -> Self {
        let d = WakeConfig::default();
        Self {
            phrase: d.phrase,
            variants: d.variants,
            listen_window_secs: d.listen_window.as_secs(),
            idle_delay_ms: d.idle_delay.as_millis() as u64,
        }
    }
}

impl WakeSettings {
    pub fn to_config(&self) -> WakeConfig {
        let variants = if self.variants.is_empty() {
            vec![self.phrase.clone()]
        } else {
            self.variants.clone()
        };
        WakeConfig {
            phrase: self.phrase.clone(),
            variants,
            listen_window: Duration::from_secs(self.listen_window_secs.max(1)),
            idle_delay: Duration::from_millis(self.idle_delay_ms),
            listen_retry: RetryConfig {
                max_attempts: 2,
                backoff: Duration::from_millis(500),
                timeout: Duration::from_secs(self.listen_window_secs.max(1) * 2 + 5),
            },
        }
    }
}
