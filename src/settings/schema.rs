//! Settings schema definitions.
//!
//! All settings structs use `#[serde(default)]` so partial configuration
//! files work; missing fields are filled from the defaults below.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root settings structure, loaded from `~/.traq/settings.toml` with
/// environment variable interpolation support.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TraqSettings {
    /// Schema version for migrations
    pub version: u32,

    pub server: ServerSettings,
    pub data: DataSettings,
    pub bus: BusSettings,
    pub sampler: SamplerSettings,
    pub capture: CaptureSettings,
    pub audio: AudioSettings,
    pub synthesis: SynthesisSettings,
    pub analysis: AnalysisSettings,
}

impl Default for TraqSettings {
    fn default() -> Self {
        Self {
            version: 1,
            server: ServerSettings::default(),
            data: DataSettings::default(),
            bus: BusSettings::default(),
            sampler: SamplerSettings::default(),
            capture: CaptureSettings::default(),
            audio: AudioSettings::default(),
            synthesis: SynthesisSettings::default(),
            analysis: AnalysisSettings::default(),
        }
    }
}

/// HTTP server binding.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5000,
        }
    }
}

/// Data directory layout root.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataSettings {
    pub dir: PathBuf,
}

impl Default for DataSettings {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("data"),
        }
    }
}

/// Event bus delivery tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusSettings {
    /// Bound of each subscriber's outbound queue
    pub queue_capacity: usize,
    /// Milliseconds a congested subscriber may lag before disconnect
    pub congestion_window_ms: u64,
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            congestion_window_ms: 5000,
        }
    }
}

/// Foreground activity polling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerSettings {
    pub interval_ms: u64,
}

impl Default for SamplerSettings {
    fn default() -> Self {
        Self { interval_ms: 1000 }
    }
}

/// Screen capture pacing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    pub fps: u32,
    /// Milliseconds to wait for the capture loop to observe a stop
    pub stop_timeout_ms: u64,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            fps: 3,
            stop_timeout_ms: 1000,
        }
    }
}

/// Audio capture and transcription tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioSettings {
    pub sample_rate: u32,
    /// Seconds of audio batched per engine call
    pub chunk_secs: u64,
    /// RMS divisor for the normalized 0..1 level; lower is more sensitive
    pub level_sensitivity: f32,
    /// Minimum spacing between audio_level events
    pub level_throttle_ms: u64,
    /// Raw RMS below which a chunk is considered silence and skipped
    pub silence_rms: f32,
    /// Transcripts shorter than this are discarded as noise
    pub min_transcript_chars: usize,
    /// Accumulated transcripts shorter than this do not trigger synthesis
    pub min_synthesis_chars: usize,
    /// Milliseconds to wait for the audio loop to observe a stop
    pub stop_timeout_ms: u64,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            chunk_secs: 10,
            level_sensitivity: 500.0,
            level_throttle_ms: 50,
            silence_rms: 20.0,
            min_transcript_chars: 3,
            min_synthesis_chars: 10,
            stop_timeout_ms: 1000,
        }
    }
}

/// Workflow generation backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisSettings {
    /// API key (supports $ENV_VAR syntax)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub base_url: String,
    /// Models tried in order until one succeeds
    pub models: Vec<String>,
    pub timeout_secs: u64,
    /// Queued requests older than this fail busy instead of waiting
    pub queue_ceiling_secs: u64,
}

impl Default for SynthesisSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.openai.com/v1".to_string(),
            models: vec![
                "gpt-4o".to_string(),
                "gpt-4-turbo".to_string(),
                "gpt-4".to_string(),
                "gpt-3.5-turbo".to_string(),
            ],
            timeout_secs: 30,
            queue_ceiling_secs: 120,
        }
    }
}

/// Recording analysis backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisSettings {
    /// API key (supports $ENV_VAR syntax)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub timeout_secs: u64,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.anthropic.com".to_string(),
            model: "claude-3-5-sonnet-latest".to_string(),
            timeout_secs: 60,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sensible() {
        let settings = TraqSettings::default();
        assert_eq!(settings.version, 1);
        assert_eq!(settings.server.port, 5000);
        assert_eq!(settings.sampler.interval_ms, 1000);
        assert_eq!(settings.capture.fps, 3);
        assert_eq!(settings.audio.sample_rate, 16_000);
        assert_eq!(settings.synthesis.queue_ceiling_secs, 120);
        assert!(!settings.synthesis.models.is_empty());
    }

    #[test]
    fn partial_toml_fills_missing_fields() {
        let settings: TraqSettings = toml::from_str(
            r#"
            [server]
            port = 8080
            "#,
        )
        .unwrap();
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.capture.fps, 3);
    }

    #[test]
    fn round_trips_through_toml() {
        let settings = TraqSettings::default();
        let toml_string = toml::to_string_pretty(&settings).unwrap();
        let reloaded: TraqSettings = toml::from_str(&toml_string).unwrap();
        assert_eq!(reloaded.server.port, settings.server.port);
        assert_eq!(reloaded.synthesis.models, settings.synthesis.models);
    }
}
