//! Audio input and speech engine collaborators, plus the amplitude math the
//! session uses for level telemetry and silence gating.

use async_trait::async_trait;

use crate::error::{Result, TraqError};

/// One buffer of mono PCM samples from the input device.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    pub samples: Vec<i16>,
}

/// Factory for exclusive audio streams.
#[async_trait]
pub trait AudioInput: Send + Sync {
    async fn open(&self) -> Result<Box<dyn AudioStream>>;
}

/// An open input device. Dropping the stream releases the device.
#[async_trait]
pub trait AudioStream: Send {
    /// Resolved device name, when the platform can report one. A lookup
    /// failure degrades gracefully: the session simply omits `device_info`.
    fn device_name(&self) -> Option<String>;

    async fn read_frame(&mut self) -> Result<AudioFrame>;
}

/// Batch speech-to-text collaborator: one chunk of audio in, one utterance
/// hypothesis out.
#[async_trait]
pub trait SpeechEngine: Send + Sync {
    async fn transcribe(&self, samples: &[i16], sample_rate: u32) -> Result<String>;
}

/// Root-mean-square amplitude of a sample buffer.
pub fn rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f64 = samples.iter().map(|&s| f64::from(s) * f64::from(s)).sum();
    (sum_squares / samples.len() as f64).sqrt() as f32
}

/// Normalized 0.0..=1.0 level for visualization. The sensitivity divisor is
/// tuned low enough to catch quiet speech on 16-bit input.
pub fn normalized_level(samples: &[i16], sensitivity: f32) -> f32 {
    (rms(samples) / sensitivity).min(1.0)
}

/// Whether a buffer holds anything above the silence floor.
pub fn has_speech(samples: &[i16], silence_rms: f32) -> bool {
    rms(samples) > silence_rms
}

/// Placeholder input for builds without a platform audio integration.
pub struct DisabledAudioInput;

#[async_trait]
impl AudioInput for DisabledAudioInput {
    async fn open(&self) -> Result<Box<dyn AudioStream>> {
        Err(TraqError::ResourceUnavailable(
            "no audio input backend configured".to_string(),
        ))
    }
}

/// Placeholder engine; see [`DisabledAudioInput`].
pub struct DisabledSpeechEngine;

#[async_trait]
impl SpeechEngine for DisabledSpeechEngine {
    async fn transcribe(&self, _samples: &[i16], _sample_rate: u32) -> Result<String> {
        Err(TraqError::ResourceUnavailable(
            "no speech engine configured".to_string(),
        ))
    }
}
