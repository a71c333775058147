//! Application context: every component constructed once at startup and
//! passed by reference. No ambient singletons.

use std::sync::Arc;
use std::time::Duration;

use crate::analysis::{Analyzer, AnalysisPipeline, ClaudeAnalyzer, DisabledAnalyzer, DisabledFrameExtractor};
use crate::bus::EventBus;
use crate::capture::device::{
    CaptureBackend, DisabledCaptureBackend, DisabledScreenshotBackend, ScreenshotBackend,
};
use crate::capture::CaptureSession;
use crate::sampler::{ActivitySampler, DisabledProbe, ForegroundProbe};
use crate::settings::TraqSettings;
use crate::storage::{ArtifactStore, JsonlUsageStore, UsageStore};
use crate::transcribe::engine::{AudioInput, DisabledAudioInput, DisabledSpeechEngine, SpeechEngine};
use crate::transcribe::TranscriptionSession;
use crate::workflow::generator::{DisabledWorkflowGenerator, OpenAiGenerator, WorkflowGenerator};
use crate::workflow::WorkflowSynthesizer;

/// Pluggable collaborator implementations. Production wires whatever the
/// settings can support; tests substitute fakes.
pub struct Backends {
    pub capture: Arc<dyn CaptureBackend>,
    pub screenshot: Arc<dyn ScreenshotBackend>,
    pub audio: Arc<dyn AudioInput>,
    pub speech: Arc<dyn SpeechEngine>,
    pub generator: Arc<dyn WorkflowGenerator>,
    pub analyzer: Arc<dyn Analyzer>,
    pub probe: Arc<dyn ForegroundProbe>,
    pub usage: Arc<dyn UsageStore>,
}

impl Backends {
    /// Everything disabled: commands fail fast with `ResourceUnavailable`
    /// until real integrations are wired in.
    pub fn disabled() -> Self {
        Self {
            capture: Arc::new(DisabledCaptureBackend),
            screenshot: Arc::new(DisabledScreenshotBackend),
            audio: Arc::new(DisabledAudioInput),
            speech: Arc::new(DisabledSpeechEngine),
            generator: Arc::new(DisabledWorkflowGenerator),
            analyzer: Arc::new(DisabledAnalyzer),
            probe: Arc::new(DisabledProbe),
            usage: Arc::new(crate::storage::MemoryUsageStore::new()),
        }
    }

    /// Wire the AI collaborators the settings have credentials for; device
    /// backends stay platform-provided and default to disabled.
    pub fn from_settings(settings: &TraqSettings) -> Self {
        let generator: Arc<dyn WorkflowGenerator> = match OpenAiGenerator::new(&settings.synthesis)
        {
            Ok(generator) => Arc::new(generator),
            Err(e) => {
                tracing::warn!("workflow generation disabled: {e}");
                Arc::new(DisabledWorkflowGenerator)
            }
        };
        let analyzer: Arc<dyn Analyzer> =
            match ClaudeAnalyzer::new(&settings.analysis, Arc::new(DisabledFrameExtractor)) {
                Ok(analyzer) => Arc::new(analyzer),
                Err(e) => {
                    tracing::warn!("analysis disabled: {e}");
                    Arc::new(DisabledAnalyzer)
                }
            };
        let usage: Arc<dyn UsageStore> =
            Arc::new(JsonlUsageStore::new(settings.data.dir.join("usage.jsonl")));

        Self {
            capture: Arc::new(DisabledCaptureBackend),
            screenshot: Arc::new(DisabledScreenshotBackend),
            audio: Arc::new(DisabledAudioInput),
            speech: Arc::new(DisabledSpeechEngine),
            generator,
            analyzer,
            probe: Arc::new(DisabledProbe),
            usage,
        }
    }
}

pub struct AppContext {
    pub settings: TraqSettings,
    pub bus: Arc<EventBus>,
    pub artifacts: Arc<ArtifactStore>,
    pub usage: Arc<dyn UsageStore>,
    pub capture: Arc<CaptureSession>,
    pub voice: Arc<TranscriptionSession>,
    pub synthesizer: Arc<WorkflowSynthesizer>,
    pub analysis: Arc<AnalysisPipeline>,
    pub screenshot: Arc<dyn ScreenshotBackend>,
    probe: Arc<dyn ForegroundProbe>,
}

impl AppContext {
    /// Wire the whole system. Must run inside a tokio runtime: the
    /// synthesizer worker spawns here.
    pub fn new(settings: TraqSettings, backends: Backends) -> Arc<Self> {
        let bus = Arc::new(EventBus::new(
            settings.bus.queue_capacity,
            Duration::from_millis(settings.bus.congestion_window_ms),
        ));
        let artifacts = Arc::new(ArtifactStore::new(&settings.data.dir));

        let synthesizer = WorkflowSynthesizer::new(
            bus.clone(),
            backends.generator,
            artifacts.clone(),
            Duration::from_secs(settings.synthesis.queue_ceiling_secs),
        );
        let capture = Arc::new(CaptureSession::new(
            bus.clone(),
            backends.capture,
            artifacts.clone(),
            settings.capture.clone(),
        ));
        let voice = Arc::new(TranscriptionSession::new(
            bus.clone(),
            backends.audio,
            backends.speech,
            artifacts.clone(),
            synthesizer.clone(),
            settings.audio.clone(),
        ));
        let analysis = AnalysisPipeline::new(bus.clone(), backends.analyzer, synthesizer.clone());

        Arc::new(Self {
            settings,
            bus,
            artifacts,
            usage: backends.usage,
            capture,
            voice,
            synthesizer,
            analysis,
            screenshot: backends.screenshot,
            probe: backends.probe,
        })
    }

    /// The process-lifetime activity sampler, ready to spawn.
    pub fn sampler(&self) -> ActivitySampler {
        ActivitySampler::new(
            self.probe.clone(),
            self.usage.clone(),
            self.bus.clone(),
            Duration::from_millis(self.settings.sampler.interval_ms),
        )
    }

    /// Release devices and settle sessions before exit.
    pub async fn shutdown(&self) {
        self.capture.shutdown().await;
        self.voice.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn context_wires_with_disabled_backends() {
        let ctx = AppContext::new(TraqSettings::default(), Backends::disabled());
        assert_eq!(ctx.bus.subscriber_count(), 0);
        // Disabled device backends fail fast without corrupting state.
        assert!(ctx.capture.start().await.is_err());
        assert!(ctx.voice.start().await.is_err());
        assert!(ctx.capture.start().await.is_err(), "state must stay settled");
    }

    #[tokio::test]
    async fn from_settings_without_keys_disables_ai_backends() {
        let settings = TraqSettings::default();
        let backends = Backends::from_settings(&settings);
        assert!(backends.generator.generate("long enough source text").await.is_err());
    }
}
