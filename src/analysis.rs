//! Recording/text analysis pipeline.
//!
//! Analysis commands acknowledge immediately; results arrive only on the
//! event stream as `analysis_complete`. A detailed analysis additionally
//! routes its summary through the workflow synthesizer and carries the
//! resulting workflow in the completion event.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::bus::events::{EventKind, SessionKind};
use crate::bus::EventBus;
use crate::error::{Result, TraqError};
use crate::settings::AnalysisSettings;
use crate::workflow::WorkflowSynthesizer;

/// Analysis collaborator: free text or a recorded video in, a prose
/// activity summary out.
#[async_trait]
pub trait Analyzer: Send + Sync {
    async fn analyze_text(&self, text: &str, detailed: bool) -> Result<String>;
    async fn analyze_video(&self, video_path: &Path, detailed: bool) -> Result<String>;
}

/// Frame sampling collaborator for video analysis. Decoding is a platform
/// concern; the analyzer only consumes base64 JPEG frames.
#[async_trait]
pub trait FrameExtractor: Send + Sync {
    async fn extract(&self, video_path: &Path, count: usize) -> Result<Vec<String>>;
}

/// Placeholder extractor for builds without a media integration.
pub struct DisabledFrameExtractor;

#[async_trait]
impl FrameExtractor for DisabledFrameExtractor {
    async fn extract(&self, _video_path: &Path, _count: usize) -> Result<Vec<String>> {
        Err(TraqError::ResourceUnavailable(
            "no frame extraction backend configured".to_string(),
        ))
    }
}

/// Placeholder analyzer; fails fast until a real backend is configured.
pub struct DisabledAnalyzer;

#[async_trait]
impl Analyzer for DisabledAnalyzer {
    async fn analyze_text(&self, _text: &str, _detailed: bool) -> Result<String> {
        Err(TraqError::ResourceUnavailable(
            "no analysis backend configured".to_string(),
        ))
    }

    async fn analyze_video(&self, _video_path: &Path, _detailed: bool) -> Result<String> {
        Err(TraqError::ResourceUnavailable(
            "no analysis backend configured".to_string(),
        ))
    }
}

// =============================================================================
// Anthropic messages backend
// =============================================================================

const QUICK_ANALYSIS_PROMPT: &str = "Analyze this screen recording and provide a concise summary of the user's activity. Focus on: what applications or websites were being used, what tasks the user was performing, and any notable patterns or workflows observed.";

const DETAILED_ANALYSIS_PROMPT: &str = "Analyze this screen recording in detail and reconstruct the user's workflow step by step. Describe every action taken, in order, with the application or site it happened in, precisely enough that the sequence could be repeated.";

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize, Serialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

/// Anthropic messages API client for recording analysis.
pub struct ClaudeAnalyzer {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    timeout: std::time::Duration,
    frames: Arc<dyn FrameExtractor>,
}

impl ClaudeAnalyzer {
    pub fn new(settings: &AnalysisSettings, frames: Arc<dyn FrameExtractor>) -> Result<Self> {
        let api_key = settings
            .api_key
            .clone()
            .ok_or_else(|| TraqError::ResourceUnavailable("no analysis API key configured".into()))?;
        Ok(Self {
            client: reqwest::Client::new(),
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key,
            model: settings.model.clone(),
            timeout: std::time::Duration::from_secs(settings.timeout_secs),
            frames,
        })
    }

    fn prompt(detailed: bool) -> &'static str {
        if detailed {
            DETAILED_ANALYSIS_PROMPT
        } else {
            QUICK_ANALYSIS_PROMPT
        }
    }

    async fn complete(&self, content: serde_json::Value) -> Result<String> {
        let body = json!({
            "model": self.model,
            "max_tokens": 1500,
            "messages": [{ "role": "user", "content": content }],
        });

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| TraqError::Upstream(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TraqError::Upstream(format!(
                "analysis backend returned {status}: {body}"
            )));
        }

        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|e| TraqError::Upstream(format!("malformed response: {e}")))?;
        let text: String = parsed
            .content
            .iter()
            .filter(|block| block.kind == "text")
            .map(|block| block.text.as_str())
            .collect();
        if text.is_empty() {
            return Err(TraqError::Upstream("analysis returned no text".into()));
        }
        Ok(text)
    }
}

#[async_trait]
impl Analyzer for ClaudeAnalyzer {
    async fn analyze_text(&self, text: &str, detailed: bool) -> Result<String> {
        let content = json!([{
            "type": "text",
            "text": format!("{}\n\nActivity description:\n{}", Self::prompt(detailed), text),
        }]);
        self.complete(content).await
    }

    async fn analyze_video(&self, video_path: &Path, detailed: bool) -> Result<String> {
        let frames = self.frames.extract(video_path, 3).await?;
        if frames.is_empty() {
            return Err(TraqError::Upstream(
                "could not extract frames from the recording".to_string(),
            ));
        }

        let mut content = vec![json!({ "type": "text", "text": Self::prompt(detailed) })];
        for frame in &frames {
            content.push(json!({
                "type": "image",
                "source": {
                    "type": "base64",
                    "media_type": "image/jpeg",
                    "data": frame,
                },
            }));
        }
        self.complete(serde_json::Value::Array(content)).await
    }
}

// =============================================================================
// Pipeline
// =============================================================================

enum AnalysisSource {
    Text(String),
    Video(PathBuf),
}

/// Drives analysis requests end to end and publishes their outcomes.
pub struct AnalysisPipeline {
    bus: Arc<EventBus>,
    analyzer: Arc<dyn Analyzer>,
    synthesizer: Arc<WorkflowSynthesizer>,
}

impl AnalysisPipeline {
    pub fn new(
        bus: Arc<EventBus>,
        analyzer: Arc<dyn Analyzer>,
        synthesizer: Arc<WorkflowSynthesizer>,
    ) -> Arc<Self> {
        Arc::new(Self {
            bus,
            analyzer,
            synthesizer,
        })
    }

    /// Validate and launch a video analysis. Returns the job id; the result
    /// arrives on the event stream.
    pub fn submit_video(self: &Arc<Self>, video_path: PathBuf, detailed: bool) -> Result<Uuid> {
        if !video_path.exists() {
            return Err(TraqError::Validation(format!(
                "video file not found: {}",
                video_path.display()
            )));
        }
        Ok(self.launch(AnalysisSource::Video(video_path), detailed))
    }

    /// Validate and launch a free-text analysis.
    pub fn submit_text(self: &Arc<Self>, text: String, detailed: bool) -> Result<Uuid> {
        if text.trim().is_empty() {
            return Err(TraqError::Validation("text is required".to_string()));
        }
        Ok(self.launch(AnalysisSource::Text(text), detailed))
    }

    fn launch(self: &Arc<Self>, source: AnalysisSource, detailed: bool) -> Uuid {
        let job_id = Uuid::new_v4();
        let pipeline = self.clone();
        tokio::spawn(async move {
            pipeline.run(job_id, source, detailed).await;
        });
        job_id
    }

    async fn run(&self, job_id: Uuid, source: AnalysisSource, detailed: bool) {
        let result = match &source {
            AnalysisSource::Text(text) => self.analyzer.analyze_text(text, detailed).await,
            AnalysisSource::Video(path) => self.analyzer.analyze_video(path, detailed).await,
        };

        let analysis = match result {
            Ok(analysis) => analysis,
            Err(e) => {
                tracing::error!(%job_id, "analysis failed: {e}");
                self.bus.publish(EventKind::SessionError {
                    source: SessionKind::Analysis,
                    message: format!("analysis failed: {e}"),
                });
                return;
            }
        };

        // A detailed run feeds the summary into the synthesis queue and
        // waits for its turn; progress events stream in the meantime.
        let workflow = if detailed {
            match self.synthesizer.submit(analysis.clone()) {
                Ok(ticket) => ticket.done.await.ok().flatten(),
                Err(e) => {
                    tracing::warn!(%job_id, "could not queue workflow generation: {e}");
                    None
                }
            }
        } else {
            None
        };

        self.bus.publish(EventKind::AnalysisComplete { analysis, workflow });
        tracing::info!(%job_id, detailed, "analysis complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::ArtifactStore;
    use crate::workflow::generator::WorkflowGenerator;
    use crate::workflow::models::Workflow;
    use std::time::Duration;

    struct FakeAnalyzer {
        fail: bool,
    }

    #[async_trait]
    impl Analyzer for FakeAnalyzer {
        async fn analyze_text(&self, text: &str, detailed: bool) -> Result<String> {
            if self.fail {
                return Err(TraqError::Upstream("analysis backend down".into()));
            }
            Ok(format!("analysis({detailed}) of: {text}"))
        }

        async fn analyze_video(&self, video_path: &Path, _detailed: bool) -> Result<String> {
            Ok(format!("video analysis of {}", video_path.display()))
        }
    }

    struct EchoGenerator;

    #[async_trait]
    impl WorkflowGenerator for EchoGenerator {
        async fn generate(&self, source_text: &str) -> Result<Workflow> {
            Ok(Workflow {
                title: format!("From: {source_text}"),
                ..Workflow::default()
            })
        }
    }

    fn pipeline(fail: bool) -> (Arc<AnalysisPipeline>, Arc<EventBus>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let bus = Arc::new(EventBus::default());
        let synthesizer = WorkflowSynthesizer::new(
            bus.clone(),
            Arc::new(EchoGenerator),
            Arc::new(ArtifactStore::new(dir.path())),
            Duration::from_secs(120),
        );
        let pipeline = AnalysisPipeline::new(bus.clone(), Arc::new(FakeAnalyzer { fail }), synthesizer);
        (pipeline, bus, dir)
    }

    async fn next_named(sub: &crate::bus::Subscription, name: &str) -> EventKind {
        loop {
            let event = tokio::time::timeout(Duration::from_secs(2), sub.recv())
                .await
                .expect("timed out waiting for event")
                .expect("feed closed");
            if event.kind.name() == name {
                return event.kind;
            }
        }
    }

    #[tokio::test]
    async fn quick_text_analysis_completes_without_a_workflow() {
        let (pipeline, bus, _dir) = pipeline(false);
        let sub = bus.subscribe();

        pipeline
            .submit_text("wrote a report in the editor".into(), false)
            .unwrap();

        match next_named(&sub, "analysis_complete").await {
            EventKind::AnalysisComplete { analysis, workflow } => {
                assert!(analysis.contains("wrote a report"));
                assert!(workflow.is_none());
            }
            other => panic!("unexpected event {}", other.name()),
        }
    }

    #[tokio::test]
    async fn detailed_analysis_carries_the_synthesized_workflow() {
        let (pipeline, bus, _dir) = pipeline(false);
        let sub = bus.subscribe();

        pipeline
            .submit_text("opened terminal and ran the deploy script".into(), true)
            .unwrap();

        match next_named(&sub, "analysis_complete").await {
            EventKind::AnalysisComplete { workflow, .. } => {
                let workflow = workflow.expect("detailed analysis must carry a workflow");
                assert!(workflow.title.starts_with("From: analysis(true)"));
            }
            other => panic!("unexpected event {}", other.name()),
        }
    }

    #[tokio::test]
    async fn failure_is_broadcast_not_raised() {
        let (pipeline, bus, _dir) = pipeline(true);
        let sub = bus.subscribe();

        // Submission itself succeeds; the fault arrives as an event.
        pipeline.submit_text("anything at all".into(), false).unwrap();

        match next_named(&sub, "session_error").await {
            EventKind::SessionError { source, message } => {
                assert_eq!(source, SessionKind::Analysis);
                assert!(message.contains("analysis backend down"));
            }
            other => panic!("unexpected event {}", other.name()),
        }
    }

    #[tokio::test]
    async fn missing_video_fails_validation_synchronously() {
        let (pipeline, _bus, _dir) = pipeline(false);
        let result = pipeline.submit_video(PathBuf::from("/nope/missing.mp4"), false);
        assert!(matches!(result, Err(TraqError::Validation(_))));
    }

    #[tokio::test]
    async fn empty_text_fails_validation_synchronously() {
        let (pipeline, _bus, _dir) = pipeline(false);
        assert!(matches!(
            pipeline.submit_text("   ".into(), false),
            Err(TraqError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn existing_video_is_accepted() {
        let (pipeline, bus, dir) = pipeline(false);
        let sub = bus.subscribe();
        let video = dir.path().join("recording_test.mp4");
        std::fs::write(&video, b"not really a video").unwrap();

        pipeline.submit_video(video.clone(), false).unwrap();

        match next_named(&sub, "analysis_complete").await {
            EventKind::AnalysisComplete { analysis, .. } => {
                assert!(analysis.contains("recording_test.mp4"));
            }
            other => panic!("unexpected event {}", other.name()),
        }
    }
}
