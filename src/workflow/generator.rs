//! Workflow generation collaborator.
//!
//! The synthesizer only sees the [`WorkflowGenerator`] trait; the shipping
//! implementation drives an OpenAI-compatible chat-completions endpoint and
//! walks a model fallback chain until one succeeds.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TraqError};
use crate::settings::SynthesisSettings;

use super::models::Workflow;

/// System prompt for workflow generation.
pub const WORKFLOW_SYSTEM_PROMPT: &str =
    "You are a workflow generation assistant. Always respond with valid JSON only.";

/// User prompt template; `{transcript}` is substituted with the source text.
pub const WORKFLOW_USER_PROMPT: &str = r#"You are an expert at converting verbal descriptions into concrete, actionable workflows for computer automation.

The user has provided the following transcript describing their workflow:
"{transcript}"

Convert this into a structured, executable workflow. Format your response as a JSON object with the following structure:
{
  "title": "A concise title for the workflow",
  "description": "Brief description of what this workflow does",
  "steps": [
    {
      "step_number": 1,
      "action": "Action type (click, type, navigate, wait, etc.)",
      "target": "Description of what/where the action applies",
      "details": "Specific details or content",
      "automation_instruction": "Precise instruction for automation"
    }
  ],
  "estimated_time": "Estimated completion time",
  "prerequisites": ["Any prerequisites or required state"],
  "automation_ready": true
}

Be specific and technical. Each step should be automatable with standard UI automation frameworks.

IMPORTANT: Return ONLY the JSON object, no additional text before or after."#;

/// Collaborator contract: turn source text into a structured workflow.
#[async_trait]
pub trait WorkflowGenerator: Send + Sync {
    async fn generate(&self, source_text: &str) -> Result<Workflow>;
}

/// Placeholder generator for builds without a configured API key. Requests
/// still walk the progress stages and end in a terminal error.
pub struct DisabledWorkflowGenerator;

#[async_trait]
impl WorkflowGenerator for DisabledWorkflowGenerator {
    async fn generate(&self, _source_text: &str) -> Result<Workflow> {
        Err(TraqError::ResourceUnavailable(
            "no workflow generation backend configured".to_string(),
        ))
    }
}

// =============================================================================
// OpenAI-compatible chat completions
// =============================================================================

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

pub struct OpenAiGenerator {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    models: Vec<String>,
    timeout: Duration,
}

impl OpenAiGenerator {
    pub fn new(settings: &SynthesisSettings) -> Result<Self> {
        let api_key = settings
            .api_key
            .clone()
            .ok_or_else(|| TraqError::ResourceUnavailable("no synthesis API key configured".into()))?;
        Ok(Self {
            client: reqwest::Client::new(),
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key,
            models: settings.models.clone(),
            timeout: Duration::from_secs(settings.timeout_secs),
        })
    }

    pub fn build_prompt(source_text: &str) -> String {
        WORKFLOW_USER_PROMPT.replace("{transcript}", source_text)
    }

    async fn complete(&self, model: &str, prompt: &str) -> Result<String> {
        let request = ChatRequest {
            model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: WORKFLOW_SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            max_tokens: 2000,
            temperature: 0.3,
            response_format: ResponseFormat {
                format: "json_object",
            },
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .timeout(self.timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| TraqError::Upstream(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TraqError::Upstream(format!(
                "model {model} returned {status}: {body}"
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| TraqError::Upstream(format!("malformed response: {e}")))?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| TraqError::Upstream(format!("model {model} returned no choices")))
    }
}

#[async_trait]
impl WorkflowGenerator for OpenAiGenerator {
    async fn generate(&self, source_text: &str) -> Result<Workflow> {
        let prompt = Self::build_prompt(source_text);
        let mut last_error = None;

        for model in &self.models {
            match self.complete(model, &prompt).await {
                Ok(reply) => {
                    return Ok(Workflow::from_reply(&reply).unwrap_or_else(|e| {
                        // The upstream answered but not with parseable JSON;
                        // hand back the manual-review placeholder instead of
                        // failing the whole run.
                        tracing::warn!("unparseable workflow reply from {model}: {e}");
                        Workflow::fallback(source_text, "reply was not valid workflow JSON")
                    }));
                }
                Err(e) => {
                    tracing::warn!("model {model} failed: {e}");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            TraqError::Upstream("no synthesis models configured".to_string())
        }))
    }
}
