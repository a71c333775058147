//! Structured workflow values produced by the synthesis pipeline.
//!
//! Generator replies come back as JSON, sometimes wrapped in markdown fences
//! and often missing optional fields, so parsing is deliberately lenient:
//! fences are stripped and absent fields fall back to usable defaults.

use serde::{Deserialize, Serialize};

/// One actionable step of a synthesized workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowStep {
    pub step_number: u32,
    /// Action type (click, type, navigate, wait, ...)
    pub action: String,
    /// What/where the action applies
    pub target: String,
    /// Specific details or content
    pub details: String,
    /// Precise instruction for an automation driver
    pub automation_instruction: String,
}

impl Default for WorkflowStep {
    fn default() -> Self {
        Self {
            step_number: 0,
            action: String::new(),
            target: String::new(),
            details: String::new(),
            automation_instruction: String::new(),
        }
    }
}

/// A reproducible task sequence synthesized from a transcript or analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Workflow {
    pub title: String,
    pub description: String,
    pub steps: Vec<WorkflowStep>,
    pub estimated_time: String,
    pub prerequisites: Vec<String>,
    pub automation_ready: bool,
}

impl Default for Workflow {
    fn default() -> Self {
        Self {
            title: "Generated Workflow".to_string(),
            description: String::new(),
            steps: Vec::new(),
            estimated_time: "Unknown".to_string(),
            prerequisites: Vec::new(),
            automation_ready: true,
        }
    }
}

impl Workflow {
    /// Parse a generator reply, tolerating markdown fences and missing fields.
    pub fn from_reply(reply: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(extract_json(reply))
    }

    /// Manual-review placeholder used when the upstream replied but its
    /// content could not be parsed into a workflow.
    pub fn fallback(source_text: &str, reason: &str) -> Self {
        let details = if source_text.chars().count() > 200 {
            let truncated: String = source_text.chars().take(200).collect();
            format!("{truncated}...")
        } else {
            source_text.to_string()
        };
        Self {
            title: "Transcript Not Processed".to_string(),
            description: format!("Could not generate workflow: {reason}"),
            steps: vec![WorkflowStep {
                step_number: 1,
                action: "note".to_string(),
                target: "Transcript Content".to_string(),
                details,
                automation_instruction: "Manual review required - automated generation failed"
                    .to_string(),
            }],
            estimated_time: "Unknown".to_string(),
            prerequisites: vec!["Manual review".to_string()],
            automation_ready: false,
        }
    }
}

/// Strip a ```json / ``` fence if the reply carries one.
pub fn extract_json(reply: &str) -> &str {
    let trimmed = reply.trim();
    for fence in ["```json", "```"] {
        if let Some(start) = trimmed.find(fence) {
            let body = &trimmed[start + fence.len()..];
            if let Some(end) = body.find("```") {
                return body[..end].trim();
            }
        }
    }
    trimmed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_json() {
        let workflow = Workflow::from_reply(
            r#"{"title":"Open terminal","description":"d","steps":[{"step_number":1,"action":"click","target":"terminal icon","details":"","automation_instruction":"click icon"}],"estimated_time":"1 min","automation_ready":true}"#,
        )
        .unwrap();
        assert_eq!(workflow.title, "Open terminal");
        assert_eq!(workflow.steps.len(), 1);
        assert_eq!(workflow.steps[0].action, "click");
    }

    #[test]
    fn parses_fenced_json() {
        let reply = "Here is your workflow:\n```json\n{\"title\": \"Fenced\"}\n```\nDone.";
        let workflow = Workflow::from_reply(reply).unwrap();
        assert_eq!(workflow.title, "Fenced");
    }

    #[test]
    fn parses_bare_fence() {
        let reply = "```\n{\"title\": \"Bare\"}\n```";
        assert_eq!(Workflow::from_reply(reply).unwrap().title, "Bare");
    }

    #[test]
    fn missing_fields_get_defaults() {
        let workflow = Workflow::from_reply(r#"{"description":"just a description"}"#).unwrap();
        assert_eq!(workflow.title, "Generated Workflow");
        assert_eq!(workflow.estimated_time, "Unknown");
        assert!(workflow.automation_ready);
        assert!(workflow.steps.is_empty());
        assert!(workflow.prerequisites.is_empty());
    }

    #[test]
    fn step_missing_fields_get_defaults() {
        let workflow =
            Workflow::from_reply(r#"{"steps":[{"action":"type","details":"git status"}]}"#).unwrap();
        assert_eq!(workflow.steps[0].step_number, 0);
        assert_eq!(workflow.steps[0].action, "type");
        assert_eq!(workflow.steps[0].target, "");
    }

    #[test]
    fn unparseable_reply_is_an_error() {
        assert!(Workflow::from_reply("I could not produce JSON today.").is_err());
    }

    #[test]
    fn fallback_is_not_automation_ready() {
        let workflow = Workflow::fallback("open chrome", "upstream returned prose");
        assert_eq!(workflow.title, "Transcript Not Processed");
        assert!(!workflow.automation_ready);
        assert_eq!(workflow.steps.len(), 1);
        assert!(workflow.steps[0].details.contains("open chrome"));
        assert!(workflow.description.contains("upstream returned prose"));
    }

    #[test]
    fn fallback_truncates_long_sources() {
        let long = "x".repeat(500);
        let workflow = Workflow::fallback(&long, "r");
        assert!(workflow.steps[0].details.len() < 250);
        assert!(workflow.steps[0].details.ends_with("..."));
    }
}
