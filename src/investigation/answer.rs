//! Classification of the first AI answer.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Value of `response_type` that marks a diagnostic payload.
pub const DIAGNOSTIC_MARKER: &str = "diagnostic";

/// A command the agent should run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum DiagnosticCommand {
    Plain(String),
    Detailed {
        command: String,
        #[serde(default)]
        id: Option<String>,
        #[serde(default)]
        description: Option<String>,
        #[serde(default)]
        timeout_seconds: Option<u64>,
    },
}

impl DiagnosticCommand {
    pub fn command(&self) -> &str {
        match self {
            Self::Plain(command) => command,
            Self::Detailed { command, .. } => command,
        }
    }
}

#[derive(Debug, Deserialize)]
struct DiagnosticSpec {
    #[serde(default)]
    reasoning: Option<String>,
    #[serde(default)]
    commands: Vec<DiagnosticCommand>,
    #[serde(default, alias = "ebpf_programs")]
    programs: Vec<serde_json::Value>,
}

/// Instructions for the agent extracted from a diagnostic answer.
#[derive(Debug, Clone, PartialEq)]
pub struct DiagnosticPayload {
    pub reasoning: Option<String>,
    pub commands: Vec<DiagnosticCommand>,
    pub programs: Vec<serde_json::Value>,
    /// The answer's JSON exactly as received; this is what the agent executes
    pub raw: serde_json::Value,
}

/// Outcome of classifying an AI answer.
#[derive(Debug, Clone, PartialEq)]
pub enum AiAnswer {
    /// Valid JSON without the diagnostic marker
    PlainAnswer(serde_json::Value),
    Diagnostic(DiagnosticPayload),
    /// Free-form text
    Unparseable,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DiagnosticParseError {
    #[error("diagnostic payload is malformed: {0}")]
    Malformed(String),

    #[error("diagnostic payload contains no commands or programs")]
    Empty,
}

/// Strip a surrounding Markdown code fence (```json ... ```), if any.
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some(body) = rest.strip_suffix("```") else {
        return trimmed;
    };
    // Drop the info string (e.g. `json`) on the opening line.
    match body.split_once('\n') {
        Some((_, inner)) => inner.trim(),
        None => body.trim(),
    }
}

/// Classify an AI answer.
///
/// Only answers whose JSON carries `response_type == "diagnostic"` are treated as
/// diagnostics; a marked answer whose body does not fit the payload shape is an error.
pub fn classify_answer(text: &str) -> Result<AiAnswer, DiagnosticParseError> {
    let candidate = strip_code_fence(text);
    let value: serde_json::Value = match serde_json::from_str(candidate) {
        Ok(value) => value,
        Err(_) => return Ok(AiAnswer::Unparseable),
    };

    let is_diagnostic = value
        .get("response_type")
        .and_then(|v| v.as_str())
        .map_or(false, |t| t == DIAGNOSTIC_MARKER);
    if !is_diagnostic {
        return Ok(AiAnswer::PlainAnswer(value));
    }

    let spec: DiagnosticSpec = serde_json::from_value(value.clone())
        .map_err(|e| DiagnosticParseError::Malformed(e.to_string()))?;
    if spec.commands.is_empty() && spec.programs.is_empty() {
        return Err(DiagnosticParseError::Empty);
    }

    Ok(AiAnswer::Diagnostic(DiagnosticPayload {
        reasoning: spec.reasoning,
        commands: spec.commands,
        programs: spec.programs,
        raw: value,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn free_text_is_unparseable() {
        assert_eq!(
            classify_answer("Restart nginx and clear the cache.").unwrap(),
            AiAnswer::Unparseable
        );
    }

    #[test]
    fn json_without_marker_is_a_plain_answer() {
        let answer = classify_answer(r#"{"response_type":"resolution","summary":"ok"}"#).unwrap();
        assert_eq!(
            answer,
            AiAnswer::PlainAnswer(json!({"response_type": "resolution", "summary": "ok"}))
        );
        assert!(matches!(
            classify_answer("[1, 2, 3]").unwrap(),
            AiAnswer::PlainAnswer(_)
        ));
    }

    #[test]
    fn diagnostic_answers_are_parsed() {
        let text = r#"{
            "response_type": "diagnostic",
            "reasoning": "check disk",
            "commands": ["df -h", {"id": "c2", "command": "du -sh /var", "timeout_seconds": 10}],
            "ebpf_programs": [{"type": "tracepoint", "target": "syscalls:sys_enter_openat"}]
        }"#;
        let AiAnswer::Diagnostic(payload) = classify_answer(text).unwrap() else {
            panic!("expected diagnostic");
        };
        assert_eq!(payload.reasoning.as_deref(), Some("check disk"));
        assert_eq!(payload.commands.len(), 2);
        assert_eq!(payload.commands[0].command(), "df -h");
        assert_eq!(payload.commands[1].command(), "du -sh /var");
        assert_eq!(payload.programs.len(), 1);
        assert_eq!(payload.raw["response_type"], "diagnostic");
    }

    #[test]
    fn fenced_json_is_unwrapped() {
        let text = "```json\n{\"response_type\":\"diagnostic\",\"commands\":[\"uptime\"]}\n```";
        assert!(matches!(
            classify_answer(text).unwrap(),
            AiAnswer::Diagnostic(_)
        ));
    }

    #[test]
    fn malformed_diagnostics_are_errors() {
        assert!(matches!(
            classify_answer(r#"{"response_type":"diagnostic","commands":"df -h"}"#),
            Err(DiagnosticParseError::Malformed(_))
        ));
        assert_eq!(
            classify_answer(r#"{"response_type":"diagnostic","commands":[]}"#),
            Err(DiagnosticParseError::Empty)
        );
    }
}
