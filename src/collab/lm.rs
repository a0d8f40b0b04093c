//! Language-model service.
//!
//! Failures are split into two classes because the model cascade treats them
//! differently: `Capacity` (rate limits, context window overflow) falls
//! through to the next model, anything else stops work on the record.
use crate::process::{expand_command, run_with_timeout};
use crate::util::truncate_string;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LmError {
    #[error("model {model} hit a capacity limit: {message}")]
    Capacity { model: String, message: String },
    #[error("model {model} failed: {message}")]
    Other { model: String, message: String },
}

impl LmError {
    pub fn is_capacity(&self) -> bool {
        matches!(self, LmError::Capacity { .. })
    }

    fn classify(model: &str, message: String) -> Self {
        if is_capacity_message(&message) {
            LmError::Capacity {
                model: model.to_string(),
                message,
            }
        } else {
            LmError::Other {
                model: model.to_string(),
                message,
            }
        }
    }
}

pub trait LanguageModel {
    fn complete(&self, system_prompt: &str, user_text: &str, model: &str)
        -> Result<String, LmError>;
}

const CAPACITY_MARKERS: [&str; 6] = [
    "maximum context length",
    "context_length_exceeded",
    "context length",
    "too many tokens",
    "rate limit",
    "rate_limit",
];

/// Whether an error body or stderr describes a capacity/limit failure.
pub fn is_capacity_message(message: &str) -> bool {
    let lowered = message.to_lowercase();
    CAPACITY_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker))
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI-compatible `chat/completions` endpoint.
pub struct HttpLanguageModel {
    agent: ureq::Agent,
    endpoint: String,
    api_key: String,
    temperature: f32,
}

impl HttpLanguageModel {
    pub fn new(endpoint: String, api_key: String, temperature: f32, timeout: Duration) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .build();
        HttpLanguageModel {
            agent: config.into(),
            endpoint,
            api_key,
            temperature,
        }
    }
}

impl LanguageModel for HttpLanguageModel {
    fn complete(
        &self,
        system_prompt: &str,
        user_text: &str,
        model: &str,
    ) -> Result<String, LmError> {
        let other = |message: String| LmError::Other {
            model: model.to_string(),
            message,
        };
        let body = json!({
            "model": model,
            "temperature": self.temperature,
            "messages": [
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": user_text},
            ],
        });
        let authorization = format!("Bearer {}", self.api_key);
        let mut response = self
            .agent
            .post(&self.endpoint)
            .header("Authorization", &authorization)
            .send_json(&body)
            .map_err(|err| other(format!("request failed: {err}")))?;
        let status = response.status().as_u16();
        let text = response
            .body_mut()
            .read_to_string()
            .map_err(|err| other(format!("read response: {err}")))?;

        if status == 429 {
            return Err(LmError::Capacity {
                model: model.to_string(),
                message: format!("HTTP 429: {}", truncate_string(&text, 300)),
            });
        }
        if !(200..300).contains(&status) {
            return Err(LmError::classify(
                model,
                format!("HTTP {status}: {}", truncate_string(&text, 300)),
            ));
        }
        extract_chat_content(&text).map_err(other)
    }
}

fn extract_chat_content(body: &str) -> Result<String, String> {
    let parsed: ChatResponse =
        serde_json::from_str(body).map_err(|err| format!("parse response JSON: {err}"))?;
    let content = parsed
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .map(|content| content.trim().to_string())
        .unwrap_or_default();
    if content.is_empty() {
        return Err("response contained no completion text".to_string());
    }
    Ok(content)
}

/// Local LM command. The prompt goes to stdin; `{model}` in the command line
/// is replaced by the model id.
pub struct CommandLanguageModel {
    command: String,
    timeout: Duration,
}

impl CommandLanguageModel {
    pub fn new(command: String, timeout: Duration) -> Self {
        CommandLanguageModel { command, timeout }
    }
}

impl LanguageModel for CommandLanguageModel {
    fn complete(
        &self,
        system_prompt: &str,
        user_text: &str,
        model: &str,
    ) -> Result<String, LmError> {
        let other = |message: String| LmError::Other {
            model: model.to_string(),
            message,
        };
        let argv = expand_command(&self.command, &[("model", model)])
            .map_err(|err| other(format!("{err:#}")))?;
        let prompt = format!("{system_prompt}\n\n{user_text}");
        let output = run_with_timeout(&argv, Some(prompt.as_bytes()), self.timeout)
            .map_err(|err| other(format!("{err:#}")))?;

        tracing::debug!(
            model,
            prompt_bytes = prompt.len(),
            response_bytes = output.stdout.len(),
            "lm command complete"
        );

        if !output.status.success() {
            let stderr = output.stderr_text();
            return Err(LmError::classify(
                model,
                format!("command failed with status {}: {}", output.status, stderr),
            ));
        }
        let text = String::from_utf8(output.stdout)
            .map_err(|err| other(format!("decode stdout as UTF-8: {err}")))?;
        let text = text.trim().to_string();
        if text.is_empty() {
            return Err(other("command returned no text".to_string()));
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_markers_are_case_insensitive() {
        assert!(is_capacity_message(
            "This model's Maximum Context Length is 8192 tokens"
        ));
        assert!(is_capacity_message("Rate limit reached for gpt-4"));
        assert!(!is_capacity_message("invalid api key"));
    }

    #[test]
    fn extracts_first_choice_content() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"  tidy text \n"}}]}"#;
        assert_eq!(extract_chat_content(body).expect("content"), "tidy text");
        assert!(extract_chat_content(r#"{"choices":[]}"#).is_err());
        assert!(extract_chat_content("<html>").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn command_failures_are_classified() {
        let lm = CommandLanguageModel::new(
            r#"sh -c 'if [ "$0" = big ]; then echo "too many tokens" >&2; exit 1; fi; if [ "$0" = broken ]; then echo "auth error" >&2; exit 1; fi; cat' {model}"#
                .to_string(),
            Duration::from_secs(10),
        );
        let err = lm.complete("sys", "text", "big").expect_err("capacity");
        assert!(err.is_capacity(), "{err}");
        let err = lm.complete("sys", "text", "broken").expect_err("other");
        assert!(!err.is_capacity(), "{err}");
        let echoed = lm.complete("sys", "text", "small").expect("echo");
        assert_eq!(echoed, "sys\n\ntext");
    }
}
