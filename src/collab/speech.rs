//! Speech-to-text engine.
use crate::process::{expand_command, run_with_timeout};
use crate::util::truncate_string;
use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::io::Write;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transcript {
    pub text: String,
    pub language: String,
}

pub trait SpeechToText {
    /// Transcribe `audio`. Without a hint the engine detects the language.
    fn transcribe(&self, audio: &[u8], language_hint: Option<&str>) -> Result<Transcript>;
}

#[derive(Deserialize)]
struct SpeechResponse {
    #[serde(default)]
    text: String,
    #[serde(default)]
    language: Option<String>,
}

/// Runs a local engine command per recording.
///
/// The audio is written to a temp file whose path replaces `{audio}`;
/// `{language}` becomes the hint or `auto`. The command prints
/// `{"text": "...", "language": "xx"}` on stdout.
#[derive(Debug, Clone)]
pub struct CommandSpeech {
    command: String,
    timeout: Duration,
}

impl CommandSpeech {
    pub fn new(command: String, timeout: Duration) -> Self {
        CommandSpeech { command, timeout }
    }
}

impl SpeechToText for CommandSpeech {
    fn transcribe(&self, audio: &[u8], language_hint: Option<&str>) -> Result<Transcript> {
        let mut file = tempfile::Builder::new()
            .prefix("recap-audio-")
            .tempfile()
            .context("create temp audio file")?;
        file.write_all(audio).context("write temp audio file")?;
        file.flush().context("flush temp audio file")?;

        let audio_path = file.path().display().to_string();
        let language = language_hint.unwrap_or("auto");
        let argv = expand_command(
            &self.command,
            &[("audio", audio_path.as_str()), ("language", language)],
        )?;
        let output = run_with_timeout(&argv, None, self.timeout)?;
        if !output.status.success() {
            return Err(anyhow!(
                "speech command failed with status {}: {}",
                output.status,
                output.stderr_text()
            ));
        }
        parse_speech_response(&output.stdout, language_hint)
    }
}

fn parse_speech_response(stdout: &[u8], language_hint: Option<&str>) -> Result<Transcript> {
    let text = String::from_utf8_lossy(stdout);
    let response: SpeechResponse = serde_json::from_str(text.trim()).with_context(|| {
        format!(
            "parse speech output: {}",
            truncate_string(text.trim(), 200)
        )
    })?;
    let transcript_text = response.text.trim().to_string();
    if transcript_text.is_empty() {
        return Err(anyhow!("speech engine returned an empty transcript"));
    }
    let language = response
        .language
        .map(|lang| lang.trim().to_string())
        .filter(|lang| !lang.is_empty())
        .or_else(|| language_hint.map(str::to_string))
        .unwrap_or_else(|| "unknown".to_string());
    Ok(Transcript {
        text: transcript_text,
        language,
    })
}
