use super::download_audio;
use crate::collab::{AudioSource, SpeechToText};
use crate::record::{Outcome, Payload, Status, WorkItem};
use crate::stage::RecordProcessor;
use anyhow::{Context, Result};
use std::rc::Rc;

/// Runs the speech engine without a hint and keeps only the language.
pub struct DetectLanguage {
    source: Rc<dyn AudioSource>,
    speech: Rc<dyn SpeechToText>,
}

impl DetectLanguage {
    pub fn new(source: Rc<dyn AudioSource>, speech: Rc<dyn SpeechToText>) -> Self {
        DetectLanguage { source, speech }
    }

    fn detect(&self, item: &WorkItem) -> Result<String> {
        let audio = download_audio(self.source.as_ref(), item)
            .with_context(|| format!("download {}", item.filename))?;
        let transcript = self
            .speech
            .transcribe(&audio, None)
            .context("detect language")?;
        Ok(transcript.language)
    }
}

impl RecordProcessor for DetectLanguage {
    fn name(&self) -> &'static str {
        "detect_language"
    }

    fn input(&self) -> Status {
        Status::New
    }

    fn prepare(&mut self) -> Result<()> {
        self.source
            .list_available()
            .map(|_| ())
            .context("audio source unreachable")
    }

    fn process(&mut self, item: &WorkItem) -> Outcome {
        match self.detect(item) {
            Ok(language) if !language.trim().is_empty() && language != "unknown" => {
                Outcome::Advance {
                    to: Status::LanguageDetected,
                    payload: Payload {
                        language: Some(language),
                        ..Payload::default()
                    },
                }
            }
            Ok(_) => Outcome::Fail("speech engine did not report a language".to_string()),
            Err(err) => Outcome::Fail(format!("{err:#}")),
        }
    }
}
