use super::download_audio;
use crate::collab::{AudioSource, SpeechToText};
use crate::record::{Outcome, Payload, Status, WorkItem};
use crate::stage::RecordProcessor;
use anyhow::{Context, Result};
use std::rc::Rc;

/// Full transcription using the language found by detection.
pub struct Transcribe {
    source: Rc<dyn AudioSource>,
    speech: Rc<dyn SpeechToText>,
}

impl Transcribe {
    pub fn new(source: Rc<dyn AudioSource>, speech: Rc<dyn SpeechToText>) -> Self {
        Transcribe { source, speech }
    }

    fn transcribe(&self, item: &WorkItem) -> Result<String> {
        let audio = download_audio(self.source.as_ref(), item)
            .with_context(|| format!("download {}", item.filename))?;
        let transcript = self
            .speech
            .transcribe(&audio, item.payload.language.as_deref())
            .context("transcribe audio")?;
        Ok(transcript.text)
    }
}

impl RecordProcessor for Transcribe {
    fn name(&self) -> &'static str {
        "transcribe"
    }

    fn input(&self) -> Status {
        Status::LanguageDetected
    }

    fn prepare(&mut self) -> Result<()> {
        self.source
            .list_available()
            .map(|_| ())
            .context("audio source unreachable")
    }

    fn process(&mut self, item: &WorkItem) -> Outcome {
        match self.transcribe(item) {
            Ok(text) => Outcome::Advance {
                to: Status::Transcribed,
                payload: Payload {
                    transcription: Some(text),
                    ..Payload::default()
                },
            },
            Err(err) => Outcome::Fail(format!("{err:#}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::fakes::{EchoSpeech, FakeSource};
    use crate::store::memory::MemoryStore;

    #[test]
    fn passes_detected_language_as_hint() {
        let mut store = MemoryStore::new();
        let mut item = store.seed(
            "a.m4a",
            Status::LanguageDetected,
            Payload {
                language: Some("he".to_string()),
                ..Payload::default()
            },
        );
        item.external_id = Some("id-a.m4a".to_string());
        let speech = Rc::new(EchoSpeech::new("he"));
        let source = FakeSource::default().with_file("a.m4a", b"shalom");
        let mut stage = Transcribe::new(Rc::new(source), speech.clone());

        let Outcome::Advance { to, payload } = stage.process(&item) else {
            panic!("expected advance");
        };
        assert_eq!(to, Status::Transcribed);
        assert_eq!(payload.transcription.as_deref(), Some("shalom"));
        assert_eq!(payload.language, None);
        assert_eq!(*speech.calls.borrow(), vec![Some("he".to_string())]);
    }
}
