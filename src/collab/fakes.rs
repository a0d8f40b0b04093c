//! In-process collaborators for stage and pipeline tests.
use super::audio::AudioFile;
use super::speech::Transcript;
use super::{AudioSource, Document, LanguageModel, LmError, Publisher, SpeechToText};
use anyhow::{anyhow, Result};
use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};

#[derive(Default)]
pub struct FakeSource {
    pub files: Vec<AudioFile>,
    pub contents: BTreeMap<String, Vec<u8>>,
    pub unreachable: bool,
}

impl FakeSource {
    pub fn with_file(mut self, name: &str, bytes: &[u8]) -> Self {
        self.files.push(AudioFile {
            external_id: format!("id-{name}"),
            name: name.to_string(),
            mime_hint: super::audio::mime_for_name(name).map(str::to_string),
        });
        self.contents.insert(format!("id-{name}"), bytes.to_vec());
        self
    }
}

impl AudioSource for FakeSource {
    fn list_available(&self) -> Result<Vec<AudioFile>> {
        if self.unreachable {
            return Err(anyhow!("storage provider unreachable"));
        }
        Ok(self.files.clone())
    }

    fn download(&self, external_id: &str) -> Result<Vec<u8>> {
        self.contents
            .get(external_id)
            .cloned()
            .ok_or_else(|| anyhow!("no file with id {external_id}"))
    }
}

/// Returns the audio bytes as the transcript text.
pub struct EchoSpeech {
    pub language: String,
    pub calls: RefCell<Vec<Option<String>>>,
}

impl EchoSpeech {
    pub fn new(language: &str) -> Self {
        EchoSpeech {
            language: language.to_string(),
            calls: RefCell::new(Vec::new()),
        }
    }
}

impl SpeechToText for EchoSpeech {
    fn transcribe(&self, audio: &[u8], language_hint: Option<&str>) -> Result<Transcript> {
        self.calls
            .borrow_mut()
            .push(language_hint.map(str::to_string));
        Ok(Transcript {
            text: String::from_utf8_lossy(audio).to_string(),
            language: self.language.clone(),
        })
    }
}

/// Plays back queued replies and records every model it was asked for.
#[derive(Default)]
pub struct ScriptedLm {
    pub replies: RefCell<VecDeque<Result<String, LmError>>>,
    pub calls: RefCell<Vec<String>>,
}

impl ScriptedLm {
    pub fn reply(self, reply: Result<&str, LmError>) -> Self {
        self.replies
            .borrow_mut()
            .push_back(reply.map(str::to_string));
        self
    }
}

impl LanguageModel for ScriptedLm {
    fn complete(&self, _system: &str, user: &str, model: &str) -> Result<String, LmError> {
        self.calls.borrow_mut().push(model.to_string());
        self.replies
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| Ok(format!("{user} (via {model})")))
    }
}

pub fn capacity(model: &str) -> LmError {
    LmError::Capacity {
        model: model.to_string(),
        message: "maximum context length exceeded".to_string(),
    }
}

pub fn other(model: &str, message: &str) -> LmError {
    LmError::Other {
        model: model.to_string(),
        message: message.to_string(),
    }
}

#[derive(Default)]
pub struct RecordingPublisher {
    pub documents: RefCell<Vec<(String, Document)>>,
    pub fail: bool,
}

impl Publisher for RecordingPublisher {
    fn create_document(&self, title: &str, document: &Document) -> Result<String> {
        if self.fail {
            return Err(anyhow!("publishing service rejected the document"));
        }
        let mut documents = self.documents.borrow_mut();
        documents.push((title.to_string(), document.clone()));
        Ok(format!("doc-{}", documents.len()))
    }
}
