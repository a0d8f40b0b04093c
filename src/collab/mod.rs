//! Narrow interfaces to the services the pipeline depends on, plus the
//! adapters the binary ships with.
pub mod audio;
pub mod lm;
pub mod publish;
pub mod speech;

#[cfg(test)]
pub(crate) mod fakes;

pub use audio::{AudioSource, DirectorySource};
pub use lm::{CommandLanguageModel, HttpLanguageModel, LanguageModel, LmError};
pub use publish::{Document, MarkdownPublisher, Publisher, Section};
pub use speech::{CommandSpeech, SpeechToText};
