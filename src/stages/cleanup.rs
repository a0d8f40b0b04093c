use crate::cascade::ModelCascade;
use crate::collab::LanguageModel;
use crate::record::{Outcome, Payload, Status, WorkItem};
use crate::stage::RecordProcessor;
use std::rc::Rc;

const CLEANUP_PROMPT: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/prompts/cleanup.md"));

/// Linguistic repair of the raw transcript.
pub struct Cleanup {
    lm: Rc<dyn LanguageModel>,
    cascade: ModelCascade,
}

impl Cleanup {
    pub fn new(lm: Rc<dyn LanguageModel>, cascade: ModelCascade) -> Self {
        Cleanup { lm, cascade }
    }
}

impl RecordProcessor for Cleanup {
    fn name(&self) -> &'static str {
        "cleanup"
    }

    fn input(&self) -> Status {
        Status::Transcribed
    }

    fn process(&mut self, item: &WorkItem) -> Outcome {
        let transcription = item.payload.transcription.as_deref().unwrap_or_default();
        match self
            .cascade
            .complete(self.lm.as_ref(), CLEANUP_PROMPT, transcription)
        {
            Ok(output) => {
                tracing::debug!(record_id = item.id, model = %output.model, "transcript cleaned");
                Outcome::Advance {
                    to: Status::Cleaned,
                    payload: Payload {
                        cleaned_text: Some(output.text),
                        ..Payload::default()
                    },
                }
            }
            Err(err) => Outcome::Fail(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::fakes::{capacity, other, ScriptedLm};
    use crate::store::memory::MemoryStore;

    fn transcribed(store: &mut MemoryStore) -> WorkItem {
        store.seed(
            "a.m4a",
            Status::Transcribed,
            Payload {
                transcription: Some("helo wrld".to_string()),
                ..Payload::default()
            },
        )
    }

    fn cascade() -> ModelCascade {
        ModelCascade::new(vec!["gpt-4".to_string(), "gpt-3.5-turbo-16k".to_string()])
            .expect("cascade")
    }

    #[test]
    fn secondary_model_output_is_kept_after_capacity_failure() {
        let mut store = MemoryStore::new();
        let item = transcribed(&mut store);
        let lm = Rc::new(
            ScriptedLm::default()
                .reply(Err(capacity("gpt-4")))
                .reply(Ok("hello world")),
        );
        let mut stage = Cleanup::new(lm, cascade());

        let outcome = stage.process(&item);
        assert_eq!(
            outcome,
            Outcome::Advance {
                to: Status::Cleaned,
                payload: Payload {
                    cleaned_text: Some("hello world".to_string()),
                    ..Payload::default()
                },
            }
        );
    }

    #[test]
    fn non_capacity_failure_fails_the_record() {
        let mut store = MemoryStore::new();
        let item = transcribed(&mut store);
        let lm = Rc::new(ScriptedLm::default().reply(Err(other("gpt-4", "request timed out"))));
        let mut stage = Cleanup::new(lm.clone(), cascade());

        let Outcome::Fail(message) = stage.process(&item) else {
            panic!("expected failure");
        };
        assert!(message.contains("request timed out"), "{message}");
        assert_eq!(lm.calls.borrow().len(), 1);
    }
}
