//! Work records and the status machine that moves them through the pipeline.
//!
//! A record's `status` decides which stage may claim it next. Every write goes
//! through [`apply`], which checks the transition table and hands the store a
//! single [`FieldDelta`] so status and payload change together.
use crate::store::RecordStore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Closed set of record statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    New,
    LanguageDetected,
    Transcribed,
    Cleaned,
    Summarized,
    Published,
    Error,
}

impl Status {
    pub const ALL: [Status; 7] = [
        Status::New,
        Status::LanguageDetected,
        Status::Transcribed,
        Status::Cleaned,
        Status::Summarized,
        Status::Published,
        Status::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::New => "new",
            Status::LanguageDetected => "language_detected",
            Status::Transcribed => "transcribed",
            Status::Cleaned => "cleaned",
            Status::Summarized => "summarized",
            Status::Published => "published",
            Status::Error => "error",
        }
    }

    /// Forward edge of the transition table. `Published` and `Error` have none.
    pub fn next(self) -> Option<Status> {
        match self {
            Status::New => Some(Status::LanguageDetected),
            Status::LanguageDetected => Some(Status::Transcribed),
            Status::Transcribed => Some(Status::Cleaned),
            Status::Cleaned => Some(Status::Summarized),
            Status::Summarized => Some(Status::Published),
            Status::Published | Status::Error => None,
        }
    }

    /// Payload fields a stage consuming this status needs before it may run.
    pub fn required_inputs(self) -> &'static [Field] {
        match self {
            Status::New => &[],
            Status::LanguageDetected => &[Field::Language],
            Status::Transcribed => &[Field::Transcription],
            Status::Cleaned => &[Field::CleanedText],
            Status::Summarized => &[Field::FullSummary, Field::SummaryPoints, Field::ActionItems],
            Status::Published | Status::Error => &[],
        }
    }

    /// Payload fields a transition into this status must produce.
    pub fn produced_fields(self) -> &'static [Field] {
        match self {
            Status::New | Status::Error => &[],
            Status::LanguageDetected => &[Field::Language],
            Status::Transcribed => &[Field::Transcription],
            Status::Cleaned => &[Field::CleanedText],
            Status::Summarized => &[Field::FullSummary, Field::SummaryPoints, Field::ActionItems],
            Status::Published => &[Field::PublishReference],
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = TransitionError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Status::ALL
            .into_iter()
            .find(|status| status.as_str() == raw)
            .ok_or_else(|| TransitionError::UnknownStatus(raw.to_string()))
    }
}

/// Named payload fields, used for readiness checks and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Language,
    Transcription,
    CleanedText,
    SummaryPoints,
    ActionItems,
    FullSummary,
    PublishReference,
}

impl Field {
    pub fn as_str(&self) -> &'static str {
        match self {
            Field::Language => "language",
            Field::Transcription => "transcription",
            Field::CleanedText => "cleaned_text",
            Field::SummaryPoints => "summary_points",
            Field::ActionItems => "action_items",
            Field::FullSummary => "full_summary",
            Field::PublishReference => "publish_reference",
        }
    }
}

/// Stage-produced fields. `None` means "not set" on a record and "leave
/// untouched" in a delta.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcription: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cleaned_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary_points: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_items: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publish_reference: Option<String>,
}

impl Payload {
    pub fn has(&self, field: Field) -> bool {
        fn text(value: &Option<String>) -> bool {
            value.as_deref().is_some_and(|v| !v.trim().is_empty())
        }
        fn list(value: &Option<Vec<String>>) -> bool {
            value.as_ref().is_some_and(|v| !v.is_empty())
        }
        match field {
            Field::Language => text(&self.language),
            Field::Transcription => text(&self.transcription),
            Field::CleanedText => text(&self.cleaned_text),
            Field::SummaryPoints => list(&self.summary_points),
            Field::ActionItems => list(&self.action_items),
            Field::FullSummary => text(&self.full_summary),
            Field::PublishReference => text(&self.publish_reference),
        }
    }

    /// Overlay every field set in `delta`.
    pub fn merge(&mut self, delta: &Payload) {
        fn take<T: Clone>(slot: &mut Option<T>, value: &Option<T>) {
            if let Some(value) = value {
                *slot = Some(value.clone());
            }
        }
        take(&mut self.language, &delta.language);
        take(&mut self.transcription, &delta.transcription);
        take(&mut self.cleaned_text, &delta.cleaned_text);
        take(&mut self.summary_points, &delta.summary_points);
        take(&mut self.action_items, &delta.action_items);
        take(&mut self.full_summary, &delta.full_summary);
        take(&mut self.publish_reference, &delta.publish_reference);
    }
}

/// One audio recording's processing record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkItem {
    pub id: u64,
    pub filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    pub status: Status,
    #[serde(default)]
    pub payload: Payload,
    #[serde(default)]
    pub error_message: String,
    /// Input status of the stage whose attempt left this record in `error`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_from: Option<Status>,
    #[serde(default)]
    pub attempts: u32,
    pub created_at_epoch_ms: u128,
    pub updated_at_epoch_ms: u128,
}

impl WorkItem {
    /// Payload fields the stage consuming `input` needs but this record lacks.
    pub fn missing_inputs(&self, input: Status) -> Vec<Field> {
        input
            .required_inputs()
            .iter()
            .copied()
            .filter(|field| !self.payload.has(*field))
            .collect()
    }

    pub(crate) fn apply_delta(&mut self, delta: &FieldDelta, now_epoch_ms: u128) {
        self.status = delta.status;
        self.payload.merge(&delta.payload);
        self.error_message = delta.error_message.clone();
        self.failed_from = delta.failed_from;
        self.attempts = delta.attempts;
        self.updated_at_epoch_ms = now_epoch_ms;
    }
}

/// Fields for a record created by ingestion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewWorkItem {
    pub filename: String,
    pub external_id: Option<String>,
}

/// Everything one transition writes, applied by the store in one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDelta {
    pub status: Status,
    pub payload: Payload,
    pub error_message: String,
    pub failed_from: Option<Status>,
    pub attempts: u32,
}

/// Per-record result reported by a stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Advance { to: Status, payload: Payload },
    Fail(String),
    /// Required inputs absent; the record is left as-is.
    Skip(String),
}

/// What [`apply`] did to the record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    Advanced(WorkItem),
    Failed(WorkItem),
    Skipped(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("unknown status {0:?}")]
    UnknownStatus(String),
    #[error("record {id} is {status} and not eligible for the {input} stage")]
    NotEligible { id: u64, status: Status, input: Status },
    #[error("undefined transition {from} -> {to}")]
    Undefined { from: Status, to: Status },
    #[error("transition to {to} is missing payload field {field}")]
    MissingPayload { to: Status, field: &'static str },
}

#[derive(Debug, Error)]
pub enum ApplyError {
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Error records that will not be re-offered once they reach the cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: Option<u32>,
}

impl RetryPolicy {
    #[cfg(test)]
    pub const UNLIMITED: RetryPolicy = RetryPolicy { max_attempts: None };

    pub fn is_parked(&self, item: &WorkItem) -> bool {
        item.status == Status::Error
            && self
                .max_attempts
                .is_some_and(|max| item.attempts >= max)
    }
}

/// Records offered to the stage consuming `input`.
#[derive(Debug, Default)]
pub struct Eligible {
    pub ready: Vec<WorkItem>,
    /// Error records held back by the retry cap.
    pub parked: Vec<WorkItem>,
}

/// Whether the stage consuming `input` may claim this record.
///
/// An `error` record belongs to the stage that failed it. A record in `error`
/// with no recorded origin is offered to every stage.
pub fn is_eligible(item: &WorkItem, input: Status) -> bool {
    match item.status {
        Status::Error => !matches!(item.failed_from, Some(origin) if origin != input),
        status => status == input,
    }
}

pub fn select_eligible(
    store: &dyn RecordStore,
    input: Status,
    policy: RetryPolicy,
) -> anyhow::Result<Eligible> {
    let mut eligible = Eligible::default();
    for item in store.select(&[input, Status::Error])? {
        if !is_eligible(&item, input) {
            continue;
        }
        if policy.is_parked(&item) {
            eligible.parked.push(item);
        } else {
            eligible.ready.push(item);
        }
    }
    Ok(eligible)
}

/// Check an outcome against the transition table and build its delta.
pub fn plan_transition(
    item: &WorkItem,
    input: Status,
    outcome: &Outcome,
) -> Result<Option<FieldDelta>, TransitionError> {
    if !is_eligible(item, input) {
        return Err(TransitionError::NotEligible {
            id: item.id,
            status: item.status,
            input,
        });
    }
    match outcome {
        Outcome::Skip(_) => Ok(None),
        Outcome::Advance { to, payload } => {
            if input.next() != Some(*to) {
                return Err(TransitionError::Undefined {
                    from: item.status,
                    to: *to,
                });
            }
            if let Some(field) = to
                .produced_fields()
                .iter()
                .find(|field| !payload.has(**field))
            {
                return Err(TransitionError::MissingPayload {
                    to: *to,
                    field: field.as_str(),
                });
            }
            Ok(Some(FieldDelta {
                status: *to,
                payload: payload.clone(),
                error_message: String::new(),
                failed_from: None,
                attempts: 0,
            }))
        }
        Outcome::Fail(message) => {
            if input.next().is_none() {
                return Err(TransitionError::Undefined {
                    from: item.status,
                    to: Status::Error,
                });
            }
            let message = message.trim();
            let error_message = if message.is_empty() {
                "unknown error".to_string()
            } else {
                message.to_string()
            };
            Ok(Some(FieldDelta {
                status: Status::Error,
                payload: Payload::default(),
                error_message,
                failed_from: Some(input),
                attempts: item.attempts.saturating_add(1),
            }))
        }
    }
}

/// Write one stage outcome for one record.
///
/// The delta reaches the store in a single `update`, so a record is never
/// observed with the new status but the old payload, or the reverse.
pub fn apply(
    store: &mut dyn RecordStore,
    item: &WorkItem,
    input: Status,
    outcome: Outcome,
) -> Result<Applied, ApplyError> {
    let Some(delta) = plan_transition(item, input, &outcome)? else {
        let reason = match outcome {
            Outcome::Skip(reason) => reason,
            _ => String::new(),
        };
        return Ok(Applied::Skipped(reason));
    };
    let failed = delta.status == Status::Error;
    let updated = store.update(item.id, &delta)?;
    Ok(if failed {
        Applied::Failed(updated)
    } else {
        Applied::Advanced(updated)
    })
}

#[cfg(test)]
#[path = "record_tests.rs"]
mod tests;
