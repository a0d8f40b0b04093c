//! The pipeline's processing phases, in run order.
mod cleanup;
mod detect;
mod ingest;
mod publish;
mod summarize;
mod transcribe;

pub use cleanup::Cleanup;
pub use detect::DetectLanguage;
pub use ingest::Ingest;
pub use publish::Publish;
pub use summarize::Summarize;
pub use transcribe::Transcribe;

use crate::collab::AudioSource;
use crate::record::WorkItem;
use anyhow::Result;

/// Download a record's recording, preferring the provider id captured at
/// ingestion over the filename.
fn download_audio(source: &dyn AudioSource, item: &WorkItem) -> Result<Vec<u8>> {
    let external_id = item.external_id.as_deref().unwrap_or(&item.filename);
    source.download(external_id)
}
