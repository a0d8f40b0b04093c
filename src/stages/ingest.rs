use crate::collab::AudioSource;
use crate::record::{NewWorkItem, Status};
use crate::stage::{Stage, StageReport};
use crate::store::RecordStore;
use std::collections::BTreeSet;
use std::rc::Rc;

/// Creates a `new` record for every recording the store has not seen.
pub struct Ingest {
    source: Rc<dyn AudioSource>,
}

impl Ingest {
    pub fn new(source: Rc<dyn AudioSource>) -> Self {
        Ingest { source }
    }
}

impl Stage for Ingest {
    fn name(&self) -> &str {
        "ingest"
    }

    fn run(&mut self, store: &mut dyn RecordStore) -> StageReport {
        let mut report = StageReport::new(self.name());
        let listing = match self.source.list_available() {
            Ok(listing) => listing,
            Err(err) => {
                tracing::error!(stage = "ingest", error = %format!("{err:#}"), "list audio source");
                return report.fatal(&err.context("list audio source"));
            }
        };
        let known: BTreeSet<String> = match store.select(&Status::ALL) {
            Ok(items) => items.into_iter().map(|item| item.filename).collect(),
            Err(err) => return report.fatal(&err.context("read existing records")),
        };

        let mut seen = BTreeSet::new();
        let fresh: Vec<_> = listing
            .into_iter()
            .filter(|file| file.is_audio())
            .filter(|file| !known.contains(&file.name))
            .filter(|file| seen.insert(file.name.clone()))
            .collect();
        tracing::info!(stage = "ingest", count = fresh.len(), "new audio files found");

        for file in fresh {
            let new_item = NewWorkItem {
                filename: file.name.clone(),
                external_id: Some(file.external_id),
            };
            match store.insert(new_item) {
                Ok(item) => {
                    report.advanced += 1;
                    tracing::info!(
                        stage = "ingest",
                        record_id = item.id,
                        filename = %item.filename,
                        "record created"
                    );
                }
                Err(err) => return report.fatal(&err.context(format!("insert {}", file.name))),
            }
        }
        report
    }
}
