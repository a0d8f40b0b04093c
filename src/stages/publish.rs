use crate::collab::{Document, Publisher, Section};
use crate::record::{Outcome, Payload, Status, WorkItem};
use crate::stage::RecordProcessor;
use std::rc::Rc;

pub struct Publish {
    publisher: Rc<dyn Publisher>,
}

impl Publish {
    pub fn new(publisher: Rc<dyn Publisher>) -> Self {
        Publish { publisher }
    }
}

fn summary_document(payload: &Payload) -> Document {
    let mut sections = vec![
        Section {
            heading: "Main Talking Points".to_string(),
            bullets: payload.summary_points.clone().unwrap_or_default(),
            body: None,
        },
        Section {
            heading: "Action Items".to_string(),
            bullets: payload.action_items.clone().unwrap_or_default(),
            body: None,
        },
    ];
    if let Some(full) = payload.full_summary.as_deref() {
        sections.push(Section {
            heading: "Full Summary".to_string(),
            bullets: Vec::new(),
            body: Some(full.to_string()),
        });
    }
    Document {
        heading: "Meeting Summary".to_string(),
        sections,
    }
}

impl RecordProcessor for Publish {
    fn name(&self) -> &'static str {
        "publish"
    }

    fn input(&self) -> Status {
        Status::Summarized
    }

    fn process(&mut self, item: &WorkItem) -> Outcome {
        let title = format!("Summary - {}", item.filename);
        let document = summary_document(&item.payload);
        match self.publisher.create_document(&title, &document) {
            Ok(reference) => Outcome::Advance {
                to: Status::Published,
                payload: Payload {
                    publish_reference: Some(reference),
                    ..Payload::default()
                },
            },
            Err(err) => Outcome::Fail(format!("publish {title:?}: {err:#}")),
        }
    }
}
