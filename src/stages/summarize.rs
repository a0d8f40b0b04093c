use crate::cascade::ModelCascade;
use crate::collab::LanguageModel;
use crate::record::{Outcome, Payload, Status, WorkItem};
use crate::stage::RecordProcessor;
use anyhow::{Context, Result};
use regex::Regex;
use std::rc::Rc;

const SUMMARY_PROMPT: &str =
    include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/prompts/summarize.md"));

/// Splits a markdown summary into talking points and action items.
pub struct SummaryParser {
    points_header: Regex,
    actions_header: Regex,
    bullet: Regex,
    /// A list item opener. Bold markers (`**`) do not count.
    list_marker: Regex,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ParsedSummary {
    pub talking_points: Vec<String>,
    pub action_items: Vec<String>,
}

enum Section {
    None,
    Points,
    Actions,
}

impl SummaryParser {
    pub fn new() -> Result<Self> {
        Ok(SummaryParser {
            points_header: Regex::new(r"(?i)main\s+talking\s+points")
                .context("compile talking points pattern")?,
            actions_header: Regex::new(r"(?i)action\s+items").context("compile action items pattern")?,
            bullet: Regex::new(r"^\s*(?:[-•*]+|\d+[.)])\s*").context("compile bullet pattern")?,
            list_marker: Regex::new(r"^\s*(?:[-•]|\*\s|\d+[.)])")
                .context("compile list marker pattern")?,
        })
    }

    pub fn parse(&self, summary: &str) -> ParsedSummary {
        let mut parsed = ParsedSummary::default();
        let mut section = Section::None;
        for line in summary.lines() {
            if line.trim().is_empty() {
                continue;
            }
            if self.actions_header.is_match(line) && self.is_header(line) {
                section = Section::Actions;
                continue;
            }
            if self.points_header.is_match(line) && self.is_header(line) {
                section = Section::Points;
                continue;
            }
            let item = self.bullet.replace(line, "");
            let item = item.trim().trim_matches('*').trim();
            if item.is_empty() {
                continue;
            }
            match section {
                Section::Points => parsed.talking_points.push(item.to_string()),
                Section::Actions => parsed.action_items.push(item.to_string()),
                Section::None => {}
            }
        }
        parsed
    }

    /// A header line is short and carries no bullet text beyond its title.
    fn is_header(&self, line: &str) -> bool {
        if self.list_marker.is_match(line) {
            return false;
        }
        let stripped = line
            .trim()
            .trim_start_matches('#')
            .trim()
            .trim_matches('*')
            .trim()
            .trim_end_matches(':')
            .trim();
        stripped.split_whitespace().count() <= 4
    }
}

/// Meeting summary with talking points and action items.
pub struct Summarize {
    lm: Rc<dyn LanguageModel>,
    cascade: ModelCascade,
    parser: SummaryParser,
}

impl Summarize {
    pub fn new(lm: Rc<dyn LanguageModel>, cascade: ModelCascade) -> Result<Self> {
        Ok(Summarize {
            lm,
            cascade,
            parser: SummaryParser::new()?,
        })
    }
}

impl RecordProcessor for Summarize {
    fn name(&self) -> &'static str {
        "summarize"
    }

    fn input(&self) -> Status {
        Status::Cleaned
    }

    fn process(&mut self, item: &WorkItem) -> Outcome {
        let text = item.payload.cleaned_text.as_deref().unwrap_or_default();
        let output = match self.cascade.complete(self.lm.as_ref(), SUMMARY_PROMPT, text) {
            Ok(output) => output,
            Err(err) => return Outcome::Fail(err.to_string()),
        };
        let parsed = self.parser.parse(&output.text);
        if parsed.talking_points.is_empty() || parsed.action_items.is_empty() {
            return Outcome::Fail(format!(
                "could not extract talking points and action items from {} output",
                output.model
            ));
        }
        Outcome::Advance {
            to: Status::Summarized,
            payload: Payload {
                summary_points: Some(parsed.talking_points),
                action_items: Some(parsed.action_items),
                full_summary: Some(output.text),
                ..Payload::default()
            },
        }
    }
}
