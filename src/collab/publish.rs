//! Document-publishing service.
use crate::util::{slugify, write_atomic};
use anyhow::{anyhow, Result};
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub heading: String,
    pub bullets: Vec<String>,
    pub body: Option<String>,
}

/// Structured document content, independent of the publishing backend.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Document {
    pub heading: String,
    pub sections: Vec<Section>,
}

impl Document {
    pub fn to_markdown(&self, title: &str) -> String {
        let mut out = format!("# {title}\n\n");
        if !self.heading.is_empty() {
            out.push_str(&format!("{}\n\n", self.heading));
        }
        for section in &self.sections {
            out.push_str(&format!("## {}\n\n", section.heading));
            for bullet in &section.bullets {
                out.push_str(&format!("- {bullet}\n"));
            }
            if !section.bullets.is_empty() {
                out.push('\n');
            }
            if let Some(body) = section.body.as_deref() {
                out.push_str(body.trim());
                out.push_str("\n\n");
            }
        }
        out.truncate(out.trim_end().len());
        out.push('\n');
        out
    }
}

pub trait Publisher {
    /// Create a document and return a reference to it.
    fn create_document(&self, title: &str, document: &Document) -> Result<String>;
}

/// Writes each document as a Markdown file under `output_dir`.
///
/// Existing documents are never overwritten; a repeated title gets a numeric
/// suffix.
#[derive(Debug, Clone)]
pub struct MarkdownPublisher {
    output_dir: PathBuf,
}

impl MarkdownPublisher {
    pub fn new(output_dir: PathBuf) -> Self {
        MarkdownPublisher { output_dir }
    }

    fn free_path(&self, title: &str) -> Result<PathBuf> {
        let slug = slugify(title);
        for n in 1..1000 {
            let name = if n == 1 {
                format!("{slug}.md")
            } else {
                format!("{slug}-{n}.md")
            };
            let path = self.output_dir.join(name);
            if !path.exists() {
                return Ok(path);
            }
        }
        Err(anyhow!("no free document name for {title:?}"))
    }
}

impl Publisher for MarkdownPublisher {
    fn create_document(&self, title: &str, document: &Document) -> Result<String> {
        let path = self.free_path(title)?;
        write_atomic(&path, document.to_markdown(title).as_bytes())?;
        Ok(path.display().to_string())
    }
}
