//! Audio storage provider.
use anyhow::{anyhow, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// MIME types accepted as recordings.
pub const AUDIO_MIME_TYPES: [&str; 5] = [
    "audio/mpeg",
    "audio/wav",
    "audio/x-wav",
    "audio/mp4",
    "audio/x-m4a",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFile {
    pub external_id: String,
    pub name: String,
    pub mime_hint: Option<String>,
}

impl AudioFile {
    /// Whether this listing entry is a recording the pipeline should ingest.
    ///
    /// Some providers report `.m4a` uploads under a generic type, so the
    /// extension is accepted on its own.
    pub fn is_audio(&self) -> bool {
        self.mime_hint
            .as_deref()
            .is_some_and(|mime| AUDIO_MIME_TYPES.contains(&mime))
            || self.name.to_lowercase().ends_with(".m4a")
    }
}

pub trait AudioSource {
    fn list_available(&self) -> Result<Vec<AudioFile>>;
    fn download(&self, external_id: &str) -> Result<Vec<u8>>;
}

/// MIME type guessed from a file extension.
pub fn mime_for_name(name: &str) -> Option<&'static str> {
    let ext = Path::new(name).extension()?.to_str()?.to_lowercase();
    match ext.as_str() {
        "mp3" => Some("audio/mpeg"),
        "wav" => Some("audio/wav"),
        "mp4" => Some("audio/mp4"),
        "m4a" => Some("audio/x-m4a"),
        "txt" | "md" => Some("text/plain"),
        "json" => Some("application/json"),
        _ => None,
    }
}

/// Inbox directory of uploaded recordings. The external id is the file name.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    pub fn new(root: PathBuf) -> Result<Self> {
        if !root.is_dir() {
            return Err(anyhow!("audio inbox {} is not a directory", root.display()));
        }
        Ok(DirectorySource { root })
    }
}

impl AudioSource for DirectorySource {
    fn list_available(&self) -> Result<Vec<AudioFile>> {
        let mut files = Vec::new();
        for entry in
            fs::read_dir(&self.root).with_context(|| format!("read {}", self.root.display()))?
        {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            files.push(AudioFile {
                external_id: name.clone(),
                mime_hint: mime_for_name(&name).map(str::to_string),
                name,
            });
        }
        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(files)
    }

    fn download(&self, external_id: &str) -> Result<Vec<u8>> {
        if external_id.is_empty()
            || external_id.contains('/')
            || external_id.contains('\\')
            || external_id == ".."
        {
            return Err(anyhow!("invalid audio id {external_id:?}"));
        }
        let path = self.root.join(external_id);
        fs::read(&path).with_context(|| format!("download {}", path.display()))
    }
}
