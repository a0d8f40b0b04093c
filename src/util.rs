use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// Current epoch time in milliseconds for record and run timestamps.
pub fn now_epoch_ms() -> Result<u128> {
    Ok(SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("compute timestamp")?
        .as_millis())
}

pub fn truncate_string(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }
    let mut truncated = String::new();
    for ch in text.chars() {
        if truncated.len() + ch.len_utf8() > max_bytes {
            break;
        }
        truncated.push(ch);
    }
    truncated
}

/// Write bytes next to `dest` and rename them into place.
///
/// Readers observe either the previous file or the new one, never a prefix.
pub fn write_atomic(dest: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    let file_name = dest
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("staged");
    let tmp_path = dest
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(format!(".{file_name}.tmp"));
    fs::write(&tmp_path, bytes).with_context(|| format!("write {}", tmp_path.display()))?;
    fs::rename(&tmp_path, dest).with_context(|| format!("publish {}", dest.display()))?;
    Ok(())
}

/// Lowercase, dash-separated rendering of `text` safe for a file name.
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut pending_dash = false;
    for ch in text.chars() {
        if ch.is_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.extend(ch.to_lowercase());
        } else {
            pending_dash = true;
        }
    }
    if slug.is_empty() {
        slug.push_str("document");
    }
    slug
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_string("héllo", 2), "h");
        assert_eq!(truncate_string("short", 10), "short");
    }

    #[test]
    fn slugify_collapses_separators() {
        assert_eq!(slugify("Summary - a.m4a"), "summary-a-m4a");
        assert_eq!(slugify("  ***  "), "document");
    }

    #[test]
    fn write_atomic_replaces_existing_file() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let dest = dir.path().join("nested").join("table.json");
        write_atomic(&dest, b"first").expect("first write");
        write_atomic(&dest, b"second").expect("second write");
        assert_eq!(fs::read(&dest).expect("read"), b"second");
        assert!(!dest.with_file_name(".table.json.tmp").exists());
    }
}
