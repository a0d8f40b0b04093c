//! Shared test infrastructure for integration tests.
//!
//! Each fixture is a throwaway deployment directory: a config, an inbox, and
//! shell-script stand-ins for the speech engine and the language model.

use serde_json::{json, Value};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

/// Prints the audio file's contents as the transcript.
const SPEECH_STUB: &str = r#"#!/bin/sh
text=$(cat "$1")
printf '{"text": "%s", "language": "en"}\n' "$text"
"#;

/// Answers summary prompts with two sections and everything else with a
/// cleaned transcript. The first model in a cascade can be made to hit a
/// rate limit by creating `lm_at_capacity` next to the script.
const LM_STUB: &str = r###"#!/bin/sh
model="$1"
prompt=$(cat)
dir=$(dirname "$0")
if [ -f "$dir/lm_at_capacity" ] && [ "$model" = "gpt-4" ]; then
    echo "Rate limit reached for $model" >&2
    exit 1
fi
echo "$model" >> "$dir/lm_calls.log"
case "$prompt" in
    *"## Action Items"*)
        printf '## Main Talking Points\n- Budget approved\n\n## Action Items\n- Send the report\n'
        ;;
    *)
        printf 'Cleaned transcript.\n'
        ;;
esac
"###;

pub struct Fixture {
    pub dir: TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("create fixture dir");
        let root = dir.path();
        fs::create_dir_all(root.join("inbox")).expect("create inbox");
        let speech = write_script(root, "speech.sh", SPEECH_STUB);
        let lm = write_script(root, "lm.sh", LM_STUB);
        let config = json!({
            "schema_version": 1,
            "store_path": "state/records.json",
            "lock_path": "state/recap.lock",
            "log_path": "state/recap.log",
            "inbox_dir": "inbox",
            "output_dir": "summaries",
            "speech": {
                "command": format!("{} {{audio}} {{language}}", speech.display()),
                "timeout_secs": 30
            },
            "lm": {
                "backend": "command",
                "command": format!("{} {{model}}", lm.display()),
                "timeout_secs": 30
            },
            "cleanup_models": ["gpt-4", "gpt-3.5-turbo-16k"],
            "summary_models": ["gpt-4"]
        });
        let text = serde_json::to_string_pretty(&config).expect("serialize config");
        fs::write(root.join("recap.json"), text).expect("write config");
        Fixture { dir }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn config_path(&self) -> PathBuf {
        self.root().join("recap.json")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.root().join("state").join("recap.lock")
    }

    pub fn store_path(&self) -> PathBuf {
        self.root().join("state").join("records.json")
    }

    pub fn add_recording(&self, name: &str, spoken: &str) {
        fs::write(self.root().join("inbox").join(name), spoken).expect("write recording");
    }

    /// Run `recap <args> --config <fixture config>`.
    pub fn recap(&self, args: &[&str]) -> Output {
        Command::new(env!("CARGO_BIN_EXE_recap"))
            .args(args)
            .arg("--config")
            .arg(self.config_path())
            .env_remove("RECAP_LM_COMMAND")
            .env("RECAP_LOG", "debug")
            .output()
            .expect("spawn recap")
    }

    pub fn records(&self) -> Vec<Value> {
        let text = fs::read_to_string(self.store_path()).expect("read record store");
        let table: Value = serde_json::from_str(&text).expect("parse record store");
        table["records"].as_array().cloned().unwrap_or_default()
    }

    pub fn lm_calls(&self) -> Vec<String> {
        fs::read_to_string(self.root().join("lm_calls.log"))
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }
}

fn write_script(root: &Path, name: &str, body: &str) -> PathBuf {
    let path = root.join(name);
    fs::write(&path, body).expect("write stub script");
    let mut perms = fs::metadata(&path).expect("stat stub").permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).expect("chmod stub");
    path
}

pub fn stdout_json(output: &Output) -> Value {
    assert!(
        output.status.success(),
        "recap failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("parse stdout JSON")
}
