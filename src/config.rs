//! Orchestrator configuration.
//!
//! The config is a single JSON file. Relative paths inside it are resolved
//! against the directory that holds the file, so a deployment can be moved as
//! one directory.
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_SCHEMA_VERSION: u32 = 1;
pub const DEFAULT_CONFIG_FILE: &str = "recap.json";
pub const LM_COMMAND_ENV: &str = "RECAP_LM_COMMAND";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub schema_version: u32,
    pub store_path: PathBuf,
    pub lock_path: PathBuf,
    pub log_path: PathBuf,
    pub inbox_dir: PathBuf,
    pub output_dir: PathBuf,
    /// Failed attempts after which an error record is parked. Unset retries
    /// forever.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
    pub speech: SpeechConfig,
    pub lm: LmConfig,
    pub cleanup_models: Vec<String>,
    pub summary_models: Vec<String>,
    #[serde(skip)]
    base_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SpeechConfig {
    /// Command line with `{audio}` and `{language}` placeholders.
    pub command: String,
    #[serde(default = "default_speech_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LmBackend {
    Http,
    Command,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LmConfig {
    pub backend: LmBackend,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Name of the environment variable holding the API key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_lm_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_speech_timeout_secs() -> u64 {
    1800
}

fn default_lm_timeout_secs() -> u64 {
    300
}

fn default_temperature() -> f32 {
    0.4
}

impl Config {
    /// Directory relative paths are resolved against.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn with_base_dir(mut self, base_dir: PathBuf) -> Self {
        self.base_dir = base_dir;
        self
    }

    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir().join(path)
        }
    }

    pub fn store_path(&self) -> PathBuf {
        self.resolve(&self.store_path)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.resolve(&self.lock_path)
    }

    pub fn log_path(&self) -> PathBuf {
        self.resolve(&self.log_path)
    }

    pub fn inbox_dir(&self) -> PathBuf {
        self.resolve(&self.inbox_dir)
    }

    pub fn output_dir(&self) -> PathBuf {
        self.resolve(&self.output_dir)
    }

    pub fn speech_timeout(&self) -> Duration {
        Duration::from_secs(self.speech.timeout_secs)
    }

    pub fn lm_timeout(&self) -> Duration {
        Duration::from_secs(self.lm.timeout_secs)
    }
}

/// Build the config written by `recap init`.
pub fn default_config() -> Config {
    Config {
        schema_version: CONFIG_SCHEMA_VERSION,
        store_path: PathBuf::from("state/records.json"),
        lock_path: PathBuf::from("state/recap.lock"),
        log_path: PathBuf::from("state/recap.log"),
        inbox_dir: PathBuf::from("inbox"),
        output_dir: PathBuf::from("summaries"),
        max_attempts: None,
        speech: SpeechConfig {
            command: "whisper-json {audio} --language {language}".to_string(),
            timeout_secs: default_speech_timeout_secs(),
        },
        lm: LmConfig {
            backend: LmBackend::Http,
            endpoint: Some("https://api.openai.com/v1/chat/completions".to_string()),
            api_key_env: Some("OPENAI_API_KEY".to_string()),
            command: None,
            temperature: default_temperature(),
            timeout_secs: default_lm_timeout_secs(),
        },
        cleanup_models: vec!["gpt-4".to_string(), "gpt-3.5-turbo-16k".to_string()],
        summary_models: vec!["gpt-4".to_string(), "gpt-3.5-turbo-16k".to_string()],
        base_dir: PathBuf::new(),
    }
}

/// Pick the config file: explicit path, then `./recap.json`, then the user
/// config directory. Falls back to `./recap.json` when none exists yet.
pub fn config_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    let local = PathBuf::from(DEFAULT_CONFIG_FILE);
    if local.is_file() {
        return local;
    }
    if let Some(user) = dirs::config_dir().map(|dir| dir.join("recap").join(DEFAULT_CONFIG_FILE)) {
        if user.is_file() {
            return user;
        }
    }
    local
}

/// Load, apply env overrides, and validate the config at `path`.
pub fn load_config(path: &Path) -> Result<Config> {
    let bytes = fs::read(path).with_context(|| format!("read config {}", path.display()))?;
    let config: Config = serde_json::from_slice(&bytes)
        .with_context(|| format!("parse config JSON {}", path.display()))?;
    let base_dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let config = apply_env_overrides(config.with_base_dir(base_dir));
    validate_config(&config)?;
    Ok(config)
}

fn apply_env_overrides(mut config: Config) -> Config {
    if let Ok(raw) = env::var(LM_COMMAND_ENV) {
        if !raw.trim().is_empty() {
            config.lm.backend = LmBackend::Command;
            config.lm.command = Some(raw);
        }
    }
    config
}

/// Persist a config in a stable JSON format.
pub fn write_config(path: &Path, config: &Config) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create config dir {}", parent.display()))?;
        }
    }
    let mut text = serde_json::to_string_pretty(config).context("serialize config")?;
    text.push('\n');
    fs::write(path, text.as_bytes()).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

pub fn validate_config(config: &Config) -> Result<()> {
    if config.schema_version != CONFIG_SCHEMA_VERSION {
        return Err(anyhow!(
            "unsupported config schema_version {}",
            config.schema_version
        ));
    }
    for (name, path) in [
        ("store_path", &config.store_path),
        ("lock_path", &config.lock_path),
        ("log_path", &config.log_path),
        ("inbox_dir", &config.inbox_dir),
        ("output_dir", &config.output_dir),
    ] {
        if path.as_os_str().is_empty() {
            return Err(anyhow!("{name} must be non-empty"));
        }
    }
    if config.max_attempts == Some(0) {
        return Err(anyhow!("max_attempts must be at least 1 when set"));
    }
    if config.speech.command.trim().is_empty() {
        return Err(anyhow!("speech.command must be non-empty"));
    }
    if config.speech.timeout_secs == 0 {
        return Err(anyhow!("speech.timeout_secs must be greater than zero"));
    }
    if config.lm.timeout_secs == 0 {
        return Err(anyhow!("lm.timeout_secs must be greater than zero"));
    }
    match config.lm.backend {
        LmBackend::Http => {
            if non_empty(config.lm.endpoint.as_deref()).is_none() {
                return Err(anyhow!("lm.endpoint is required for the http backend"));
            }
            if non_empty(config.lm.api_key_env.as_deref()).is_none() {
                return Err(anyhow!("lm.api_key_env is required for the http backend"));
            }
        }
        LmBackend::Command => {
            if non_empty(config.lm.command.as_deref()).is_none() {
                return Err(anyhow!(
                    "lm.command is required for the command backend (or set {LM_COMMAND_ENV})"
                ));
            }
        }
    }
    validate_models(&config.cleanup_models, "cleanup_models")?;
    validate_models(&config.summary_models, "summary_models")?;
    Ok(())
}

fn validate_models(models: &[String], field: &str) -> Result<()> {
    if models.is_empty() {
        return Err(anyhow!("{field} must list at least one model"));
    }
    if models.iter().any(|model| model.trim().is_empty()) {
        return Err(anyhow!("{field} contains an empty model id"));
    }
    Ok(())
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
