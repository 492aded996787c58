//! Configuration management with XDG paths
//!
//! ~/.config/studybuddy/config.json - server host, default selection
//! ~/.local/state/studybuddy/       - Log files
//! ./.ollama/models                 - Project-local model store (OLLAMA_MODELS)

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::prompt::{Choice, EducationLevel, Mode, Subject};

const APP_NAME: &str = "studybuddy";

/// Default Ollama endpoint
pub const DEFAULT_HOST: &str = "http://127.0.0.1:11434";

/// Port Ollama listens on when the address names none
pub const DEFAULT_PORT: u16 = 11434;

/// Env var that redirects the Ollama model store
pub const MODELS_ENV: &str = "OLLAMA_MODELS";

/// Env var that overrides the Ollama address
pub const HOST_ENV: &str = "OLLAMA_HOST";

/// Default lifetime of the in-memory model list
pub const DEFAULT_MODELS_CACHE_SECS: u64 = 30;

/// Get config directory (~/.config/studybuddy/)
pub fn config_dir() -> Result<PathBuf> {
    let base = dirs::config_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join(".config")))
        .context("Could not determine config directory")?;
    Ok(base.join(APP_NAME))
}

/// Get state directory (~/.local/state/studybuddy/)
pub fn state_dir() -> Result<PathBuf> {
    let base = dirs::state_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join(".local/state")))
        .context("Could not determine state directory")?;
    Ok(base.join(APP_NAME))
}

/// Get config file path
pub fn config_path() -> Result<PathBuf> {
    Ok(config_dir()?.join("config.json"))
}

/// Ensure all directories exist
pub fn ensure_dirs() -> Result<()> {
    fs::create_dir_all(config_dir()?)?;
    fs::create_dir_all(state_dir()?)?;
    Ok(())
}

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Ollama server address
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    /// Model to preselect when it is installed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,

    /// Education level label, e.g. "High School"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub education_level: Option<String>,

    /// Subject label, e.g. "Physics"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,

    /// Mode label, e.g. "Generate a Quiz"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,

    /// How long the installed-model list is reused (seconds)
    #[serde(default = "default_models_cache_secs")]
    pub models_cache_secs: u64,
}

fn default_models_cache_secs() -> u64 { DEFAULT_MODELS_CACHE_SECS }

impl Default for Config {
    fn default() -> Self {
        Self {
            host: None,
            default_model: None,
            education_level: None,
            subject: None,
            mode: None,
            models_cache_secs: DEFAULT_MODELS_CACHE_SECS,
        }
    }
}

impl Config {
    /// Load config from disk, or return defaults
    pub fn load() -> Result<Self> {
        ensure_dirs()?;
        Self::load_from(&config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let config: Config = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse {}", path.display()))?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    /// Save config to disk
    pub fn save(&self) -> Result<()> {
        ensure_dirs()?;
        self.save_to(&config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, &content)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    /// Apply `config set <key> <value>`; returns a confirmation line
    pub fn set(&mut self, key: &str, value: &str) -> Result<String> {
        match key {
            "host" => {
                self.host = Some(normalize_host(value));
                Ok(format!("Host set to: {}", value))
            }
            "model" | "default_model" => {
                self.default_model = Some(value.to_string());
                Ok(format!("Default model set to: {}", value))
            }
            "level" | "education_level" => {
                let level: EducationLevel = value.parse()?;
                self.education_level = Some(level.label().to_string());
                Ok(format!("Education level set to: {}", level))
            }
            "subject" => {
                let subject: Subject = value.parse()?;
                self.subject = Some(subject.label().to_string());
                Ok(format!("Subject set to: {}", subject))
            }
            "mode" => {
                let mode: Mode = value.parse()?;
                self.mode = Some(mode.label().to_string());
                Ok(format!("Mode set to: {}", mode))
            }
            "models_cache_secs" => {
                self.models_cache_secs = value
                    .parse()
                    .with_context(|| format!("Not a number of seconds: {}", value))?;
                Ok(format!("Model list cache set to {}s", self.models_cache_secs))
            }
            _ => anyhow::bail!(
                "Unknown config key: {}. Valid keys: host, model, level, subject, mode, models_cache_secs",
                key
            ),
        }
    }
}

/// Resolve the Ollama address: environment first, then config, then default
pub fn resolve_host(cfg: &Config) -> String {
    if let Ok(host) = std::env::var(HOST_ENV) {
        if !host.trim().is_empty() {
            return normalize_host(&host);
        }
    }
    cfg.host
        .as_deref()
        .map(normalize_host)
        .unwrap_or_else(|| DEFAULT_HOST.to_string())
}

/// Turn an `OLLAMA_HOST`-style address into a base URL.
///
/// Without a scheme the address follows Ollama's own rules: `http`, host
/// `127.0.0.1` when empty, port 11434 when absent. With an explicit scheme
/// the URL is taken as written.
///
/// `0.0.0.0` -> `http://0.0.0.0:11434`, `:8080` -> `http://127.0.0.1:8080`
pub fn normalize_host(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        return trimmed.to_string();
    }

    let (authority, path) = match trimmed.find('/') {
        Some(i) => trimmed.split_at(i),
        None => (trimmed, ""),
    };

    // IPv6 literals carry colons inside the brackets
    let (host, port) = match authority.rfind(':') {
        Some(i) if !authority[i..].contains(']') => (&authority[..i], &authority[i + 1..]),
        _ => (authority, ""),
    };
    let host = if host.is_empty() { "127.0.0.1" } else { host };
    let port = if port.is_empty() { DEFAULT_PORT.to_string() } else { port.to_string() };

    format!("http://{}:{}{}", host, port, path)
}

/// Point OLLAMA_MODELS at `<base>/.ollama/models` and create it.
///
/// An OLLAMA_MODELS already present in the environment wins.
pub fn prepare_model_store(base: &Path) -> Result<PathBuf> {
    let dir = match std::env::var_os(MODELS_ENV) {
        Some(existing) if !existing.is_empty() => PathBuf::from(existing),
        _ => {
            let dir = base.join(".ollama").join("models");
            std::env::set_var(MODELS_ENV, &dir);
            dir
        }
    };
    fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create model store {}", dir.display()))?;
    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config::load_from(&dir.path().join("missing.json")).unwrap();
        assert!(cfg.host.is_none());
        assert!(cfg.default_model.is_none());
        assert_eq!(cfg.models_cache_secs, DEFAULT_MODELS_CACHE_SECS);
    }

    #[test]
    fn test_config_roundtrip_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut cfg = Config::load_from(&path).unwrap();
        cfg.set("model", "gemma3").unwrap();
        cfg.set("level", "graduate").unwrap();
        cfg.set("mode", "quiz").unwrap();
        cfg.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.default_model.as_deref(), Some("gemma3"));
        assert_eq!(loaded.education_level.as_deref(), Some("Graduate"));
        assert_eq!(loaded.mode.as_deref(), Some("Generate a Quiz"));
        assert_eq!(loaded.models_cache_secs, DEFAULT_MODELS_CACHE_SECS);
    }

    #[test]
    fn test_config_default_keeps_cache() {
        let cfg = Config::default();
        assert_eq!(cfg.models_cache_secs, DEFAULT_MODELS_CACHE_SECS);
        let parsed: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(parsed.models_cache_secs, cfg.models_cache_secs);
    }

    #[test]
    fn test_config_set_rejects_unknown() {
        let mut cfg = Config::default();
        assert!(cfg.set("colour", "blue").is_err());
        assert!(cfg.set("subject", "astrology").is_err());
        assert!(cfg.set("models_cache_secs", "soon").is_err());
    }

    #[test]
    fn test_normalize_host() {
        assert_eq!(normalize_host("127.0.0.1:11434"), "http://127.0.0.1:11434");
        assert_eq!(normalize_host("http://gpu-box:11434/"), "http://gpu-box:11434");
        assert_eq!(normalize_host(" https://ollama.lan "), "https://ollama.lan");

        // Bare addresses get Ollama's defaults
        assert_eq!(normalize_host("0.0.0.0"), "http://0.0.0.0:11434");
        assert_eq!(normalize_host("localhost"), "http://localhost:11434");
        assert_eq!(normalize_host(":11434"), "http://127.0.0.1:11434");
        assert_eq!(normalize_host(":8080"), "http://127.0.0.1:8080");
        assert_eq!(normalize_host("gpu-box/"), "http://gpu-box:11434");
        assert_eq!(normalize_host("[::1]"), "http://[::1]:11434");
        assert_eq!(normalize_host("[::1]:9000"), "http://[::1]:9000");
    }

    #[test]
    fn test_prepare_model_store_creates_dir() {
        let dir = tempfile::tempdir().unwrap();
        let store = prepare_model_store(dir.path()).unwrap();
        assert!(store.is_dir());
        assert_eq!(std::env::var_os(MODELS_ENV).map(PathBuf::from), Some(store));
    }
}
