//! Installed model directory with caching
//!
//! Decodes whatever listing shape the server returns, dedupes it, surfaces
//! preferred models first and keeps the result for a short while so UI
//! refreshes don't hammer the server.

use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::client::{ClientError, InferenceBackend};

/// Recommended models, highest priority first
pub const PREFERRED_MODELS: &[&str] = &[
    "gemma3:latest",
    "gemma3",
    "gemma2:2b",
    "gemma2",
    "llama3",
    "mistral",
    "deepseek-coder",
];

/// Shown when nothing is installed
pub const INSTALL_COMMANDS: &[&str] = &[
    "ollama pull gemma3",
    "ollama pull llama3",
    "ollama pull deepseek-coder",
];

// ═══════════════════════════════════════════════════════════════
// LISTING DECODE
// ═══════════════════════════════════════════════════════════════

/// Known listing shapes, tried in declaration order
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ModelListing {
    /// Ollama `/api/tags`: `{"models": [...]}`
    Tags { models: Vec<Descriptor> },
    /// OpenAI-compatible `/v1/models`: `{"data": [...]}`
    Data { data: Vec<Descriptor> },
    /// Bare list of names or descriptors
    Flat(Vec<Descriptor>),
}

/// One entry of a listing
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Descriptor {
    Name(String),
    Record(DescriptorRecord),
    /// Anything else (numbers, nulls, nested arrays); skipped
    Unrecognized(serde_json::Value),
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DescriptorRecord {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
}

impl Descriptor {
    /// First non-empty of name, model, id
    pub fn model_name(&self) -> Option<&str> {
        match self {
            Descriptor::Name(name) => Some(name.as_str()).filter(|n| !n.is_empty()),
            Descriptor::Record(rec) => [&rec.name, &rec.model, &rec.id]
                .into_iter()
                .filter_map(|f| f.as_deref())
                .find(|n| !n.is_empty()),
            Descriptor::Unrecognized(_) => None,
        }
    }
}

impl ModelListing {
    pub fn from_json(value: serde_json::Value) -> Result<Self, ClientError> {
        serde_json::from_value(value)
            .map_err(|e| ClientError::Decode(format!("unrecognized model listing: {}", e)))
    }

    fn descriptors(&self) -> &[Descriptor] {
        match self {
            ModelListing::Tags { models } => models,
            ModelListing::Data { data } => data,
            ModelListing::Flat(entries) => entries,
        }
    }

    /// Names in listing order, deduped (first occurrence wins)
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for name in self.descriptors().iter().filter_map(Descriptor::model_name) {
            if !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
        }
        names
    }
}

/// Preferred models first (in preference order), then the rest in input order.
///
/// Duplicates in `names` are dropped.
pub fn prioritize(names: &[String], preferred: &[&str]) -> Vec<String> {
    let mut ordered: Vec<String> = Vec::with_capacity(names.len());

    for p in preferred {
        if names.iter().any(|n| n == p) && !ordered.iter().any(|o| o == p) {
            ordered.push((*p).to_string());
        }
    }

    for name in names {
        if !ordered.contains(name) {
            ordered.push(name.clone());
        }
    }

    ordered
}

/// Decode, dedupe and order a raw listing
pub fn resolve(listing: &ModelListing) -> Vec<String> {
    prioritize(&listing.names(), PREFERRED_MODELS)
}

// ═══════════════════════════════════════════════════════════════
// CATALOG (cached resolver)
// ═══════════════════════════════════════════════════════════════

/// Cached, fail-soft view of the installed models
pub struct ModelCatalog {
    backend: Arc<dyn InferenceBackend>,
    ttl: Duration,
    cached: Option<(Instant, Vec<String>)>,
    last_error: Option<String>,
}

impl ModelCatalog {
    pub fn new(backend: Arc<dyn InferenceBackend>, ttl: Duration) -> Self {
        Self {
            backend,
            ttl,
            cached: None,
            last_error: None,
        }
    }

    /// Ordered model names. Never fails: errors yield an empty list.
    pub async fn list_models(&mut self) -> Vec<String> {
        if let Some((fetched_at, models)) = &self.cached {
            if fetched_at.elapsed() < self.ttl {
                return models.clone();
            }
        }

        match self.backend.list_models().await {
            Ok(listing) => {
                let models = resolve(&listing);
                tracing::debug!(count = models.len(), "fetched model list");
                self.last_error = None;
                self.cached = Some((Instant::now(), models.clone()));
                models
            }
            Err(e) => {
                tracing::warn!(error = %e, "could not list models");
                self.last_error = Some(e.to_string());
                self.cached = None;
                Vec::new()
            }
        }
    }

    /// Drop the cached list; the next call refetches
    pub fn invalidate(&mut self) {
        self.cached = None;
    }

    /// Failure text of the most recent fetch, if it failed
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }
}

// ═══════════════════════════════════════════════════════════════
// HINTS
// ═══════════════════════════════════════════════════════════════

/// Sidebar guidance about the model choice
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelHint {
    Recommended(String),
    Suggest(String),
    NoneInstalled { server_down: bool },
}

impl ModelHint {
    pub fn lines(&self) -> Vec<String> {
        match self {
            ModelHint::Recommended(s) | ModelHint::Suggest(s) => vec![s.clone()],
            ModelHint::NoneInstalled { server_down } => {
                let mut lines = vec![
                    "No Ollama models found.".to_string(),
                    "Install Gemma3 (recommended):".to_string(),
                    format!("  {}", INSTALL_COMMANDS[0]),
                    "Or other models:".to_string(),
                ];
                lines.extend(INSTALL_COMMANDS[1..].iter().map(|c| format!("  {}", c)));
                if *server_down {
                    lines.push("Make sure Ollama is running: `ollama serve`".to_string());
                }
                lines
            }
        }
    }
}

pub fn model_hint(selected: Option<&str>, available: &[String], server_down: bool) -> Option<ModelHint> {
    if available.is_empty() {
        return Some(ModelHint::NoneInstalled { server_down });
    }

    let selected = selected?.to_lowercase();
    if selected.contains("gemma3") {
        Some(ModelHint::Recommended("Using Gemma3 - Excellent choice!".into()))
    } else if selected.contains("deepseek-coder") {
        Some(ModelHint::Recommended(
            "Using DeepSeek Coder - Great for coding tasks!".into(),
        ))
    } else if !available.iter().any(|m| m.to_lowercase().contains("gemma3")) {
        Some(ModelHint::Suggest(
            "Install Gemma3 for better performance: `ollama pull gemma3`".into(),
        ))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn names(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_decode_tags_shape() {
        let listing = ModelListing::from_json(json!({
            "models": [
                {"name": "llama3:latest", "model": "llama3:latest", "size": 1},
                {"model": "gemma3"},
                {"id": "mistral"},
                {"size": 42}
            ]
        }))
        .unwrap();
        assert_eq!(listing.names(), names(&["llama3:latest", "gemma3", "mistral"]));
    }

    #[test]
    fn test_decode_data_and_flat_shapes() {
        let data = ModelListing::from_json(json!({"data": [{"id": "a"}, {"id": "b"}]})).unwrap();
        assert_eq!(data.names(), names(&["a", "b"]));

        let flat = ModelListing::from_json(json!(["a", {"name": "b"}, 7, null, "a"])).unwrap();
        assert_eq!(flat.names(), names(&["a", "b"]));
    }

    #[test]
    fn test_decode_rejects_unknown_shape() {
        let err = ModelListing::from_json(json!({"models": "nope"})).unwrap_err();
        assert!(matches!(err, ClientError::Decode(_)));
        assert!(ModelListing::from_json(json!(12)).is_err());
    }

    #[test]
    fn test_empty_name_falls_through() {
        let listing = ModelListing::from_json(json!([{"name": "", "model": "phi3"}, ""])).unwrap();
        assert_eq!(listing.names(), names(&["phi3"]));
    }

    #[test]
    fn test_prioritize_preferred_first() {
        let fetched = names(&["phi3", "mistral", "gemma3", "qwen2"]);
        let ordered = prioritize(&fetched, PREFERRED_MODELS);
        assert_eq!(ordered, names(&["gemma3", "mistral", "phi3", "qwen2"]));
    }

    #[test]
    fn test_prioritize_is_idempotent() {
        let fetched = names(&["phi3", "llama3", "gemma3:latest", "gemma3"]);
        let once = prioritize(&fetched, PREFERRED_MODELS);
        let twice = prioritize(&once, PREFERRED_MODELS);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_prioritize_passthrough_without_preferred() {
        let fetched = names(&["qwen2", "phi3", "qwen2", "tinyllama"]);
        let ordered = prioritize(&fetched, PREFERRED_MODELS);
        assert_eq!(ordered, names(&["qwen2", "phi3", "tinyllama"]));
    }

    #[test]
    fn test_model_hints() {
        let installed = names(&["gemma3:latest", "deepseek-coder:6.7b"]);
        assert!(matches!(
            model_hint(Some("gemma3:latest"), &installed, false),
            Some(ModelHint::Recommended(s)) if s.contains("Gemma3")
        ));
        assert!(matches!(
            model_hint(Some("deepseek-coder:6.7b"), &installed, false),
            Some(ModelHint::Recommended(s)) if s.contains("DeepSeek")
        ));

        let no_gemma = names(&["llama3"]);
        assert!(matches!(
            model_hint(Some("llama3"), &no_gemma, false),
            Some(ModelHint::Suggest(s)) if s.contains("ollama pull gemma3")
        ));

        let empty = model_hint(None, &[], true).unwrap();
        let lines = empty.lines();
        assert!(lines.iter().any(|l| l.contains("ollama pull llama3")));
        assert!(lines.iter().any(|l| l.contains("ollama serve")));
    }
}
