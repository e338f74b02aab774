//! Keyword model loading
//!
//! Models are small per-locale artifacts: the activation phrases plus a
//! scoring template per phrase. A registry maps requested locales to model
//! specs with fallback, and a loader turns a spec into a loaded model. The
//! loaded model persists across listening toggles; only an explicit locale
//! change reloads.

use crate::error::VoicegateError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Lifecycle of the keyword model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelLoadState {
    Unloaded,
    Loading,
    Ready,
    Failed,
}

/// What to load for one locale.
#[derive(Debug, Clone)]
pub struct ModelSpec {
    /// Resolved locale, after registry fallback.
    pub locale: String,
    /// Model file, when the deployment ships one. `None` means the loader
    /// synthesizes a model from the built-in phrases.
    pub path: Option<PathBuf>,
    /// Activation phrases for this locale, lowercase.
    pub phrases: Vec<String>,
}

/// A loaded, scoreable keyword model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeywordModel {
    pub locale: String,
    pub phrases: Vec<String>,
    /// Per-phrase energy-envelope template, one point per scoring window.
    pub templates: BTreeMap<String, Vec<f32>>,
}

/// Maps requested locales to model specs.
///
/// Fallback mirrors the product's locale policy: any `pt*` locale resolves
/// to the Portuguese model, everything else to English.
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    /// Directory holding per-locale model files, when present.
    model_dir: Option<PathBuf>,
}

impl ModelRegistry {
    pub fn new(model_dir: Option<PathBuf>) -> Self {
        Self { model_dir }
    }

    /// Resolve a requested locale to a supported one.
    pub fn resolve_locale(locale: &str) -> &'static str {
        if locale.to_ascii_lowercase().starts_with("pt") {
            "pt"
        } else {
            "en"
        }
    }

    /// Built-in activation phrases for a resolved locale.
    fn phrases_for(resolved: &str) -> Vec<String> {
        match resolved {
            "pt" => vec!["olá organizador".to_string()],
            _ => vec!["hey organizer".to_string()],
        }
    }

    /// Build the spec for a requested locale.
    pub fn spec_for(&self, locale: &str) -> ModelSpec {
        let resolved = Self::resolve_locale(locale);
        let path = self
            .model_dir
            .as_ref()
            .map(|dir| dir.join(format!("{resolved}.json")));
        ModelSpec {
            locale: resolved.to_string(),
            path,
            phrases: Self::phrases_for(resolved),
        }
    }
}

/// Turns a model spec into a loaded model.
pub trait ModelLoader: Send + Sync {
    fn load(&self, spec: &ModelSpec) -> Result<KeywordModel, VoicegateError>;
}

/// Loads a JSON model file, or synthesizes one when the spec carries no
/// path. Synthesized templates approximate the phrase's energy shape from
/// its word lengths; adequate as a default, replaced by trained templates
/// in deployments that ship model files.
#[derive(Debug, Default)]
pub struct JsonModelLoader;

impl JsonModelLoader {
    pub fn new() -> Self {
        Self
    }

    fn load_file(path: &Path, locale: &str) -> Result<KeywordModel, VoicegateError> {
        let data = std::fs::read_to_string(path).map_err(|e| VoicegateError::ModelLoadFailure {
            locale: locale.to_string(),
            reason: format!("read {}: {}", path.display(), e),
        })?;
        serde_json::from_str(&data).map_err(|e| VoicegateError::ModelLoadFailure {
            locale: locale.to_string(),
            reason: format!("parse {}: {}", path.display(), e),
        })
    }

    fn synthesize(spec: &ModelSpec) -> KeywordModel {
        let mut templates = BTreeMap::new();
        for phrase in &spec.phrases {
            templates.insert(phrase.clone(), synthetic_envelope(phrase));
        }
        KeywordModel {
            locale: spec.locale.clone(),
            phrases: spec.phrases.clone(),
            templates,
        }
    }
}

/// One envelope point per word character bucket: rise, sustain, fall, gap.
fn synthetic_envelope(phrase: &str) -> Vec<f32> {
    let mut envelope = Vec::new();
    for word in phrase.split_whitespace() {
        let sustain = (word.chars().count() / 2).max(1);
        envelope.push(0.3);
        envelope.extend(std::iter::repeat(0.8).take(sustain));
        envelope.push(0.3);
        envelope.push(0.05);
    }
    envelope
}

impl ModelLoader for JsonModelLoader {
    fn load(&self, spec: &ModelSpec) -> Result<KeywordModel, VoicegateError> {
        match &spec.path {
            Some(path) if path.exists() => {
                let model = Self::load_file(path, &spec.locale)?;
                tracing::info!(
                    "Loaded keyword model for '{}': {} phrases",
                    model.locale,
                    model.phrases.len()
                );
                Ok(model)
            }
            Some(path) => Err(VoicegateError::ModelLoadFailure {
                locale: spec.locale.clone(),
                reason: format!("model file not found: {}", path.display()),
            }),
            None => {
                tracing::info!("Synthesizing keyword model for '{}'", spec.locale);
                Ok(Self::synthesize(spec))
            }
        }
    }
}
