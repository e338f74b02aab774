//! Configuration
//!
//! All tunables live here, grouped by subsystem. Every section and field
//! carries a serde default so a partial config file stays valid, and
//! `validate()` rejects values the pipeline cannot run with.

use crate::audio::StreamRequest;
use crate::capture::CaptureConfig;
use crate::endpoint::EndpointConfig;
use crate::wake::SpotterOptions;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Capture-side audio settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioSettings {
    /// Stream constraints requested from the device layer.
    pub request: StreamRequest,
    /// Captures shorter than this are rejected rather than forwarded.
    pub min_capture_ms: u64,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            request: StreamRequest::default(),
            min_capture_ms: 500,
        }
    }
}

impl AudioSettings {
    pub fn validate(&self) -> Result<(), String> {
        if self.min_capture_ms == 0 {
            return Err("min_capture_ms must be greater than 0".to_string());
        }
        if self.request.sample_rate == 0 {
            return Err("sample_rate must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Wake-word settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WakeSettings {
    /// Requested locale; resolved against the model registry's fallback.
    pub locale: String,
    /// Detections below this confidence are ignored.
    pub confidence_threshold: f32,
    /// Analysis window length in milliseconds.
    pub window_ms: u64,
    /// Directory with per-locale model files. `None` uses synthesized
    /// models.
    pub model_dir: Option<PathBuf>,
}

impl Default for WakeSettings {
    fn default() -> Self {
        Self {
            locale: "en".to_string(),
            confidence_threshold: 0.85,
            window_ms: 80,
            model_dir: None,
        }
    }
}

impl WakeSettings {
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err("confidence_threshold must be within 0.0-1.0".to_string());
        }
        if !(10..=1000).contains(&self.window_ms) {
            return Err("window_ms must be within 10-1000".to_string());
        }
        Ok(())
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VoicegateConfig {
    pub audio: AudioSettings,
    pub endpoint: EndpointConfig,
    pub wake: WakeSettings,
}

impl VoicegateConfig {
    /// Load from a JSON file; missing file falls back to defaults.
    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::info!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&data)?;
        config
            .validate()
            .map_err(|e| anyhow::anyhow!("invalid config: {e}"))?;
        tracing::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), String> {
        self.audio.validate()?;
        self.endpoint.validate()?;
        self.wake.validate()?;
        Ok(())
    }

    /// Capture tuning for session starts.
    pub fn capture_config(&self) -> CaptureConfig {
        CaptureConfig {
            request: self.audio.request.clone(),
            min_capture_ms: self.audio.min_capture_ms,
        }
    }

    /// Spotter tuning derived from the wake and endpoint sections.
    pub fn spotter_options(&self) -> SpotterOptions {
        SpotterOptions {
            confidence_threshold: self.wake.confidence_threshold,
            window_ms: self.wake.window_ms,
            activity_threshold: self.endpoint.activity_threshold,
        }
    }
}
