//! Wake scoring strategies
//!
//! The spotter feeds fixed-size analysis windows to a strategy and acts on
//! the detection it returns. Two strategies ship: envelope correlation
//! against the model templates, and transcript matching on top of a
//! streaming recognizer. Both stay behind one trait so deployments can swap
//! engines without touching the spotter.

use crate::audio::calculate_rms;
use crate::wake::model::KeywordModel;
use std::collections::VecDeque;

/// A scored keyword hit.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub phrase: String,
    /// 0.0 to 1.0; the spotter applies the configured threshold.
    pub confidence: f32,
}

/// Scores successive analysis windows for activation phrases.
///
/// Strategies hold engine state that may not be `Send` (the spotter
/// constructs them on its listening thread), so the trait itself carries no
/// `Send` bound; the factory that builds them does.
pub trait WakeStrategy {
    /// Score one 16 kHz mono analysis window.
    fn process_window(&mut self, window: &[f32]) -> Option<Detection>;

    /// Drop accumulated history, e.g. when listening restarts.
    fn reset(&mut self);
}

/// Builds a strategy on the listening thread from the loaded model.
pub type StrategyFactory =
    std::sync::Arc<dyn Fn(&KeywordModel) -> Box<dyn WakeStrategy> + Send + Sync>;

/// Energy-envelope correlation against the model's phrase templates.
///
/// Keeps a rolling per-window RMS envelope and, while there is recent
/// activity, correlates its tail against each template. Silence never
/// scores; the activity gate keeps idle rooms from producing spurious
/// correlation on near-zero signals.
pub struct ScoredStrategy {
    model: KeywordModel,
    activity_threshold: f32,
    envelope: VecDeque<f32>,
    max_template: usize,
}

impl ScoredStrategy {
    pub fn new(model: KeywordModel, activity_threshold: f32) -> Self {
        let max_template = model
            .templates
            .values()
            .map(Vec::len)
            .max()
            .unwrap_or(0)
            .max(1);
        Self {
            model,
            activity_threshold,
            envelope: VecDeque::with_capacity(max_template),
            max_template,
        }
    }

    fn has_recent_activity(&self) -> bool {
        self.envelope
            .iter()
            .rev()
            .take(4)
            .any(|&point| point > self.activity_threshold)
    }
}

impl WakeStrategy for ScoredStrategy {
    fn process_window(&mut self, window: &[f32]) -> Option<Detection> {
        self.envelope.push_back(calculate_rms(window));
        if self.envelope.len() > self.max_template {
            self.envelope.pop_front();
        }

        if !self.has_recent_activity() {
            return None;
        }

        let mut best: Option<Detection> = None;
        for (phrase, template) in &self.model.templates {
            if self.envelope.len() < template.len() {
                continue;
            }
            let tail: Vec<f32> = self
                .envelope
                .iter()
                .skip(self.envelope.len() - template.len())
                .copied()
                .collect();
            let confidence = normalized_correlation(&tail, template);
            if best
                .as_ref()
                .map(|d| confidence > d.confidence)
                .unwrap_or(confidence > 0.0)
            {
                best = Some(Detection {
                    phrase: phrase.clone(),
                    confidence,
                });
            }
        }
        best
    }

    fn reset(&mut self) {
        self.envelope.clear();
    }
}

/// Pearson correlation of two equal-length envelopes, clamped to [0, 1].
fn normalized_correlation(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    if a.is_empty() {
        return 0.0;
    }

    let n = a.len() as f32;
    let mean_a = a.iter().sum::<f32>() / n;
    let mean_b = b.iter().sum::<f32>() / n;

    let mut dot = 0.0;
    let mut norm_a = 0.0;
    let mut norm_b = 0.0;
    for (&xa, &xb) in a.iter().zip(b.iter()) {
        let da = xa - mean_a;
        let db = xb - mean_b;
        dot += da * db;
        norm_a += da * da;
        norm_b += db * db;
    }

    if norm_a <= f32::EPSILON || norm_b <= f32::EPSILON {
        return 0.0;
    }
    (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(0.0, 1.0)
}

/// Interim transcripts from a streaming recognition engine.
///
/// Adapters over an actual engine implement this; the crate itself does not
/// ship one.
pub trait StreamingRecognizer {
    /// Feed samples; returns the current interim transcript when it changed.
    fn accept_waveform(&mut self, samples: &[f32]) -> Option<String>;

    fn reset(&mut self);
}

/// Matches recognizer transcripts against the activation phrases.
///
/// A phrase appearing anywhere in the interim transcript is a full-confidence
/// hit; the recognizer already made the lexical decision.
pub struct TranscriptMatchStrategy {
    recognizer: Box<dyn StreamingRecognizer>,
    phrases: Vec<String>,
}

impl TranscriptMatchStrategy {
    pub fn new(recognizer: Box<dyn StreamingRecognizer>, phrases: Vec<String>) -> Self {
        let phrases = phrases.into_iter().map(|p| p.to_lowercase()).collect();
        Self { recognizer, phrases }
    }
}

impl WakeStrategy for TranscriptMatchStrategy {
    fn process_window(&mut self, window: &[f32]) -> Option<Detection> {
        let text = self.recognizer.accept_waveform(window)?;
        let lowered = text.to_lowercase();
        self.phrases
            .iter()
            .find(|phrase| lowered.contains(phrase.as_str()))
            .map(|phrase| Detection {
                phrase: phrase.clone(),
                confidence: 1.0,
            })
    }

    fn reset(&mut self) {
        self.recognizer.reset();
    }
}
