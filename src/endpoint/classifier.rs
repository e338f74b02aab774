//! Per-frame speech classification
//!
//! The endpoint detector delegates the "is this frame voice?" decision to a
//! classifier so the energy heuristic and the WebRTC VAD model stay
//! interchangeable behind one contract.

use super::FrameDuration;
use crate::audio::calculate_rms;
use serde::{Deserialize, Serialize};
use webrtc_vad::{SampleRate, Vad, VadMode};

/// VAD aggressiveness for the webrtc classifier.
///
/// Higher modes are stricter about what counts as speech, trading missed
/// detections for fewer false positives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Aggressiveness {
    Quality = 0,
    LowBitrate = 1,
    #[default]
    Aggressive = 2,
    VeryAggressive = 3,
}

impl From<Aggressiveness> for VadMode {
    fn from(mode: Aggressiveness) -> Self {
        match mode {
            Aggressiveness::Quality => VadMode::Quality,
            Aggressiveness::LowBitrate => VadMode::LowBitrate,
            Aggressiveness::Aggressive => VadMode::Aggressive,
            Aggressiveness::VeryAggressive => VadMode::VeryAggressive,
        }
    }
}

/// Classifies one 16 kHz mono frame as speech or not.
pub trait SpeechFrameClassifier {
    fn is_speech(&mut self, frame: &[f32]) -> bool;
}

/// RMS energy against a fixed threshold.
///
/// The cheapest strategy; adequate in quiet environments and the one the
/// capture pump uses by default.
pub struct EnergyClassifier {
    threshold: f32,
}

impl EnergyClassifier {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }
}

impl SpeechFrameClassifier for EnergyClassifier {
    fn is_speech(&mut self, frame: &[f32]) -> bool {
        calculate_rms(frame) > self.threshold
    }
}

/// WebRTC VAD model-based classification.
///
/// The underlying `Vad` is not `Send`; construct this on the thread that
/// feeds it (the capture pump constructs its detector in-thread for this
/// reason).
pub struct WebRtcClassifier {
    vad: Vad,
    frame_size: usize,
}

impl WebRtcClassifier {
    pub fn new(aggressiveness: Aggressiveness, frame_duration: FrameDuration) -> Self {
        Self {
            vad: Vad::new_with_rate_and_mode(SampleRate::Rate16kHz, aggressiveness.into()),
            frame_size: frame_duration.samples_at_16khz(),
        }
    }
}

impl SpeechFrameClassifier for WebRtcClassifier {
    fn is_speech(&mut self, frame: &[f32]) -> bool {
        if frame.len() != self.frame_size {
            tracing::warn!(
                "VAD frame length mismatch: expected {}, got {}",
                self.frame_size,
                frame.len()
            );
            return false;
        }

        let samples: Vec<i16> = frame
            .iter()
            .map(|&s| (s * 32767.0).clamp(-32768.0, 32767.0) as i16)
            .collect();

        self.vad.is_voice_segment(&samples).unwrap_or_else(|()| {
            tracing::warn!("VAD processing failed for frame");
            false
        })
    }
}
