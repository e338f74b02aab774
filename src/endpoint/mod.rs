//! End-of-utterance detection
//!
//! Decides, from live audio frames or streaming-recognizer transcript
//! events, when an in-progress capture should stop without user action.
//!
//! Two interchangeable inputs satisfy the same contract:
//!
//! - frame classification (energy threshold or the WebRTC VAD model) via
//!   [`UtteranceEndDetector::observe_frame`]
//! - non-empty transcript events from a streaming recognizer via
//!   [`UtteranceEndDetector::observe_transcript`]
//!
//! Either path maintains the same two-tier timeout: once speech has been
//! detected, sustained silence for `post_speech_silence_ms` ends the
//! utterance; if speech never starts, `no_speech_timeout_ms` covers
//! abandonment. The detector fires exactly once per session no matter how
//! many frames arrive after the condition is first met.

mod classifier;

pub use classifier::{Aggressiveness, EnergyClassifier, SpeechFrameClassifier, WebRtcClassifier};

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Frame duration for endpoint processing.
///
/// The WebRTC VAD accepts 10, 20, or 30 ms frames; the energy classifier
/// uses the same sizes so the two stay interchangeable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FrameDuration {
    /// 10 ms (160 samples at 16 kHz)
    Ms10 = 10,
    /// 20 ms (320 samples at 16 kHz)
    Ms20 = 20,
    /// 30 ms (480 samples at 16 kHz)
    #[default]
    Ms30 = 30,
}

impl FrameDuration {
    /// Samples per frame at the 16 kHz pipeline rate.
    pub const fn samples_at_16khz(&self) -> usize {
        match self {
            FrameDuration::Ms10 => 160,
            FrameDuration::Ms20 => 320,
            FrameDuration::Ms30 => 480,
        }
    }
}

/// Which frame classification strategy the detector uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ClassifierKind {
    /// RMS energy against a fixed activity threshold.
    #[default]
    Energy,
    /// WebRTC VAD model-based classification.
    Webrtc,
}

/// Endpoint detection tuning.
///
/// The 1500/4000 ms pair is the canonical contract; deployments targeting a
/// different acoustic environment adjust these rather than patching code.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    pub classifier: ClassifierKind,
    pub frame_duration: FrameDuration,
    /// VAD aggressiveness (webrtc classifier only).
    pub aggressiveness: Aggressiveness,
    /// RMS threshold above which a frame counts as voice activity
    /// (energy classifier only).
    pub activity_threshold: f32,
    /// Consecutive voiced frames required before the session counts as
    /// "has detected speech". Keeps a single loud transient from switching
    /// the detector to the short silence window.
    pub min_speech_frames: u32,
    /// Silence after detected speech that ends the utterance.
    pub post_speech_silence_ms: u64,
    /// Timeout when no speech was ever detected.
    pub no_speech_timeout_ms: u64,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            classifier: ClassifierKind::default(),
            frame_duration: FrameDuration::default(),
            aggressiveness: Aggressiveness::default(),
            activity_threshold: 0.015,
            min_speech_frames: 3,
            post_speech_silence_ms: 1500,
            no_speech_timeout_ms: 4000,
        }
    }
}

impl EndpointConfig {
    /// Validate tunables before use.
    pub fn validate(&self) -> Result<(), String> {
        if self.min_speech_frames == 0 {
            return Err("min_speech_frames must be at least 1".to_string());
        }
        if self.post_speech_silence_ms == 0 || self.no_speech_timeout_ms == 0 {
            return Err("silence timeouts must be greater than 0".to_string());
        }
        if !(0.0..=1.0).contains(&self.activity_threshold) {
            return Err("activity_threshold must be within 0.0-1.0".to_string());
        }
        Ok(())
    }
}

/// Why the detector decided the utterance ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// Speech was detected and then went silent for the configured window.
    SilenceAfterSpeech,
    /// No speech was ever detected within the no-speech timeout.
    NoSpeech,
}

/// The single end-of-utterance decision a detector produces.
#[derive(Debug, Clone, Copy)]
pub struct UtteranceEnd {
    pub reason: EndReason,
    /// Time since the last registered voice activity.
    pub silence: Duration,
}

/// Voice-activity bookkeeping, private to the detector.
///
/// Reset when a session starts Recording, discarded when it ends.
struct SilenceTracker {
    last_voice_activity_at: Instant,
    has_detected_speech_yet: bool,
}

/// Per-session end-of-utterance detector.
///
/// Constructed when a capture session starts Recording and dropped when the
/// session ends; the decision fires at most once per detector instance.
/// All time comparisons take an explicit `now` so tests can drive the clock.
pub struct UtteranceEndDetector {
    config: EndpointConfig,
    classifier: Box<dyn SpeechFrameClassifier>,
    tracker: SilenceTracker,
    consecutive_voiced: u32,
    fired: bool,
}

impl UtteranceEndDetector {
    /// Create a detector with the classifier named in the config.
    ///
    /// The webrtc engine is not `Send`, so call this on the thread that will
    /// feed the detector (the capture pump does).
    pub fn new(config: EndpointConfig, now: Instant) -> Self {
        let classifier: Box<dyn SpeechFrameClassifier> = match config.classifier {
            ClassifierKind::Energy => Box::new(EnergyClassifier::new(config.activity_threshold)),
            ClassifierKind::Webrtc => Box::new(WebRtcClassifier::new(
                config.aggressiveness,
                config.frame_duration,
            )),
        };
        Self::with_classifier(config, classifier, now)
    }

    /// Create a detector with a caller-supplied classifier.
    pub fn with_classifier(
        config: EndpointConfig,
        classifier: Box<dyn SpeechFrameClassifier>,
        now: Instant,
    ) -> Self {
        Self {
            config,
            classifier,
            tracker: SilenceTracker {
                last_voice_activity_at: now,
                has_detected_speech_yet: false,
            },
            consecutive_voiced: 0,
            fired: false,
        }
    }

    /// Expected frame length in samples.
    pub fn frame_size(&self) -> usize {
        self.config.frame_duration.samples_at_16khz()
    }

    /// Whether speech has been registered this session.
    pub fn has_detected_speech(&self) -> bool {
        self.tracker.has_detected_speech_yet
    }

    /// Whether the end decision has already fired.
    pub fn has_fired(&self) -> bool {
        self.fired
    }

    /// Feed one 16 kHz mono frame and evaluate the stop condition.
    ///
    /// Returns the end decision at most once; every call after that returns
    /// `None` regardless of frame content.
    pub fn observe_frame(&mut self, frame: &[f32], now: Instant) -> Option<UtteranceEnd> {
        if self.fired {
            return None;
        }

        if self.classifier.is_speech(frame) {
            self.tracker.last_voice_activity_at = now;
            self.consecutive_voiced += 1;
            if self.consecutive_voiced >= self.config.min_speech_frames {
                self.tracker.has_detected_speech_yet = true;
            }
        } else {
            self.consecutive_voiced = 0;
        }

        self.evaluate(now)
    }

    /// Feed one interim/final transcript event from a streaming recognizer.
    ///
    /// A non-empty transcript counts as voice activity and immediately
    /// marks the session as having detected speech.
    pub fn observe_transcript(&mut self, text: &str, now: Instant) {
        if self.fired || text.trim().is_empty() {
            return;
        }
        self.tracker.last_voice_activity_at = now;
        self.tracker.has_detected_speech_yet = true;
    }

    /// Evaluate the stop condition without new input.
    ///
    /// The pump calls this while the ring buffer is empty so a stalled
    /// stream still times out.
    pub fn poll(&mut self, now: Instant) -> Option<UtteranceEnd> {
        if self.fired {
            return None;
        }
        self.evaluate(now)
    }

    fn evaluate(&mut self, now: Instant) -> Option<UtteranceEnd> {
        let silence = now.duration_since(self.tracker.last_voice_activity_at);
        let (limit, reason) = if self.tracker.has_detected_speech_yet {
            (
                Duration::from_millis(self.config.post_speech_silence_ms),
                EndReason::SilenceAfterSpeech,
            )
        } else {
            (
                Duration::from_millis(self.config.no_speech_timeout_ms),
                EndReason::NoSpeech,
            )
        };

        if silence >= limit {
            self.fired = true;
            tracing::debug!("Utterance end: {:?} after {:?} of silence", reason, silence);
            Some(UtteranceEnd { reason, silence })
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector(config: EndpointConfig) -> (UtteranceEndDetector, Instant) {
        let start = Instant::now();
        (UtteranceEndDetector::new(config, start), start)
    }

    fn energy_config() -> EndpointConfig {
        EndpointConfig {
            classifier: ClassifierKind::Energy,
            ..EndpointConfig::default()
        }
    }

    fn loud_frame(len: usize) -> Vec<f32> {
        vec![0.5; len]
    }

    fn quiet_frame(len: usize) -> Vec<f32> {
        vec![0.001; len]
    }

    #[test]
    fn test_config_validation() {
        assert!(EndpointConfig::default().validate().is_ok());

        let bad = EndpointConfig {
            min_speech_frames: 0,
            ..EndpointConfig::default()
        };
        assert!(bad.validate().is_err());

        let bad = EndpointConfig {
            activity_threshold: 2.0,
            ..EndpointConfig::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_no_speech_timeout_fires() {
        let (mut det, start) = detector(energy_config());
        let frame = quiet_frame(det.frame_size());

        // Quiet frames within the window: nothing fires.
        assert!(det
            .observe_frame(&frame, start + Duration::from_millis(3000))
            .is_none());

        let end = det
            .observe_frame(&frame, start + Duration::from_millis(4001))
            .expect("no-speech timeout should fire");
        assert_eq!(end.reason, EndReason::NoSpeech);
    }

    #[test]
    fn test_silence_after_speech_uses_short_window() {
        let (mut det, start) = detector(energy_config());
        let size = det.frame_size();

        // Three voiced frames establish speech.
        let mut t = start;
        for _ in 0..3 {
            t += Duration::from_millis(30);
            assert!(det.observe_frame(&loud_frame(size), t).is_none());
        }
        assert!(det.has_detected_speech());

        // 1500 ms after the last voiced frame the short window fires.
        assert!(det
            .observe_frame(&quiet_frame(size), t + Duration::from_millis(1000))
            .is_none());
        let end = det
            .observe_frame(&quiet_frame(size), t + Duration::from_millis(1501))
            .expect("post-speech silence should fire");
        assert_eq!(end.reason, EndReason::SilenceAfterSpeech);
    }

    #[test]
    fn test_fires_exactly_once() {
        let (mut det, start) = detector(energy_config());
        let frame = quiet_frame(det.frame_size());

        let first = det.observe_frame(&frame, start + Duration::from_millis(5000));
        assert!(first.is_some());

        // Frames keep arriving after the timeout condition was met.
        for i in 0..10 {
            let later = start + Duration::from_millis(5100 + i * 100);
            assert!(det.observe_frame(&frame, later).is_none());
            assert!(det.poll(later).is_none());
        }
        assert!(det.has_fired());
    }

    #[test]
    fn test_single_transient_keeps_long_grace() {
        let (mut det, start) = detector(energy_config());
        let size = det.frame_size();

        // One loud transient, then quiet: not enough consecutive frames to
        // count as speech, so the 4000 ms window still governs.
        assert!(det
            .observe_frame(&loud_frame(size), start + Duration::from_millis(100))
            .is_none());
        assert!(!det.has_detected_speech());

        // 1600 ms later: the short window would have fired if the transient
        // had registered as speech.
        assert!(det
            .observe_frame(&quiet_frame(size), start + Duration::from_millis(1700))
            .is_none());

        // Full no-speech timeout from the transient (the transient still
        // resets the activity clock, as the energy contract specifies).
        let end = det
            .observe_frame(&quiet_frame(size), start + Duration::from_millis(4101))
            .expect("should eventually fire the no-speech timeout");
        assert_eq!(end.reason, EndReason::NoSpeech);
    }

    #[test]
    fn test_background_noise_below_threshold_never_resets_clock() {
        let (mut det, start) = detector(energy_config());
        let size = det.frame_size();

        // Continuous sub-threshold noise for 4+ seconds.
        let mut t = start;
        let mut fired = None;
        while t < start + Duration::from_millis(4200) {
            t += Duration::from_millis(30);
            if let Some(end) = det.observe_frame(&quiet_frame(size), t) {
                fired = Some(end);
                break;
            }
        }
        let end = fired.expect("noise must not extend the no-speech timeout");
        assert_eq!(end.reason, EndReason::NoSpeech);
    }

    #[test]
    fn test_speech_resumption_resets_silence_window() {
        let (mut det, start) = detector(energy_config());
        let size = det.frame_size();

        let mut t = start;
        for _ in 0..3 {
            t += Duration::from_millis(30);
            det.observe_frame(&loud_frame(size), t);
        }

        // 1200 ms of silence, then speech resumes.
        t += Duration::from_millis(1200);
        det.observe_frame(&loud_frame(size), t);

        // Another 1200 ms of silence: the window restarted, nothing fires.
        assert!(det
            .observe_frame(&quiet_frame(size), t + Duration::from_millis(1200))
            .is_none());
        // But 1500 ms after the resumed speech it does.
        assert!(det
            .observe_frame(&quiet_frame(size), t + Duration::from_millis(1501))
            .is_some());
    }

    #[test]
    fn test_transcript_events_satisfy_same_contract() {
        let (mut det, start) = detector(energy_config());

        // Interim results keep resetting the window.
        det.observe_transcript("buy milk", start + Duration::from_millis(500));
        assert!(det.has_detected_speech());
        assert!(det.poll(start + Duration::from_millis(1900)).is_none());

        det.observe_transcript("buy milk tomorrow", start + Duration::from_millis(2000));
        let end = det
            .poll(start + Duration::from_millis(3501))
            .expect("silence after last transcript should fire");
        assert_eq!(end.reason, EndReason::SilenceAfterSpeech);
    }

    #[test]
    fn test_empty_transcript_is_ignored() {
        let (mut det, start) = detector(energy_config());
        det.observe_transcript("  ", start + Duration::from_millis(500));
        assert!(!det.has_detected_speech());

        let end = det.poll(start + Duration::from_millis(4001));
        assert!(end.is_some());
        assert_eq!(end.unwrap().reason, EndReason::NoSpeech);
    }

    #[test]
    fn test_poll_fires_without_new_frames() {
        let (mut det, start) = detector(energy_config());
        assert!(det.poll(start + Duration::from_millis(3999)).is_none());
        assert!(det.poll(start + Duration::from_millis(4000)).is_some());
    }
}
