//! Manual capture control
//!
//! Press-and-hold semantics for the single capture button. The button shares
//! the microphone with the hands-free path through the activation
//! controller: while a wake-triggered capture is running, pressing acts as
//! its stop control instead of starting a second recording.
//!
//! The press intent is an atomic flag checked by the session after device
//! acquisition resolves, so a press released during a slow permission prompt
//! never leaves a hot microphone behind.

use crate::activation::{ControlRole, VoiceActivationController};
use crate::capture::AudioArtifact;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Press-and-hold controller for the capture button.
pub struct ManualCaptureController {
    controller: Arc<VoiceActivationController>,
    /// True while the button is held; the capture start re-checks it after
    /// acquisition.
    pressing: Arc<AtomicBool>,
    /// Whether this press opened a manual session that release must close.
    owns_session: AtomicBool,
}

impl ManualCaptureController {
    pub fn new(controller: Arc<VoiceActivationController>) -> Self {
        Self {
            controller,
            pressing: Arc::new(AtomicBool::new(false)),
            owns_session: AtomicBool::new(false),
        }
    }

    pub fn is_pressing(&self) -> bool {
        self.pressing.load(Ordering::SeqCst)
    }

    /// Handle the button going down.
    ///
    /// Starts a manual capture. While a wake-triggered capture is running
    /// the press is ignored as a start; the control's role is
    /// [`ControlRole::Stop`] and the embedding invokes
    /// [`VoiceActivationController::stop_wake_capture`] for that affordance.
    pub fn press(&self) {
        if self.pressing.swap(true, Ordering::SeqCst) {
            tracing::debug!("Press ignored: already pressing");
            return;
        }

        if self.controller.control_role() == ControlRole::Stop {
            tracing::debug!("Press ignored as start: wake capture active, control is stop");
            self.pressing.store(false, Ordering::SeqCst);
            return;
        }

        match self.controller.begin_manual(&self.pressing) {
            Ok(true) => {
                self.owns_session.store(true, Ordering::SeqCst);
            }
            Ok(false) => {
                // Busy, or the press was released during acquisition.
                self.pressing.store(false, Ordering::SeqCst);
            }
            Err(e) => {
                tracing::error!("Manual capture failed to start: {}", e);
                self.pressing.store(false, Ordering::SeqCst);
            }
        }
    }

    /// Handle the button going up.
    ///
    /// Stops the manual capture this press opened, if any. A release while
    /// acquisition is still in flight revokes the intent instead; the
    /// session start observes the cleared flag and tears down.
    pub fn release(&self) -> Option<AudioArtifact> {
        self.pressing.store(false, Ordering::SeqCst);
        if self.owns_session.swap(false, Ordering::SeqCst) {
            self.controller.end_manual()
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activation::CaptureEnvironment;
    use crate::audio::{
        AudioRingBuffer, AudioSource, StreamInfo, StreamRequest, PIPELINE_SAMPLE_RATE,
    };
    use crate::capture::{RecorderBackend, WavRecorderBackend};
    use crate::config::VoicegateConfig;
    use crate::error::VoicegateError;
    use crate::notify::TracingNotifier;
    use std::time::Duration;

    struct ToneEnvironment;

    struct ToneSource {
        active: Arc<AtomicBool>,
    }

    impl AudioSource for ToneSource {
        fn acquire(
            &mut self,
            _request: &StreamRequest,
            sink: Arc<AudioRingBuffer>,
        ) -> Result<StreamInfo, VoicegateError> {
            self.active.store(true, Ordering::SeqCst);
            let active = self.active.clone();
            std::thread::spawn(move || {
                while active.load(Ordering::SeqCst) {
                    sink.write(&[0.2f32; 160]);
                    std::thread::sleep(Duration::from_millis(10));
                }
            });
            Ok(StreamInfo {
                sample_rate: PIPELINE_SAMPLE_RATE,
                channels: 1,
            })
        }

        fn release(&mut self) {
            self.active.store(false, Ordering::SeqCst);
        }

        fn is_active(&self) -> bool {
            self.active.load(Ordering::SeqCst)
        }
    }

    impl CaptureEnvironment for ToneEnvironment {
        fn source(&self) -> Box<dyn AudioSource> {
            Box::new(ToneSource {
                active: Arc::new(AtomicBool::new(false)),
            })
        }

        fn backend(&self) -> Box<dyn RecorderBackend> {
            Box::new(WavRecorderBackend::new())
        }
    }

    fn controller() -> Arc<VoiceActivationController> {
        let mut config = VoicegateConfig::default();
        config.audio.min_capture_ms = 50;
        VoiceActivationController::new(
            config,
            Arc::new(ToneEnvironment),
            Arc::new(TracingNotifier),
        )
    }

    #[test]
    fn test_press_hold_release_produces_artifact() {
        let manual = ManualCaptureController::new(controller());

        manual.press();
        assert!(manual.is_pressing());

        std::thread::sleep(Duration::from_millis(150));
        let artifact = manual.release();
        assert!(artifact.is_some());
        assert!(!manual.is_pressing());
    }

    #[test]
    fn test_release_without_press_is_benign() {
        let manual = ManualCaptureController::new(controller());
        assert!(manual.release().is_none());
    }

    #[test]
    fn test_double_press_is_ignored() {
        let manual = ManualCaptureController::new(controller());
        manual.press();
        manual.press();
        assert!(manual.is_pressing());

        std::thread::sleep(Duration::from_millis(100));
        assert!(manual.release().is_some());
    }

    #[test]
    fn test_quick_tap_rejects_short_capture() {
        let manual = ManualCaptureController::new(controller());
        manual.press();
        // Released almost immediately: under the minimum duration.
        assert!(manual.release().is_none());
        assert!(!manual.is_pressing());
    }
}
