//! Voice-activation phase machine
//!
//! Models the hands-free path: enabling loads the model, a ready model
//! starts listening, a keyword arms a capture, utterance end finalizes it,
//! and finalization returns to listening. Manual captures do not pass
//! through this machine; the controller only pauses listening around them.

use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Phase of the hands-free pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ActivationPhase {
    /// Hands-free mode is off.
    #[default]
    Disabled,
    /// Keyword model load in flight.
    LoadingModel,
    /// Spotter streaming, waiting for the keyword.
    Listening,
    /// Keyword detected, capture session running.
    Recording,
    /// Capture stopped, artifact being assembled.
    Finalizing,
}

impl ActivationPhase {
    pub fn description(&self) -> &'static str {
        match self {
            ActivationPhase::Disabled => "Hands-free off",
            ActivationPhase::LoadingModel => "Loading keyword model",
            ActivationPhase::Listening => "Listening for keyword",
            ActivationPhase::Recording => "Recording after keyword",
            ActivationPhase::Finalizing => "Finalizing capture",
        }
    }

    /// Whether a microphone stream is open in this phase.
    pub fn is_streaming(&self) -> bool {
        matches!(self, ActivationPhase::Listening | ActivationPhase::Recording)
    }
}

/// Events that drive phase transitions.
#[derive(Debug, Clone)]
pub enum ActivationEvent {
    /// User enabled hands-free mode.
    Enable,
    /// Keyword model finished loading.
    ModelReady,
    /// Keyword model load failed.
    ModelFailed { error: String },
    /// Spotter detected an activation phrase.
    KeywordDetected { phrase: String, confidence: f32 },
    /// End-of-utterance decision for the running capture.
    UtteranceEnded,
    /// Capture finalized; `forwarded` is false for too-short rejections.
    CaptureFinalized { forwarded: bool },
    /// User disabled hands-free mode.
    Disable,
    /// Microphone acquisition was denied.
    MicrophoneDenied,
}

/// Why the machine entered its new phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionReason {
    UserEnable,
    ModelReady,
    ModelLoadError { message: String },
    KeywordSpotted { phrase: String },
    EndOfUtterance,
    ArtifactForwarded,
    CaptureRejected,
    UserDisable,
    MicrophoneDenied,
}

/// Result of one processed event.
#[derive(Debug, Clone)]
pub struct Transition {
    pub new_phase: ActivationPhase,
    pub reason: TransitionReason,
}

/// Phase machine for the hands-free path.
///
/// Thread safety is the controller's concern; this type is plain state.
pub struct ActivationMachine {
    phase: ActivationPhase,
    phase_entered_at: Instant,
}

impl ActivationMachine {
    pub fn new() -> Self {
        Self {
            phase: ActivationPhase::Disabled,
            phase_entered_at: Instant::now(),
        }
    }

    pub fn phase(&self) -> ActivationPhase {
        self.phase
    }

    pub fn time_in_phase(&self) -> std::time::Duration {
        self.phase_entered_at.elapsed()
    }

    /// Process an event; `None` means the event is not valid in the current
    /// phase and nothing changed.
    pub fn process_event(&mut self, event: ActivationEvent) -> Option<Transition> {
        let transition = match (&self.phase, event) {
            (ActivationPhase::Disabled, ActivationEvent::Enable) => Some(Transition {
                new_phase: ActivationPhase::LoadingModel,
                reason: TransitionReason::UserEnable,
            }),

            (ActivationPhase::LoadingModel, ActivationEvent::ModelReady) => Some(Transition {
                new_phase: ActivationPhase::Listening,
                reason: TransitionReason::ModelReady,
            }),
            (ActivationPhase::LoadingModel, ActivationEvent::ModelFailed { error }) => {
                Some(Transition {
                    new_phase: ActivationPhase::Disabled,
                    reason: TransitionReason::ModelLoadError { message: error },
                })
            }
            (ActivationPhase::LoadingModel, ActivationEvent::Disable) => Some(Transition {
                new_phase: ActivationPhase::Disabled,
                reason: TransitionReason::UserDisable,
            }),

            (ActivationPhase::Listening, ActivationEvent::KeywordDetected { phrase, .. }) => {
                Some(Transition {
                    new_phase: ActivationPhase::Recording,
                    reason: TransitionReason::KeywordSpotted { phrase },
                })
            }
            (ActivationPhase::Listening, ActivationEvent::Disable) => Some(Transition {
                new_phase: ActivationPhase::Disabled,
                reason: TransitionReason::UserDisable,
            }),
            (ActivationPhase::Listening, ActivationEvent::MicrophoneDenied) => Some(Transition {
                new_phase: ActivationPhase::Disabled,
                reason: TransitionReason::MicrophoneDenied,
            }),

            // Disable while Recording is deliberately absent: a running
            // capture is never aborted; it finalizes on its own and the
            // controller applies the disable afterwards.
            (ActivationPhase::Recording, ActivationEvent::UtteranceEnded) => Some(Transition {
                new_phase: ActivationPhase::Finalizing,
                reason: TransitionReason::EndOfUtterance,
            }),

            (ActivationPhase::Finalizing, ActivationEvent::CaptureFinalized { forwarded }) => {
                Some(Transition {
                    new_phase: ActivationPhase::Listening,
                    reason: if forwarded {
                        TransitionReason::ArtifactForwarded
                    } else {
                        TransitionReason::CaptureRejected
                    },
                })
            }
            (ActivationPhase::Finalizing, ActivationEvent::Disable) => Some(Transition {
                new_phase: ActivationPhase::Disabled,
                reason: TransitionReason::UserDisable,
            }),

            _ => None,
        };

        if let Some(ref result) = transition {
            let previous = self.phase;
            self.phase = result.new_phase;
            self.phase_entered_at = Instant::now();
            tracing::info!(
                "Activation phase: {:?} -> {:?} (reason: {:?})",
                previous,
                result.new_phase,
                result.reason
            );
        }

        transition
    }

    /// Force the machine back to Disabled.
    pub fn reset(&mut self) {
        self.phase = ActivationPhase::Disabled;
        self.phase_entered_at = Instant::now();
        tracing::info!("Activation machine reset to Disabled");
    }
}

impl Default for ActivationMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detected() -> ActivationEvent {
        ActivationEvent::KeywordDetected {
            phrase: "hey organizer".to_string(),
            confidence: 0.95,
        }
    }

    #[test]
    fn test_initial_phase_is_disabled() {
        let machine = ActivationMachine::new();
        assert_eq!(machine.phase(), ActivationPhase::Disabled);
    }

    #[test]
    fn test_happy_path_cycle() {
        let mut machine = ActivationMachine::new();

        assert!(machine.process_event(ActivationEvent::Enable).is_some());
        assert_eq!(machine.phase(), ActivationPhase::LoadingModel);

        assert!(machine.process_event(ActivationEvent::ModelReady).is_some());
        assert_eq!(machine.phase(), ActivationPhase::Listening);

        assert!(machine.process_event(detected()).is_some());
        assert_eq!(machine.phase(), ActivationPhase::Recording);

        assert!(machine
            .process_event(ActivationEvent::UtteranceEnded)
            .is_some());
        assert_eq!(machine.phase(), ActivationPhase::Finalizing);

        let transition = machine
            .process_event(ActivationEvent::CaptureFinalized { forwarded: true })
            .unwrap();
        assert_eq!(transition.new_phase, ActivationPhase::Listening);
        assert!(matches!(
            transition.reason,
            TransitionReason::ArtifactForwarded
        ));
    }

    #[test]
    fn test_rejected_capture_returns_to_listening() {
        let mut machine = ActivationMachine::new();
        machine.process_event(ActivationEvent::Enable);
        machine.process_event(ActivationEvent::ModelReady);
        machine.process_event(detected());
        machine.process_event(ActivationEvent::UtteranceEnded);

        let transition = machine
            .process_event(ActivationEvent::CaptureFinalized { forwarded: false })
            .unwrap();
        assert_eq!(transition.new_phase, ActivationPhase::Listening);
        assert!(matches!(
            transition.reason,
            TransitionReason::CaptureRejected
        ));
    }

    #[test]
    fn test_model_failure_disables() {
        let mut machine = ActivationMachine::new();
        machine.process_event(ActivationEvent::Enable);

        let transition = machine
            .process_event(ActivationEvent::ModelFailed {
                error: "download failed".to_string(),
            })
            .unwrap();
        assert_eq!(transition.new_phase, ActivationPhase::Disabled);
        assert!(matches!(
            transition.reason,
            TransitionReason::ModelLoadError { .. }
        ));
    }

    #[test]
    fn test_mic_denial_disables_from_listening() {
        let mut machine = ActivationMachine::new();
        machine.process_event(ActivationEvent::Enable);
        machine.process_event(ActivationEvent::ModelReady);

        let transition = machine
            .process_event(ActivationEvent::MicrophoneDenied)
            .unwrap();
        assert_eq!(transition.new_phase, ActivationPhase::Disabled);
    }

    #[test]
    fn test_disable_never_aborts_recording() {
        let mut machine = ActivationMachine::new();
        machine.process_event(ActivationEvent::Enable);
        machine.process_event(ActivationEvent::ModelReady);
        machine.process_event(detected());

        // Disable while recording is ignored; the capture runs its course.
        assert!(machine.process_event(ActivationEvent::Disable).is_none());
        assert_eq!(machine.phase(), ActivationPhase::Recording);

        machine.process_event(ActivationEvent::UtteranceEnded);
        machine.process_event(ActivationEvent::CaptureFinalized { forwarded: true });
        assert_eq!(machine.phase(), ActivationPhase::Listening);

        // The deferred disable lands once the capture is done.
        assert_eq!(
            machine
                .process_event(ActivationEvent::Disable)
                .unwrap()
                .new_phase,
            ActivationPhase::Disabled
        );
    }

    #[test]
    fn test_keyword_while_disabled_is_ignored() {
        let mut machine = ActivationMachine::new();
        assert!(machine.process_event(detected()).is_none());
        assert_eq!(machine.phase(), ActivationPhase::Disabled);
    }

    #[test]
    fn test_keyword_while_recording_is_ignored() {
        let mut machine = ActivationMachine::new();
        machine.process_event(ActivationEvent::Enable);
        machine.process_event(ActivationEvent::ModelReady);
        machine.process_event(detected());

        assert!(machine.process_event(detected()).is_none());
        assert_eq!(machine.phase(), ActivationPhase::Recording);
    }

    #[test]
    fn test_streaming_phases() {
        assert!(!ActivationPhase::Disabled.is_streaming());
        assert!(ActivationPhase::Listening.is_streaming());
        assert!(ActivationPhase::Recording.is_streaming());
        assert!(!ActivationPhase::Finalizing.is_streaming());
    }

    #[test]
    fn test_reset() {
        let mut machine = ActivationMachine::new();
        machine.process_event(ActivationEvent::Enable);
        machine.process_event(ActivationEvent::ModelReady);
        machine.reset();
        assert_eq!(machine.phase(), ActivationPhase::Disabled);
    }
}
