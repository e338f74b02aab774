//! Voicegate: hands-free voice capture pipeline
//!
//! Continuous keyword spotting that hands the microphone to a capture
//! session when an activation phrase is heard, an end-of-utterance detector
//! that stops the capture when the speaker goes quiet, and a press-and-hold
//! manual path sharing the same microphone under mutual exclusion.
//!
//! The pipeline is hardware-agnostic at its seams: [`audio::AudioSource`]
//! abstracts the microphone, [`capture::RecorderBackend`] the encoder, and
//! [`wake::WakeStrategy`] the keyword engine, so the whole flow runs in
//! tests against scripted audio.

pub mod activation;
pub mod audio;
pub mod capture;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod manual;
pub mod notify;
pub mod wake;

pub use activation::{ActivationStatus, ControlRole, CpalEnvironment, VoiceActivationController};
pub use capture::{AudioArtifact, CaptureSession, StopOutcome, TriggerKind};
pub use config::VoicegateConfig;
pub use endpoint::{EndReason, UtteranceEnd, UtteranceEndDetector};
pub use error::VoicegateError;
pub use manual::ManualCaptureController;
pub use notify::{Notifier, TracingNotifier};
pub use wake::KeywordSpotter;
