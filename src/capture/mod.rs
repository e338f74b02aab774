//! Triggered audio capture
//!
//! Session lifecycle (arming, recording, finalizing) and artifact encoding.

pub mod encoding;
pub mod session;

pub use encoding::{
    negotiate_mime_type, strip_codec_params, RecorderBackend, WavRecorderBackend,
    PREFERRED_MIME_TYPES,
};
pub use session::{
    AudioArtifact, CaptureConfig, CaptureSession, SessionEvent, SessionHandle, SessionState,
    StartOutcome, StopOutcome, TriggerKind,
};
