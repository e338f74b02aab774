//! Error taxonomy for the voice activation pipeline
//!
//! Every fallible operation in this crate resolves to one of these variants.
//! Nothing is retried internally; all retries are operator-initiated (press
//! again, re-enable the toggle).

/// Errors surfaced by the voice activation pipeline.
///
/// `TooShortRecording` is deliberately absent: a capture stopped before the
/// minimum duration is a recoverable outcome ([`crate::capture::StopOutcome::RejectedTooShort`]),
/// not an error. Likewise, stopping a keyword stream that already tore itself
/// down is benign and only logged, never returned.
#[derive(Debug, thiserror::Error)]
pub enum VoicegateError {
    /// Microphone access was refused or no input device exists.
    ///
    /// Terminal for that start attempt; the caller may offer a retry by
    /// invoking start again.
    #[error("microphone permission denied or no input device available")]
    PermissionDenied,

    /// The keyword model for a locale failed to load or initialize.
    ///
    /// Hands-free mode is forced off when this occurs; a fresh explicit
    /// enable is the only retry path.
    #[error("keyword model for locale '{locale}' failed to load: {reason}")]
    ModelLoadFailure { locale: String, reason: String },

    /// Encoding the finalized capture into the negotiated format failed.
    #[error("failed to encode capture as {mime_type}: {reason}")]
    EncodingFailed { mime_type: String, reason: String },

    /// Any other device or runtime failure during acquisition or streaming.
    ///
    /// Terminal for that attempt; hands-free mode is disabled defensively.
    #[error("audio pipeline failure: {0}")]
    Unknown(String),
}

impl VoicegateError {
    /// Wrap an arbitrary backend error into the `Unknown` variant.
    pub fn unknown(err: impl std::fmt::Display) -> Self {
        VoicegateError::Unknown(err.to_string())
    }
}
