//! Artifact encoding and mime negotiation
//!
//! Different recorder backends support different encoders, and the
//! downstream transcription service needs a mime type the recorder actually
//! honoured, not just the one we asked for. Negotiation walks a descending
//! preference list and falls back to the backend default.

use crate::error::VoicegateError;
use std::io::Cursor;

/// Descending encoding preference, best first.
///
/// Tried in order against the backend; the first supported entry wins, the
/// backend default covers the rest.
pub const PREFERRED_MIME_TYPES: [&str; 6] = [
    "audio/webm;codecs=opus",
    "audio/webm",
    "audio/mp4",
    "audio/aac",
    "audio/ogg;codecs=opus",
    "audio/ogg",
];

/// Encodes finalized 16 kHz mono PCM into a container the deployment's
/// recorder stack supports.
pub trait RecorderBackend: Send {
    /// Whether this backend can produce the given mime type.
    fn supports(&self, mime_type: &str) -> bool;

    /// The mime type used when nothing on the preference list matches.
    fn default_mime_type(&self) -> &str;

    /// Encode samples into the container for `mime_type`.
    fn encode(
        &self,
        samples: &[f32],
        sample_rate: u32,
        mime_type: &str,
    ) -> Result<Vec<u8>, VoicegateError>;
}

/// Pick the best mutually-supported mime type for a backend.
pub fn negotiate_mime_type(backend: &dyn RecorderBackend) -> String {
    for &candidate in PREFERRED_MIME_TYPES.iter() {
        if backend.supports(candidate) {
            tracing::debug!("Negotiated capture encoding: {}", candidate);
            return candidate.to_string();
        }
    }
    let fallback = backend.default_mime_type().to_string();
    tracing::debug!("No preferred encoding supported, using {}", fallback);
    fallback
}

/// Strip codec parameters from a mime type for the artifact tag.
///
/// `audio/webm;codecs=opus` → `audio/webm`
pub fn strip_codec_params(mime_type: &str) -> &str {
    mime_type
        .split(';')
        .next()
        .map(str::trim)
        .unwrap_or(mime_type)
}

/// WAV backend via hound: 16-bit PCM, mono.
///
/// The native backend for this crate; deployments sitting on an OS media
/// encoder substitute their own [`RecorderBackend`].
#[derive(Debug, Default)]
pub struct WavRecorderBackend;

impl WavRecorderBackend {
    pub const MIME_TYPE: &'static str = "audio/wav";

    pub fn new() -> Self {
        Self
    }
}

impl RecorderBackend for WavRecorderBackend {
    fn supports(&self, mime_type: &str) -> bool {
        strip_codec_params(mime_type) == Self::MIME_TYPE
    }

    fn default_mime_type(&self) -> &str {
        Self::MIME_TYPE
    }

    fn encode(
        &self,
        samples: &[f32],
        sample_rate: u32,
        mime_type: &str,
    ) -> Result<Vec<u8>, VoicegateError> {
        if !self.supports(mime_type) {
            return Err(VoicegateError::EncodingFailed {
                mime_type: mime_type.to_string(),
                reason: "wav backend only encodes audio/wav".to_string(),
            });
        }

        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer =
                hound::WavWriter::new(&mut cursor, spec).map_err(|e| VoicegateError::EncodingFailed {
                    mime_type: mime_type.to_string(),
                    reason: e.to_string(),
                })?;
            for &sample in samples {
                let value = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
                writer
                    .write_sample(value)
                    .map_err(|e| VoicegateError::EncodingFailed {
                        mime_type: mime_type.to_string(),
                        reason: e.to_string(),
                    })?;
            }
            writer.finalize().map_err(|e| VoicegateError::EncodingFailed {
                mime_type: mime_type.to_string(),
                reason: e.to_string(),
            })?;
        }
        Ok(cursor.into_inner())
    }
}
