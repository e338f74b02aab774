//! Microphone acquisition
//!
//! `AudioSource` is the seam between the pipeline and the hardware: the
//! capture session and the keyword spotter each acquire their own source,
//! and tests substitute scripted implementations so nothing here requires a
//! physical device. The cpal-backed implementation mirrors how the rest of
//! the crate expects a source to behave: acquire starts delivering samples
//! into the provided ring buffer immediately, release stops them.

use super::ring_buffer::AudioRingBuffer;
use crate::error::VoicegateError;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Constraints requested when opening the microphone.
///
/// Backends honour what they can; the DSP toggles exist because browser and
/// OS capture stacks expose them, and a deployment may route them through.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamRequest {
    /// Preferred capture sample rate in Hz.
    pub sample_rate: u32,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain: bool,
}

impl Default for StreamRequest {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain: true,
        }
    }
}

/// Properties of the stream a source actually opened.
#[derive(Debug, Clone, Copy)]
pub struct StreamInfo {
    pub sample_rate: u32,
    pub channels: usize,
}

/// A live microphone abstraction.
///
/// Exactly one acquisition per successful `acquire`, exactly one release per
/// terminal transition. `release` must be idempotent.
pub trait AudioSource: Send {
    /// Open the microphone and start writing interleaved f32 samples into
    /// `sink` from the capture callback.
    ///
    /// Returns `PermissionDenied` when access is refused or no input device
    /// exists; any other failure maps to `Unknown`.
    fn acquire(
        &mut self,
        request: &StreamRequest,
        sink: Arc<AudioRingBuffer>,
    ) -> Result<StreamInfo, VoicegateError>;

    /// Stop the stream and free the hardware handle. Idempotent.
    fn release(&mut self);

    /// Whether a stream is currently open.
    fn is_active(&self) -> bool;
}

/// cpal-backed microphone source using the default input device.
#[derive(Default)]
pub struct CpalSource {
    stream: Option<cpal::Stream>,
}

impl CpalSource {
    pub fn new() -> Self {
        Self { stream: None }
    }
}

impl AudioSource for CpalSource {
    #[allow(deprecated)] // cpal 0.17 deprecates name() but description() is not yet stable
    fn acquire(
        &mut self,
        request: &StreamRequest,
        sink: Arc<AudioRingBuffer>,
    ) -> Result<StreamInfo, VoicegateError> {
        if self.stream.is_some() {
            return Err(VoicegateError::unknown("source already acquired"));
        }

        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or(VoicegateError::PermissionDenied)?;

        let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        let supported_config = device
            .default_input_config()
            .map_err(|_| VoicegateError::PermissionDenied)?;

        let sample_rate = supported_config.sample_rate();
        let channels = supported_config.channels() as usize;

        tracing::info!(
            "Acquiring input device '{}': {}Hz, {} channels (requested {}Hz)",
            device_name,
            sample_rate,
            channels,
            request.sample_rate,
        );

        let stream = device
            .build_input_stream(
                &supported_config.into(),
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let written = sink.write(data);
                    if written < data.len() {
                        tracing::warn!(
                            "Audio buffer overflow: dropped {} samples",
                            data.len() - written
                        );
                    }
                },
                |err| {
                    tracing::error!("Audio stream error: {}", err);
                },
                None,
            )
            .map_err(VoicegateError::unknown)?;

        stream.play().map_err(VoicegateError::unknown)?;
        self.stream = Some(stream);

        Ok(StreamInfo {
            sample_rate,
            channels,
        })
    }

    fn release(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            tracing::debug!("Microphone stream released");
        }
    }

    fn is_active(&self) -> bool {
        self.stream.is_some()
    }
}

impl Drop for CpalSource {
    fn drop(&mut self) {
        self.release();
    }
}
