//! Audio subsystem
//!
//! Microphone acquisition, lock-free sample transport, downmixing, and level
//! metering. Everything downstream of this module (endpointing, keyword
//! spotting, capture) operates on 16 kHz mono f32 frames.

pub mod metering;
pub mod ring_buffer;
pub mod source;

pub use metering::{calculate_rms, AudioLevel, AudioMeter};
pub use ring_buffer::AudioRingBuffer;
pub use source::{AudioSource, CpalSource, StreamInfo, StreamRequest};

/// Internal processing sample rate in Hz.
pub const PIPELINE_SAMPLE_RATE: u32 = 16_000;

/// Downmix interleaved device samples to 16 kHz mono.
///
/// Plain channel averaging plus decimation. Adequate for endpointing and
/// keyword scoring, where boundary decisions tolerate a rough resample; the
/// encoded artifact carries the same stream, so the negotiated mime type
/// describes 16 kHz mono audio.
pub fn downmix_to_mono_16k(samples: &[f32], source_rate: u32, channels: usize) -> Vec<f32> {
    let channels = channels.max(1);
    let ratio = ((source_rate / PIPELINE_SAMPLE_RATE) as usize).max(1);

    samples
        .chunks(channels)
        .step_by(ratio)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}
