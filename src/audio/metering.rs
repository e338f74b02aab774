//! Audio level metering for UI feedback
//!
//! The capture pump publishes one level reading per drained chunk so the
//! embedding UI can pulse the microphone control while recording.

use serde::Serialize;

/// One level reading, normalised for display.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct AudioLevel {
    /// RMS level, 0.0-1.0
    pub rms: f32,
    /// Peak level with decay, 0.0-1.0
    pub peak: f32,
    /// dB level, floored at -60
    pub db: f32,
}

/// Real-time audio meter with peak hold and decay.
pub struct AudioMeter {
    peak: f32,
    decay_rate: f32,
    min_db: f32,
}

impl Default for AudioMeter {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioMeter {
    /// Default decay gives roughly 300 ms of peak hold at 30 Hz updates.
    pub fn new() -> Self {
        Self {
            peak: 0.0,
            decay_rate: 0.95,
            min_db: -60.0,
        }
    }

    /// Process one chunk of samples and return the current levels.
    pub fn process(&mut self, samples: &[f32]) -> AudioLevel {
        if samples.is_empty() {
            self.peak *= self.decay_rate;
            return AudioLevel {
                rms: 0.0,
                peak: self.peak,
                db: self.min_db,
            };
        }

        let rms = calculate_rms(samples);
        let chunk_peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        self.peak = if chunk_peak > self.peak {
            chunk_peak
        } else {
            self.peak * self.decay_rate
        };

        let db = if rms > 0.0 {
            (20.0 * rms.log10()).max(self.min_db)
        } else {
            self.min_db
        };

        AudioLevel {
            rms: rms.min(1.0),
            peak: self.peak.min(1.0),
            db,
        }
    }

    /// Reset peak hold.
    pub fn reset(&mut self) {
        self.peak = 0.0;
    }
}

/// RMS level of a sample buffer.
pub fn calculate_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silence_reads_floor() {
        let mut meter = AudioMeter::new();
        let level = meter.process(&vec![0.0f32; 512]);
        assert_eq!(level.rms, 0.0);
        assert_eq!(level.db, -60.0);
    }

    #[test]
    fn test_full_scale() {
        let mut meter = AudioMeter::new();
        let level = meter.process(&vec![1.0f32; 512]);
        assert!((level.rms - 1.0).abs() < 0.001);
        assert!((level.peak - 1.0).abs() < 0.001);
        assert!(level.db.abs() < 0.1);
    }

    #[test]
    fn test_sine_rms() {
        // RMS of a unit sine is 1/sqrt(2)
        let samples: Vec<f32> = (0..1024)
            .map(|i| (2.0 * std::f32::consts::PI * i as f32 * 8.0 / 1024.0).sin())
            .collect();
        let rms = calculate_rms(&samples);
        assert!((rms - 0.707).abs() < 0.05);
    }

    #[test]
    fn test_peak_decays_over_silence() {
        let mut meter = AudioMeter::new();
        meter.process(&vec![0.8f32; 256]);

        let silence = vec![0.0f32; 256];
        let a = meter.process(&silence).peak;
        let b = meter.process(&silence).peak;
        assert!(a > b);
        assert!(b > 0.0);
    }

    #[test]
    fn test_reset_clears_peak() {
        let mut meter = AudioMeter::new();
        meter.process(&vec![0.9f32; 256]);
        meter.reset();
        let level = meter.process(&vec![0.0f32; 256]);
        assert_eq!(level.peak, 0.0);
    }
}
