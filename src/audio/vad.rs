//! Lightweight RMS/zero-crossing voice activity detector with hysteresis.
//!
//! Generalizes the hysteresis state machine from `agent-edge-rs`'s
//! `WebRtcVad` wrapper (`src/vad/mod.rs`) onto a dependency-free RMS +
//! zero-crossing-rate decision rule, since the firmware target has no
//! room for a native WebRTC VAD binding.

#[derive(Debug, Clone, Copy)]
pub struct VadConfig {
    /// Frames of positive voice decision required to raise `voice_present`.
    pub frames_to_trigger_on: u32,
    /// Frames of negative voice decision required to drop `voice_present`.
    /// Always kept larger than `frames_to_trigger_on` so silence is
    /// confirmed more conservatively than speech onset.
    pub frames_to_trigger_off: u32,
    /// EWMA smoothing factor for the noise floor estimate, in (0, 1).
    pub noise_floor_alpha: f32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            frames_to_trigger_on: 2,
            frames_to_trigger_off: 5,
            noise_floor_alpha: 0.05,
        }
    }
}

pub struct VadProcessor {
    config: VadConfig,
    sensitivity: f32,
    noise_floor: f32,
    voice_present: bool,
    consecutive_on: u32,
    consecutive_off: u32,
}

impl VadProcessor {
    pub fn new(config: VadConfig) -> Self {
        Self {
            config,
            sensitivity: 0.5,
            noise_floor: 1e-4,
            voice_present: false,
            consecutive_on: 0,
            consecutive_off: 0,
        }
    }

    /// `sensitivity` in `[0, 1]`; higher admits quieter speech over the
    /// estimated noise floor.
    pub fn set_sensitivity(&mut self, sensitivity: f32) {
        self.sensitivity = sensitivity.clamp(0.0, 1.0);
    }

    pub fn voice_present(&self) -> bool {
        self.voice_present
    }

    /// Feed one frame of samples, update the hysteresis state machine,
    /// and return the (possibly unchanged) `voice_present` decision.
    pub fn process_frame(&mut self, samples: &[i16]) -> bool {
        if samples.is_empty() {
            return self.voice_present;
        }

        let rms = rms(samples);
        let zcr = zero_crossing_rate(samples);

        // Threshold multiplier over the noise floor: more sensitive
        // settings accept quieter speech.
        let multiplier = 3.0 - 1.8 * self.sensitivity;
        let instant_voice = rms > self.noise_floor * multiplier && (0.02..0.5).contains(&zcr);

        // Only drift the floor estimate while we believe we're hearing
        // silence, so a sustained utterance doesn't raise its own floor.
        if !self.voice_present {
            self.noise_floor = (1.0 - self.config.noise_floor_alpha) * self.noise_floor
                + self.config.noise_floor_alpha * rms;
            self.noise_floor = self.noise_floor.max(1e-6);
        }

        if instant_voice {
            self.consecutive_on += 1;
            self.consecutive_off = 0;
            if !self.voice_present && self.consecutive_on >= self.config.frames_to_trigger_on {
                self.voice_present = true;
            }
        } else {
            self.consecutive_off += 1;
            self.consecutive_on = 0;
            if self.voice_present && self.consecutive_off >= self.config.frames_to_trigger_off {
                self.voice_present = false;
            }
        }

        self.voice_present
    }
}

fn rms(samples: &[i16]) -> f32 {
    let sum_sq: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    ((sum_sq / samples.len() as f64).sqrt() / i16::MAX as f64) as f32
}

fn zero_crossing_rate(samples: &[i16]) -> f32 {
    if samples.len() < 2 {
        return 0.0;
    }
    let crossings = samples
        .windows(2)
        .filter(|w| (w[0] >= 0) != (w[1] >= 0))
        .count();
    crossings as f32 / (samples.len() - 1) as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn silence(n: usize) -> Vec<i16> {
        vec![0; n]
    }

    fn tone(n: usize, amplitude: i16) -> Vec<i16> {
        (0..n)
            .map(|i| {
                let phase = (i as f32) * 0.2;
                (phase.sin() * amplitude as f32) as i16
            })
            .collect()
    }

    #[test]
    fn stays_silent_on_pure_silence() {
        let mut vad = VadProcessor::new(VadConfig::default());
        for _ in 0..20 {
            assert!(!vad.process_frame(&silence(320)));
        }
    }

    #[test]
    fn hysteresis_requires_fewer_on_frames_than_off_frames() {
        let cfg = VadConfig::default();
        assert!(cfg.frames_to_trigger_on < cfg.frames_to_trigger_off);
    }

    #[test]
    fn loud_tone_eventually_triggers_voice_present() {
        let mut vad = VadProcessor::new(VadConfig::default());
        // warm up the noise floor on silence first
        for _ in 0..10 {
            vad.process_frame(&silence(320));
        }
        let mut triggered = false;
        for _ in 0..10 {
            if vad.process_frame(&tone(320, i16::MAX / 2)) {
                triggered = true;
                break;
            }
        }
        assert!(triggered);
    }

    #[test]
    fn set_sensitivity_clamps_to_unit_range() {
        let mut vad = VadProcessor::new(VadConfig::default());
        vad.set_sensitivity(5.0);
        assert_eq!(vad.sensitivity, 1.0);
        vad.set_sensitivity(-5.0);
        assert_eq!(vad.sensitivity, 0.0);
    }
}
