//! Wake-word detection: quantized inference, debounce, and boot sanity
//! check over the streaming MFCC feature window.

pub mod model;

pub use model::{QuantParams, WakewordModel};

use crate::audio::mfcc::FEATURE_SIZE;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WakewordError {
    #[error("failed to load wake-word model: {0}")]
    ModelLoad(String),
    #[error("model schema mismatch: {0}")]
    Schema(String),
    #[error("inference failed: {0}")]
    Inference(String),
}

/// Debouncer state machine: a detection must sustain above threshold for
/// `trigger_duration` before it fires. Re-arming out of `Fired` requires
/// both `cooldown` to have elapsed and the score to have fallen back
/// below `threshold` — a continuously-held utterance, however long,
/// produces exactly one fire. Kept independent of model inference so the
/// state machine itself can be exercised without a loaded `.tflite`
/// model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebounceState {
    Idle,
    Rising,
    Fired,
}

#[derive(Debug, Clone, Copy)]
pub struct DebouncerConfig {
    pub threshold: f32,
    pub trigger_duration: Duration,
    pub cooldown: Duration,
}

impl Default for DebouncerConfig {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            trigger_duration: Duration::from_millis(150),
            cooldown: Duration::from_millis(1_000),
        }
    }
}

pub struct Debouncer {
    config: DebouncerConfig,
    state: DebounceState,
    rising_since: Option<Instant>,
    fired_at: Option<Instant>,
}

impl Debouncer {
    pub fn new(config: DebouncerConfig) -> Self {
        Self {
            config,
            state: DebounceState::Idle,
            rising_since: None,
            fired_at: None,
        }
    }

    pub fn set_threshold(&mut self, threshold: f32) {
        self.config.threshold = threshold.clamp(0.0, 1.0);
    }

    pub fn reset(&mut self) {
        self.state = DebounceState::Idle;
        self.rising_since = None;
        self.fired_at = None;
    }

    pub fn state(&self) -> DebounceState {
        self.state
    }

    /// Feed one score sample at time `now`. Returns `true` exactly on
    /// the call where the debouncer transitions `Rising -> Fired`.
    pub fn advance(&mut self, score: f32, now: Instant) -> bool {
        match self.state {
            DebounceState::Idle => {
                if score >= self.config.threshold {
                    self.state = DebounceState::Rising;
                    self.rising_since = Some(now);
                }
                false
            }
            DebounceState::Rising => {
                if score < self.config.threshold {
                    self.state = DebounceState::Idle;
                    self.rising_since = None;
                    false
                } else if let Some(since) = self.rising_since {
                    if now.duration_since(since) >= self.config.trigger_duration {
                        self.state = DebounceState::Fired;
                        self.fired_at = Some(now);
                        true
                    } else {
                        false
                    }
                } else {
                    false
                }
            }
            DebounceState::Fired => {
                let cooldown_elapsed = self
                    .fired_at
                    .is_some_and(|fired_at| now.duration_since(fired_at) >= self.config.cooldown);
                if cooldown_elapsed && score < self.config.threshold {
                    self.state = DebounceState::Idle;
                    self.rising_since = None;
                    self.fired_at = None;
                }
                false
            }
        }
    }
}

type DetectionCallback = Box<dyn FnMut(f32) + Send>;

pub struct WakeWordDetectorConfig {
    pub threshold: f32,
    pub trigger_duration: Duration,
    pub cooldown: Duration,
    /// Minimum spacing between inferences; the MFCC frontend can signal
    /// "features ready" far more often than the model needs to run.
    pub inference_interval: Duration,
    pub expected_input_size: usize,
}

impl Default for WakeWordDetectorConfig {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            trigger_duration: Duration::from_millis(150),
            cooldown: Duration::from_millis(1_000),
            inference_interval: Duration::from_millis(60),
            expected_input_size: FEATURE_SIZE,
        }
    }
}

/// Snapshot of the detector's monotonic counters, read without locking
/// (tearing across fields is acceptable for display).
#[derive(Debug, Clone, Copy, Default)]
pub struct DetectorStats {
    pub inferences_run: u64,
    pub fires: u64,
}

#[derive(Default)]
struct DetectorCounters {
    inferences_run: AtomicU64,
    fires: AtomicU64,
}

pub struct WakeWordDetector<'a> {
    model: WakewordModel<'a>,
    debouncer: Debouncer,
    inference_interval: Duration,
    last_inference: Option<Instant>,
    callback: Option<DetectionCallback>,
    counters: DetectorCounters,
}

impl<'a> WakeWordDetector<'a> {
    pub fn new(model_path: &str, config: WakeWordDetectorConfig) -> Result<Self, WakewordError> {
        let model = WakewordModel::load(model_path, config.expected_input_size)?;
        let debouncer = Debouncer::new(DebouncerConfig {
            threshold: config.threshold,
            trigger_duration: config.trigger_duration,
            cooldown: config.cooldown,
        });
        Ok(Self {
            model,
            debouncer,
            inference_interval: config.inference_interval,
            last_inference: None,
            callback: None,
            counters: DetectorCounters::default(),
        })
    }

    /// All detector counters in one lock-free snapshot.
    pub fn get_detector_stats(&self) -> DetectorStats {
        DetectorStats {
            inferences_run: self.counters.inferences_run.load(Ordering::Relaxed),
            fires: self.counters.fires.load(Ordering::Relaxed),
        }
    }

    pub fn set_threshold(&mut self, threshold: f32) {
        self.debouncer.set_threshold(threshold);
    }

    pub fn set_detection_callback(&mut self, cb: impl FnMut(f32) + Send + 'static) {
        self.callback = Some(Box::new(cb));
    }

    pub fn reset(&mut self) {
        self.debouncer.reset();
        self.last_inference = None;
    }

    /// Run a handful of inferences over representative silence/noise at
    /// boot. Never fails the boot: a model whose baseline score already
    /// sits above 0.1 only gets a `biased_model` warning in the logs, so
    /// startup doesn't hard-fail on a merely noisy baseline.
    pub fn sanity_check(&self, probe_frames: &[Vec<f32>]) -> Result<(), WakewordError> {
        for features in probe_frames {
            let score = self.model.predict(features)?;
            if score > 0.1 {
                log::warn!("biased_model: zero-input probe scored {score:.3}");
            }
        }
        Ok(())
    }

    /// Feed a feature window. Returns `Some(score)` only on calls where
    /// inference actually ran (subject to the throttle interval).
    pub fn process_features(&mut self, features: &[f32], now: Instant) -> Result<Option<f32>, WakewordError> {
        if let Some(last) = self.last_inference {
            if now.duration_since(last) < self.inference_interval {
                return Ok(None);
            }
        }
        self.last_inference = Some(now);
        self.counters.inferences_run.fetch_add(1, Ordering::Relaxed);

        let score = self.model.predict(features)?;
        if self.debouncer.advance(score, now) {
            self.counters.fires.fetch_add(1, Ordering::Relaxed);
            if let Some(cb) = self.callback.as_mut() {
                cb(score);
            }
        }
        Ok(Some(score))
    }

    pub fn is_fired(&self) -> bool {
        self.debouncer.state() == DebounceState::Fired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debounce_config_requires_sustained_trigger() {
        let config = WakeWordDetectorConfig::default();
        assert!(config.trigger_duration > Duration::from_millis(0));
        assert!(config.cooldown >= config.trigger_duration);
    }
}
