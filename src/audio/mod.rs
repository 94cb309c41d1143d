//! Frame-paced microphone capture, the pre-roll ring, and the glue that
//! hands frames to VAD, the wake-word detector, and (when streaming) the
//! network layer.
//!
//! `AudioManager` owns the capture task exclusively: the ring buffers,
//! the VAD, and (indirectly, through a frame sink callback) the wake
//! detector's input path. Cross-task handoff to the network side happens
//! only through the audio-data callback invoked on the capture thread —
//! nothing on the network side ever reaches into these buffers, mirroring
//! `agent-edge-rs`'s `CpalAudioCapture` (`src/audio_capture/mod.rs`)
//! generalized from a bounded async channel into the frame-paced loop
//! contract the firmware spec requires.

pub mod mfcc;
pub mod vad;

pub use mfcc::MfccFrontend;
pub use vad::VadProcessor;

use crate::config::AudioConfig;
use crate::ring_buffer::RingBuffer;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AudioError {
    #[error("audio device error: {0}")]
    Device(String),
    #[error("audio stream error: {0}")]
    Stream(String),
    #[error("capture already running")]
    AlreadyCapturing,
    #[error("capture not running")]
    NotCapturing,
}

/// Capture/streaming sub-state, tracked independently of the network
/// manager's session state: audio capture and the network session can
/// be up or down on their own schedules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioState {
    Idle,
    Capturing,
    Streaming,
}

#[derive(Debug, Clone)]
pub struct AudioManagerConfig {
    pub sample_rate: u32,
    pub frame_samples: usize,
    pub buffer_count: usize,
    pub device_name: Option<String>,
    pub preroll_ms: u32,
    /// Minimum RMS level (0..1) at which frames are dispatched while
    /// streaming, even absent a positive VAD decision (spec §4.5).
    pub min_level: f32,
}

impl From<&AudioConfig> for AudioManagerConfig {
    fn from(c: &AudioConfig) -> Self {
        Self {
            sample_rate: c.sample_rate,
            frame_samples: c.frame_samples,
            buffer_count: c.buffer_count,
            device_name: c.device_name.clone(),
            preroll_ms: 300,
            min_level: 0.02,
        }
    }
}

impl Default for AudioManagerConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            frame_samples: 320,
            buffer_count: 4,
            device_name: None,
            preroll_ms: 300,
            min_level: 0.02,
        }
    }
}

#[derive(Default)]
struct AudioStats {
    frames_captured: AtomicU64,
    short_reads: AtomicU64,
    frames_dispatched: AtomicU64,
    level_bits: AtomicU32,
}

/// Snapshot of the capture task's monotonic counters, read without
/// locking (tearing across fields is acceptable for display).
#[derive(Debug, Clone, Copy, Default)]
pub struct CaptureStats {
    pub frames_captured: u64,
    pub short_reads: u64,
    pub frames_dispatched: u64,
    pub level: f32,
    pub dropped_preroll_bytes: u64,
}

impl AudioStats {
    fn set_level(&self, level: f32) {
        self.level_bits.store(level.to_bits(), Ordering::Relaxed);
    }

    fn level(&self) -> f32 {
        f32::from_bits(self.level_bits.load(Ordering::Relaxed))
    }
}

type VadCallback = Box<dyn FnMut(bool) + Send>;
type AudioDataCallback = Box<dyn FnMut(&[i16]) + Send>;
type WakeFrameSink = Box<dyn FnMut(&[i16]) + Send>;

#[derive(Default)]
struct Callbacks {
    vad: Option<VadCallback>,
    audio_data: Option<AudioDataCallback>,
    wake_sink: Option<WakeFrameSink>,
}

struct ManagerState {
    audio_state: AudioState,
    gain_db: f32,
}

fn gain_linear(gain_db: f32) -> f32 {
    10f32.powf(gain_db / 20.0)
}

fn apply_gain(frame: &mut [i16], gain: f32) {
    if gain == 1.0 {
        return;
    }
    for sample in frame.iter_mut() {
        let scaled = (*sample as f32) * gain;
        *sample = scaled.clamp(i16::MIN as f32, i16::MAX as f32) as i16;
    }
}

/// Owns the capture task, the pre-roll ring, and the VAD. Network code
/// never touches `preroll` or `vad` directly — only through
/// `get_back_buffer_samples` (which takes the same mutex the capture
/// task uses) and the audio-data callback.
pub struct AudioManager {
    config: AudioManagerConfig,
    state: Arc<Mutex<ManagerState>>,
    preroll: Arc<RingBuffer>,
    vad: Arc<Mutex<VadProcessor>>,
    callbacks: Arc<Mutex<Callbacks>>,
    stats: Arc<AudioStats>,
    stop_flag: Arc<AtomicBool>,
    capture_thread: Mutex<Option<JoinHandle<()>>>,
}

impl AudioManager {
    pub fn new(config: AudioManagerConfig) -> Self {
        let preroll_bytes =
            (config.sample_rate as u64 * config.preroll_ms as u64 / 1000 * 2) as usize;
        Self {
            state: Arc::new(Mutex::new(ManagerState {
                audio_state: AudioState::Idle,
                gain_db: 0.0,
            })),
            preroll: Arc::new(RingBuffer::new(preroll_bytes)),
            vad: Arc::new(Mutex::new(VadProcessor::new(Default::default()))),
            callbacks: Arc::new(Mutex::new(Callbacks::default())),
            stats: Arc::new(AudioStats::default()),
            stop_flag: Arc::new(AtomicBool::new(false)),
            capture_thread: Mutex::new(None),
            config,
        }
    }

    pub fn set_vad_callback(&self, cb: impl FnMut(bool) + Send + 'static) {
        self.callbacks.lock().expect("callbacks mutex poisoned").vad = Some(Box::new(cb));
    }

    pub fn set_audio_data_callback(&self, cb: impl FnMut(&[i16]) + Send + 'static) {
        self.callbacks
            .lock()
            .expect("callbacks mutex poisoned")
            .audio_data = Some(Box::new(cb));
    }

    pub fn set_wake_frame_sink(&self, cb: impl FnMut(&[i16]) + Send + 'static) {
        self.callbacks
            .lock()
            .expect("callbacks mutex poisoned")
            .wake_sink = Some(Box::new(cb));
    }

    pub fn set_gain(&self, gain_db: f32) {
        self.state.lock().expect("state mutex poisoned").gain_db = gain_db;
    }

    pub fn set_vad_sensitivity(&self, sensitivity: f32) {
        self.vad
            .lock()
            .expect("vad mutex poisoned")
            .set_sensitivity(sensitivity);
    }

    pub fn audio_state(&self) -> AudioState {
        self.state.lock().expect("state mutex poisoned").audio_state
    }

    pub fn get_audio_level(&self) -> f32 {
        self.stats.level()
    }

    pub fn frames_captured(&self) -> u64 {
        self.stats.frames_captured.load(Ordering::Relaxed)
    }

    pub fn short_reads(&self) -> u64 {
        self.stats.short_reads.load(Ordering::Relaxed)
    }

    pub fn frames_dispatched(&self) -> u64 {
        self.stats.frames_dispatched.load(Ordering::Relaxed)
    }

    pub fn dropped_preroll_bytes(&self) -> u64 {
        self.preroll.dropped_bytes()
    }

    pub fn preroll_capacity(&self) -> usize {
        self.preroll.capacity()
    }

    /// All capture counters in one lock-free snapshot.
    pub fn get_capture_stats(&self) -> CaptureStats {
        CaptureStats {
            frames_captured: self.frames_captured(),
            short_reads: self.short_reads(),
            frames_dispatched: self.frames_dispatched(),
            level: self.get_audio_level(),
            dropped_preroll_bytes: self.dropped_preroll_bytes(),
        }
    }

    /// Drain up to `max_bytes` of the most recent pre-roll audio, taking
    /// the same lock the capture task writes under.
    pub fn get_back_buffer_samples(&self, max_bytes: usize) -> Vec<u8> {
        self.preroll.read(max_bytes)
    }

    pub fn start_streaming(&self) {
        self.state.lock().expect("state mutex poisoned").audio_state = AudioState::Streaming;
    }

    pub fn stop_streaming(&self) {
        let mut state = self.state.lock().expect("state mutex poisoned");
        if state.audio_state == AudioState::Streaming {
            state.audio_state = AudioState::Capturing;
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.audio_state() == AudioState::Streaming
    }

    /// Spawn the capture task. Building and playing the `cpal::Stream`
    /// happens entirely on the spawned thread since `cpal::Stream` is
    /// not `Send` — the same reason `agent-edge-rs`'s audio backends
    /// build their device inside a dedicated `std::thread::spawn`.
    pub fn start_capture(&self) -> Result<(), AudioError> {
        let mut guard = self.capture_thread.lock().expect("capture thread mutex poisoned");
        if guard.is_some() {
            return Err(AudioError::AlreadyCapturing);
        }

        {
            let mut state = self.state.lock().expect("state mutex poisoned");
            if state.audio_state != AudioState::Idle {
                return Err(AudioError::AlreadyCapturing);
            }
            state.audio_state = AudioState::Capturing;
        }

        self.stop_flag.store(false, Ordering::SeqCst);

        let config = self.config.clone();
        let state = Arc::clone(&self.state);
        let preroll = Arc::clone(&self.preroll);
        let vad = Arc::clone(&self.vad);
        let callbacks = Arc::clone(&self.callbacks);
        let stats = Arc::clone(&self.stats);
        let stop_flag = Arc::clone(&self.stop_flag);

        let handle = std::thread::Builder::new()
            .name("audio-capture".into())
            .spawn(move || {
                if let Err(e) =
                    run_capture_loop(config, state, preroll, vad, callbacks, stats, stop_flag)
                {
                    log::error!("audio capture task exited with error: {e}");
                }
            })
            .map_err(|e| AudioError::Stream(e.to_string()))?;

        *guard = Some(handle);
        Ok(())
    }

    pub fn stop_capture(&self) -> Result<(), AudioError> {
        self.stop_flag.store(true, Ordering::SeqCst);
        let handle = self
            .capture_thread
            .lock()
            .expect("capture thread mutex poisoned")
            .take();
        match handle {
            Some(h) => {
                let _ = h.join();
                self.state.lock().expect("state mutex poisoned").audio_state = AudioState::Idle;
                Ok(())
            }
            None => Err(AudioError::NotCapturing),
        }
    }

}

fn run_capture_loop(
    config: AudioManagerConfig,
    state: Arc<Mutex<ManagerState>>,
    preroll: Arc<RingBuffer>,
    vad: Arc<Mutex<VadProcessor>>,
    callbacks: Arc<Mutex<Callbacks>>,
    stats: Arc<AudioStats>,
    stop_flag: Arc<AtomicBool>,
) -> Result<(), AudioError> {
    let host = cpal::default_host();
    let device = match &config.device_name {
        Some(name) => host
            .input_devices()
            .map_err(|e| AudioError::Device(e.to_string()))?
            .find(|d| d.name().map(|n| &n == name).unwrap_or(false))
            .ok_or_else(|| AudioError::Device(format!("device not found: {name}")))?,
        None => host
            .default_input_device()
            .ok_or_else(|| AudioError::Device("no default input device".into()))?,
    };

    let supported = device
        .default_input_config()
        .map_err(|e| AudioError::Device(e.to_string()))?;
    let sample_format = supported.sample_format();
    let stream_config = cpal::StreamConfig {
        channels: supported.channels(),
        sample_rate: cpal::SampleRate(config.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let (tx, rx) = mpsc::sync_channel::<Vec<i16>>(config.buffer_count.max(2));
    let channels = stream_config.channels as usize;
    let frame_samples = config.frame_samples;

    let err_fn = |e| log::error!("audio stream error: {e}");
    let stream = match sample_format {
        SampleFormat::I16 => build_stream::<i16>(&device, &stream_config, tx, channels, frame_samples, err_fn)?,
        SampleFormat::U16 => build_stream::<u16>(&device, &stream_config, tx, channels, frame_samples, err_fn)?,
        SampleFormat::F32 => build_stream::<f32>(&device, &stream_config, tx, channels, frame_samples, err_fn)?,
        other => return Err(AudioError::Device(format!("unsupported sample format: {other:?}"))),
    };

    stream.play().map_err(|e| AudioError::Stream(e.to_string()))?;

    let frame_period = Duration::from_millis(
        (1000 * frame_samples as u64) / config.sample_rate.max(1) as u64,
    );
    let start = Instant::now();
    let mut tick: u64 = 0;

    while !stop_flag.load(Ordering::SeqCst) {
        tick += 1;
        let deadline = start + frame_period * tick as u32;
        let now = Instant::now();
        let wait = deadline.saturating_duration_since(now);

        match rx.recv_timeout(wait.max(Duration::from_millis(1))) {
            Ok(frame) => {
                if frame.is_empty() {
                    log::warn!("zero-length audio frame read; skipping");
                    continue;
                }
                dispatch_frame(frame, &config, &state, &preroll, &vad, &callbacks, &stats);
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                stats.short_reads.fetch_add(1, Ordering::Relaxed);
                log::debug!("short read: no audio frame by deadline, continuing");
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    drop(stream);
    Ok(())
}

fn dispatch_frame(
    mut frame: Vec<i16>,
    config: &AudioManagerConfig,
    state: &Arc<Mutex<ManagerState>>,
    preroll: &Arc<RingBuffer>,
    vad: &Arc<Mutex<VadProcessor>>,
    callbacks: &Arc<Mutex<Callbacks>>,
    stats: &Arc<AudioStats>,
) {
    stats.frames_captured.fetch_add(1, Ordering::Relaxed);

    let (audio_state, gain) = {
        let state = state.lock().expect("state mutex poisoned");
        (state.audio_state, gain_linear(state.gain_db))
    };
    apply_gain(&mut frame, gain);
    let frame = frame.as_slice();

    let rms = rms_level(frame);
    stats.set_level(rms);

    let bytes: Vec<u8> = frame.iter().flat_map(|s| s.to_le_bytes()).collect();
    preroll.write(&bytes);

    let voice_present = {
        let mut vad = vad.lock().expect("vad mutex poisoned");
        vad.process_frame(frame)
    };

    let mut callbacks = callbacks.lock().expect("callbacks mutex poisoned");
    if let Some(cb) = callbacks.vad.as_mut() {
        cb(voice_present);
    }
    if let Some(sink) = callbacks.wake_sink.as_mut() {
        sink(frame);
    }
    let is_streaming = audio_state == AudioState::Streaming;
    if is_streaming && (voice_present || rms > config.min_level) {
        if let Some(data_cb) = callbacks.audio_data.as_mut() {
            data_cb(frame);
        }
    }
    stats.frames_dispatched.fetch_add(1, Ordering::Relaxed);
}

fn rms_level(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    ((sum_sq / samples.len() as f64).sqrt() / i16::MAX as f64) as f32
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    tx: mpsc::SyncSender<Vec<i16>>,
    channels: usize,
    frame_samples: usize,
    err_fn: impl FnMut(cpal::StreamError) + Send + 'static + Copy,
) -> Result<cpal::Stream, AudioError>
where
    T: Sample + SizedSample + Send + Sync + 'static,
    i16: FromSample<T>,
{
    let mut scratch = Vec::with_capacity(frame_samples);
    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                for frame in data.chunks(channels) {
                    if let Some(sample) = frame.first() {
                        scratch.push(i16::from_sample(*sample));
                        if scratch.len() >= frame_samples {
                            let _ = tx.try_send(std::mem::replace(
                                &mut scratch,
                                Vec::with_capacity(frame_samples),
                            ));
                        }
                    }
                }
            },
            err_fn,
            None,
        )
        .map_err(|e| AudioError::Stream(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rms_level_of_silence_is_zero() {
        assert_eq!(rms_level(&[0; 320]), 0.0);
    }

    #[test]
    fn rms_level_of_full_scale_square_wave_is_near_one() {
        let samples: Vec<i16> = (0..320)
            .map(|i| if i % 2 == 0 { i16::MAX } else { i16::MIN })
            .collect();
        assert!(rms_level(&samples) > 0.9);
    }

    #[test]
    fn new_manager_starts_idle() {
        let mgr = AudioManager::new(AudioManagerConfig::default());
        assert_eq!(mgr.audio_state(), AudioState::Idle);
        assert_eq!(mgr.frames_captured(), 0);
    }

    #[test]
    fn stop_capture_without_start_is_an_error() {
        let mgr = AudioManager::new(AudioManagerConfig::default());
        assert!(matches!(mgr.stop_capture(), Err(AudioError::NotCapturing)));
    }

    #[test]
    fn zero_db_gain_is_unity() {
        assert!((gain_linear(0.0) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn positive_gain_amplifies_and_clamps() {
        let mut frame = vec![1_000i16, -1_000, 20_000, -20_000];
        apply_gain(&mut frame, gain_linear(20.0)); // x10
        assert_eq!(frame[0], 10_000);
        assert_eq!(frame[1], -10_000);
        assert_eq!(frame[2], i16::MAX);
        assert_eq!(frame[3], i16::MIN);
    }

    #[test]
    fn dispatch_withholds_audio_data_when_not_streaming() {
        let config = AudioManagerConfig::default();
        let state = Arc::new(Mutex::new(ManagerState {
            audio_state: AudioState::Capturing,
            gain_db: 0.0,
        }));
        let preroll = Arc::new(RingBuffer::new(4096));
        let vad = Arc::new(Mutex::new(VadProcessor::new(Default::default())));
        let callbacks = Arc::new(Mutex::new(Callbacks::default()));
        let stats = Arc::new(AudioStats::default());
        let delivered = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&delivered);
        callbacks.lock().unwrap().audio_data = Some(Box::new(move |_frame| {
            flag.store(true, Ordering::SeqCst);
        }));

        let loud: Vec<i16> = (0..320)
            .map(|i| if i % 2 == 0 { i16::MAX } else { i16::MIN })
            .collect();
        dispatch_frame(loud, &config, &state, &preroll, &vad, &callbacks, &stats);

        assert!(!delivered.load(Ordering::SeqCst));
    }

    #[test]
    fn dispatch_delivers_audio_data_above_min_level_while_streaming() {
        let config = AudioManagerConfig::default();
        let state = Arc::new(Mutex::new(ManagerState {
            audio_state: AudioState::Streaming,
            gain_db: 0.0,
        }));
        let preroll = Arc::new(RingBuffer::new(4096));
        let vad = Arc::new(Mutex::new(VadProcessor::new(Default::default())));
        let callbacks = Arc::new(Mutex::new(Callbacks::default()));
        let stats = Arc::new(AudioStats::default());
        let delivered = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&delivered);
        callbacks.lock().unwrap().audio_data = Some(Box::new(move |_frame| {
            flag.store(true, Ordering::SeqCst);
        }));

        let loud: Vec<i16> = (0..320)
            .map(|i| if i % 2 == 0 { i16::MAX } else { i16::MIN })
            .collect();
        dispatch_frame(loud, &config, &state, &preroll, &vad, &callbacks, &stats);

        assert!(delivered.load(Ordering::SeqCst));
    }

    #[test]
    fn dispatch_withholds_quiet_audio_while_streaming_without_voice() {
        let config = AudioManagerConfig::default();
        let state = Arc::new(Mutex::new(ManagerState {
            audio_state: AudioState::Streaming,
            gain_db: 0.0,
        }));
        let preroll = Arc::new(RingBuffer::new(4096));
        let vad = Arc::new(Mutex::new(VadProcessor::new(Default::default())));
        let callbacks = Arc::new(Mutex::new(Callbacks::default()));
        let stats = Arc::new(AudioStats::default());
        let delivered = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&delivered);
        callbacks.lock().unwrap().audio_data = Some(Box::new(move |_frame| {
            flag.store(true, Ordering::SeqCst);
        }));

        let silence = vec![0i16; 320];
        dispatch_frame(silence, &config, &state, &preroll, &vad, &callbacks, &stats);

        assert!(!delivered.load(Ordering::SeqCst));
    }
}
