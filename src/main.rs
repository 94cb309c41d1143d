use anyhow::{Context, Result};
use clap::Parser;
use cpal::traits::{DeviceTrait, HostTrait};
use edge_core::audio::mfcc::{MfccFrontend, FEATURE_SIZE};
use edge_core::audio::{AudioManager, AudioManagerConfig};
use edge_core::config::DeviceConfig;
use edge_core::network::{HostReachabilityWifiLink, NetworkManager, WifiLink};
use edge_core::wakeword::{WakeWordDetector, WakeWordDetectorConfig};
use log::{error, info, warn};
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc as tokio_mpsc;

#[derive(Parser)]
#[command(name = "edge-core")]
#[command(about = "Always-listening wake-word edge firmware core")]
struct Args {
    /// Path to the device configuration TOML file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// List available audio input devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Development mode: run the audio + wake-word pipeline without a
    /// network connection, logging detections locally.
    #[arg(long)]
    dev_mode: bool,
}

fn list_devices() -> Result<()> {
    let host = cpal::default_host();
    for device in host.input_devices()? {
        info!("input device: {}", device.name()?);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    if args.list_devices {
        return list_devices();
    }

    info!("starting edge-core on {} {}", std::env::consts::OS, std::env::consts::ARCH);

    let config = DeviceConfig::load(&args.config).context("loading device configuration")?;

    let audio_config = AudioManagerConfig::from(&config.audio);
    let audio = Arc::new(AudioManager::new(audio_config));

    let (wake_frame_tx, wake_frame_rx) = std_mpsc::sync_channel::<Vec<i16>>(8);
    audio.set_wake_frame_sink(move |frame| {
        let _ = wake_frame_tx.try_send(frame.to_vec());
    });

    let (pcm_tx, mut pcm_rx) = tokio_mpsc::unbounded_channel::<Vec<u8>>();
    audio.set_audio_data_callback(move |frame| {
        let bytes: Vec<u8> = frame.iter().flat_map(|s| s.to_le_bytes()).collect();
        let _ = pcm_tx.send(bytes);
    });

    let (wake_event_tx, mut wake_event_rx) = tokio_mpsc::unbounded_channel::<f32>();
    spawn_wake_inference_thread(&config, wake_frame_rx, wake_event_tx)?;

    audio.start_capture().context("starting audio capture")?;
    info!("audio capture started");

    if args.dev_mode {
        info!("dev mode: network session manager disabled, dumping detections to debug_wavs/");
        std::fs::create_dir_all("debug_wavs").context("creating debug_wavs directory")?;
        while let Some(score) = wake_event_rx.recv().await {
            info!("wake word detected, score={score:.3}");
            let preroll = audio.get_back_buffer_samples(audio.preroll_capacity());
            if let Err(e) = dump_debug_wav(&preroll, config.audio.sample_rate, score) {
                warn!("failed to write debug wav: {e}");
            }
        }
        return Ok(());
    }

    let wifi: Arc<dyn WifiLink> = Arc::new(HostReachabilityWifiLink::new(
        url_host(&config.websocket.uri).unwrap_or_else(|| "127.0.0.1".to_string()),
        443,
    ));
    let network = Arc::new(NetworkManager::new(&config, wifi));

    network.connect().await.context("initial network connect")?;

    let supervision = tokio::spawn(Arc::clone(&network).run_supervision_loop());

    let pcm_task = {
        let network = Arc::clone(&network);
        let audio = Arc::clone(&audio);
        tokio::spawn(async move {
            while let Some(chunk) = pcm_rx.recv().await {
                if audio.is_streaming() {
                    if let Err(e) = network.send_audio_chunk(&chunk).await {
                        warn!("failed to forward audio chunk: {e}");
                    }
                }
            }
        })
    };

    let wake_task = {
        let network = Arc::clone(&network);
        let audio = Arc::clone(&audio);
        let sample_rate = config.audio.sample_rate;
        tokio::spawn(async move {
            while let Some(score) = wake_event_rx.recv().await {
                info!("wake word fired, score={score:.3}");
                if let Err(e) = network.start_audio_session(sample_rate).await {
                    warn!("could not start audio session after wake: {e}");
                    continue;
                }
                let preroll = audio.get_back_buffer_samples(audio.preroll_capacity());
                if !preroll.is_empty() {
                    if let Err(e) = network.send_audio_chunk(&preroll).await {
                        warn!("failed to flush pre-roll: {e}");
                    }
                }
                audio.start_streaming();
            }
        })
    };

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    audio.stop_streaming();
    let _ = audio.stop_capture();
    network.disconnect().await;
    supervision.abort();
    pcm_task.abort();
    wake_task.abort();
    Ok(())
}

/// Dump pre-roll audio captured around a wake event to a WAV file under
/// `debug_wavs/`, named by UTC timestamp and detection score, for
/// offline inspection while tuning sensitivity in development.
fn dump_debug_wav(pcm_bytes: &[u8], sample_rate: u32, score: f32) -> Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let timestamp = chrono::Utc::now().format("%Y%m%dT%H%M%S%.3f");
    let path = format!("debug_wavs/wake_{timestamp}_{score:.3}.wav");
    let mut writer = hound::WavWriter::create(&path, spec)?;
    for chunk in pcm_bytes.chunks_exact(2) {
        writer.write_sample(i16::from_le_bytes([chunk[0], chunk[1]]))?;
    }
    writer.finalize()?;
    info!("wrote debug wav: {path}");
    Ok(())
}

fn url_host(uri: &str) -> Option<String> {
    url::Url::parse(uri).ok()?.host_str().map(|s| s.to_string())
}

fn spawn_wake_inference_thread(
    config: &DeviceConfig,
    frame_rx: std_mpsc::Receiver<Vec<i16>>,
    event_tx: tokio_mpsc::UnboundedSender<f32>,
) -> Result<()> {
    let model_path = config.wakeword.model_path.clone();
    let threshold = config.wakeword.threshold;
    let trigger_ms = config.wakeword.trigger_duration_ms;
    let sample_rate = config.audio.sample_rate;

    std::thread::Builder::new()
        .name("wake-inference".into())
        .spawn(move || {
            let mut frontend = MfccFrontend::new(sample_rate);
            let detector_config = WakeWordDetectorConfig {
                threshold,
                trigger_duration: std::time::Duration::from_millis(trigger_ms),
                expected_input_size: FEATURE_SIZE,
                ..Default::default()
            };
            let mut detector = match WakeWordDetector::new(&model_path, detector_config) {
                Ok(d) => d,
                Err(e) => {
                    error!("failed to load wake-word model {model_path}: {e}");
                    return;
                }
            };

            let silence_probe = vec![0.0f32; FEATURE_SIZE];
            if let Err(e) = detector.sanity_check(&[silence_probe.clone(), silence_probe.clone(), silence_probe]) {
                error!("wake-word model failed boot sanity check: {e}");
                return;
            }
            info!("wake-word model loaded and passed boot sanity check");

            while let Ok(frame) = frame_rx.recv() {
                if !frontend.process_samples(&frame) {
                    continue;
                }
                let Some(features) = frontend.get_features() else {
                    continue;
                };
                match detector.process_features(&features, Instant::now()) {
                    Ok(Some(score)) if detector.is_fired() => {
                        let _ = event_tx.send(score);
                    }
                    Ok(_) => {}
                    Err(e) => warn!("wake-word inference error: {e}"),
                }
            }
        })
        .context("spawning wake-inference thread")?;
    Ok(())
}
