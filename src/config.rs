//! Device configuration surface.
//!
//! A `DeviceConfig` aggregates every recognized option from the external
//! interfaces contract: audio capture, wake word, Wi-Fi, TLS, and
//! WebSocket. It can be loaded from a TOML file with environment
//! overrides for secrets, following the same "load from env, validate,
//! return a typed error" shape as the original `ApiConfig`.

use secrecy::SecretBox;
use serde::Deserialize;
use std::env;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
    #[error("failed to parse config file: {0}")]
    Parse(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct AudioConfig {
    #[serde(default = "defaults::sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "defaults::frame_samples")]
    pub frame_samples: usize,
    #[serde(default = "defaults::buffer_count")]
    pub buffer_count: usize,
    #[serde(default = "defaults::vad_sensitivity")]
    pub vad_sensitivity: f32,
    #[serde(default)]
    pub gain_db: f32,
    pub device_name: Option<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: defaults::sample_rate(),
            frame_samples: defaults::frame_samples(),
            buffer_count: defaults::buffer_count(),
            vad_sensitivity: defaults::vad_sensitivity(),
            gain_db: 0.0,
            device_name: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WakewordConfig {
    #[serde(default = "defaults::threshold")]
    pub threshold: f32,
    #[serde(default = "defaults::trigger_duration_ms")]
    pub trigger_duration_ms: u64,
    #[serde(default)]
    pub use_external_ram: bool,
    pub model_path: String,
}

impl Default for WakewordConfig {
    fn default() -> Self {
        Self {
            threshold: defaults::threshold(),
            trigger_duration_ms: defaults::trigger_duration_ms(),
            use_external_ram: false,
            model_path: "models/wakeword.tflite".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WifiConfig {
    pub ssid: String,
    #[serde(default)]
    pub password: SecretString,
    #[serde(default = "defaults::auto_reconnect")]
    pub auto_reconnect: bool,
    #[serde(default = "defaults::reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,
    #[serde(default = "defaults::max_retries")]
    pub max_retries: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TlsConfig {
    pub ca_cert_pem: String,
    pub client_cert_pem: String,
    #[serde(default)]
    pub client_key_pem: SecretString,
    #[serde(default = "defaults::handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
    #[serde(default = "defaults::verify_peer")]
    pub verify_peer: bool,
    pub expected_common_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebSocketConfig {
    pub uri: String,
    #[serde(default = "defaults::keep_alive_interval_ms")]
    pub keep_alive_interval_ms: u64,
    #[serde(default = "defaults::connection_timeout_ms")]
    pub connection_timeout_ms: u64,
    #[serde(default = "defaults::max_message_size_bytes")]
    pub max_message_size_bytes: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfig {
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub wakeword: WakewordConfig,
    pub wifi: WifiConfig,
    pub tls: TlsConfig,
    pub websocket: WebSocketConfig,
    #[serde(default = "defaults::room")]
    pub room: String,
}

impl DeviceConfig {
    /// Load configuration from a TOML file, then overlay secret fields
    /// (Wi-Fi password, TLS client key) from the environment if present,
    /// following the same `.env`-overlay pattern the edge client used
    /// for API keys.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Parse(format!("{path}: {e}")))?;
        let mut config: DeviceConfig =
            toml::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))?;

        if let Ok(pw) = env::var("WIFI_PASSWORD") {
            config.wifi.password = SecretString::from(pw);
        }
        if let Ok(key) = env::var("TLS_CLIENT_KEY_PEM") {
            config.tls.client_key_pem = SecretString::from(key);
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.wakeword.threshold) {
            return Err(ConfigError::InvalidValue {
                field: "wakeword.threshold".to_string(),
                reason: "must be within [0, 1]".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.audio.vad_sensitivity) {
            return Err(ConfigError::InvalidValue {
                field: "audio.vad_sensitivity".to_string(),
                reason: "must be within [0, 1]".to_string(),
            });
        }
        if self.audio.frame_samples == 0 {
            return Err(ConfigError::InvalidValue {
                field: "audio.frame_samples".to_string(),
                reason: "must be nonzero".to_string(),
            });
        }
        Ok(())
    }
}

/// A `SecretBox<String>` newtype with `serde::Deserialize` support so it
/// can sit directly in `DeviceConfig`, expanding on the plain
/// `SecretBox` usage in the original `ApiConfig`.
#[derive(Debug, Clone, Default)]
pub struct SecretString(SecretBox<String>);

impl SecretString {
    pub fn expose(&self) -> &str {
        use secrecy::ExposeSecret;
        self.0.expose_secret()
    }
}

impl From<String> for SecretString {
    fn from(s: String) -> Self {
        Self(SecretBox::new(Box::new(s)))
    }
}

impl<'de> Deserialize<'de> for SecretString {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(SecretString::from(s))
    }
}

mod defaults {
    pub fn sample_rate() -> u32 {
        16_000
    }
    pub fn frame_samples() -> usize {
        320
    }
    pub fn buffer_count() -> usize {
        4
    }
    pub fn vad_sensitivity() -> f32 {
        0.5
    }
    pub fn threshold() -> f32 {
        0.5
    }
    pub fn trigger_duration_ms() -> u64 {
        150
    }
    pub fn auto_reconnect() -> bool {
        true
    }
    pub fn reconnect_interval_ms() -> u64 {
        2_000
    }
    pub fn max_retries() -> u32 {
        10
    }
    pub fn handshake_timeout_ms() -> u64 {
        10_000
    }
    pub fn verify_peer() -> bool {
        true
    }
    pub fn keep_alive_interval_ms() -> u64 {
        30_000
    }
    pub fn connection_timeout_ms() -> u64 {
        10_000
    }
    pub fn max_message_size_bytes() -> usize {
        64 * 1024
    }
    pub fn room() -> String {
        "default".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_audio_config_matches_spec_frame() {
        let audio = AudioConfig::default();
        assert_eq!(audio.sample_rate, 16_000);
        assert_eq!(audio.frame_samples, 320);
    }

    #[test]
    fn secret_string_exposes_value() {
        let s = SecretString::from("hunter2".to_string());
        assert_eq!(s.expose(), "hunter2");
    }
}
