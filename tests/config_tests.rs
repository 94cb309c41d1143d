//! Device configuration loading: TOML parsing, secret env overlay, and
//! the validation boundary rejects out-of-range values before any
//! component starts up.

use edge_core::config::DeviceConfig;
use std::io::Write;

fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().expect("create temp config file");
    file.write_all(contents.as_bytes()).expect("write temp config file");
    file
}

const VALID_CONFIG: &str = r#"
room = "kitchen"

[wifi]
ssid = "home-network"

[tls]
ca_cert_pem = "-----BEGIN CERTIFICATE-----\nMA==\n-----END CERTIFICATE-----\n"
client_cert_pem = "-----BEGIN CERTIFICATE-----\nMA==\n-----END CERTIFICATE-----\n"
expected_common_name = "fleet.example.internal"

[websocket]
uri = "wss://fleet.example.internal/audio"
"#;

#[test]
fn valid_config_loads_with_documented_defaults() {
    let file = write_config(VALID_CONFIG);
    let config = DeviceConfig::load(file.path().to_str().unwrap()).expect("valid config should load");
    assert_eq!(config.audio.sample_rate, 16_000);
    assert_eq!(config.audio.frame_samples, 320);
    assert_eq!(config.wakeword.threshold, 0.5);
    assert_eq!(config.room, "kitchen");
}

#[test]
fn wifi_password_env_var_overlays_the_file() {
    std::env::set_var("WIFI_PASSWORD", "correct-horse-battery-staple");
    let file = write_config(VALID_CONFIG);
    let config = DeviceConfig::load(file.path().to_str().unwrap()).expect("valid config should load");
    assert_eq!(config.wifi.password.expose(), "correct-horse-battery-staple");
    std::env::remove_var("WIFI_PASSWORD");
}

#[test]
fn out_of_range_threshold_is_rejected() {
    let bad = VALID_CONFIG.replace(
        "[wifi]",
        "[wakeword]\nthreshold = 1.5\nmodel_path = \"models/wakeword.tflite\"\n\n[wifi]",
    );
    let file = write_config(&bad);
    let result = DeviceConfig::load(file.path().to_str().unwrap());
    assert!(result.is_err());
}

#[test]
fn missing_required_field_fails_to_parse() {
    let file = write_config("room = \"kitchen\"\n");
    let result = DeviceConfig::load(file.path().to_str().unwrap());
    assert!(result.is_err());
}
