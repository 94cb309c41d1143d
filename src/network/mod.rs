//! Network session manager: Wi-Fi association, mutual TLS, and the
//! WebSocket audio session, all driven through one state machine.

pub mod tls;
pub mod wifi;
pub mod ws;

pub use wifi::{HostReachabilityWifiLink, WifiError, WifiLink};
pub use ws::{AudioSessionConfig, ServerEvent, WebSocketClient, WsError};

use crate::config::{DeviceConfig, TlsConfig, WebSocketConfig, WifiConfig};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tls::TlsError;
use tokio::sync::Mutex;

#[derive(Error, Debug)]
pub enum NetworkError {
    #[error(transparent)]
    Wifi(#[from] WifiError),
    #[error(transparent)]
    Tls(#[from] TlsError),
    #[error(transparent)]
    WebSocket(#[from] WsError),
    #[error("operation invalid in state {0:?}")]
    InvalidState(SessionState),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    ConnectingWifi,
    ConnectingTls,
    Connected,
    AudioActive,
}

/// Exponential backoff bounded by `wifi.max_retries`, matching the
/// `auto_reconnect`/`reconnect_interval_ms` contract in `WifiConfig`.
struct ReconnectPolicy {
    base_interval: Duration,
    max_retries: u32,
    attempt: AtomicU32,
}

impl ReconnectPolicy {
    fn new(config: &WifiConfig) -> Self {
        Self {
            base_interval: Duration::from_millis(config.reconnect_interval_ms),
            max_retries: config.max_retries,
            attempt: AtomicU32::new(0),
        }
    }

    fn next_delay(&self) -> Option<Duration> {
        let attempt = self.attempt.fetch_add(1, Ordering::SeqCst);
        if attempt >= self.max_retries {
            return None;
        }
        let factor = 1u32 << attempt.min(6);
        Some(self.base_interval * factor)
    }

    fn reset(&self) {
        self.attempt.store(0, Ordering::SeqCst);
    }
}

/// Snapshot of the network manager's monotonic counters, read without
/// locking (tearing across fields is acceptable for display).
#[derive(Debug, Clone, Copy, Default)]
pub struct NetworkStats {
    pub connect_attempts: u64,
    pub reconnects: u64,
    pub audio_bytes_sent: u64,
    pub send_errors: u64,
}

#[derive(Default)]
struct NetworkCounters {
    connect_attempts: AtomicU64,
    reconnects: AtomicU64,
    audio_bytes_sent: AtomicU64,
    send_errors: AtomicU64,
}

pub struct NetworkManager {
    wifi: Arc<dyn WifiLink>,
    wifi_config: WifiConfig,
    tls_config: TlsConfig,
    ws_config: WebSocketConfig,
    room: String,
    state: Mutex<SessionState>,
    ws_client: Mutex<Option<WebSocketClient>>,
    reconnect: ReconnectPolicy,
    reconnect_exhausted: std::sync::atomic::AtomicBool,
    counters: NetworkCounters,
}

impl NetworkManager {
    pub fn new(config: &DeviceConfig, wifi: Arc<dyn WifiLink>) -> Self {
        Self {
            wifi,
            wifi_config: config.wifi.clone(),
            tls_config: config.tls.clone(),
            ws_config: config.websocket.clone(),
            room: config.room.clone(),
            state: Mutex::new(SessionState::Disconnected),
            ws_client: Mutex::new(None),
            reconnect: ReconnectPolicy::new(&config.wifi),
            reconnect_exhausted: std::sync::atomic::AtomicBool::new(false),
            counters: NetworkCounters::default(),
        }
    }

    pub async fn state(&self) -> SessionState {
        *self.state.lock().await
    }

    /// All network counters in one lock-free snapshot.
    pub fn get_network_stats(&self) -> NetworkStats {
        NetworkStats {
            connect_attempts: self.counters.connect_attempts.load(Ordering::Relaxed),
            reconnects: self.counters.reconnects.load(Ordering::Relaxed),
            audio_bytes_sent: self.counters.audio_bytes_sent.load(Ordering::Relaxed),
            send_errors: self.counters.send_errors.load(Ordering::Relaxed),
        }
    }

    /// Drive `Disconnected -> ConnectingWifi -> ConnectingTls -> Connected`.
    /// The WebSocket handshake doubles as the TLS handshake since the
    /// session is carried over `wss://`.
    pub async fn connect(&self) -> Result<(), NetworkError> {
        self.counters.connect_attempts.fetch_add(1, Ordering::Relaxed);
        *self.state.lock().await = SessionState::ConnectingWifi;
        self.wifi.connect(&self.wifi_config).await?;

        *self.state.lock().await = SessionState::ConnectingTls;
        let client = WebSocketClient::connect(&self.ws_config, &self.tls_config).await?;
        *self.ws_client.lock().await = Some(client);

        *self.state.lock().await = SessionState::Connected;
        self.reconnect.reset();
        Ok(())
    }

    pub async fn disconnect(&self) {
        if let Some(mut client) = self.ws_client.lock().await.take() {
            let _ = client.close().await;
        }
        self.wifi.disconnect().await;
        *self.state.lock().await = SessionState::Disconnected;
    }

    /// Begin an audio session: sends the mandatory `config` message and
    /// transitions into `AudioActive`. Fails if not currently `Connected`.
    pub async fn start_audio_session(&self, sample_rate: u32) -> Result<(), NetworkError> {
        let mut state = self.state.lock().await;
        if *state != SessionState::Connected {
            return Err(NetworkError::InvalidState(*state));
        }
        let mut guard = self.ws_client.lock().await;
        let client = guard.as_mut().ok_or(NetworkError::InvalidState(*state))?;
        client
            .send_config(&AudioSessionConfig {
                room: self.room.clone(),
                sample_rate,
                encoding: "pcm_s16le",
            })
            .await?;
        *state = SessionState::AudioActive;
        Ok(())
    }

    pub async fn send_audio_chunk(&self, chunk: &[u8]) -> Result<(), NetworkError> {
        let state = self.state.lock().await;
        if *state != SessionState::AudioActive {
            return Err(NetworkError::InvalidState(*state));
        }
        let mut guard = self.ws_client.lock().await;
        let client = guard.as_mut().ok_or(NetworkError::InvalidState(*state))?;
        if let Err(e) = client.send_audio_chunk(chunk).await {
            self.counters.send_errors.fetch_add(1, Ordering::Relaxed);
            return Err(e.into());
        }
        self.counters
            .audio_bytes_sent
            .fetch_add(chunk.len() as u64, Ordering::Relaxed);
        Ok(())
    }

    /// End the current audio session (sends `eof`) and fall back to
    /// `Connected`, ready for another `start_audio_session`.
    pub async fn end_audio_session(&self) -> Result<(), NetworkError> {
        let mut state = self.state.lock().await;
        if *state != SessionState::AudioActive {
            return Err(NetworkError::InvalidState(*state));
        }
        let mut guard = self.ws_client.lock().await;
        if let Some(client) = guard.as_mut() {
            client.send_eof().await?;
        }
        drop(guard);
        // The socket stays open across sessions; teardown is driven only
        // by `disconnect()` or a fatal network error, never by `eof`.
        *state = SessionState::Connected;
        Ok(())
    }

    pub async fn next_event(&self) -> Result<Option<ServerEvent>, NetworkError> {
        let mut guard = self.ws_client.lock().await;
        match guard.as_mut() {
            Some(client) => Ok(Some(client.next_event().await?)),
            None => Ok(None),
        }
    }

    /// Supervision loop: reconnects with backoff while `auto_reconnect`
    /// is set and the retry budget isn't exhausted, and sends an idle
    /// keep-alive ping every `keep_alive_interval_ms` while connected.
    /// Intended to run as its own tokio task for the lifetime of the
    /// process.
    pub async fn run_supervision_loop(self: Arc<Self>) {
        let mut reconnect_ticker = tokio::time::interval(Duration::from_secs(1));
        let mut keep_alive_ticker = tokio::time::interval(Duration::from_millis(
            self.ws_config.keep_alive_interval_ms.max(1),
        ));
        loop {
            tokio::select! {
                _ = reconnect_ticker.tick() => self.run_reconnect_tick().await,
                _ = keep_alive_ticker.tick() => self.run_keep_alive_tick().await,
            }
            if self.reconnect_exhausted.load(Ordering::SeqCst) {
                break;
            }
        }
    }

    async fn run_reconnect_tick(&self) {
        let disconnected = self.state().await == SessionState::Disconnected;
        if !disconnected || !self.wifi_config.auto_reconnect {
            return;
        }
        match self.reconnect.next_delay() {
            Some(delay) => {
                log::warn!("network disconnected, reconnecting in {delay:?}");
                tokio::time::sleep(delay).await;
                self.counters.reconnects.fetch_add(1, Ordering::Relaxed);
                if let Err(e) = self.connect().await {
                    log::error!("reconnect attempt failed: {e}");
                }
            }
            None => {
                log::error!("exhausted reconnect attempts, giving up");
                self.reconnect_exhausted.store(true, Ordering::SeqCst);
            }
        }
    }

    async fn run_keep_alive_tick(&self) {
        let connected = !matches!(
            self.state().await,
            SessionState::Disconnected | SessionState::ConnectingWifi | SessionState::ConnectingTls
        );
        if !connected {
            return;
        }
        let mut guard = self.ws_client.lock().await;
        if let Some(client) = guard.as_mut() {
            if let Err(e) = client.send_ping().await {
                log::warn!("keep-alive ping failed: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconnect_policy_gives_up_after_max_retries() {
        let config = WifiConfig {
            ssid: "x".into(),
            password: Default::default(),
            auto_reconnect: true,
            reconnect_interval_ms: 10,
            max_retries: 3,
        };
        let policy = ReconnectPolicy::new(&config);
        assert!(policy.next_delay().is_some());
        assert!(policy.next_delay().is_some());
        assert!(policy.next_delay().is_some());
        assert!(policy.next_delay().is_none());
    }

    #[test]
    fn reconnect_policy_resets_attempt_counter() {
        let config = WifiConfig {
            ssid: "x".into(),
            password: Default::default(),
            auto_reconnect: true,
            reconnect_interval_ms: 10,
            max_retries: 1,
        };
        let policy = ReconnectPolicy::new(&config);
        assert!(policy.next_delay().is_some());
        policy.reset();
        assert!(policy.next_delay().is_some());
    }
}
