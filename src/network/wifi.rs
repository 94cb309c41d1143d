//! Wi-Fi link capability.
//!
//! No corpus repo associates with a WPA2 access point directly — that
//! lives below the Rust application layer on real firmware, talked to
//! through a vendor SDK. Per the capability-interface design note, this
//! is modeled as a trait so the supervision state machine in
//! `NetworkManager` is exercised the same way on real hardware and in
//! tests, with `HostReachabilityWifiLink` standing in for a concrete
//! station driver: it treats "link up" as the configured host being
//! reachable over whatever network interface is already present.

use crate::config::WifiConfig;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;

#[derive(Error, Debug)]
pub enum WifiError {
    #[error("association failed: {0}")]
    AssociationFailed(String),
    #[error("link not connected")]
    NotConnected,
}

#[async_trait]
pub trait WifiLink: Send + Sync {
    async fn connect(&self, config: &WifiConfig) -> Result<(), WifiError>;
    async fn disconnect(&self);
    fn is_connected(&self) -> bool;
}

/// Default `WifiLink`: treats the link as "up" once a TCP connection to
/// `probe_host:probe_port` succeeds, since this crate runs on hosts that
/// manage their own network association outside of it. Real firmware
/// replaces this with a vendor SDK binding behind the same trait.
pub struct HostReachabilityWifiLink {
    probe_host: String,
    probe_port: u16,
    connected: std::sync::atomic::AtomicBool,
}

impl HostReachabilityWifiLink {
    pub fn new(probe_host: impl Into<String>, probe_port: u16) -> Self {
        Self {
            probe_host: probe_host.into(),
            probe_port,
            connected: std::sync::atomic::AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl WifiLink for HostReachabilityWifiLink {
    async fn connect(&self, config: &WifiConfig) -> Result<(), WifiError> {
        let addr = format!("{}:{}", self.probe_host, self.probe_port);
        let attempt = tokio::time::timeout(Duration::from_millis(5_000), TcpStream::connect(&addr)).await;
        match attempt {
            Ok(Ok(_stream)) => {
                self.connected.store(true, std::sync::atomic::Ordering::SeqCst);
                Ok(())
            }
            Ok(Err(e)) => Err(WifiError::AssociationFailed(format!(
                "ssid {}: {e}",
                config.ssid
            ))),
            Err(_) => Err(WifiError::AssociationFailed(format!(
                "ssid {}: timed out reaching {addr}",
                config.ssid
            ))),
        }
    }

    async fn disconnect(&self) {
        self.connected.store(false, std::sync::atomic::Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unreachable_host_reports_association_failed() {
        let link = HostReachabilityWifiLink::new("192.0.2.1", 1); // TEST-NET-1, unroutable
        let config = WifiConfig {
            ssid: "test".to_string(),
            password: Default::default(),
            auto_reconnect: true,
            reconnect_interval_ms: 1_000,
            max_retries: 1,
        };
        let result = tokio::time::timeout(Duration::from_millis(200), link.connect(&config)).await;
        // Either the connect attempt errors quickly or our own timeout fires first;
        // either way the link must not report itself connected.
        let _ = result;
        assert!(!link.is_connected());
    }
}
