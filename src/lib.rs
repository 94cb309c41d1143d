//! Always-listening wake-word edge firmware core.
//!
//! Ties together frame-paced audio capture, quantized wake-word
//! inference, and a mutual-TLS WebSocket session manager for
//! low-powered always-listening devices.

pub mod audio;
pub mod config;
pub mod error;
pub mod led_ring;
pub mod network;
pub mod ring_buffer;
pub mod wakeword;

pub use error::{EdgeError, Result};
