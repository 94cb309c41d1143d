use crate::audio::AudioError;
use crate::network::NetworkError;
use crate::wakeword::WakewordError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, EdgeError>;

/// Top-level error type for the edge core.
///
/// Each variant corresponds to one of the design-level error kinds from
/// the firmware spec (`Init`, `Memory`, `AudioDriver`, `WakeWordModel`,
/// `WifiFailed`, `TlsFailed`, `WebSocketFailed`, `SessionState`) so
/// callers can match on kind without caring which component raised it.
#[derive(Error, Debug)]
pub enum EdgeError {
    #[error("initialization failed: {0}")]
    Init(String),

    #[error("bounded allocation failed: {0}")]
    Memory(String),

    #[error(transparent)]
    Audio(#[from] AudioError),

    #[error(transparent)]
    Wakeword(#[from] WakewordError),

    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
