//! Status indicator stub.
//!
//! The device UI (LEDs/buttons) is out of scope for this firmware core,
//! but the collaborator boundary is kept so a real board can plug one
//! in without touching the audio or network tasks. `LoggingIndicator` is
//! the default: it just logs state transitions. Behind `led_ring`, a
//! ReSpeaker USB ring is driven with the same direct control-transfer
//! sequence as `agent-edge-rs`'s `led_ring.rs`, trimmed to the handful
//! of states this firmware actually reaches.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndicatorState {
    Idle,
    Listening,
    Streaming,
    Error,
}

pub trait StatusIndicator: Send + Sync {
    fn set_state(&self, state: IndicatorState);
}

pub struct LoggingIndicator;

impl StatusIndicator for LoggingIndicator {
    fn set_state(&self, state: IndicatorState) {
        log::debug!("status indicator -> {state:?}");
    }
}

#[cfg(feature = "led_ring")]
pub use respeaker::{LedRingError, LedRingIndicator};

#[cfg(feature = "led_ring")]
mod respeaker {
    use super::{IndicatorState, StatusIndicator};
    use rusb::UsbContext;
    use std::sync::Mutex;
    use std::time::Duration;
    use thiserror::Error;

    const RESPEAKER_VID: u16 = 0x2886;
    const RESPEAKER_4MIC_PID: u16 = 0x0018;
    const CTRL_OUT: u8 = 0x00;
    const CTRL_TYPE_VENDOR: u8 = 0x40;
    const CTRL_RECIPIENT_DEVICE: u8 = 0x00;
    const USB_REQUEST: u8 = 0;
    const USB_VALUE_INDEX: u16 = 0x1C;
    const USB_TIMEOUT: Duration = Duration::from_millis(1_000);

    #[derive(Error, Debug)]
    pub enum LedRingError {
        #[error("failed to initialize USB context: {0}")]
        UsbInit(rusb::Error),
        #[error("ReSpeaker device not found")]
        DeviceNotFound,
        #[error("failed to open device: {0}")]
        DeviceOpen(rusb::Error),
        #[error("failed to send command: {0}")]
        CommandFailed(rusb::Error),
    }

    pub struct LedRingIndicator {
        handle: Mutex<rusb::DeviceHandle<rusb::Context>>,
        _context: rusb::Context,
    }

    impl LedRingIndicator {
        pub fn open() -> Result<Self, LedRingError> {
            let context = rusb::Context::new().map_err(LedRingError::UsbInit)?;
            let devices = context.devices().map_err(LedRingError::UsbInit)?;
            let device = devices
                .iter()
                .find(|d| {
                    d.device_descriptor()
                        .map(|desc| {
                            desc.vendor_id() == RESPEAKER_VID && desc.product_id() == RESPEAKER_4MIC_PID
                        })
                        .unwrap_or(false)
                })
                .ok_or(LedRingError::DeviceNotFound)?;
            let handle = device.open().map_err(LedRingError::DeviceOpen)?;
            Ok(Self {
                handle: Mutex::new(handle),
                _context: context,
            })
        }

        fn send_mono(&self, red: u8, green: u8, blue: u8) -> Result<(), LedRingError> {
            let handle = self.handle.lock().expect("led ring mutex poisoned");
            let payload = [1u8, red, green, blue, 0, 0, 0, 0];
            handle
                .write_control(
                    CTRL_OUT | CTRL_TYPE_VENDOR | CTRL_RECIPIENT_DEVICE,
                    USB_REQUEST,
                    USB_VALUE_INDEX,
                    0,
                    &payload,
                    USB_TIMEOUT,
                )
                .map_err(LedRingError::CommandFailed)?;
            Ok(())
        }
    }

    impl StatusIndicator for LedRingIndicator {
        fn set_state(&self, state: IndicatorState) {
            let color = match state {
                IndicatorState::Idle => (0, 0, 32),
                IndicatorState::Listening => (0, 64, 0),
                IndicatorState::Streaming => (0, 128, 0),
                IndicatorState::Error => (128, 0, 0),
            };
            if let Err(e) = self.send_mono(color.0, color.1, color.2) {
                log::warn!("failed to update LED ring: {e}");
            }
        }
    }
}
