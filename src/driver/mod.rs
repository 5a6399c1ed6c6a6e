//! Capture drivers.
//!
//! Every driver variant (network, serial behind an external transport,
//! emulated, multi-device composite) implements [`AnalyzerDriver`]: a small
//! capability surface, a strict state machine and an event channel. Sample
//! data travels inside completion events; a finished session is moved out to
//! the consumer, never shared.
//!
//! ```text
//! Disconnected ──connect──▶ Idle ──start_capture──▶ Capturing
//! Capturing ──(complete|stop_capture|error)──▶ Idle
//! Idle ──enter_bootloader──▶ Bootloader (terminal until physical reset)
//! Any ──disconnect──▶ Disconnected
//! ```

pub mod device;
pub mod emulated;
pub mod multi;

pub use device::LogicDriver;
pub use emulated::{emulated_driver, EmulatedOptions, EmulatedTransport};
pub use multi::MultiDriver;

use std::any::Any;
use std::fmt;

use crossbeam_channel::Receiver;

use crate::session::{CaptureSession, DeviceInfo};

/// Connection state of a driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Disconnected,
    Idle,
    Capturing,
    /// Terminal until the hardware is physically reset.
    Bootloader,
}

impl DriverState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DriverState::Disconnected => "DISCONNECTED",
            DriverState::Idle => "IDLE",
            DriverState::Capturing => "CAPTURING",
            DriverState::Bootloader => "BOOTLOADER",
        }
    }
}

/// Transport flavor of a driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverType {
    Serial,
    Network,
    Multi,
    Emulated,
}

impl DriverType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DriverType::Serial => "SERIAL",
            DriverType::Network => "NETWORK",
            DriverType::Multi => "MULTI",
            DriverType::Emulated => "EMULATED",
        }
    }
}

/// Status returned by capture operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureError {
    /// Accepted; completion arrives through the event channel.
    None,
    /// A capture is already in flight.
    Busy,
    /// Rejected by validation before any wire activity.
    BadParams,
    /// Transport or device failure.
    HardwareError,
    UnexpectedError,
}

impl CaptureError {
    pub fn is_ok(&self) -> bool {
        matches!(self, CaptureError::None)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CaptureError::None => "NONE",
            CaptureError::Busy => "BUSY",
            CaptureError::BadParams => "BAD_PARAMS",
            CaptureError::HardwareError => "HARDWARE_ERROR",
            CaptureError::UnexpectedError => "UNEXPECTED_ERROR",
        }
    }
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure domain of an [`ErrorReason`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Framing,
    Protocol,
    Validation,
    Io,
    Timeout,
    Unexpected,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Framing => "FRAMING",
            FailureKind::Protocol => "PROTOCOL",
            FailureKind::Validation => "VALIDATION",
            FailureKind::Io => "IO",
            FailureKind::Timeout => "TIMEOUT",
            FailureKind::Unexpected => "UNEXPECTED",
        }
    }
}

/// Structured failure description delivered with events.
#[derive(Debug, Clone)]
pub struct ErrorReason {
    pub kind: FailureKind,
    pub message: String,
    /// Whether the caller can retry without reconnecting.
    pub recoverable: bool,
}

impl ErrorReason {
    pub fn new(kind: FailureKind, message: impl Into<String>, recoverable: bool) -> Self {
        Self {
            kind,
            message: message.into(),
            recoverable,
        }
    }
}

/// Events emitted by a driver. One consumer per session is the intended
/// shape; further fan-out is the caller's concern.
#[derive(Debug)]
pub enum DriverEvent {
    StatusChanged {
        state: DriverState,
    },
    /// The session is moved back to the consumer, samples and all.
    CaptureCompleted {
        session: Box<CaptureSession>,
        success: bool,
        error: Option<ErrorReason>,
    },
    Error(ErrorReason),
}

/// Common surface of every analyzer driver.
pub trait AnalyzerDriver: Send {
    fn device_version(&self) -> &str;
    fn device_info(&self) -> &DeviceInfo;
    fn driver_type(&self) -> DriverType;
    fn state(&self) -> DriverState;

    fn channel_count(&self) -> u8 {
        self.device_info().channels
    }
    fn max_frequency(&self) -> u32 {
        self.device_info().max_frequency
    }
    fn blast_frequency(&self) -> u32 {
        self.device_info().blast_frequency
    }
    fn buffer_size(&self) -> u32 {
        self.device_info().buffer_size
    }
    fn is_network(&self) -> bool {
        matches!(self.driver_type(), DriverType::Network)
    }
    fn is_capturing(&self) -> bool {
        matches!(self.state(), DriverState::Capturing)
    }

    /// Begin a capture. The session is moved into the driver and returned
    /// through a `CaptureCompleted` event.
    fn start_capture(&mut self, session: CaptureSession) -> CaptureError;

    /// Abort an in-flight capture. Idempotent; returns `true` when the
    /// driver ends up `Idle`.
    fn stop_capture(&mut self) -> bool;

    /// Jump to the bootloader. Only valid from `Idle`; terminal.
    fn enter_bootloader(&mut self) -> bool;

    /// Subscribe to driver events.
    fn events(&self) -> Receiver<DriverEvent>;

    /// Attach an opaque caller-owned handle; the core never interprets it.
    fn set_tag(&mut self, tag: Box<dyn Any + Send>);
    fn tag(&self) -> Option<&(dyn Any + Send)>;
    fn take_tag(&mut self) -> Option<Box<dyn Any + Send>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_error_display() {
        assert_eq!(CaptureError::None.to_string(), "NONE");
        assert_eq!(CaptureError::Busy.to_string(), "BUSY");
        assert!(CaptureError::None.is_ok());
        assert!(!CaptureError::BadParams.is_ok());
    }

    #[test]
    fn test_state_names() {
        assert_eq!(DriverState::Idle.as_str(), "IDLE");
        assert_eq!(DriverState::Bootloader.as_str(), "BOOTLOADER");
        assert_eq!(DriverType::Multi.as_str(), "MULTI");
    }
}
