//! Capture core for LAC logic analyzers.
//!
//! Drives a family of logic-analyzer devices over a byte transport: builds
//! and frames capture requests, streams back sampled digital channels,
//! parses them into a normalized [`session::CaptureSession`], and persists
//! captures as compressed `.lac` files.
//!
//! - Input: a duplex byte [`transport::Transport`] to a device (TCP, UDP,
//!   serial behind the same trait, or the built-in emulated device)
//! - Output: completed sessions delivered through driver events, plus
//!   `.lac` files via [`lac`]
//!
//! The [`driver::AnalyzerDriver`] trait is the main entry point; see
//! [`driver::LogicDriver`] for real hardware and
//! [`driver::emulated_driver`] for a hardwareless device.

pub mod driver;
pub mod lac;
pub mod monitor;
pub mod parser;
pub mod protocol;
pub mod session;
pub mod transport;
pub mod trigger;

pub use driver::{
    AnalyzerDriver, CaptureError, DriverEvent, DriverState, DriverType, ErrorReason, LogicDriver,
    MultiDriver,
};
pub use session::{
    AnalyzerChannel, BurstInfo, CaptureLimits, CaptureMode, CaptureSession, DeviceInfo,
    TriggerType,
};
