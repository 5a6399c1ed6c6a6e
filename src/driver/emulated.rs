//! Emulated analyzer device.
//!
//! An [`EmulatedTransport`] stands in for real hardware: it decodes the
//! commands a [`LogicDriver`] writes and synthesizes the framed responses a
//! device would send, so the full framing, request, parsing and lifecycle
//! path runs without any hardware attached. Sample data is a deterministic
//! counter pattern: sample word `s` has value `s`, so channel position `k`
//! carries bit `k` of the sample index.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::debug;
use parking_lot::Mutex;

use crate::driver::device::LogicDriver;
use crate::driver::DriverType;
use crate::protocol::frame::{encode_frame, FrameDecoder};
use crate::protocol::request::{CaptureRequest, CMD_BOOTLOADER, CMD_NET_CONFIG, CMD_STOP, STATUS_ACK};
use crate::session::{CaptureMode, DeviceInfo};
use crate::transport::{LoopbackTransport, Transport};

/// Tuning knobs for the emulated device.
#[derive(Debug, Clone)]
pub struct EmulatedOptions {
    /// Delay before the device answers a capture request; nonzero values
    /// keep the driver visibly `Capturing` for tests and demos.
    pub response_delay: Duration,
    /// Sample gap reported between consecutive bursts.
    pub burst_gap_samples: u64,
}

impl Default for EmulatedOptions {
    fn default() -> Self {
        Self {
            response_delay: Duration::ZERO,
            burst_gap_samples: 100,
        }
    }
}

/// Device-side simulator behind the [`Transport`] seam.
pub struct EmulatedTransport {
    loopback: Arc<LoopbackTransport>,
    decoder: Mutex<FrameDecoder>,
    options: EmulatedOptions,
}

impl EmulatedTransport {
    pub fn new(options: EmulatedOptions) -> Self {
        Self {
            loopback: Arc::new(LoopbackTransport::new()),
            decoder: Mutex::new(FrameDecoder::new()),
            options,
        }
    }

    fn handle_command(&self, payload: &[u8]) {
        match payload {
            [CMD_STOP] => debug!("emulated device: stop"),
            [CMD_BOOTLOADER] => debug!("emulated device: bootloader"),
            [CMD_NET_CONFIG, ..] => {
                self.respond(encode_frame(&[STATUS_ACK]));
            }
            _ if payload.len() == CaptureRequest::SIZE => {
                if let Some(request) = CaptureRequest::decode(payload) {
                    let mut response = encode_frame(&[STATUS_ACK]);
                    response.extend(build_capture_response(&request, &self.options));
                    self.respond(response);
                }
            }
            _ => debug!("emulated device: ignoring {} byte command", payload.len()),
        }
    }

    fn respond(&self, bytes: Vec<u8>) {
        let delay = self.options.response_delay;
        if delay.is_zero() {
            self.loopback.push_incoming(&bytes);
        } else {
            let loopback = self.loopback.clone();
            thread::spawn(move || {
                thread::sleep(delay);
                loopback.push_incoming(&bytes);
            });
        }
    }
}

impl Transport for EmulatedTransport {
    fn write(&self, data: &[u8]) -> std::io::Result<()> {
        let mut frames = Vec::new();
        {
            let mut decoder = self.decoder.lock();
            if decoder.push(data, &mut frames).is_err() {
                decoder.reset();
            }
        }
        for frame in frames {
            self.handle_command(&frame);
        }
        Ok(())
    }

    fn read(&self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.loopback.read(buf)
    }

    fn set_read_timeout(&self, timeout: Option<Duration>) -> std::io::Result<()> {
        self.loopback.set_read_timeout(timeout)
    }

    fn close(&self) {
        self.loopback.close();
    }
}

/// Sample payload (and burst tail) a device would return for `request`.
fn build_capture_response(request: &CaptureRequest, options: &EmulatedOptions) -> Vec<u8> {
    let total =
        request.pre_samples as u64 + request.post_samples as u64 * (request.loop_count as u64 + 1);
    let width = CaptureMode::from_wire(request.capture_mode)
        .map(|m| m.sample_width())
        .unwrap_or(1);

    let mut payload = (total as u32).to_le_bytes().to_vec();
    payload.reserve(total as usize * width);
    for s in 0..total {
        match width {
            1 => payload.push(s as u8),
            2 => payload.extend_from_slice(&(s as u16).to_le_bytes()),
            _ => payload.extend_from_slice(&((s as u32) & 0x00FF_FFFF).to_le_bytes()),
        }
    }

    if request.measure != 0 {
        let count = request.loop_count as u16;
        payload.extend_from_slice(&count.to_le_bytes());
        let frequency = request.frequency.max(1) as u64;
        for i in 1..=count as u64 {
            let start = request.pre_samples as u64 + i * request.post_samples as u64;
            let end = start + request.post_samples as u64;
            let gap = options.burst_gap_samples;
            let gap_ns = gap.saturating_mul(1_000_000_000) / frequency;
            payload.extend_from_slice(&(start as u32).to_le_bytes());
            payload.extend_from_slice(&(end as u32).to_le_bytes());
            payload.extend_from_slice(&gap.to_le_bytes());
            payload.extend_from_slice(&gap_ns.to_le_bytes());
        }
    }

    encode_frame(&payload)
}

/// Driver over a fresh emulated device.
pub fn emulated_driver(info: DeviceInfo) -> LogicDriver {
    emulated_driver_with(info, EmulatedOptions::default())
}

/// Driver over an emulated device with explicit options.
pub fn emulated_driver_with(info: DeviceInfo, options: EmulatedOptions) -> LogicDriver {
    let transport = Arc::new(EmulatedTransport::new(options));
    LogicDriver::new(transport, info, DriverType::Emulated)
}
