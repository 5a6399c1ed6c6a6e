//! Single-device capture driver.
//!
//! Owns one [`Transport`], drives the command/response exchange for a
//! capture and parses the returned sample stream on a worker thread. The
//! worker reports milestones to the progress monitor and hands the finished
//! session back through the event channel.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, info, warn};
use parking_lot::Mutex;

use crate::driver::{
    AnalyzerDriver, CaptureError, DriverEvent, DriverState, DriverType, ErrorReason, FailureKind,
};
use crate::monitor::{self, CapturePhase, DeviceHealth};
use crate::parser::{parse_capture_payload, ParseOutcome, ProtocolError};
use crate::protocol::frame::{encode_frame, FrameDecoder};
use crate::protocol::request::{NetConfig, CMD_BOOTLOADER, CMD_NET_CONFIG, CMD_STOP, STATUS_ACK};
use crate::protocol::assemble::capture_command_bytes;
use crate::session::{CaptureLimits, CaptureSession, DeviceInfo};
use crate::transport::{TcpTransport, Transport, UdpTransport, DEFAULT_READ_TIMEOUT};
use crate::trigger::validate_trigger_settings;

/// Transport poll interval inside the capture worker; stop requests are
/// honored at this granularity.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

static NEXT_DRIVER_ID: AtomicU64 = AtomicU64::new(0);

struct WorkerContext {
    transport: Arc<dyn Transport>,
    state: Arc<Mutex<DriverState>>,
    stop_requested: Arc<AtomicBool>,
    events: Sender<DriverEvent>,
    session_id: String,
    device_id: String,
    device_name: String,
    capture_timeout: Duration,
}

enum CaptureFailure {
    Stopped,
    Failed(ErrorReason),
}

/// Driver for one physical analyzer behind a byte transport.
pub struct LogicDriver {
    info: DeviceInfo,
    device_version: String,
    driver_type: DriverType,
    device_id: String,
    transport: Arc<dyn Transport>,
    state: Arc<Mutex<DriverState>>,
    stop_requested: Arc<AtomicBool>,
    capture_timeout: Duration,
    capture_seq: u64,
    worker: Option<JoinHandle<()>>,
    events_tx: Sender<DriverEvent>,
    events_rx: Receiver<DriverEvent>,
    tag: Option<Box<dyn std::any::Any + Send>>,
}

impl LogicDriver {
    /// Wrap an already-connected transport. The driver starts `Idle`.
    pub fn new(transport: Arc<dyn Transport>, info: DeviceInfo, driver_type: DriverType) -> Self {
        let (events_tx, events_rx) = unbounded();
        let id = NEXT_DRIVER_ID.fetch_add(1, Ordering::Relaxed);
        let device_version = format!("{}_V{}", info.name, VERSION_TAG);
        Self {
            device_id: format!("{}:{}", info.name, id),
            info,
            device_version,
            driver_type,
            transport,
            state: Arc::new(Mutex::new(DriverState::Idle)),
            stop_requested: Arc::new(AtomicBool::new(false)),
            capture_timeout: DEFAULT_READ_TIMEOUT,
            capture_seq: 0,
            worker: None,
            events_tx,
            events_rx,
            tag: None,
        }
    }

    /// Connect to a network device over TCP.
    pub fn open_tcp(addr: SocketAddr, info: DeviceInfo) -> std::io::Result<Self> {
        let transport = TcpTransport::connect(addr, Duration::from_secs(5))?;
        Ok(Self::new(Arc::new(transport), info, DriverType::Network))
    }

    /// Connect to a network device over UDP.
    pub fn open_udp(remote: SocketAddr, info: DeviceInfo) -> std::io::Result<Self> {
        let transport = UdpTransport::connect(remote)?;
        Ok(Self::new(Arc::new(transport), info, DriverType::Network))
    }

    /// Override the default 10 s capture read timeout.
    pub fn set_capture_timeout(&mut self, timeout: Duration) {
        self.capture_timeout = timeout;
    }

    /// Stable identifier used in monitor reports.
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Drop the transport and leave the driver `Disconnected`.
    pub fn disconnect(&mut self) {
        self.stop_capture();
        self.transport.close();
        *self.state.lock() = DriverState::Disconnected;
        self.emit_status(DriverState::Disconnected);
        info!("{}: disconnected", self.device_id);
    }

    /// Push network settings to a WiFi-capable device. Idle only; `true`
    /// when the device acknowledges.
    pub fn send_network_config(&mut self, config: &NetConfig) -> bool {
        if *self.state.lock() != DriverState::Idle {
            return false;
        }
        let mut payload = vec![CMD_NET_CONFIG];
        payload.extend_from_slice(&config.encode());
        if self.transport.write(&encode_frame(&payload)).is_err() {
            self.mark_disconnected();
            return false;
        }
        match self.read_status_byte() {
            Some(code) => code == STATUS_ACK,
            None => false,
        }
    }

    fn read_status_byte(&self) -> Option<u8> {
        let _ = self.transport.set_read_timeout(Some(POLL_INTERVAL));
        let deadline = Instant::now() + self.capture_timeout;
        let mut decoder = FrameDecoder::new();
        let mut frames: Vec<Vec<u8>> = Vec::new();
        let mut buf = [0u8; 256];

        while Instant::now() < deadline {
            if let Some(frame) = frames.first() {
                return frame.first().copied();
            }
            match self.transport.read(&mut buf) {
                Ok(0) => return None,
                Ok(n) => {
                    if decoder.push(&buf[..n], &mut frames).is_err() {
                        return None;
                    }
                }
                Err(e)
                    if e.kind() == std::io::ErrorKind::TimedOut
                        || e.kind() == std::io::ErrorKind::WouldBlock => {}
                Err(_) => return None,
            }
        }
        None
    }

    fn emit(&self, event: DriverEvent) {
        let _ = self.events_tx.send(event);
    }

    fn emit_status(&self, state: DriverState) {
        self.emit(DriverEvent::StatusChanged { state });
    }

    fn mark_disconnected(&self) {
        *self.state.lock() = DriverState::Disconnected;
        self.emit_status(DriverState::Disconnected);
    }

    fn reap_worker(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

const VERSION_TAG: &str = "1_0";

impl AnalyzerDriver for LogicDriver {
    fn device_version(&self) -> &str {
        &self.device_version
    }

    fn device_info(&self) -> &DeviceInfo {
        &self.info
    }

    fn driver_type(&self) -> DriverType {
        self.driver_type
    }

    fn state(&self) -> DriverState {
        *self.state.lock()
    }

    fn start_capture(&mut self, session: CaptureSession) -> CaptureError {
        {
            let state = self.state.lock();
            match *state {
                DriverState::Capturing => return CaptureError::Busy,
                DriverState::Disconnected | DriverState::Bootloader => {
                    return CaptureError::HardwareError
                }
                DriverState::Idle => {}
            }
        }
        self.reap_worker();

        let limits = CaptureLimits::for_channels(&session.capture_channels, self.info.buffer_size);
        if let Err(reason) = validate_trigger_settings(&session, &limits, &self.info) {
            warn!("{}: capture rejected: {}", self.device_id, reason);
            self.emit(DriverEvent::Error(ErrorReason::new(
                FailureKind::Validation,
                reason.to_string(),
                true,
            )));
            return CaptureError::BadParams;
        }

        let command = capture_command_bytes(&session);
        if let Err(e) = self.transport.write(&command) {
            warn!("{}: capture command write failed: {}", self.device_id, e);
            self.mark_disconnected();
            return CaptureError::HardwareError;
        }

        *self.state.lock() = DriverState::Capturing;
        self.emit_status(DriverState::Capturing);
        self.stop_requested.store(false, Ordering::SeqCst);

        self.capture_seq += 1;
        let session_id = format!("{}/cap{}", self.device_id, self.capture_seq);
        monitor::start_monitoring(&session_id, &self.device_id, session.total_samples());
        monitor::update_device_status(
            &self.device_id,
            &self.info.name,
            DeviceHealth::Capturing,
            None,
        );
        info!(
            "{}: capture started ({} samples on {} channels)",
            self.device_id,
            session.total_samples(),
            session.capture_channels.len()
        );

        let ctx = WorkerContext {
            transport: self.transport.clone(),
            state: self.state.clone(),
            stop_requested: self.stop_requested.clone(),
            events: self.events_tx.clone(),
            session_id,
            device_id: self.device_id.clone(),
            device_name: self.info.name.clone(),
            capture_timeout: self.capture_timeout,
        };
        self.worker = Some(thread::spawn(move || capture_worker(ctx, session)));

        CaptureError::None
    }

    fn stop_capture(&mut self) -> bool {
        match *self.state.lock() {
            DriverState::Idle => return true,
            DriverState::Disconnected | DriverState::Bootloader => return false,
            DriverState::Capturing => {}
        }

        self.stop_requested.store(true, Ordering::SeqCst);
        let _ = self.transport.write(&encode_frame(&[CMD_STOP]));
        self.reap_worker();
        debug!("{}: capture stopped", self.device_id);
        *self.state.lock() == DriverState::Idle
    }

    fn enter_bootloader(&mut self) -> bool {
        if *self.state.lock() != DriverState::Idle {
            return false;
        }
        if self.transport.write(&encode_frame(&[CMD_BOOTLOADER])).is_err() {
            self.mark_disconnected();
            return false;
        }
        *self.state.lock() = DriverState::Bootloader;
        self.emit_status(DriverState::Bootloader);
        info!("{}: entered bootloader", self.device_id);
        true
    }

    fn events(&self) -> Receiver<DriverEvent> {
        self.events_rx.clone()
    }

    fn set_tag(&mut self, tag: Box<dyn std::any::Any + Send>) {
        self.tag = Some(tag);
    }

    fn tag(&self) -> Option<&(dyn std::any::Any + Send)> {
        self.tag.as_deref()
    }

    fn take_tag(&mut self) -> Option<Box<dyn std::any::Any + Send>> {
        self.tag.take()
    }
}

impl Drop for LogicDriver {
    fn drop(&mut self) {
        self.stop_capture();
        self.transport.close();
        self.reap_worker();
    }
}

fn capture_worker(ctx: WorkerContext, mut session: CaptureSession) {
    let result = run_capture(&ctx, &mut session);

    match result {
        Ok(outcome) => {
            monitor::update_progress(&ctx.session_id, CapturePhase::Done, outcome.total_samples);
            monitor::complete_capture(&ctx.session_id, true);
            monitor::update_device_status(&ctx.device_id, &ctx.device_name, DeviceHealth::Idle, None);
            *ctx.state.lock() = DriverState::Idle;
            let _ = ctx
                .events
                .send(DriverEvent::StatusChanged { state: DriverState::Idle });
            info!(
                "{}: capture complete, trigger at sample {}",
                ctx.device_id, outcome.trigger_index
            );
            let _ = ctx.events.send(DriverEvent::CaptureCompleted {
                session: Box::new(session),
                success: true,
                error: None,
            });
        }
        Err(CaptureFailure::Stopped) => {
            discard_partials(&mut session);
            monitor::complete_capture(&ctx.session_id, false);
            monitor::update_device_status(&ctx.device_id, &ctx.device_name, DeviceHealth::Idle, None);
            *ctx.state.lock() = DriverState::Idle;
            let _ = ctx
                .events
                .send(DriverEvent::StatusChanged { state: DriverState::Idle });
            let _ = ctx.events.send(DriverEvent::CaptureCompleted {
                session: Box::new(session),
                success: false,
                error: None,
            });
        }
        Err(CaptureFailure::Failed(reason)) => {
            discard_partials(&mut session);
            warn!(
                "{}: capture failed ({}): {}",
                ctx.device_id,
                reason.kind.as_str(),
                reason.message
            );
            monitor::update_progress(&ctx.session_id, CapturePhase::Failed, 0);
            monitor::complete_capture(&ctx.session_id, false);
            monitor::update_device_status(&ctx.device_id, &ctx.device_name, DeviceHealth::Error, None);
            *ctx.state.lock() = DriverState::Idle;
            let _ = ctx
                .events
                .send(DriverEvent::StatusChanged { state: DriverState::Idle });
            let _ = ctx.events.send(DriverEvent::Error(reason.clone()));
            let _ = ctx.events.send(DriverEvent::CaptureCompleted {
                session: Box::new(session),
                success: false,
                error: Some(reason),
            });
        }
    }
}

fn discard_partials(session: &mut CaptureSession) {
    for channel in &mut session.capture_channels {
        channel.samples = None;
    }
    session.bursts = None;
}

fn run_capture(
    ctx: &WorkerContext,
    session: &mut CaptureSession,
) -> Result<ParseOutcome, CaptureFailure> {
    let _ = ctx.transport.set_read_timeout(Some(POLL_INTERVAL));
    let mut decoder = FrameDecoder::new();
    let mut frames: Vec<Vec<u8>> = Vec::new();

    monitor::update_progress(&ctx.session_id, CapturePhase::Initializing, 0);

    // The device acknowledges the request before sampling starts.
    let ack = read_next_frame(ctx, &mut decoder, &mut frames, None)?;
    match ack.first() {
        Some(&STATUS_ACK) if ack.len() == 1 => {}
        Some(&code) => {
            return Err(CaptureFailure::Failed(ErrorReason::new(
                FailureKind::Protocol,
                format!("device rejected capture with code 0x{:02X}", code),
                true,
            )));
        }
        None => {
            return Err(CaptureFailure::Failed(ErrorReason::new(
                FailureKind::Protocol,
                "empty status frame",
                false,
            )));
        }
    }
    monitor::update_progress(&ctx.session_id, CapturePhase::Armed, 0);

    // One frame carries the whole sample payload (plus burst tail).
    monitor::update_progress(&ctx.session_id, CapturePhase::Capturing, 0);
    let payload = read_next_frame(ctx, &mut decoder, &mut frames, Some(CapturePhase::Transferring))?;

    monitor::update_progress(&ctx.session_id, CapturePhase::Parsing, 0);
    parse_capture_payload(session, &payload).map_err(|e| {
        let kind = match e {
            ProtocolError::SampleCountMismatch { .. } => FailureKind::Protocol,
            _ => FailureKind::Unexpected,
        };
        CaptureFailure::Failed(ErrorReason::new(kind, e.to_string(), false))
    })
}

fn read_next_frame(
    ctx: &WorkerContext,
    decoder: &mut FrameDecoder,
    frames: &mut Vec<Vec<u8>>,
    transfer_phase: Option<CapturePhase>,
) -> Result<Vec<u8>, CaptureFailure> {
    let mut last_data = Instant::now();
    let mut buf = [0u8; 4096];
    let mut reported_transfer = false;

    loop {
        if !frames.is_empty() {
            return Ok(frames.remove(0));
        }
        if ctx.stop_requested.load(Ordering::SeqCst) {
            decoder.reset();
            return Err(CaptureFailure::Stopped);
        }

        match ctx.transport.read(&mut buf) {
            Ok(0) => {
                return Err(CaptureFailure::Failed(ErrorReason::new(
                    FailureKind::Io,
                    "transport closed by peer",
                    false,
                )));
            }
            Ok(n) => {
                last_data = Instant::now();
                if let Err(e) = decoder.push(&buf[..n], frames) {
                    return Err(CaptureFailure::Failed(ErrorReason::new(
                        FailureKind::Framing,
                        e.to_string(),
                        false,
                    )));
                }
                if let Some(phase) = transfer_phase {
                    if !reported_transfer && decoder.mid_frame() {
                        monitor::update_progress(&ctx.session_id, phase, 0);
                        reported_transfer = true;
                    }
                }
            }
            Err(e)
                if e.kind() == std::io::ErrorKind::TimedOut
                    || e.kind() == std::io::ErrorKind::WouldBlock =>
            {
                if last_data.elapsed() > ctx.capture_timeout {
                    return Err(CaptureFailure::Failed(ErrorReason::new(
                        FailureKind::Timeout,
                        format!("no device data for {:?}", ctx.capture_timeout),
                        true,
                    )));
                }
            }
            Err(e) => {
                return Err(CaptureFailure::Failed(ErrorReason::new(
                    FailureKind::Io,
                    e.to_string(),
                    false,
                )));
            }
        }
    }
}
