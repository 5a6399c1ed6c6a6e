//! Multi-device composite driver.
//!
//! Shards a wide capture across up to five single-device drivers by
//! contiguous channel ranges, fans the request out, and merges the per-shard
//! results back by sample index. Shards are assumed to share the hardware
//! trigger line and every shard runs the identical pre/post window, so index
//! alignment is sufficient; per-shard clock skew is not corrected.
//!
//! The shard holding the trigger channel keeps the session's trigger; the
//! remaining shards arm a plain edge trigger on their first captured channel
//! and follow the shared line. Blast mode needs the whole window on one
//! device and is rejected here.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{info, warn};
use parking_lot::Mutex;

use crate::driver::{
    AnalyzerDriver, CaptureError, DriverEvent, DriverState, DriverType, ErrorReason, FailureKind,
};
use crate::session::{CaptureLimits, CaptureSession, DeviceInfo, TriggerType};
use crate::trigger::validate_trigger_settings;

/// Most devices a composite can aggregate.
pub const MAX_MULTI_DEVICES: usize = 5;
/// Fewest devices that make a composite worthwhile.
pub const MIN_MULTI_DEVICES: usize = 2;

/// How long the coordinator waits for each shard to finish.
const SHARD_COMPLETION_TIMEOUT: Duration = Duration::from_secs(60);

/// Composite driver over several physical analyzers.
pub struct MultiDriver {
    drivers: Vec<Box<dyn AnalyzerDriver>>,
    /// First global channel index served by each member.
    bases: Vec<u8>,
    combined: DeviceInfo,
    device_version: String,
    state: Arc<Mutex<DriverState>>,
    coordinator: Option<JoinHandle<()>>,
    events_tx: Sender<DriverEvent>,
    events_rx: Receiver<DriverEvent>,
    tag: Option<Box<dyn std::any::Any + Send>>,
}

impl MultiDriver {
    /// Combine member drivers into one wide analyzer.
    ///
    /// Capabilities degrade to the weakest member: smallest buffer, lowest
    /// maximum rate. Channels are stacked in member order.
    pub fn new(drivers: Vec<Box<dyn AnalyzerDriver>>) -> Result<Self, String> {
        if drivers.len() < MIN_MULTI_DEVICES || drivers.len() > MAX_MULTI_DEVICES {
            return Err(format!(
                "multi driver needs {}..={} devices, got {}",
                MIN_MULTI_DEVICES,
                MAX_MULTI_DEVICES,
                drivers.len()
            ));
        }

        let mut bases = Vec::with_capacity(drivers.len());
        let mut total_channels = 0u32;
        for driver in &drivers {
            bases.push(total_channels as u8);
            total_channels += driver.channel_count() as u32;
        }
        // Up to 5 x 24 channels; the aggregate addresses them all, each
        // member still speaks its own 8/16/24-channel wire format.
        let channels = total_channels as u8;

        let names: Vec<&str> = drivers.iter().map(|d| d.device_info().name.as_str()).collect();
        let combined = DeviceInfo::new(
            format!("MULTI({})", names.join("+")),
            drivers.iter().map(|d| d.max_frequency()).min().unwrap_or(0),
            drivers.iter().map(|d| d.blast_frequency()).min().unwrap_or(0),
            channels,
            drivers.iter().map(|d| d.buffer_size()).min().unwrap_or(0),
        );

        let (events_tx, events_rx) = unbounded();
        Ok(Self {
            device_version: format!("MULTI_x{}", drivers.len()),
            drivers,
            bases,
            combined,
            state: Arc::new(Mutex::new(DriverState::Idle)),
            coordinator: None,
            events_tx,
            events_rx,
            tag: None,
        })
    }

    fn emit(&self, event: DriverEvent) {
        let _ = self.events_tx.send(event);
    }

    fn reap_coordinator(&mut self) {
        if let Some(coordinator) = self.coordinator.take() {
            let _ = coordinator.join();
        }
    }

    /// Build one sub-session per member owning any of the session channels.
    fn shard_session(&self, session: &CaptureSession) -> Vec<(usize, CaptureSession)> {
        let mut shards = Vec::new();
        for (index, driver) in self.drivers.iter().enumerate() {
            let base = self.bases[index];
            let count = driver.channel_count();

            let mut shard = session.clone_settings();
            shard.capture_channels = session
                .capture_channels
                .iter()
                .filter(|c| c.channel_number >= base && c.channel_number < base + count)
                .map(|c| {
                    let mut local = c.clone();
                    local.channel_number -= base;
                    local.samples = None;
                    local
                })
                .collect();
            if shard.capture_channels.is_empty() {
                continue;
            }

            let owns_trigger = session.trigger_channel >= base
                && session.trigger_channel < base + count;
            if owns_trigger {
                shard.trigger_channel = session.trigger_channel - base;
            } else {
                // Follower shard: plain edge on its first channel, armed by
                // the shared trigger line.
                shard.trigger_type = TriggerType::Edge;
                shard.trigger_channel = shard.capture_channels[0].channel_number;
                shard.trigger_inverted = false;
                shard.trigger_pattern = 0;
                shard.trigger_bit_count = 0;
                shard.measure_bursts = false;
            }
            shards.push((index, shard));
        }
        shards
    }
}

struct ShardResult {
    base: u8,
    session: Box<CaptureSession>,
    success: bool,
    error: Option<ErrorReason>,
}

impl AnalyzerDriver for MultiDriver {
    fn device_version(&self) -> &str {
        &self.device_version
    }

    fn device_info(&self) -> &DeviceInfo {
        &self.combined
    }

    fn driver_type(&self) -> DriverType {
        DriverType::Multi
    }

    fn state(&self) -> DriverState {
        *self.state.lock()
    }

    fn is_network(&self) -> bool {
        self.drivers.iter().all(|d| d.is_network())
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
        self.reap_coordinator();

        if session.trigger_type == TriggerType::Blast {
            self.emit(DriverEvent::Error(ErrorReason::new(
                FailureKind::Validation,
                "blast capture is not available on a multi-device composite",
                true,
            )));
            return CaptureError::BadParams;
        }

        let limits =
            CaptureLimits::for_channels(&session.capture_channels, self.combined.buffer_size);
        if let Err(reason) = validate_trigger_settings(&session, &limits, &self.combined) {
            warn!("multi capture rejected: {}", reason);
            self.emit(DriverEvent::Error(ErrorReason::new(
                FailureKind::Validation,
                reason.to_string(),
                true,
            )));
            return CaptureError::BadParams;
        }

        let shards = self.shard_session(&session);
        info!(
            "multi capture: {} channels over {} shards",
            session.capture_channels.len(),
            shards.len()
        );

        // Fan out, unwinding every started shard if one refuses.
        let mut started: Vec<(usize, u8, Receiver<DriverEvent>)> = Vec::new();
        for (index, shard) in shards {
            let receiver = self.drivers[index].events();
            let result = self.drivers[index].start_capture(shard);
            if !result.is_ok() {
                warn!("shard {} refused capture: {}", index, result);
                for (started_index, _, _) in &started {
                    self.drivers[*started_index].stop_capture();
                }
                return result;
            }
            started.push((index, self.bases[index], receiver));
        }

        *self.state.lock() = DriverState::Capturing;
        self.emit(DriverEvent::StatusChanged {
            state: DriverState::Capturing,
        });

        let state = self.state.clone();
        let events = self.events_tx.clone();
        self.coordinator = Some(thread::spawn(move || {
            coordinate_shards(session, started, state, events);
        }));

        CaptureError::None
    }

    fn stop_capture(&mut self) -> bool {
        match *self.state.lock() {
            DriverState::Idle => return true,
            DriverState::Disconnected | DriverState::Bootloader => return false,
            DriverState::Capturing => {}
        }
        for driver in &mut self.drivers {
            driver.stop_capture();
        }
        self.reap_coordinator();
        *self.state.lock() == DriverState::Idle
    }

    fn enter_bootloader(&mut self) -> bool {
        if *self.state.lock() != DriverState::Idle {
            return false;
        }
        let all_entered = self
            .drivers
            .iter_mut()
            .all(|driver| driver.enter_bootloader());
        if all_entered {
            *self.state.lock() = DriverState::Bootloader;
            self.emit(DriverEvent::StatusChanged {
                state: DriverState::Bootloader,
            });
        }
        all_entered
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

fn coordinate_shards(
    mut session: CaptureSession,
    started: Vec<(usize, u8, Receiver<DriverEvent>)>,
    state: Arc<Mutex<DriverState>>,
    events: Sender<DriverEvent>,
) {
    let mut results: Vec<ShardResult> = Vec::with_capacity(started.len());

    for (index, base, receiver) in started {
        let mut outcome = None;
        let deadline = std::time::Instant::now() + SHARD_COMPLETION_TIMEOUT;
        while std::time::Instant::now() < deadline {
            match receiver.recv_timeout(Duration::from_millis(100)) {
                Ok(DriverEvent::CaptureCompleted {
                    session,
                    success,
                    error,
                }) => {
                    outcome = Some(ShardResult {
                        base,
                        session,
                        success,
                        error,
                    });
                    break;
                }
                Ok(_) => {}
                Err(_) => {}
            }
        }
        match outcome {
            Some(result) => results.push(result),
            None => {
                warn!("shard {} never completed", index);
                results.push(ShardResult {
                    base,
                    session: Box::new(CaptureSession::default()),
                    success: false,
                    error: Some(ErrorReason::new(
                        FailureKind::Timeout,
                        format!("shard {} did not complete", index),
                        false,
                    )),
                });
            }
        }
    }

    let success = results.iter().all(|r| r.success);
    let error = results.iter_mut().find_map(|r| r.error.take());

    if success {
        // Interleave by index alignment: move each shard channel's samples
        // onto the matching global channel.
        for result in &mut results {
            for shard_channel in &mut result.session.capture_channels {
                let global = shard_channel.channel_number + result.base;
                if let Some(channel) = session
                    .capture_channels
                    .iter_mut()
                    .find(|c| c.channel_number == global)
                {
                    channel.samples = shard_channel.samples.take();
                }
            }
            if result.session.bursts.is_some() {
                session.bursts = result.session.bursts.take();
            }
        }
    }

    *state.lock() = DriverState::Idle;
    let _ = events.send(DriverEvent::StatusChanged {
        state: DriverState::Idle,
    });
    let _ = events.send(DriverEvent::CaptureCompleted {
        session: Box::new(session),
        success,
        error,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::emulated::emulated_driver;
    use crate::session::AnalyzerChannel;
    use std::time::Instant;

    fn member() -> Box<dyn AnalyzerDriver> {
        Box::new(emulated_driver(DeviceInfo::new(
            "LAC-8",
            100_000_000,
            200_000_000,
            8,
            96_000,
        )))
    }

    fn multi(n: usize) -> MultiDriver {
        MultiDriver::new((0..n).map(|_| member()).collect()).unwrap()
    }

    fn wide_session() -> CaptureSession {
        CaptureSession {
            frequency: 1_000_000,
            pre_trigger_samples: 4,
            post_trigger_samples: 12,
            trigger_type: TriggerType::Edge,
            trigger_channel: 3,
            capture_channels: (0..16).map(AnalyzerChannel::new).collect(),
            ..Default::default()
        }
    }

    fn wait_for_completion(events: &Receiver<DriverEvent>) -> (Box<CaptureSession>, bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if let Ok(DriverEvent::CaptureCompleted { session, success, .. }) =
                events.recv_timeout(Duration::from_millis(100))
            {
                return (session, success);
            }
        }
        panic!("no completion event");
    }

    #[test]
    fn test_member_count_bounds() {
        assert!(MultiDriver::new(vec![member()]).is_err());
        assert!(MultiDriver::new((0..6).map(|_| member()).collect()).is_err());
        assert!(MultiDriver::new((0..2).map(|_| member()).collect()).is_ok());
    }

    #[test]
    fn test_combined_capabilities() {
        let driver = multi(3);
        assert_eq!(driver.channel_count(), 24);
        assert_eq!(driver.buffer_size(), 96_000);
        assert_eq!(driver.driver_type(), DriverType::Multi);
        assert_eq!(driver.device_version(), "MULTI_x3");
    }

    #[test]
    fn test_sharded_capture_merges_by_index() {
        let mut driver = multi(2);
        let events = driver.events();

        assert_eq!(driver.start_capture(wide_session()), CaptureError::None);
        let (session, success) = wait_for_completion(&events);
        assert!(success);
        assert_eq!(driver.state(), DriverState::Idle);

        let total = session.total_samples();
        assert_eq!(total, 16);
        // Each shard generates the counter pattern over its local positions,
        // so global channel k carries bit (k % 8) of the sample index.
        for channel in &session.capture_channels {
            let position = (channel.channel_number % 8) as u32;
            let expected: Vec<u8> = (0..total).map(|s| ((s >> position) & 1) as u8).collect();
            assert_eq!(
                channel.samples.as_deref(),
                Some(&expected[..]),
                "channel {}",
                channel.channel_number
            );
        }
    }

    #[test]
    fn test_wide_composite_addresses_channels_past_24() {
        let member16 = || -> Box<dyn AnalyzerDriver> {
            Box::new(emulated_driver(DeviceInfo::new(
                "LAC-16",
                100_000_000,
                200_000_000,
                16,
                96_000,
            )))
        };
        let mut driver = MultiDriver::new(vec![member16(), member16(), member16()]).unwrap();
        assert_eq!(driver.channel_count(), 48);
        let events = driver.events();

        // One channel per member; 20 and 40 sit beyond the single-device
        // channel range and land on members 1 and 2.
        let mut session = wide_session();
        session.trigger_channel = 2;
        session.capture_channels = vec![
            AnalyzerChannel::new(2),
            AnalyzerChannel::new(20),
            AnalyzerChannel::new(40),
        ];

        assert_eq!(driver.start_capture(session), CaptureError::None);
        let (session, success) = wait_for_completion(&events);
        assert!(success);

        let total = session.total_samples();
        // Each channel is the sole (position 0) channel of its shard.
        let expected: Vec<u8> = (0..total).map(|s| (s & 1) as u8).collect();
        for channel in &session.capture_channels {
            assert_eq!(
                channel.samples.as_deref(),
                Some(&expected[..]),
                "channel {}",
                channel.channel_number
            );
        }
    }

    #[test]
    fn test_blast_rejected_on_composite() {
        let mut driver = multi(2);
        let mut session = wide_session();
        session.trigger_type = TriggerType::Blast;
        session.pre_trigger_samples = 0;
        assert_eq!(driver.start_capture(session), CaptureError::BadParams);
        assert_eq!(driver.state(), DriverState::Idle);
    }

    #[test]
    fn test_busy_and_stop() {
        let mut driver = multi(2);
        let events = driver.events();

        assert_eq!(driver.start_capture(wide_session()), CaptureError::None);
        assert_eq!(driver.start_capture(wide_session()), CaptureError::Busy);

        let (_, success) = wait_for_completion(&events);
        assert!(success);
        assert!(driver.stop_capture());
        assert_eq!(driver.start_capture(wide_session()), CaptureError::None);
        let (_, success) = wait_for_completion(&events);
        assert!(success);
    }
}
