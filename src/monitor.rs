//! Process-wide capture progress monitor.
//!
//! Drivers report lifecycle milestones here; the monitor never holds a
//! reference back into a driver. When the monitor has not been initialized
//! every reporting function is a no-op, so drivers can emit unconditionally.
//!
//! All mutation goes through one lock; readers get a consistent snapshot per
//! call.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use lazy_static::lazy_static;
use log::debug;
use parking_lot::Mutex;

/// Completed captures kept for aggregate statistics.
const HISTORY_LIMIT: usize = 100;

/// Lifecycle phase of an in-flight capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapturePhase {
    Initializing,
    Armed,
    Capturing,
    Transferring,
    Parsing,
    Done,
    Failed,
}

impl CapturePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            CapturePhase::Initializing => "INITIALIZING",
            CapturePhase::Armed => "ARMED",
            CapturePhase::Capturing => "CAPTURING",
            CapturePhase::Transferring => "TRANSFERRING",
            CapturePhase::Parsing => "PARSING",
            CapturePhase::Done => "DONE",
            CapturePhase::Failed => "FAILED",
        }
    }
}

/// Health of a registered device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceHealth {
    Idle,
    Capturing,
    Error,
}

impl DeviceHealth {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceHealth::Idle => "IDLE",
            DeviceHealth::Capturing => "CAPTURING",
            DeviceHealth::Error => "ERROR",
        }
    }
}

/// One in-flight capture.
#[derive(Debug, Clone)]
pub struct ActiveCapture {
    pub device_id: String,
    pub phase: CapturePhase,
    pub current_sample: u64,
    pub total_samples: u64,
    pub started_at: Instant,
}

/// Last reported state of one device.
#[derive(Debug, Clone)]
pub struct DeviceStatus {
    pub name: String,
    pub status: DeviceHealth,
    pub temperature_celsius: Option<f32>,
    pub last_seen: Instant,
}

/// Summary of one finished capture.
#[derive(Debug, Clone)]
pub struct CaptureSummary {
    pub session_id: String,
    pub device_id: String,
    pub success: bool,
    pub duration: Duration,
    pub total_samples: u64,
    pub samples_per_second: u64,
}

#[derive(Default)]
struct MonitorInner {
    active_captures: HashMap<String, ActiveCapture>,
    device_statuses: HashMap<String, DeviceStatus>,
    history: VecDeque<CaptureSummary>,
}

lazy_static! {
    static ref MONITOR: Mutex<Option<MonitorInner>> = Mutex::new(None);
}

/// Initialize the global monitor. Idempotent.
pub fn init_monitor() {
    let mut guard = MONITOR.lock();
    if guard.is_none() {
        *guard = Some(MonitorInner::default());
        debug!("capture monitor initialized");
    }
}

/// Tear the monitor down, discarding all state.
pub fn shutdown_monitor() {
    *MONITOR.lock() = None;
}

/// True between [`init_monitor`] and [`shutdown_monitor`].
pub fn is_monitoring() -> bool {
    MONITOR.lock().is_some()
}

/// Register an in-flight capture.
pub fn start_monitoring(session_id: &str, device_id: &str, total_samples: u64) {
    if let Some(inner) = MONITOR.lock().as_mut() {
        inner.active_captures.insert(
            session_id.to_string(),
            ActiveCapture {
                device_id: device_id.to_string(),
                phase: CapturePhase::Initializing,
                current_sample: 0,
                total_samples,
                started_at: Instant::now(),
            },
        );
    }
}

/// Advance a capture's phase and sample position.
pub fn update_progress(session_id: &str, phase: CapturePhase, current_sample: u64) {
    if let Some(inner) = MONITOR.lock().as_mut() {
        if let Some(capture) = inner.active_captures.get_mut(session_id) {
            capture.phase = phase;
            capture.current_sample = current_sample;
        }
    }
}

/// Record a device's health and optional temperature.
pub fn update_device_status(
    device_id: &str,
    name: &str,
    status: DeviceHealth,
    temperature_celsius: Option<f32>,
) {
    if let Some(inner) = MONITOR.lock().as_mut() {
        inner.device_statuses.insert(
            device_id.to_string(),
            DeviceStatus {
                name: name.to_string(),
                status,
                temperature_celsius,
                last_seen: Instant::now(),
            },
        );
    }
}

/// Remove a finished capture and fold it into the rolling history.
pub fn complete_capture(session_id: &str, success: bool) -> Option<CaptureSummary> {
    let mut guard = MONITOR.lock();
    let inner = guard.as_mut()?;
    let capture = inner.active_captures.remove(session_id)?;

    let duration = capture.started_at.elapsed();
    let micros = duration.as_micros().max(1) as u64;
    let summary = CaptureSummary {
        session_id: session_id.to_string(),
        device_id: capture.device_id,
        success,
        duration,
        total_samples: capture.total_samples,
        samples_per_second: capture.total_samples.saturating_mul(1_000_000) / micros,
    };

    inner.history.push_back(summary.clone());
    while inner.history.len() > HISTORY_LIMIT {
        inner.history.pop_front();
    }
    Some(summary)
}

/// Snapshot counts for quick checks.
pub fn active_capture_count() -> usize {
    MONITOR
        .lock()
        .as_ref()
        .map(|inner| inner.active_captures.len())
        .unwrap_or(0)
}

/// Phase of one in-flight capture, if registered.
pub fn capture_phase(session_id: &str) -> Option<CapturePhase> {
    MONITOR
        .lock()
        .as_ref()?
        .active_captures
        .get(session_id)
        .map(|c| c.phase)
}

/// Render a multi-line status report over captures, devices and aggregates.
pub fn generate_status_report() -> String {
    let guard = MONITOR.lock();
    let inner = match guard.as_ref() {
        Some(inner) => inner,
        None => return "Capture monitor: not initialized".to_string(),
    };

    let mut report = String::new();
    report.push_str("Capture Monitor Status:\n");

    report.push_str(&format!("Active captures: {}\n", inner.active_captures.len()));
    let mut sessions: Vec<_> = inner.active_captures.iter().collect();
    sessions.sort_by(|a, b| a.0.cmp(b.0));
    for (session_id, capture) in sessions {
        let percent = if capture.total_samples > 0 {
            capture.current_sample * 100 / capture.total_samples
        } else {
            0
        };
        report.push_str(&format!(
            "  {} on {}: {} {}/{} ({}%)\n",
            session_id,
            capture.device_id,
            capture.phase.as_str(),
            capture.current_sample,
            capture.total_samples,
            percent
        ));
    }

    report.push_str(&format!("Devices: {}\n", inner.device_statuses.len()));
    let mut devices: Vec<_> = inner.device_statuses.iter().collect();
    devices.sort_by(|a, b| a.0.cmp(b.0));
    for (device_id, status) in devices {
        match status.temperature_celsius {
            Some(temp) => report.push_str(&format!(
                "  {} ({}): {} {:.1}°C\n",
                device_id,
                status.name,
                status.status.as_str(),
                temp
            )),
            None => report.push_str(&format!(
                "  {} ({}): {}\n",
                device_id,
                status.name,
                status.status.as_str()
            )),
        }
    }

    let completed = inner.history.len();
    let succeeded = inner.history.iter().filter(|s| s.success).count();
    let avg_rate = if completed > 0 {
        inner
            .history
            .iter()
            .map(|s| s.samples_per_second)
            .sum::<u64>()
            / completed as u64
    } else {
        0
    };
    report.push_str(&format!(
        "Recent captures: {} ({} ok, {} failed), avg {} samples/s",
        completed,
        succeeded,
        completed - succeeded,
        avg_rate
    ));

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    lazy_static! {
        // The monitor is process-global; serialize tests that touch it.
        static ref TEST_GUARD: Mutex<()> = Mutex::new(());
    }

    #[test]
    fn test_noop_without_init() {
        let _guard = TEST_GUARD.lock();
        shutdown_monitor();

        start_monitoring("s1", "dev0", 100);
        assert_eq!(active_capture_count(), 0);
        assert!(complete_capture("s1", true).is_none());
        assert_eq!(generate_status_report(), "Capture monitor: not initialized");
    }

    #[test]
    fn test_capture_lifecycle() {
        let _guard = TEST_GUARD.lock();
        shutdown_monitor();
        init_monitor();

        start_monitoring("s1", "dev0", 10_000);
        assert_eq!(capture_phase("s1"), Some(CapturePhase::Initializing));

        update_progress("s1", CapturePhase::Transferring, 5_000);
        assert_eq!(capture_phase("s1"), Some(CapturePhase::Transferring));

        let summary = complete_capture("s1", true).unwrap();
        assert_eq!(summary.total_samples, 10_000);
        assert!(summary.success);
        assert_eq!(active_capture_count(), 0);

        shutdown_monitor();
    }

    #[test]
    fn test_history_bounded() {
        let _guard = TEST_GUARD.lock();
        shutdown_monitor();
        init_monitor();

        for i in 0..150 {
            let id = format!("s{}", i);
            start_monitoring(&id, "dev0", 10);
            complete_capture(&id, i % 2 == 0);
        }

        let report = generate_status_report();
        assert!(report.contains("Recent captures: 100"));

        shutdown_monitor();
    }

    #[test]
    fn test_status_report_contents() {
        let _guard = TEST_GUARD.lock();
        shutdown_monitor();
        init_monitor();

        start_monitoring("sess-a", "dev0", 1_000);
        update_progress("sess-a", CapturePhase::Capturing, 250);
        update_device_status("dev0", "LAC-1000", DeviceHealth::Capturing, Some(41.5));

        let report = generate_status_report();
        assert!(report.contains("Active captures: 1"));
        assert!(report.contains("sess-a on dev0: CAPTURING 250/1000 (25%)"));
        assert!(report.contains("dev0 (LAC-1000): CAPTURING 41.5°C"));

        shutdown_monitor();
    }

    #[test]
    fn test_concurrent_updates() {
        let _guard = TEST_GUARD.lock();
        shutdown_monitor();
        init_monitor();

        let handles: Vec<_> = (0..8)
            .map(|t| {
                thread::spawn(move || {
                    let id = format!("t{}", t);
                    start_monitoring(&id, "dev0", 1_000);
                    for step in 0..100u64 {
                        update_progress(&id, CapturePhase::Capturing, step * 10);
                        update_device_status("dev0", "LAC-1000", DeviceHealth::Capturing, None);
                    }
                    complete_capture(&id, true).unwrap()
                })
            })
            .collect();

        for handle in handles {
            assert!(handle.join().unwrap().success);
        }
        assert_eq!(active_capture_count(), 0);

        shutdown_monitor();
    }
}
