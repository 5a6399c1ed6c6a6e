//! End-to-end capture against the emulated device.
//!
//! Runs a looped edge capture with burst measurement, prints the monitor
//! report and channel data, and saves the session as `capture.lac`.
//!
//! Run with: cargo run --example emulated_capture

use std::fs::File;
use std::time::Duration;

use lac_capture::driver::{emulated_driver, AnalyzerDriver, DriverEvent};
use lac_capture::lac::save_session;
use lac_capture::monitor;
use lac_capture::session::{AnalyzerChannel, CaptureSession, DeviceInfo, TriggerType};

fn main() {
    env_logger::init();
    monitor::init_monitor();

    let info = DeviceInfo::new("LAC-EMU", 100_000_000, 200_000_000, 24, 96_000);
    println!(
        "Device: {} ({} channels, buffer {})",
        info.name, info.channels, info.buffer_size
    );

    let mut driver = emulated_driver(info.clone());
    let events = driver.events();

    let mut session = CaptureSession {
        frequency: 1_000_000,
        pre_trigger_samples: 16,
        post_trigger_samples: 64,
        loop_count: 2,
        trigger_type: TriggerType::Edge,
        trigger_channel: 0,
        measure_bursts: true,
        ..Default::default()
    };
    for i in 0..8u8 {
        let mut channel = AnalyzerChannel::new(i);
        channel.channel_name = format!("D{}", i);
        session.capture_channels.push(channel);
    }

    println!(
        "Starting capture: {} samples at {} Hz",
        session.total_samples(),
        session.frequency
    );
    let status = driver.start_capture(session);
    if !status.is_ok() {
        eprintln!("capture refused: {}", status);
        return;
    }

    let completed = loop {
        match events.recv_timeout(Duration::from_secs(5)) {
            Ok(DriverEvent::StatusChanged { state }) => {
                println!("driver state: {}", state.as_str());
            }
            Ok(DriverEvent::CaptureCompleted { session, success, error }) => {
                if !success {
                    eprintln!("capture failed: {:?}", error);
                    return;
                }
                break session;
            }
            Ok(DriverEvent::Error(reason)) => {
                eprintln!("driver error: {}", reason.message);
            }
            Err(_) => {
                eprintln!("no completion within 5s");
                return;
            }
        }
    };

    println!("{}", monitor::generate_status_report());

    for channel in &completed.capture_channels {
        let samples = channel.samples.as_ref().unwrap();
        let preview: String = samples.iter().take(32).map(|b| char::from(b'0' + b)).collect();
        println!("{:>10}: {}...", channel.to_string(), preview);
    }
    if let Some(bursts) = &completed.bursts {
        for burst in bursts {
            println!("{}", burst);
        }
    }

    let mut file = File::create("capture.lac").expect("create capture.lac");
    save_session(&mut file, &completed, Some(&info)).expect("save session");
    println!("saved capture.lac");

    monitor::shutdown_monitor();
}
