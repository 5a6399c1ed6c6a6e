//! Hardware compatibility database CLI.
//!
//! Maintains a JSON file of known analyzer models (the `DeviceInfo` shape
//! shared with the capture core) and offers a basic reachability probe for
//! network devices. Exit codes: 0 success, 1 user error, 2 I/O error.

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process;
use std::time::Duration;

use clap::{Parser, Subcommand};
use log::debug;

use lac_capture::protocol::frame::{encode_frame, FrameDecoder};
use lac_capture::protocol::request::CMD_STOP;
use lac_capture::session::{min_frequency, CaptureLimits, CaptureMode, DeviceInfo};
use lac_capture::transport::{TcpTransport, Transport};

const EXIT_USER_ERROR: i32 = 1;
const EXIT_IO_ERROR: i32 = 2;

#[derive(Parser)]
#[command(name = "manage-database", about = "Manage the analyzer compatibility database")]
struct Cli {
    /// Database file.
    #[arg(long, default_value = "devices.json")]
    database: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List devices, or show one by name.
    Query { name: Option<String> },
    /// Add a device record.
    Add {
        name: String,
        #[arg(long)]
        max_frequency: u32,
        #[arg(long, default_value_t = 0)]
        blast_frequency: u32,
        #[arg(long)]
        channels: u8,
        #[arg(long)]
        buffer_size: u32,
    },
    /// Update fields of an existing record.
    Update {
        name: String,
        #[arg(long)]
        max_frequency: Option<u32>,
        #[arg(long)]
        blast_frequency: Option<u32>,
        #[arg(long)]
        channels: Option<u8>,
        #[arg(long)]
        buffer_size: Option<u32>,
    },
    /// Remove a record by name.
    Remove { name: String },
    /// Aggregate statistics over the database.
    Stats,
    /// Probe a network device for reachability.
    Discover { address: SocketAddr },
    /// Check every record for consistency.
    Validate,
    /// Write the database to another file.
    Export { output: PathBuf },
    /// Merge records from another file, replacing by name.
    Import { input: PathBuf },
    /// Print a record template.
    Template,
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();
    process::exit(run(cli));
}

fn run(cli: Cli) -> i32 {
    match cli.command {
        Command::Query { name } => query(&cli.database, name.as_deref()),
        Command::Add {
            name,
            max_frequency,
            blast_frequency,
            channels,
            buffer_size,
        } => add(
            &cli.database,
            DeviceInfo::new(name, max_frequency, blast_frequency, channels, buffer_size),
        ),
        Command::Update {
            name,
            max_frequency,
            blast_frequency,
            channels,
            buffer_size,
        } => update(
            &cli.database,
            &name,
            max_frequency,
            blast_frequency,
            channels,
            buffer_size,
        ),
        Command::Remove { name } => remove(&cli.database, &name),
        Command::Stats => stats(&cli.database),
        Command::Discover { address } => discover(address),
        Command::Validate => validate(&cli.database),
        Command::Export { output } => export(&cli.database, &output),
        Command::Import { input } => import(&cli.database, &input),
        Command::Template => template(),
    }
}

fn load(path: &Path) -> Result<Vec<DeviceInfo>, i32> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let data = fs::read(path).map_err(|e| {
        eprintln!("cannot read {}: {}", path.display(), e);
        EXIT_IO_ERROR
    })?;
    serde_json::from_slice(&data).map_err(|e| {
        eprintln!("corrupt database {}: {}", path.display(), e);
        EXIT_IO_ERROR
    })
}

fn store(path: &Path, devices: &[DeviceInfo]) -> Result<(), i32> {
    let json = serde_json::to_vec_pretty(devices).expect("device records serialize");
    fs::write(path, json).map_err(|e| {
        eprintln!("cannot write {}: {}", path.display(), e);
        EXIT_IO_ERROR
    })
}

fn print_device(device: &DeviceInfo) {
    println!(
        "{}: {} channels, {} Hz max ({} Hz min), blast {} Hz, buffer {}",
        device.name,
        device.channels,
        device.max_frequency,
        min_frequency(device.max_frequency),
        device.blast_frequency,
        device.buffer_size
    );
}

fn query(path: &Path, name: Option<&str>) -> i32 {
    let devices = match load(path) {
        Ok(devices) => devices,
        Err(code) => return code,
    };
    match name {
        Some(name) => match devices.iter().find(|d| d.name == name) {
            Some(device) => {
                println!("{}", serde_json::to_string_pretty(device).unwrap());
                0
            }
            None => {
                eprintln!("no device named {}", name);
                EXIT_USER_ERROR
            }
        },
        None => {
            for device in &devices {
                print_device(device);
            }
            println!("{} device(s)", devices.len());
            0
        }
    }
}

fn add(path: &Path, device: DeviceInfo) -> i32 {
    if device.channels == 0 || device.channels > 24 {
        eprintln!("channels must be 1..=24");
        return EXIT_USER_ERROR;
    }
    if device.buffer_size == 0 || device.max_frequency == 0 {
        eprintln!("buffer size and max frequency must be nonzero");
        return EXIT_USER_ERROR;
    }
    let mut devices = match load(path) {
        Ok(devices) => devices,
        Err(code) => return code,
    };
    if devices.iter().any(|d| d.name == device.name) {
        eprintln!("device {} already exists (use update)", device.name);
        return EXIT_USER_ERROR;
    }
    println!("added {}", device.name);
    devices.push(device);
    match store(path, &devices) {
        Ok(()) => 0,
        Err(code) => code,
    }
}

fn update(
    path: &Path,
    name: &str,
    max_frequency: Option<u32>,
    blast_frequency: Option<u32>,
    channels: Option<u8>,
    buffer_size: Option<u32>,
) -> i32 {
    let mut devices = match load(path) {
        Ok(devices) => devices,
        Err(code) => return code,
    };
    let device = match devices.iter_mut().find(|d| d.name == name) {
        Some(device) => device,
        None => {
            eprintln!("no device named {}", name);
            return EXIT_USER_ERROR;
        }
    };

    let rebuilt = DeviceInfo::new(
        name,
        max_frequency.unwrap_or(device.max_frequency),
        blast_frequency.unwrap_or(device.blast_frequency),
        channels.unwrap_or(device.channels),
        buffer_size.unwrap_or(device.buffer_size),
    );
    *device = rebuilt;
    println!("updated {}", name);
    match store(path, &devices) {
        Ok(()) => 0,
        Err(code) => code,
    }
}

fn remove(path: &Path, name: &str) -> i32 {
    let mut devices = match load(path) {
        Ok(devices) => devices,
        Err(code) => return code,
    };
    let before = devices.len();
    devices.retain(|d| d.name != name);
    if devices.len() == before {
        eprintln!("no device named {}", name);
        return EXIT_USER_ERROR;
    }
    println!("removed {}", name);
    match store(path, &devices) {
        Ok(()) => 0,
        Err(code) => code,
    }
}

fn stats(path: &Path) -> i32 {
    let devices = match load(path) {
        Ok(devices) => devices,
        Err(code) => return code,
    };
    if devices.is_empty() {
        println!("database is empty");
        return 0;
    }
    let max_rate = devices.iter().map(|d| d.max_frequency).max().unwrap();
    let max_buffer = devices.iter().map(|d| d.buffer_size).max().unwrap();
    let blast_capable = devices.iter().filter(|d| d.blast_frequency > 0).count();
    println!("devices: {}", devices.len());
    println!("fastest: {} Hz", max_rate);
    println!("largest buffer: {} samples", max_buffer);
    println!("blast capable: {}", blast_capable);
    0
}

fn discover(address: SocketAddr) -> i32 {
    let transport = match TcpTransport::connect(address, Duration::from_secs(3)) {
        Ok(transport) => transport,
        Err(e) => {
            eprintln!("{} unreachable: {}", address, e);
            return EXIT_IO_ERROR;
        }
    };

    // A stop while idle is a harmless probe; some firmware answers with a
    // status frame.
    let _ = transport.write(&encode_frame(&[CMD_STOP]));
    let _ = transport.set_read_timeout(Some(Duration::from_secs(2)));

    let mut decoder = FrameDecoder::new();
    let mut frames = Vec::new();
    let mut buf = [0u8; 256];
    match transport.read(&mut buf) {
        Ok(n) if n > 0 => {
            debug!("probe got {} bytes", n);
            let framed = decoder.push(&buf[..n], &mut frames).is_ok() && !frames.is_empty();
            if framed {
                println!("{}: analyzer responded (status 0x{:02X})", address, frames[0].first().copied().unwrap_or(0));
            } else {
                println!("{}: connected, no framed status", address);
            }
        }
        _ => println!("{}: connected, silent", address),
    }
    transport.close();
    0
}

fn validate(path: &Path) -> i32 {
    let devices = match load(path) {
        Ok(devices) => devices,
        Err(code) => return code,
    };
    let mut bad = 0;
    for device in &devices {
        let mut problems = Vec::new();
        if device.channels == 0 || device.channels > 24 {
            problems.push("channels outside 1..=24".to_string());
        }
        if device.max_frequency == 0 {
            problems.push("zero max frequency".to_string());
        }
        if device.buffer_size == 0 {
            problems.push("zero buffer size".to_string());
        }
        let expected = [
            CaptureLimits::for_mode(device.buffer_size, CaptureMode::Channels8),
            CaptureLimits::for_mode(device.buffer_size, CaptureMode::Channels16),
            CaptureLimits::for_mode(device.buffer_size, CaptureMode::Channels24),
        ];
        if device.mode_limits != expected {
            problems.push("mode limits disagree with buffer size".to_string());
        }
        if problems.is_empty() {
            println!("{}: ok", device.name);
        } else {
            bad += 1;
            for problem in problems {
                println!("{}: {}", device.name, problem);
            }
        }
    }
    if bad > 0 {
        eprintln!("{} invalid device(s)", bad);
        EXIT_USER_ERROR
    } else {
        0
    }
}

fn export(path: &Path, output: &Path) -> i32 {
    let devices = match load(path) {
        Ok(devices) => devices,
        Err(code) => return code,
    };
    match store(output, &devices) {
        Ok(()) => {
            println!("exported {} device(s) to {}", devices.len(), output.display());
            0
        }
        Err(code) => code,
    }
}

fn import(path: &Path, input: &Path) -> i32 {
    if !input.exists() {
        eprintln!("no such file: {}", input.display());
        return EXIT_USER_ERROR;
    }
    let incoming = match load(input) {
        Ok(devices) => devices,
        Err(code) => return code,
    };
    let mut devices = match load(path) {
        Ok(devices) => devices,
        Err(code) => return code,
    };
    let mut added = 0;
    let mut replaced = 0;
    for device in incoming {
        if let Some(existing) = devices.iter_mut().find(|d| d.name == device.name) {
            *existing = device;
            replaced += 1;
        } else {
            devices.push(device);
            added += 1;
        }
    }
    println!("imported: {} added, {} replaced", added, replaced);
    match store(path, &devices) {
        Ok(()) => 0,
        Err(code) => code,
    }
}

fn template() -> i32 {
    let template = DeviceInfo::new("DEVICE-NAME", 100_000_000, 200_000_000, 24, 96_000);
    println!("{}", serde_json::to_string_pretty(&template).unwrap());
    0
}
