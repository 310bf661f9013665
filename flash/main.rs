// ─────────────────────────────────────────────────────────────────────────────
//  pad-flasher  —  mass firmware programmer for UART / JTAG / SWD targets
//
//  USAGE
//  ─────
//    pad-flasher flash -f app.hex -i uart -d /dev/ttyUSB0
//    pad-flasher flash -f app.bin -i swd -d 127.0.0.1:4444 --validate
//    pad-flasher flash -f app.bin -n 4 --parallel          # /dev/ttyUSB0..3
//    pad-flasher flash -c batch.toml
//    pad-flasher detect
// ─────────────────────────────────────────────────────────────────────────────

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;

use pad_flasher::config::{numbered_devices, DEFAULT_CHUNK_SIZE};
use pad_flasher::detect;
use pad_flasher::{BatchFile, Checksum, Console, Coordinator, DeviceConfig, FlashError, Mode, TransportKind};

// ─────────────────────────────────────────────────────────────────────────────
//  CLI definition (clap derive)
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name    = "pad-flasher",
    version = env!("CARGO_PKG_VERSION"),
    about   = "Universal device programmer — flash many UART / JTAG / SWD targets at once",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Cmd,

    /// Only print the final summary
    #[arg(long, short = 'q', global = true)]
    quiet: bool,

    /// More log output (repeat for trace); `-v` is --validate
    #[arg(long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,
}

#[derive(Subcommand)]
enum Cmd {
    /// Flash one firmware image onto every configured device
    Flash(FlashArgs),
    /// List attached UART bridges and debug probes
    Detect,
}

#[derive(Args)]
struct FlashArgs {
    /// Firmware file (.hex is decoded as Intel HEX, anything else is sent raw)
    #[arg(long, short = 'f')]
    firmware: Option<PathBuf>,

    /// Interface type for devices given on the command line
    #[arg(long, short = 'i', default_value = "uart")]
    interface: TransportKind,

    /// Device path(s): serial port, probe node or host:port (repeat or comma-separate)
    #[arg(long = "device", short = 'd', value_delimiter = ',')]
    devices: Vec<String>,

    /// Baud rate for UART devices (unsupported rates fall back to 115200)
    #[arg(long, short = 'b', default_value = "115200")]
    baudrate: u32,

    /// Number of devices; paths default to /dev/ttyUSB0..N-1
    #[arg(long, short = 'n')]
    num_devices: Option<usize>,

    /// Use every detected port as a target
    #[arg(long, conflicts_with_all = ["devices", "num_devices"])]
    auto: bool,

    /// Validate the image on the device after programming
    #[arg(long, short = 'v')]
    validate: bool,

    /// Attempt the recovery handshake before programming
    #[arg(long, short = 'r')]
    recovery: bool,

    /// Program all devices concurrently
    #[arg(long, short = 'p')]
    parallel: bool,

    /// Batch configuration file (TOML)
    #[arg(long = "batch", short = 'c')]
    batch: Option<PathBuf>,

    /// Digest used for validation: sha256 or djb2
    #[arg(long)]
    checksum: Option<Checksum>,

    /// Per-call I/O timeout in milliseconds (default depends on interface)
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Bytes per write while programming
    #[arg(long)]
    chunk_size: Option<usize>,

    /// Print the batch result as JSON on stdout
    #[arg(long)]
    json: bool,
}

// ─────────────────────────────────────────────────────────────────────────────
//  Entry point
// ─────────────────────────────────────────────────────────────────────────────

fn main() {
    let cli = Cli::parse();

    init_logging(cli.verbose);
    if cli.no_color {
        colored::control::set_override(false);
    }

    let result = match cli.command {
        Cmd::Flash(args) => cmd_flash(args, cli.quiet, !cli.no_color),
        Cmd::Detect      => { cmd_detect(); Ok(0) }
    };

    match result {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            render_error(&e);
            std::process::exit(1);
        }
    }
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default))
        .format_timestamp_millis()
        .init();
}

// ─────────────────────────────────────────────────────────────────────────────
//  Command handlers
// ─────────────────────────────────────────────────────────────────────────────

fn cmd_flash(args: FlashArgs, quiet: bool, color: bool) -> anyhow::Result<i32> {
    let batch = match &args.batch {
        Some(path) => {
            if !quiet && !args.json {
                println!("{} {}", "Batch configuration file:".dimmed(), path.display());
            }
            Some(BatchFile::load(path).with_context(|| format!("loading {}", path.display()))?)
        }
        None => None,
    };

    let firmware = resolve_firmware(&args, batch.as_ref())?;
    let devices  = assemble_devices(&args, batch.as_ref())?;

    let parallel   = args.parallel || batch.as_ref().map_or(false, |b| b.parallel);
    let checksum   = args.checksum
        .or_else(|| batch.as_ref().and_then(|b| b.checksum))
        .unwrap_or_default();
    let chunk_size = args.chunk_size
        .or_else(|| batch.as_ref().and_then(|b| b.chunk_size))
        .unwrap_or(DEFAULT_CHUNK_SIZE);

    if !quiet && !args.json {
        print_banner();
    }

    // stdout carries nothing but the JSON document in --json mode
    let console = if args.json {
        Console::new(std::io::sink(), false)
    } else {
        Console::stdout(color).quiet(quiet)
    };
    let coordinator = Coordinator::system(checksum, console).with_chunk_size(chunk_size);

    let result = coordinator.flash_file(&firmware, &devices, Mode::from_parallel(parallel))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    }

    Ok(result.exit_code())
}

fn cmd_detect() {
    let ports = detect::detect_all();

    if ports.is_empty() {
        println!("{} No serial ports or probes found", "!".yellow());
        return;
    }

    println!("{:<22} {:<6} {:<10} {}", "PORT", "LINK", "VID:PID", "ADAPTER");
    println!("{}", "─".repeat(64).dimmed());

    for p in &ports {
        let vid_pid = p.vid_pid
            .map(|(v, p)| format!("{:04X}:{:04X}", v, p))
            .unwrap_or_else(|| "—".into());
        println!("{:<22} {:<6} {:<10} {}", p.port, p.kind.as_str(), vid_pid, p.product.unwrap_or("—"));
    }
}

// ─────────────────────────────────────────────────────────────────────────────
//  Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!("{} {}", "PAD-Flasher".cyan().bold(), format!("v{}", env!("CARGO_PKG_VERSION")).dimmed());
    println!("{}", "─".repeat(60).dimmed());
}

/// `-f` wins over the batch file; a relative path in the batch file is
/// relative to the batch file itself.
fn resolve_firmware(args: &FlashArgs, batch: Option<&BatchFile>) -> anyhow::Result<PathBuf> {
    if let Some(fw) = &args.firmware {
        return Ok(fw.clone());
    }
    let from_batch = batch.and_then(|b| b.firmware.clone()).map(|fw| {
        match args.batch.as_deref().and_then(Path::parent) {
            Some(dir) if fw.is_relative() => dir.join(fw),
            _ => fw,
        }
    });
    match from_batch {
        Some(fw) => Ok(fw),
        None => bail!("Firmware file not specified (-f option required)"),
    }
}

/// Device list precedence: batch file, --device, --auto, --num-devices, then
/// a single default port.
fn assemble_devices(args: &FlashArgs, batch: Option<&BatchFile>) -> anyhow::Result<Vec<DeviceConfig>> {
    let from_batch = batch.map(BatchFile::device_configs).unwrap_or_default();

    let mut devices = if !from_batch.is_empty() {
        from_batch
    } else if !args.devices.is_empty() {
        args.devices.iter()
            .map(|d| DeviceConfig::new(args.interface, d.trim()).with_baud(args.baudrate))
            .collect()
    } else if args.auto {
        let found = detect::detected_devices();
        if found.is_empty() {
            return Err(FlashError::NoDevices.into());
        }
        found
    } else {
        let count = args.num_devices.unwrap_or(1);
        numbered_devices(args.interface, count)
            .into_iter()
            .map(|d| d.with_baud(args.baudrate))
            .collect()
    };

    for dev in &mut devices {
        dev.validate_after_flash |= args.validate;
        dev.recovery_mode |= args.recovery;
        if let Some(ms) = args.timeout_ms {
            dev.timeout = Duration::from_millis(ms);
        }
    }
    Ok(devices)
}

// ─────────────────────────────────────────────────────────────────────────────
//  Error rendering
// ─────────────────────────────────────────────────────────────────────────────

fn render_error(e: &anyhow::Error) {
    eprintln!("{} {:#}", "✗".red().bold(), e);

    match e.downcast_ref::<FlashError>() {
        Some(FlashError::NoDevices) => {
            eprintln!("  Pass --device, --num-devices or a --batch file, or run `pad-flasher detect`");
        }
        Some(FlashError::FirmwareUnreadable { .. }) => {
            eprintln!("  Check the --firmware path (or `firmware` in the batch file)");
        }
        Some(FlashError::InvalidHex { .. }) => {
            eprintln!("  The file has a .hex extension but is not valid Intel HEX; rename it to .bin to send it raw");
        }
        Some(FlashError::SparseHex { .. }) => {
            eprintln!("  Split the image (e.g. drop option-byte records) or convert the flash region to .bin");
        }
        _ => {}
    }
}
