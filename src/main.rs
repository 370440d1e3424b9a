use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use hxdmp::hexdump;
use indicatif::ProgressBar;

use stm32isp::{
    format, Bootloader, Catalog, Error, Flashing, LinkConfig, Parity, Progress, SerialLink,
};

/// Flash firmware to STM32 microcontrollers over a serial connection.
///
/// The target must boot its factory UART bootloader; BOOT0 and RESET are
/// driven through the RTS/DTR modem-control lines to get it there.
#[derive(clap::Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// File to write/verify against, or to store a read into
    #[arg(value_name = "FILE")]
    data_file: Option<PathBuf>,

    /// Serial port, e.g. /dev/ttyUSB0 or COM3
    #[arg(short, long, env = "STM32LOADER_SERIAL_PORT")]
    port: String,

    /// Baudrate
    #[arg(short, long, default_value_t = 115_200)]
    baud: u32,

    /// Parity: "even" for STM32, "none" for BlueNRG
    #[arg(short = 'P', long, default_value = "even", value_parser = ["even", "none"])]
    parity: String,

    /// Target address for read, write or erase
    #[arg(short, long, default_value = "0x08000000", value_parser = parse_number)]
    address: u32,

    /// Length of read or erase
    #[arg(short, long, value_parser = parse_number)]
    length: Option<u32>,

    /// Device family for flash size and UID readout, e.g. F1
    #[arg(short, long, env = "STM32LOADER_FAMILY")]
    family: Option<String>,

    /// Erase the full flash, or --address/--length worth of pages
    #[arg(short, long)]
    erase: bool,

    /// Write file content to flash
    #[arg(short, long)]
    write: bool,

    /// Verify flash content against the file
    #[arg(short, long)]
    verify: bool,

    /// Read from flash into the file (or hexdump without one)
    #[arg(short, long)]
    read: bool,

    /// Remove readout protection (this mass-erases!)
    #[arg(short, long)]
    unprotect: bool,

    /// Enable readout protection
    #[arg(short = 'x', long)]
    protect: bool,

    /// Start executing from this address after other operations
    #[arg(short, long, value_name = "ADDRESS", value_parser = parse_number)]
    go_address: Option<u32>,

    /// Use RTS for reset and DTR for boot0 instead of the reverse
    #[arg(short, long)]
    swap_rts_dtr: bool,

    /// Make RESET active high
    #[arg(short = 'R', long)]
    reset_active_high: bool,

    /// Make BOOT0 active low
    #[arg(short = 'B', long)]
    boot0_active_low: bool,

    /// Don't show progress bars
    #[arg(short, long)]
    no_progress: bool,

    /// Verbose mode
    #[arg(short = 'V', long)]
    verbose: bool,

    /// Quiet mode
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        simplelog::LevelFilter::Debug
    } else if cli.quiet {
        simplelog::LevelFilter::Error
    } else {
        simplelog::LevelFilter::Info
    };
    let _ = simplelog::TermLogger::init(
        level,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    );

    if (cli.write || cli.verify) && cli.data_file.is_none() {
        bail!("a data file is required for --write and --verify");
    }
    if cli.read && cli.length.is_none() {
        bail!("--read requires --length");
    }

    let binary_data = match (&cli.data_file, cli.write || cli.verify) {
        (Some(path), true) => Some(
            format::read_firmware_from_file(path)
                .with_context(|| format!("reading {}", path.display()))?,
        ),
        _ => None,
    };

    let catalog = Catalog::load()?;
    let family = match &cli.family {
        Some(tag) => Some(
            catalog
                .family_by_tag(tag)
                .cloned()
                .ok_or_else(|| Error::UnknownFamily(tag.clone()))?,
        ),
        None => None,
    };

    let mut config = LinkConfig::new(cli.port.as_str());
    config.baud_rate = cli.baud;
    config.parity = match cli.parity.as_str() {
        "none" => Parity::None,
        _ => Parity::Even,
    };
    config.swap_rts_dtr = cli.swap_rts_dtr;
    config.reset_active_high = cli.reset_active_high;
    config.boot0_active_low = cli.boot0_active_low;

    let link = SerialLink::open(config).with_context(|| {
        format!(
            "opening serial port {} (is the device connected and powered?)",
            cli.port
        )
    })?;

    let mut flashing = Flashing::new(Bootloader::new(link).with_family(family));

    log::info!("activating bootloader (select UART)");
    if let Err(err) = flashing.bootloader().reset_from_system_memory() {
        let _ = flashing.bootloader().reset_from_flash();
        return Err(err).context(
            "can't init into bootloader; ensure BOOT0 is enabled and reset the device",
        );
    }

    let result = perform_commands(&mut flashing, &cli, binary_data.as_deref(), &catalog);
    // Leave the target booted from flash whatever happened above.
    let _ = flashing.bootloader().reset_from_flash();
    result
}

fn perform_commands(
    flashing: &mut Flashing<SerialLink>,
    cli: &Cli,
    binary_data: Option<&[u8]>,
    catalog: &Catalog,
) -> Result<()> {
    report_device_id(flashing, cli, catalog)?;
    report_device_uid(flashing, cli);

    if cli.unprotect {
        flashing
            .bootloader()
            .readout_unprotect()
            .context("flash readout unprotect failed")?;
        log::info!("readout protection removed, flash is mass-erased");
    }

    if cli.protect {
        flashing
            .bootloader()
            .readout_protect()
            .context("flash readout protect failed")?;
        log::info!("readout protection enabled");
    }

    if cli.erase {
        let result = match cli.length {
            None => flashing.erase_memory(None),
            Some(length) => {
                let pages = flashing.pages_from_range(cli.address, cli.address + length)?;
                flashing.erase_memory(Some(&pages))
            }
        };
        result.context(
            "erase failed -- possibly due to readout protection; consider using --unprotect",
        )?;
        log::info!("erase done");
    }

    if cli.write {
        let Some(data) = binary_data else {
            bail!("a data file is required for --write");
        };
        log::info!("writing {} bytes at {:#010x}", data.len(), cli.address);
        let bar = progress_bar(cli.no_progress, data.len());
        flashing.write_memory_data(cli.address, data, |p: Progress| {
            bar.set_position(p.bytes_done as u64)
        })?;
        bar.finish();
        log::info!("write done");
    }

    if cli.verify {
        let Some(data) = binary_data else {
            bail!("a data file is required for --verify");
        };
        log::info!("verifying {} bytes at {:#010x}", data.len(), cli.address);
        let bar = progress_bar(cli.no_progress, data.len());
        flashing.verify(cli.address, data, |p: Progress| {
            bar.set_position(p.bytes_done as u64)
        })?;
        bar.finish();
        log::info!("verification OK");
    }

    if cli.read && !cli.write {
        let Some(length) = cli.length.map(|l| l as usize) else {
            bail!("--read requires --length");
        };
        log::info!("reading {} bytes at {:#010x}", length, cli.address);
        let bar = progress_bar(cli.no_progress, length);
        let data = flashing.read_memory_data(cli.address, length, |p: Progress| {
            bar.set_position(p.bytes_done as u64)
        })?;
        bar.finish();
        match &cli.data_file {
            Some(path) => {
                std::fs::write(path, &data)
                    .with_context(|| format!("writing {}", path.display()))?;
                log::info!("flash content saved to {}", path.display());
            }
            None => {
                let mut out = vec![];
                hexdump(&data, &mut out)?;
                println!("{}", String::from_utf8_lossy(&out));
            }
        }
    }

    if let Some(address) = cli.go_address {
        flashing.bootloader().go(address)?;
        log::info!("started execution at {:#010x}", address);
    }

    Ok(())
}

fn report_device_id(
    flashing: &mut Flashing<SerialLink>,
    cli: &Cli,
    catalog: &Catalog,
) -> Result<()> {
    let boot = flashing.bootloader();
    boot.get()?;
    if let Some(version) = boot.info().version_string() {
        log::info!("bootloader protocol version: {version}");
    }

    let mut device_id = boot.get_id()?;
    if matches!(&cli.family, Some(tag) if tag.eq_ignore_ascii_case("NRG")) {
        // BlueNRG ids carry metal fix and mask set in the upper bytes.
        log::info!("metal fix: {:#04x}", (device_id >> 16) & 0xFF);
        log::info!("mask set: {:#04x}", (device_id >> 8) & 0xFF);
        device_id &= 0xFF;
    }
    let name = catalog.variant_name(device_id).unwrap_or("unknown device");
    log::info!("chip id: {device_id:#05x} ({name})");
    Ok(())
}

/// Flash size and UID are nice-to-have; failures only warn.
fn report_device_uid(flashing: &mut Flashing<SerialLink>, cli: &Cli) {
    let Some(family) = cli.family.as_deref() else {
        log::info!("supply --family to see flash size and device UID, e.g. -f F1");
        return;
    };
    let boot = flashing.bootloader();

    // F4 and L0 refuse the short register reads; use the one-block form.
    let outcome = if family.eq_ignore_ascii_case("F4") || family.eq_ignore_ascii_case("L0") {
        boot.get_flash_size_and_uid()
            .map(|(size, uid)| (size, Some(uid)))
    } else {
        match boot.get_flash_size_bytes() {
            Ok(size) => boot.get_uid().map(|uid| (size, uid)),
            Err(err) => Err(err),
        }
    };

    match outcome {
        Ok((flash_size, uid)) => {
            log::info!("flash size: {} KiB", flash_size / 1024);
            match uid {
                Some(uid) => {
                    log::info!("device UID: {}", Bootloader::<SerialLink>::format_uid(&uid))
                }
                None => log::info!("device UID: not supported in this part"),
            }
        }
        Err(err) => log::warn!("could not read family data: {err}"),
    }
}

fn progress_bar(no_progress: bool, total: usize) -> ProgressBar {
    if no_progress {
        ProgressBar::hidden()
    } else {
        ProgressBar::new(total as u64)
    }
}

/// Accepts `0x` hex or plain decimal, like the usual ST tools.
fn parse_number(s: &str) -> Result<u32, String> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).map_err(|e| format!("bad hex value {s:?}: {e}"))
    } else {
        s.parse().map_err(|e| format!("bad number {s:?}: {e}"))
    }
}
