//! uartboot CLI - Command-line tool for UART bootloader firmware updates.
//!
//! ## Features
//!
//! - Flash a raw firmware image through the bootloader packet protocol
//! - Pad images and export them as C arrays
//! - Interactive serial port selection
//! - Shell completion generation
//! - Environment variable and config file support

use anyhow::Result;
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use env_logger::Env;
use log::debug;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};

mod commands;
mod config;
mod serial;

use config::Config;
use serial::{SerialOptions, ask_remember_port, select_serial_port};

/// Default baud rate for the bootloader link.
const DEFAULT_BAUD: u32 = 921_600;

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Set by the Ctrl-C handler.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Check if progress bars and colors should be used.
fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

fn was_interrupted() -> bool {
    INTERRUPTED.load(Ordering::Relaxed)
}

/// Errors with a dedicated exit code.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Bad invocation or missing setup; exit code 2.
    #[error("{0}")]
    Usage(String),
    /// Stopped by the user; exit code 130.
    #[error("{0}")]
    Cancelled(String),
}

impl CliError {
    fn exit_code(&self) -> u8 {
        match self {
            Self::Usage(_) => 2,
            Self::Cancelled(_) => 130,
        }
    }
}

/// uartboot - Flash firmware through a UART bootloader.
///
/// Environment variables:
///   UARTBOOT_PORT              - Default serial port
///   UARTBOOT_BAUD              - Default baud rate (default: 921600)
///   UARTBOOT_NON_INTERACTIVE   - Non-interactive mode (disable prompts)
#[derive(Parser)]
#[command(name = "uartboot")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
#[allow(clippy::struct_excessive_bools)]
struct Cli {
    /// Serial port to use (auto-detected if not specified).
    #[arg(short, long, global = true, env = "UARTBOOT_PORT")]
    port: Option<String>,

    /// Baud rate [default: 921600].
    #[arg(short, long, global = true, env = "UARTBOOT_BAUD")]
    baud: Option<u32>,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Non-interactive mode (fail instead of prompting).
    #[arg(long, global = true, env = "UARTBOOT_NON_INTERACTIVE")]
    non_interactive: bool,

    /// Confirm port selection even for auto-detected ports.
    #[arg(long, global = true)]
    confirm_port: bool,

    /// List all available ports (including unknown types).
    #[arg(long, global = true)]
    list_all_ports: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Flash a raw firmware image.
    Flash {
        /// Path to the firmware binary.
        firmware: PathBuf,

        /// Address of the first image byte [default: 0x8000].
        #[arg(long, value_parser = parse_hex_u32)]
        start_address: Option<u32>,

        /// Response timeout in milliseconds [default: 1000].
        #[arg(long, value_name = "MS")]
        timeout_ms: Option<u64>,

        /// Retransmissions allowed per exchange [default: 16].
        #[arg(long, value_name = "N")]
        max_retransmits: Option<u32>,

        /// Query the bootloader version before updating.
        #[arg(long)]
        query_version: bool,
    },

    /// Pad a binary to a fixed size.
    Pad {
        /// Input binary.
        input: PathBuf,

        /// Target size in bytes (hex).
        #[arg(short, long, value_parser = parse_hex_usize)]
        size: usize,

        /// Fill byte (hex).
        #[arg(short, long, default_value = "FF", value_parser = parse_hex_u8)]
        fill: u8,

        /// Output file.
        #[arg(short, long, default_value = "output.bin")]
        output: PathBuf,
    },

    /// Convert a binary into a C array.
    Bin2c {
        /// Input binary.
        input: PathBuf,

        /// Output C source file.
        output: PathBuf,

        /// Array name.
        #[arg(long, default_value = "data")]
        name: String,
    },

    /// List available serial ports.
    ListPorts {
        /// Output port list as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type.
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn parse_hex(s: &str) -> Result<u64, String> {
    let s = s.trim();
    let s = s.trim_start_matches("0x").trim_start_matches("0X");
    // Support underscore separators like 0x00_80_00
    let s: String = s.chars().filter(|c| *c != '_').collect();
    u64::from_str_radix(&s, 16).map_err(|e| format!("Invalid hex value: {e}"))
}

/// Parse hexadecimal address (supports 0x prefix and underscores).
fn parse_hex_u32(s: &str) -> Result<u32, String> {
    u32::try_from(parse_hex(s)?).map_err(|_| format!("Value out of range: {s}"))
}

fn parse_hex_usize(s: &str) -> Result<usize, String> {
    usize::try_from(parse_hex(s)?).map_err(|_| format!("Value out of range: {s}"))
}

fn parse_hex_u8(s: &str) -> Result<u8, String> {
    u8::try_from(parse_hex(s)?).map_err(|_| format!("Fill byte out of range: {s}"))
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);
    if std::env::var_os("NO_COLOR").is_some() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    // Setup logging based on verbosity
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();

    debug!(
        "uartboot v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    if let Err(e) = ctrlc::set_handler(|| INTERRUPTED.store(true, Ordering::Relaxed)) {
        debug!("Failed to install Ctrl-C handler: {e}");
    }
    uartboot::set_interrupt_checker(was_interrupted);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {err:#}", console::style("Error:").red().bold());
            let code = err
                .downcast_ref::<CliError>()
                .map_or(1, CliError::exit_code);
            ExitCode::from(code)
        },
    }
}

fn run(cli: &Cli) -> Result<()> {
    let mut config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    match &cli.command {
        Commands::Flash {
            firmware,
            start_address,
            timeout_ms,
            max_retransmits,
            query_version,
        } => {
            let overrides = commands::flash::FlashOverrides {
                start_address: *start_address,
                timeout_ms: *timeout_ms,
                max_retransmits: *max_retransmits,
                query_version: *query_version,
            };
            commands::flash::cmd_flash(cli, &mut config, firmware, &overrides)
        },
        Commands::Pad {
            input,
            size,
            fill,
            output,
        } => commands::image::cmd_pad(cli, input, *size, *fill, output),
        Commands::Bin2c {
            input,
            output,
            name,
        } => commands::image::cmd_bin2c(cli, input, output, name),
        Commands::ListPorts { json } => {
            commands::ports::cmd_list_ports(&config, &serial_options(cli), *json);
            Ok(())
        },
        Commands::Completions { shell } => {
            commands::completions::cmd_completions(*shell);
            Ok(())
        },
    }
}

/// Baud rate from CLI/env, then config, then the default.
fn resolve_baud(cli: &Cli, config: &Config) -> u32 {
    cli.baud
        .or(config.port.connection.baud)
        .unwrap_or(DEFAULT_BAUD)
}

fn serial_options(cli: &Cli) -> SerialOptions {
    SerialOptions {
        port: cli.port.clone(),
        list_all_ports: cli.list_all_ports,
        non_interactive: cli.non_interactive,
        confirm_port: cli.confirm_port,
    }
}

/// Get serial port from CLI args or interactive selection.
fn get_port(cli: &Cli, config: &mut Config) -> Result<String> {
    let selected = select_serial_port(&serial_options(cli), config)?;

    // Ask to remember if not a known device and interactive mode
    if !selected.is_known && !cli.non_interactive {
        ask_remember_port(&selected.port, config)?;
    }

    Ok(selected.port.info.name)
}
