//! Flash command implementation.

use anyhow::{Context, Result};
use console::style;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::path::Path;
use std::time::{Duration, Instant};
use uartboot::{Error as FlashError, FlashConfig, Firmware, Flasher};

use crate::config::Config;
use crate::{Cli, CliError, get_port, resolve_baud, use_fancy_output};

/// Flash options given on the command line.
#[derive(Debug, Clone, Default)]
pub(crate) struct FlashOverrides {
    pub start_address: Option<u32>,
    pub timeout_ms: Option<u64>,
    pub max_retransmits: Option<u32>,
    pub query_version: bool,
}

/// Combine command line options, config file and defaults.
pub(crate) fn resolve_flash_config(config: &Config, overrides: &FlashOverrides) -> FlashConfig {
    let mut flash = FlashConfig::default();

    if let Some(address) = overrides.start_address.or(config.flash.start_address) {
        flash = flash.with_start_address(address);
    }
    let timeout = overrides
        .timeout_ms
        .map(Duration::from_millis)
        .or_else(|| config.flash.response_timeout());
    if let Some(timeout) = timeout {
        flash = flash.with_response_timeout(timeout);
    }
    if let Some(max) = overrides.max_retransmits.or(config.flash.max_retransmits) {
        flash = flash.with_max_retransmits(max);
    }
    flash.with_query_version(overrides.query_version || config.flash.query_version)
}

fn progress_bar(cli: &Cli, total: u64) -> Result<ProgressBar> {
    if cli.quiet || !use_fancy_output() {
        return Ok(ProgressBar::hidden());
    }
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec})",
            )?
            .progress_chars("#>-"),
    );
    pb.set_draw_target(ProgressDrawTarget::stderr());
    Ok(pb)
}

/// Flash command implementation.
pub(crate) fn cmd_flash(
    cli: &Cli,
    config: &mut Config,
    firmware: &Path,
    overrides: &FlashOverrides,
) -> Result<()> {
    let image = Firmware::from_file(firmware)
        .with_context(|| format!("Failed to load firmware {}", firmware.display()))?;
    if !cli.quiet {
        eprintln!(
            "{} Loaded {} ({} bytes)",
            style("•").cyan(),
            firmware.display(),
            image.len()
        );
    }

    let flash_config = resolve_flash_config(config, overrides);
    let port = get_port(cli, config)?;
    let baud = resolve_baud(cli, config);
    if !cli.quiet {
        eprintln!(
            "{} Using {} at {} baud, start address 0x{:08X}",
            style("•").cyan(),
            style(&port).green(),
            baud,
            flash_config.start_address
        );
    }

    let mut flasher = Flasher::open(&port, baud, flash_config)
        .with_context(|| format!("Failed to open serial port {port}"))?;

    let pb = match progress_bar(cli, image.len() as u64) {
        Ok(pb) => pb,
        Err(err) => {
            let _ = flasher.close();
            return Err(err);
        },
    };

    let started = Instant::now();
    let result = flasher.flash_firmware(&image, |done, _total| pb.set_position(done as u64));

    // Release the port before reporting, success or not
    let closed = flasher.close();

    match result {
        Ok(()) => {
            pb.finish_and_clear();
            closed.with_context(|| format!("Failed to close serial port {port}"))?;
            if !cli.quiet {
                eprintln!(
                    "{} Flashed {} bytes in {:.2}s",
                    style("✓").green().bold(),
                    image.len(),
                    started.elapsed().as_secs_f64()
                );
            }
            Ok(())
        },
        Err(FlashError::Interrupted) => {
            pb.abandon();
            Err(CliError::Cancelled("Flashing interrupted".to_string()).into())
        },
        Err(err) => {
            pb.abandon();
            Err(err).context("Flashing failed")
        },
    }
}
