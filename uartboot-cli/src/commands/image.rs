//! Offline image utilities: padding and C array export.

use anyhow::{Context, Result};
use console::style;
use std::fs;
use std::path::Path;

use crate::{Cli, CliError};

/// Pad command implementation.
pub(crate) fn cmd_pad(cli: &Cli, input: &Path, size: usize, fill: u8, output: &Path) -> Result<()> {
    let data =
        fs::read(input).with_context(|| format!("Failed to read {}", input.display()))?;

    let padded = uartboot::pad_image(&data, size, fill)
        .map_err(|e| CliError::Usage(format!("{}: {e}", input.display())))?;

    fs::write(output, &padded)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    if !cli.quiet {
        eprintln!(
            "{} Padded {} from {} to {} bytes with 0x{fill:02X} into {}",
            style("✓").green(),
            input.display(),
            data.len(),
            padded.len(),
            output.display()
        );
    }
    Ok(())
}

/// Bin2c command implementation.
pub(crate) fn cmd_bin2c(cli: &Cli, input: &Path, output: &Path, name: &str) -> Result<()> {
    if !is_c_identifier(name) {
        return Err(CliError::Usage(format!("'{name}' is not a valid C identifier")).into());
    }

    let data =
        fs::read(input).with_context(|| format!("Failed to read {}", input.display()))?;

    fs::write(output, uartboot::to_c_array(&data, name))
        .with_context(|| format!("Failed to write {}", output.display()))?;

    if !cli.quiet {
        eprintln!(
            "{} Converted {} to {}",
            style("✓").green(),
            input.display(),
            output.display()
        );
    }
    Ok(())
}

fn is_c_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
