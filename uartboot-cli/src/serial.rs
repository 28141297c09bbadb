//! Interactive serial port selection.
//!
//! Selection order:
//! - an explicit `--port` / `UARTBOOT_PORT`
//! - the port named in the configuration file
//! - a single recognized bridge, picked without asking
//! - an interactive choice when running on a terminal
//!
//! Non-interactive runs never prompt and fail with a usage error instead.

use {
    crate::{CliError, config::Config},
    anyhow::Result,
    console::style,
    dialoguer::{Confirm, Error as DialoguerError, Select, theme::ColorfulTheme},
    log::{debug, error, info},
    std::{cmp::Ordering, io::IsTerminal},
    uartboot::{DetectedPort, PortInfo, detect_ports},
};

/// Options for serial port selection.
#[derive(Debug, Clone, Default)]
pub struct SerialOptions {
    /// Explicit port specified via CLI.
    pub port: Option<String>,
    /// List all ports (including unknown types).
    pub list_all_ports: bool,
    /// Non-interactive mode (fail if multiple ports).
    pub non_interactive: bool,
    /// Force confirmation even for single recognized port.
    pub confirm_port: bool,
}

/// Result of port selection including whether it was a known device.
pub struct SelectedPort {
    /// The selected port info.
    pub port: DetectedPort,
    /// Whether this port matched a known/configured device.
    pub is_known: bool,
}

fn usage_err(message: &str) -> anyhow::Error {
    CliError::Usage(message.to_string()).into()
}

/// Outcome of port resolution before any prompt is shown.
pub(crate) enum Resolution {
    /// Decided without asking.
    Selected(SelectedPort),
    /// Several candidates; the user has to pick one.
    Choose(Vec<DetectedPort>),
    /// A single candidate that needs confirmation.
    Confirm(DetectedPort),
}

fn select_non_interactive_port(
    selection_ports: Vec<DetectedPort>,
    config: &Config,
) -> Result<SelectedPort> {
    match selection_ports.len().cmp(&1) {
        Ordering::Equal => {
            let Some(port) = selection_ports.into_iter().next() else {
                return Err(usage_err("No serial ports available"));
            };
            Ok(SelectedPort {
                is_known: is_known_device(&port, config),
                port,
            })
        },
        Ordering::Greater => Err(usage_err(
            "Multiple serial ports found; pass --port in non-interactive mode",
        )),
        Ordering::Less => Err(usage_err("No serial ports available")),
    }
}

/// Resolve the port from options, config and the detected `ports`.
///
/// Never prompts: anything that needs the user is returned as
/// [`Resolution::Choose`] or [`Resolution::Confirm`].
pub(crate) fn resolve_port(
    options: &SerialOptions,
    config: &Config,
    ports: Vec<DetectedPort>,
) -> Result<Resolution> {
    if let Some(port_name) = &options.port {
        return Ok(Resolution::Selected(find_port_by_name(port_name, ports, config)));
    }

    if let Some(port_name) = &config.port.connection.serial {
        debug!("Using port from config: {port_name}");
        return Ok(Resolution::Selected(find_port_by_name(port_name, ports, config)));
    }

    if ports.is_empty() {
        return Err(usage_err(
            "No serial ports found; connect the board or pass --port",
        ));
    }

    let known_ports: Vec<DetectedPort> = ports
        .iter()
        .filter(|p| is_known_device(p, config))
        .cloned()
        .collect();

    // Known devices first unless the user asks for all
    let selection_ports = if options.list_all_ports || known_ports.is_empty() {
        ports
    } else {
        known_ports
    };

    if options.non_interactive {
        return select_non_interactive_port(selection_ports, config).map(Resolution::Selected);
    }

    match selection_ports.len().cmp(&1) {
        Ordering::Greater => Ok(Resolution::Choose(selection_ports)),
        Ordering::Equal => {
            let Some(port) = selection_ports.into_iter().next() else {
                return Err(usage_err("No serial ports available"));
            };
            let is_known = is_known_device(&port, config);

            if is_known && !options.confirm_port {
                Ok(Resolution::Selected(SelectedPort { port, is_known }))
            } else {
                Ok(Resolution::Confirm(port))
            }
        },
        Ordering::Less => Err(usage_err("No serial ports available")),
    }
}

/// Select a serial port interactively or automatically.
pub fn select_serial_port(options: &SerialOptions, config: &Config) -> Result<SelectedPort> {
    match resolve_port(options, config, detect_ports())? {
        Resolution::Selected(selected) => {
            info!("Selected port: {}", selected.port.describe());
            Ok(selected)
        },
        Resolution::Choose(ports) => {
            ensure_interactive_terminal()?;
            select_port_interactive(ports, config)
        },
        Resolution::Confirm(port) => {
            ensure_interactive_terminal()?;
            confirm_single_port(port)
        },
    }
}

fn ensure_interactive_terminal() -> Result<()> {
    if std::io::stdin().is_terminal() && std::io::stderr().is_terminal() {
        Ok(())
    } else {
        Err(usage_err(
            "Port selection needs an interactive terminal; pass --port",
        ))
    }
}

fn map_prompt_error(err: DialoguerError) -> anyhow::Error {
    match err {
        DialoguerError::IO(io_err) => {
            if io_err.kind() == std::io::ErrorKind::Interrupted {
                CliError::Cancelled("Port selection cancelled".to_string()).into()
            } else {
                usage_err("Port selection prompt failed")
            }
        },
    }
}

/// Match a user-given port name against the detected ports.
///
/// A name that is not enumerated is still used as given.
fn find_port_by_name(name: &str, ports: Vec<DetectedPort>, config: &Config) -> SelectedPort {
    let port = ports
        .iter()
        .position(|p| p.name() == name)
        .or_else(|| ports.iter().position(|p| p.name().eq_ignore_ascii_case(name)))
        .and_then(|index| ports.into_iter().nth(index))
        .unwrap_or_else(|| {
            DetectedPort::classify(PortInfo {
                name: name.to_string(),
                vid: None,
                pid: None,
                manufacturer: None,
                product: None,
                serial_number: None,
            })
        });

    SelectedPort {
        is_known: is_known_device(&port, config),
        port,
    }
}

/// Check if a port is a recognized bridge or a device registered in config.
pub(crate) fn is_known_device(port: &DetectedPort, config: &Config) -> bool {
    if port.bridge.is_known() {
        return true;
    }
    match (port.info.vid, port.info.pid) {
        (Some(vid), Some(pid)) => config.is_registered_device(vid, pid),
        _ => false,
    }
}

fn select_port_interactive(mut ports: Vec<DetectedPort>, config: &Config) -> Result<SelectedPort> {
    eprintln!(
        "{} Found {} serial ports",
        style("ℹ").blue(),
        ports.len()
    );

    ports.sort_by_key(|p| !is_known_device(p, config));

    // Truncate labels to the terminal width to prevent wrapping
    let term_width = usize::from(console::Term::stderr().size().1);
    let max_item_width = term_width.saturating_sub(4);
    let labels: Vec<String> = ports
        .iter()
        .map(|port| {
            let label = if is_known_device(port, config) {
                style(port.describe()).bold().to_string()
            } else {
                port.describe()
            };
            console::truncate_str(&label, max_item_width, "\u{2026}").into_owned()
        })
        .collect();

    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Select serial port")
        .items(&labels)
        .default(0)
        .interact_opt()
        .map_err(map_prompt_error)?;

    match selection {
        Some(index) => {
            let port = ports
                .into_iter()
                .nth(index)
                .ok_or_else(|| anyhow::anyhow!("Invalid port index: {index}"))?;
            let is_known = is_known_device(&port, config);
            Ok(SelectedPort { port, is_known })
        },
        None => Err(CliError::Cancelled("Port selection cancelled".to_string()).into()),
    }
}

fn confirm_single_port(port: DetectedPort) -> Result<SelectedPort> {
    let confirmed = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(format!("Use {}?", port.describe()))
        .default(true)
        .interact_opt()
        .map_err(map_prompt_error)?
        .unwrap_or(false);

    if confirmed {
        Ok(SelectedPort {
            port,
            is_known: false,
        })
    } else {
        Err(CliError::Cancelled("Port selection cancelled".to_string()).into())
    }
}

/// Offer to register an unrecognized USB device for future auto-detection.
pub fn ask_remember_port(port: &DetectedPort, config: &mut Config) -> Result<()> {
    let (Some(vid), Some(pid)) = (port.info.vid, port.info.pid) else {
        return Ok(());
    };
    if config.is_registered_device(vid, pid) {
        return Ok(());
    }

    let confirmed = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(format!("Remember {vid:04X}:{pid:04X} as a bootloader device?"))
        .default(false)
        .interact_opt()
        .map_err(map_prompt_error)?
        .unwrap_or(false);

    if confirmed {
        if let Err(e) = config.remember_usb_device(vid, pid) {
            error!("Failed to save port configuration: {e}");
        }
    }

    Ok(())
}
