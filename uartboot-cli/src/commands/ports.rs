//! Port listing command.

use console::style;
use uartboot::{DetectedPort, detect_ports};

use crate::config::Config;
use crate::serial::{Resolution, SerialOptions, is_known_device, resolve_port};

/// Name of the port a flash run would pick without prompting, if any.
fn auto_selected(options: &SerialOptions, config: &Config, ports: &[DetectedPort]) -> Option<String> {
    match resolve_port(options, config, ports.to_vec()) {
        Ok(Resolution::Selected(selected)) => Some(selected.port.info.name),
        _ => None,
    }
}

fn port_json(port: &DetectedPort, config: &Config, auto_selected: Option<&str>) -> serde_json::Value {
    serde_json::json!({
        "name": port.info.name,
        "bridge": port.bridge.name(),
        "known": is_known_device(port, config),
        "auto_selected": auto_selected == Some(port.name()),
        "vid": port.info.vid,
        "pid": port.info.pid,
        "manufacturer": port.info.manufacturer,
        "product": port.info.product,
        "serial": port.info.serial_number,
    })
}

fn ports_json(ports: &[DetectedPort], config: &Config, options: &SerialOptions) -> serde_json::Value {
    let selected = auto_selected(options, config, ports);
    serde_json::Value::Array(
        ports
            .iter()
            .map(|p| port_json(p, config, selected.as_deref()))
            .collect(),
    )
}

/// List-ports command implementation.
pub(crate) fn cmd_list_ports(config: &Config, options: &SerialOptions, json: bool) {
    let detected = detect_ports();

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&ports_json(&detected, config, options))
                .unwrap_or_default()
        );
        return;
    }

    eprintln!("{}", style("Available serial ports:").bold().underlined());

    if detected.is_empty() {
        eprintln!("  {}", style("No serial ports found").dim());
        return;
    }

    for port in &detected {
        eprintln!("  {} {}", style("•").green(), port.describe());
    }

    if let Some(name) = auto_selected(options, config, &detected) {
        eprintln!(
            "\n{} Auto-selected: {}",
            style("→").green().bold(),
            style(name).cyan().bold()
        );
    }
}
