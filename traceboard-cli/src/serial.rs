//! Serial port selection.
//!
//! Resolution order:
//! - an explicit `--port` / `TRACEBOARD_PORT`
//! - `[connection] port` from the configuration
//! - auto-detection, preferring ST-LINK boards, then other known bridges
//!
//! Several equally good candidates lead to an interactive prompt on a
//! terminal. Non-interactive mode never prompts.

use {
    crate::{CliError, config::Config},
    anyhow::Result,
    console::style,
    dialoguer::{Confirm, Error as DialoguerError, Select, theme::ColorfulTheme},
    log::{debug, info},
    std::{cmp::Ordering, io::IsTerminal},
    traceboard::{DetectedPort, DeviceKind, detect_ports, format_port_list},
};

/// Options for serial port selection.
#[derive(Debug, Clone, Default)]
pub struct SerialOptions {
    /// Explicit port specified via CLI.
    pub port: Option<String>,
    /// Non-interactive mode (fail if multiple ports).
    pub non_interactive: bool,
}

fn usage_err(message: &str) -> anyhow::Error {
    CliError::Usage(message.to_string()).into()
}

/// Select the port to open.
pub fn select_serial_port(options: &SerialOptions, config: &Config) -> Result<DetectedPort> {
    if let Some(port_name) = &options.port {
        return Ok(find_port_by_name(port_name));
    }

    if let Some(port_name) = &config.connection.port {
        debug!("Using port from config: {port_name}");
        return Ok(find_port_by_name(port_name));
    }

    let ports = detect_ports();
    if ports.is_empty() {
        return Err(traceboard::Error::DeviceNotFound.into());
    }

    let candidates = candidate_ports(ports, config);

    match candidates.len().cmp(&1) {
        Ordering::Equal => {
            let port = candidates
                .into_iter()
                .next()
                .ok_or(traceboard::Error::DeviceNotFound)?;
            if is_known_device(&port, config) || options.non_interactive {
                info!("Auto-selected port: {} [{}]", port.name, port.device.name());
                Ok(port)
            } else {
                ensure_interactive_terminal()?;
                confirm_single_port(port)
            }
        },
        Ordering::Greater => {
            if options.non_interactive {
                return Err(usage_err(
                    "Multiple serial ports found; pass --port to choose one",
                ));
            }
            ensure_interactive_terminal()?;
            select_port_interactive(candidates)
        },
        Ordering::Less => Err(traceboard::Error::DeviceNotFound.into()),
    }
}

/// Narrow detected ports to the best class present: ST-LINK boards, then
/// other known or configured devices, then everything.
fn candidate_ports(ports: Vec<DetectedPort>, config: &Config) -> Vec<DetectedPort> {
    let stlink: Vec<DetectedPort> = ports
        .iter()
        .filter(|p| p.device == DeviceKind::StLink)
        .cloned()
        .collect();
    if !stlink.is_empty() {
        return stlink;
    }

    let known: Vec<DetectedPort> = ports
        .iter()
        .filter(|p| is_known_device(p, config))
        .cloned()
        .collect();
    if known.is_empty() { ports } else { known }
}

/// Check if a port matches a known device (built-in list or configuration).
pub fn is_known_device(port: &DetectedPort, config: &Config) -> bool {
    if port.device.is_known() {
        return true;
    }
    matches!((port.vid, port.pid), (Some(vid), Some(pid)) if config.is_configured_device(vid, pid))
}

/// Find a port by name, falling back to a bare entry for unlisted names.
fn find_port_by_name(name: &str) -> DetectedPort {
    let ports = detect_ports();

    if let Some(port) = ports.iter().find(|p| p.name == name) {
        return port.clone();
    }

    // Windows port names are case-insensitive
    if let Some(port) = ports
        .iter()
        .find(|p| p.name.eq_ignore_ascii_case(name))
    {
        return port.clone();
    }

    DetectedPort::unlisted(name)
}

fn ensure_interactive_terminal() -> Result<()> {
    if std::io::stdin().is_terminal() && std::io::stderr().is_terminal() {
        Ok(())
    } else {
        Err(usage_err(
            "Port selection needs a terminal; pass --port or use --non-interactive",
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

fn select_port_interactive(ports: Vec<DetectedPort>) -> Result<DetectedPort> {
    eprintln!(
        "{} Found {} candidate ports",
        style("ℹ").blue(),
        ports.len()
    );

    let term_width = console::Term::stderr().size().1 as usize;
    let max_item_width = term_width.saturating_sub(4);
    let labels: Vec<String> = format_port_list(&ports)
        .into_iter()
        .map(|label| console::truncate_str(&label, max_item_width, "\u{2026}").into_owned())
        .collect();

    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Select the board's serial port")
        .items(&labels)
        .default(0)
        .interact_opt()
        .map_err(map_prompt_error)?;

    match selection {
        Some(index) => ports
            .into_iter()
            .nth(index)
            .ok_or_else(|| anyhow::anyhow!("Invalid port index: {index}")),
        None => Err(CliError::Cancelled("Port selection cancelled".to_string()).into()),
    }
}

fn confirm_single_port(port: DetectedPort) -> Result<DetectedPort> {
    let product_info = port
        .product
        .as_ref()
        .map(|p| format!(" - {p}"))
        .unwrap_or_default();

    let confirmed = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(format!(
            "Use unrecognized port {}{product_info}?",
            port.name
        ))
        .default(true)
        .interact_opt()
        .map_err(map_prompt_error)?
        .unwrap_or(false);

    if confirmed {
        Ok(port)
    } else {
        Err(CliError::Cancelled("Port selection cancelled".to_string()).into())
    }
}
