//! `list-ports`: show serial endpoints and how they were classified.

use {
    crate::{config::Config, serial::is_known_device},
    anyhow::Result,
    console::style,
    serde_json::{Value, json},
    traceboard::{DetectedPort, detect_ports, format_port_list, select_preferred},
};

/// List serial ports, as JSON on stdout or as a table on stderr.
pub(crate) fn cmd_list_ports(config: &Config, json: bool) -> Result<()> {
    let detected = detect_ports();

    if json {
        println!("{}", serde_json::to_string_pretty(&ports_json(&detected, config))?);
        return Ok(());
    }

    eprintln!("{}", style("Available serial ports").bold().underlined());

    if detected.is_empty() {
        eprintln!("  {}", style("No serial ports found").dim());
        return Ok(());
    }

    for (port, label) in detected.iter().zip(format_port_list(&detected)) {
        let bullet = if is_known_device(port, config) {
            style("•").green()
        } else {
            style("•").dim()
        };
        eprintln!("  {bullet} {label}");
    }

    if let Some(preferred) = select_preferred(detected) {
        eprintln!(
            "\n{} Auto-detect would use {}",
            style("→").green().bold(),
            style(&preferred.name).cyan().bold()
        );
    }

    Ok(())
}

fn ports_json(ports: &[DetectedPort], config: &Config) -> Value {
    ports
        .iter()
        .map(|p| {
            json!({
                "name": p.name,
                "device": p.device.name(),
                "known": is_known_device(p, config),
                "vid": p.vid,
                "pid": p.pid,
                "manufacturer": p.manufacturer,
                "product": p.product,
                "serial": p.serial,
            })
        })
        .collect()
}
