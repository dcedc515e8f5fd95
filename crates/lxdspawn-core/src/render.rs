//! Rendering of the artifacts a container needs to run the managed process
//!
//! All functions here are pure: they turn a launch spec and the guest
//! layout into text (or LXD config keys) without touching the network.

use crate::{CoreError, Environment, LaunchSpec, ResourceLimits, Result};
use lxdspawn_config::GuestConfig;
use std::collections::BTreeMap;

/// Config key carrying the cloud-init payload
pub const USER_DATA_KEY: &str = "user.user-data";
pub const MEMORY_LIMIT_KEY: &str = "limits.memory";
pub const CPU_LIMIT_KEY: &str = "limits.cpu";
pub const CPU_ALLOWANCE_KEY: &str = "limits.cpu.allowance";

/// Everything written into a container for one launch spec
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedConfig {
    pub unit: String,
    pub env_file: String,
    pub boot_config: String,
}

/// Render the unit, environment file and boot config for a launch spec
pub fn render(spec: &LaunchSpec, guest: &GuestConfig) -> Result<RenderedConfig> {
    Ok(RenderedConfig {
        unit: render_unit(spec.command(), guest)?,
        env_file: render_env_file(spec.environment()),
        boot_config: render_boot_config(guest),
    })
}

/// Render the systemd unit that runs `command`
pub fn render_unit(command: &[String], guest: &GuestConfig) -> Result<String> {
    let mut argv = command.to_vec();
    match argv.first_mut() {
        Some(first) if !first.is_empty() => {
            if let Some(binary) = &guest.binary_path {
                *first = binary.clone();
            }
        }
        _ => return Err(CoreError::EmptyCommand),
    }

    // systemd expands % specifiers in ExecStart
    let exec_start = shell_words::join(&argv).replace('%', "%%");

    let mut unit = String::new();
    unit.push_str("[Unit]\n");
    unit.push_str(&format!("Description={}\n", guest.service_name));
    unit.push('\n');
    unit.push_str("[Service]\n");
    unit.push_str("Type=simple\n");
    unit.push_str(&format!("ExecStart={}\n", exec_start));
    unit.push_str(&format!("EnvironmentFile={}\n", guest.env_path));
    if let Some(user) = &guest.user {
        unit.push_str(&format!("User={}\n", user));
    }
    if let Some(group) = &guest.group {
        unit.push_str(&format!("Group={}\n", group));
    }
    if let Some(dir) = &guest.working_dir {
        unit.push_str(&format!("WorkingDirectory={}\n", dir));
    }
    unit.push('\n');
    unit.push_str("[Install]\n");
    unit.push_str("WantedBy=multi-user.target\n");
    Ok(unit)
}

/// Render `KEY=VALUE` lines in insertion order
pub fn render_env_file(env: &Environment) -> String {
    env.iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Render the cloud-init payload that enables and starts the unit on first boot
pub fn render_boot_config(guest: &GuestConfig) -> String {
    let service = &guest.service_name;
    format!(
        "#cloud-config\n\
         bootcmd:\n \
         - systemctl daemon-reload\n \
         - systemctl enable {service}.service\n\
         runcmd:\n \
         - systemctl start {service}.service\n"
    )
}

/// Translate resource limits into LXD config keys
///
/// A fractional CPU limit keeps a whole-core ceiling and adds a
/// proportional allowance (0.5 -> `limits.cpu=1`, `limits.cpu.allowance=50%`).
pub fn render_limits(limits: &ResourceLimits) -> Result<BTreeMap<String, String>> {
    limits.validate()?;

    let mut config = BTreeMap::new();
    if let Some(memory) = &limits.memory {
        config.insert(MEMORY_LIMIT_KEY.to_string(), memory.clone());
    }
    if let Some(cpu) = limits.cpu {
        config.insert(CPU_LIMIT_KEY.to_string(), format!("{}", cpu.ceil() as u64));
        if cpu < 1.0 {
            config.insert(
                CPU_ALLOWANCE_KEY.to_string(),
                format!("{}%", format_percent(cpu * 100.0)),
            );
        }
    }
    Ok(config)
}

/// At most two fractional digits, no trailing zeros
fn format_percent(value: f64) -> String {
    let rounded = (value * 100.0).round() / 100.0;
    format!("{}", rounded)
}
