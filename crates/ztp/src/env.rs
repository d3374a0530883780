//! Environment resolution for a provisioning run
//!
//! The declared state lives in a `KEY=value` environment file (the
//! same file the surrounding Makefile sources), layered under process
//! environment variables and CLI overrides. The resolved [`Env`] is
//! immutable for the rest of the run.

use std::collections::HashMap;
use std::fmt;

use camino::{Utf8Path, Utf8PathBuf};

use crate::errors::{Error, Result};

/// Default location of the environment file, relative to the CWD.
pub const DEFAULT_ENV_FILE: &str = "ztp.env";
/// System-wide fallback environment file.
pub const SYSTEM_ENV_FILE: &str = "/etc/pfztp/ztp.env";

const DEFAULT_WORK_ROOT: &str = "/var/lib/pfztp";
const DEFAULT_VM_NAME: &str = "pfsense";
const DEFAULT_VCPUS: u32 = 2;
const DEFAULT_MEMORY: &str = "2G";
const DEFAULT_DISK_SIZE: &str = "20G";
const DEFAULT_WAN_BRIDGE: &str = "br0";
const DEFAULT_WAN_IFACE: &str = "eth0";
const DEFAULT_LAN_NETWORK: &str = "pfsense-lan";
const DEFAULT_LAN_BRIDGE: &str = "virbr-pflan";
const DEFAULT_OS_VARIANT: &str = "freebsd14.0";

/// How the WAN NIC is attached to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WanMode {
    /// Attach to an existing host bridge.
    Bridged,
    /// Macvtap-style direct attachment to a host interface.
    Macvtap,
}

impl WanMode {
    fn parse(s: &str) -> Result<Self> {
        match s {
            "bridged" | "bridge" => Ok(WanMode::Bridged),
            "macvtap" | "direct" => Ok(WanMode::Macvtap),
            other => Err(Error::Config(format!(
                "ZTP_WAN_MODE must be 'bridged' or 'macvtap', got '{other}'"
            ))),
        }
    }
}

impl fmt::Display for WanMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WanMode::Bridged => write!(f, "bridged"),
            WanMode::Macvtap => write!(f, "macvtap"),
        }
    }
}

/// Resolved environment configuration, read-only after [`Env::resolve`].
#[derive(Debug, Clone, serde::Serialize)]
pub struct Env {
    /// Directory holding staged media, rendered config ISOs and the VM disk.
    pub work_root: Utf8PathBuf,
    /// Libvirt domain name for the firewall VM.
    pub vm_name: String,
    /// Number of virtual CPUs.
    pub vcpus: u32,
    /// Memory allocation in MiB.
    pub memory_mb: u64,
    /// Persistent disk size, passed through to the virtualization manager.
    pub disk_size: String,
    /// WAN attachment mode.
    #[serde(serialize_with = "ser_display")]
    pub wan_mode: WanMode,
    /// Host bridge for bridged WAN mode.
    pub wan_bridge: String,
    /// Host interface for macvtap WAN mode.
    pub wan_iface: String,
    /// Name of the isolated LAN network known to the virtualization manager.
    pub lan_network: String,
    /// Bridge device backing the LAN network.
    pub lan_bridge: String,
    /// Serial-only console when true, VNC graphics when false.
    pub headless: bool,
    /// OS-variant hint, applied only if the virtualization manager knows it.
    pub os_variant: String,
    /// Explicit installer override path, if declared.
    pub installer_override: Option<Utf8PathBuf>,
    /// Named installer candidate: raw disk image key.
    pub installer_img: Option<Utf8PathBuf>,
    /// Named installer candidate: optical image key.
    pub installer_iso: Option<Utf8PathBuf>,
    /// External command rendering the configuration ISO, if configured.
    pub renderer: Option<String>,
}

fn ser_display<S: serde::Serializer>(v: &WanMode, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.collect_str(v)
}

/// CLI-level overrides layered on top of every file/environment source.
#[derive(Debug, Clone, Default)]
pub struct EnvOverrides {
    /// Override for the work root.
    pub work_root: Option<Utf8PathBuf>,
    /// Override for the domain name.
    pub vm_name: Option<String>,
    /// Explicit installer path; wins over every other installer source.
    pub installer: Option<Utf8PathBuf>,
}

impl Env {
    /// Resolve the environment from `env_file` (explicit, else default
    /// locations), the process environment, and `overrides`.
    ///
    /// An explicit `env_file` that does not exist is a configuration
    /// error; absent default locations are not.
    pub fn resolve(env_file: Option<&Utf8Path>, overrides: &EnvOverrides) -> Result<Self> {
        let mut keys = HashMap::new();

        if let Some(path) = env_file {
            if !path.exists() {
                return Err(Error::Config(format!(
                    "environment file not found: {path}"
                )));
            }
            read_env_file(path, &mut keys)?;
        } else {
            for candidate in [DEFAULT_ENV_FILE, SYSTEM_ENV_FILE] {
                let candidate = Utf8Path::new(candidate);
                if candidate.exists() {
                    read_env_file(candidate, &mut keys)?;
                    break;
                }
            }
        }

        // Process environment wins over the file, matching the way the
        // original Makefile invocation let callers override single keys.
        for (key, value) in std::env::vars() {
            if key.starts_with("ZTP_") {
                keys.insert(key, value);
            }
        }

        Self::from_keys(&keys, overrides)
    }

    /// Build an [`Env`] from an already-flattened key map plus overrides.
    pub fn from_keys(keys: &HashMap<String, String>, overrides: &EnvOverrides) -> Result<Self> {
        let get = |k: &str| keys.get(k).map(|v| v.trim()).filter(|v| !v.is_empty());

        let work_root = overrides
            .work_root
            .clone()
            .or_else(|| get("ZTP_WORK_ROOT").map(Utf8PathBuf::from))
            .unwrap_or_else(|| Utf8PathBuf::from(DEFAULT_WORK_ROOT));

        let vm_name = overrides
            .vm_name
            .clone()
            .or_else(|| get("ZTP_VM_NAME").map(str::to_string))
            .unwrap_or_else(|| DEFAULT_VM_NAME.to_string());

        let vcpus = match get("ZTP_VCPUS") {
            Some(v) => v
                .parse::<u32>()
                .map_err(|_| Error::Config(format!("ZTP_VCPUS is not a number: '{v}'")))?,
            None => DEFAULT_VCPUS,
        };

        let memory_mb = parse_memory_to_mb(get("ZTP_MEMORY").unwrap_or(DEFAULT_MEMORY))?;

        let wan_mode = match get("ZTP_WAN_MODE") {
            Some(v) => WanMode::parse(v)?,
            None => WanMode::Bridged,
        };

        let headless = match get("ZTP_HEADLESS") {
            Some(v) => parse_bool("ZTP_HEADLESS", v)?,
            None => true,
        };

        let installer_override = overrides
            .installer
            .clone()
            .or_else(|| get("ZTP_INSTALLER").map(Utf8PathBuf::from));

        Ok(Env {
            work_root,
            vm_name,
            vcpus,
            memory_mb,
            disk_size: get("ZTP_DISK_SIZE").unwrap_or(DEFAULT_DISK_SIZE).to_string(),
            wan_mode,
            wan_bridge: get("ZTP_WAN_BRIDGE").unwrap_or(DEFAULT_WAN_BRIDGE).to_string(),
            wan_iface: get("ZTP_WAN_IFACE").unwrap_or(DEFAULT_WAN_IFACE).to_string(),
            lan_network: get("ZTP_LAN_NETWORK")
                .unwrap_or(DEFAULT_LAN_NETWORK)
                .to_string(),
            lan_bridge: get("ZTP_LAN_BRIDGE").unwrap_or(DEFAULT_LAN_BRIDGE).to_string(),
            headless,
            os_variant: get("ZTP_OS_VARIANT").unwrap_or(DEFAULT_OS_VARIANT).to_string(),
            installer_override,
            installer_img: get("ZTP_INSTALLER_IMG").map(Utf8PathBuf::from),
            installer_iso: get("ZTP_INSTALLER_ISO").map(Utf8PathBuf::from),
            renderer: get("ZTP_CONFIG_RENDERER").map(str::to_string),
        })
    }

    /// Directories searched for installer media, in precedence order.
    pub fn installer_search_dirs(&self) -> Vec<Utf8PathBuf> {
        vec![
            self.work_root.join("images"),
            self.work_root.clone(),
            Utf8PathBuf::from("/var/lib/libvirt/images"),
        ]
    }
}

/// Parse one `KEY=value` environment file into `keys`.
///
/// `#` comment lines and blank lines are skipped, a leading `export `
/// is tolerated, and unknown keys are kept (and later ignored).
fn read_env_file(path: &Utf8Path, keys: &mut HashMap<String, String>) -> Result<()> {
    let content =
        std::fs::read_to_string(path).map_err(|e| Error::io(path.as_str(), e))?;
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = value.trim().trim_matches('"').trim_matches('\'');
        keys.insert(key.trim().to_string(), value.to_string());
    }
    Ok(())
}

/// Parse a memory size like `2048`, `2048M`, or `2G` into MiB.
pub fn parse_memory_to_mb(s: &str) -> Result<u64> {
    let s = s.trim();
    let (digits, unit) = match s.find(|c: char| !c.is_ascii_digit()) {
        Some(idx) => s.split_at(idx),
        None => (s, ""),
    };
    let value: u64 = digits
        .parse()
        .map_err(|_| Error::Config(format!("invalid memory size '{s}'")))?;
    match unit.trim().to_ascii_uppercase().as_str() {
        "" | "M" | "MB" | "MIB" => Ok(value),
        "G" | "GB" | "GIB" => Ok(value * 1024),
        other => Err(Error::Config(format!(
            "invalid memory unit '{other}' in '{s}'"
        ))),
    }
}

fn parse_bool(key: &str, s: &str) -> Result<bool> {
    match s.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(Error::Config(format!(
            "{key} must be a boolean, got '{other}'"
        ))),
    }
}
