//! Read-only status report
//!
//! Summarizes what the reconciler would find: domain state, located
//! installer, staged media, configuration ISO, and whether the LAN
//! network exists. Output is YAML by default, JSON for machines.

use camino::Utf8PathBuf;
use clap::ValueEnum;
use serde::Serialize;

use crate::config_iso;
use crate::env::Env;
use crate::errors::{Error, Result};
use crate::installer;
use crate::stage;
use crate::virt::{DomainState, VirtManager};

/// Output format for the status report.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// YAML (default, human-readable).
    Yaml,
    /// JSON (machine-readable).
    Json,
}

/// Snapshot of the provisioning state.
#[derive(Debug, Serialize)]
pub struct StatusReport {
    /// Domain name under management.
    pub domain: String,
    /// Current domain lifecycle state.
    pub state: DomainState,
    /// Work root holding media and disks.
    pub work_root: Utf8PathBuf,
    /// Installer media the locator would pick today.
    pub installer: Option<Utf8PathBuf>,
    /// Staged media from this or a prior run.
    pub staged_media: Option<Utf8PathBuf>,
    /// Current configuration ISO, canonical or legacy.
    pub config_iso: Option<Utf8PathBuf>,
    /// Name of the LAN network.
    pub lan_network: String,
    /// Whether the virtualization manager knows the LAN network.
    pub lan_network_exists: bool,
}

/// Collect the report. Queries only; never mutates anything.
pub fn collect(env: &Env, virt: &mut dyn VirtManager) -> Result<StatusReport> {
    Ok(StatusReport {
        domain: env.vm_name.clone(),
        state: virt.domain_state(&env.vm_name)?,
        work_root: env.work_root.clone(),
        installer: installer::locate(env)?.map(|c| c.path),
        staged_media: stage::existing_staged(&env.work_root),
        config_iso: config_iso::current_config_iso(env),
        lan_network: env.lan_network.clone(),
        lan_network_exists: virt.network_exists(&env.lan_network)?,
    })
}

/// Render the report in the requested format.
pub fn render(report: &StatusReport, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Yaml => serde_yaml::to_string(report)
            .map_err(|e| Error::Runtime(format!("serializing status: {e}"))),
        OutputFormat::Json => serde_json::to_string_pretty(report)
            .map_err(|e| Error::Runtime(format!("serializing status: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::EnvOverrides;
    use crate::virt::fake::FakeVirt;
    use std::collections::HashMap;

    #[test]
    fn test_collect_and_render() {
        let guard = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(guard.path().to_path_buf()).unwrap();
        std::fs::write(root.join("pfSense-config-latest.iso"), b"iso").unwrap();

        let mut keys = HashMap::new();
        keys.insert("ZTP_WORK_ROOT".to_string(), root.to_string());
        let env = Env::from_keys(&keys, &EnvOverrides::default()).unwrap();

        let mut virt = FakeVirt::new();
        virt.state = DomainState::ShutOff;
        virt.networks.insert("pfsense-lan".to_string());

        let report = collect(&env, &mut virt).unwrap();
        assert_eq!(report.state, DomainState::ShutOff);
        assert!(report.installer.is_none());
        assert!(report.config_iso.is_some());
        assert!(report.lan_network_exists);
        assert_eq!(virt.mutation_count(), 0);

        let yaml = render(&report, OutputFormat::Yaml).unwrap();
        assert!(yaml.contains("state: shut-off"));
        let json = render(&report, OutputFormat::Json).unwrap();
        assert!(json.contains("\"lan_network_exists\": true"));
    }
}
