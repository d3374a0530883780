//! `virsh`/`virt-install` backed [`VirtManager`]
//!
//! The control plane is the libvirt CLI. Each query issues a fresh
//! `virsh` call; nothing is cached across calls, because domain state
//! can change underneath us between steps.

use std::io::Write;
use std::process::Command;

use camino::Utf8Path;

use crate::errors::{Error, Result};
use crate::virt::driver::Driver;
use crate::virt::{AttachRequest, BlockDevice, DeviceKind, DomainState, VirtManager};

/// [`VirtManager`] implementation over the libvirt command-line tools.
#[derive(Debug)]
pub struct Virsh {
    driver: Driver,
    connect_uri: Option<String>,
}

impl Virsh {
    /// Create a manager using `driver` for mutating calls and an
    /// optional libvirt connection URI (e.g. `qemu:///system`).
    pub fn new(driver: Driver, connect_uri: Option<String>) -> Self {
        Self {
            driver,
            connect_uri,
        }
    }

    fn virsh_command(&self) -> Command {
        let mut cmd = Command::new("virsh");
        if let Some(ref uri) = self.connect_uri {
            cmd.arg("-c").arg(uri);
        }
        cmd
    }
}

impl VirtManager for Virsh {
    fn domain_state(&mut self, name: &str) -> Result<DomainState> {
        let output = self
            .driver
            .query(self.virsh_command().args(["domstate", name]))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("failed to get domain") || stderr.contains("Domain not found") {
                return Ok(DomainState::Undefined);
            }
            return Err(Error::Runtime(format!(
                "virsh domstate {name} failed: {}",
                stderr.trim()
            )));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_domain_state(stdout.trim())
    }

    fn list_block_devices(&mut self, name: &str) -> Result<Vec<BlockDevice>> {
        let output = self.driver.query(self.virsh_command().args([
            "domblklist",
            name,
            "--details",
        ]))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Runtime(format!(
                "virsh domblklist {name} failed: {}",
                stderr.trim()
            )));
        }
        Ok(parse_domblklist(&String::from_utf8_lossy(&output.stdout)))
    }

    fn define_domain(&mut self, argv: &[String]) -> Result<()> {
        let mut cmd = Command::new("virt-install");
        if let Some(ref uri) = self.connect_uri {
            cmd.arg("--connect").arg(uri);
        }
        cmd.args(argv);
        self.driver.run(&mut cmd, "define domain")
    }

    fn supports_os_variant(&mut self, variant: &str) -> Result<bool> {
        let mut cmd = Command::new("osinfo-query");
        cmd.args(["--fields", "short-id", "os"]);
        let output = match self.driver.query(&mut cmd) {
            Ok(output) => output,
            // No OS database at all: fall back to generic detection.
            Err(Error::MissingDependency { .. }) => return Ok(false),
            Err(err) => return Err(err),
        };
        if !output.status.success() {
            return Ok(false);
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout
            .lines()
            .any(|line| line.split_whitespace().next() == Some(variant)))
    }

    fn network_exists(&mut self, name: &str) -> Result<bool> {
        let output = self
            .driver
            .query(self.virsh_command().args(["net-info", name]))?;
        Ok(output.status.success())
    }

    fn define_network(&mut self, name: &str, xml: &str) -> Result<()> {
        let mut file = tempfile::Builder::new()
            .prefix("pfztp-net-")
            .suffix(".xml")
            .tempfile()
            .map_err(|e| Error::Runtime(format!("creating network XML temp file: {e}")))?;
        file.write_all(xml.as_bytes())
            .map_err(|e| Error::Runtime(format!("writing network XML: {e}")))?;
        let path = file.path().to_string_lossy().into_owned();
        self.driver.run(
            self.virsh_command().args(["net-define", &path]),
            &format!("define network {name}"),
        )
    }

    fn autostart_network(&mut self, name: &str) -> Result<()> {
        self.driver.run_tolerating(
            self.virsh_command().args(["net-autostart", name]),
            &format!("autostart network {name}"),
            &["already marked"],
        )
    }

    fn start_network(&mut self, name: &str) -> Result<()> {
        self.driver.run_tolerating(
            self.virsh_command().args(["net-start", name]),
            &format!("start network {name}"),
            &["already active"],
        )
    }

    fn attach_disk(&mut self, req: &AttachRequest, live: bool) -> Result<()> {
        let mut cmd = self.virsh_command();
        cmd.args([
            "attach-disk",
            &req.domain,
            req.source.as_str(),
            &req.target,
        ]);
        match req.kind {
            DeviceKind::Cdrom => {
                cmd.args(["--type", "cdrom", "--mode", "readonly", "--targetbus", "sata"]);
            }
            DeviceKind::Disk => {
                cmd.args(["--targetbus", "usb"]);
            }
        }
        // Always persist into the saved definition; touch the live
        // instance only when the domain is actually running.
        cmd.arg("--persistent");
        if live {
            cmd.arg("--live");
        }
        self.driver.run(
            &mut cmd,
            &format!("attach {} to {}", req.source, req.domain),
        )
    }

    fn change_media(
        &mut self,
        domain: &str,
        target: &str,
        source: &Utf8Path,
        live: bool,
    ) -> Result<()> {
        let mut cmd = self.virsh_command();
        cmd.args(["change-media", domain, target, source.as_str(), "--force", "--update"]);
        if live {
            cmd.args(["--live", "--config"]);
        } else {
            cmd.arg("--config");
        }
        self.driver.run(
            &mut cmd,
            &format!("change media {target} of {domain} to {source}"),
        )
    }
}

fn parse_domain_state(s: &str) -> Result<DomainState> {
    match s {
        "running" | "idle" => Ok(DomainState::Running),
        "paused" | "pmsuspended" => Ok(DomainState::Paused),
        "shut off" | "in shutdown" | "crashed" => Ok(DomainState::ShutOff),
        other => Err(Error::Runtime(format!(
            "unrecognized domain state '{other}'"
        ))),
    }
}

/// Parse `virsh domblklist --details` output.
///
/// The table has a two-line header, then rows of
/// `Type Device Target Source` where an empty source is `-`.
fn parse_domblklist(stdout: &str) -> Vec<BlockDevice> {
    let mut devices = Vec::new();
    for line in stdout.lines().skip(2) {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 3 {
            continue;
        }
        let kind = match parts[1] {
            "disk" => DeviceKind::Disk,
            "cdrom" => DeviceKind::Cdrom,
            // floppy/lun are out of scope for this machine shape
            _ => continue,
        };
        let source = parts
            .get(3)
            .filter(|s| **s != "-")
            .map(|s| Utf8Path::new(s).to_owned());
        devices.push(BlockDevice {
            kind,
            target: parts[2].to_string(),
            source,
        });
    }
    devices
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    #[test]
    fn test_parse_domblklist_details() {
        let out = indoc! {"
             Type   Device   Target   Source
            ------------------------------------------------
             file   disk     vda      /var/lib/pfztp/pfsense.qcow2
             file   disk     sda      /var/lib/pfztp/pfsense-installer.img
             file   cdrom    sdb      /var/lib/pfztp/pfSense-config-latest.iso
             file   cdrom    sdc      -
        "};
        let devices = parse_domblklist(out);
        assert_eq!(devices.len(), 4);
        assert_eq!(devices[0].kind, DeviceKind::Disk);
        assert_eq!(devices[0].target, "vda");
        assert_eq!(
            devices[2].source.as_deref(),
            Some(Utf8Path::new("/var/lib/pfztp/pfSense-config-latest.iso"))
        );
        assert_eq!(devices[3].kind, DeviceKind::Cdrom);
        assert!(devices[3].source.is_none());
    }

    #[test]
    fn test_parse_domblklist_empty_domain() {
        let out = " Type   Device   Target   Source\n---------------------------------\n";
        assert!(parse_domblklist(out).is_empty());
    }

    #[test]
    fn test_parse_domain_state() {
        assert_eq!(parse_domain_state("running").unwrap(), DomainState::Running);
        assert_eq!(parse_domain_state("shut off").unwrap(), DomainState::ShutOff);
        assert_eq!(parse_domain_state("paused").unwrap(), DomainState::Paused);
        assert!(parse_domain_state("transcendent").is_err());
    }
}
