//! In-memory [`VirtManager`] used by unit tests
//!
//! Tracks domain state, block-device inventory, and network set, and
//! records every mutating call so tests can assert that reconciliation
//! issued exactly the expected actions (and, on a second run, none).

use std::collections::BTreeSet;

use camino::{Utf8Path, Utf8PathBuf};

use crate::errors::{Error, Result};
use crate::virt::{AttachRequest, BlockDevice, DeviceKind, DomainState, VirtManager};

/// Scriptable fake hypervisor.
#[derive(Debug)]
pub struct FakeVirt {
    /// Current domain state; mutated by `define_domain`.
    pub state: DomainState,
    /// Current block-device inventory.
    pub devices: Vec<BlockDevice>,
    /// Known networks.
    pub networks: BTreeSet<String>,
    /// OS variants the fake's database recognizes.
    pub os_variants: BTreeSet<String>,
    /// When set, live attach/change-media calls are rejected the way
    /// a hypervisor that disallows hotplug would reject them.
    pub reject_live: bool,
    /// Rendered mutating calls, in order.
    pub mutations: Vec<String>,
}

impl Default for FakeVirt {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeVirt {
    /// Fake with no domain, no networks, and an empty OS database.
    pub fn new() -> Self {
        Self {
            state: DomainState::Undefined,
            devices: Vec::new(),
            networks: BTreeSet::new(),
            os_variants: BTreeSet::new(),
            reject_live: false,
            mutations: Vec::new(),
        }
    }

    /// Number of mutating calls issued so far.
    pub fn mutation_count(&self) -> usize {
        self.mutations.len()
    }

    fn next_target(&self) -> String {
        for candidate in ["vda", "sda", "sdb", "sdc", "sdd", "sde"] {
            if !self.devices.iter().any(|d| d.target == candidate) {
                return candidate.to_string();
            }
        }
        unreachable!("fake inventory exhausted")
    }
}

impl VirtManager for FakeVirt {
    fn domain_state(&mut self, _name: &str) -> Result<DomainState> {
        Ok(self.state)
    }

    fn list_block_devices(&mut self, _name: &str) -> Result<Vec<BlockDevice>> {
        Ok(self.devices.clone())
    }

    fn define_domain(&mut self, argv: &[String]) -> Result<()> {
        self.mutations.push(format!("define-domain {}", argv.join(" ")));
        // Mirror what virt-install does: the disks named in the argv
        // become the defined domain's inventory.
        let mut iter = argv.iter();
        while let Some(arg) = iter.next() {
            if arg != "--disk" {
                continue;
            }
            let Some(spec) = iter.next() else { break };
            let mut path = None;
            let mut kind = DeviceKind::Disk;
            for field in spec.split(',') {
                if let Some(p) = field.strip_prefix("path=") {
                    path = Some(Utf8PathBuf::from(p));
                } else if field == "device=cdrom" {
                    kind = DeviceKind::Cdrom;
                }
            }
            let target = self.next_target();
            self.devices.push(BlockDevice {
                kind,
                target,
                source: path,
            });
        }
        // virt-install boots straight into the installer
        self.state = DomainState::Running;
        Ok(())
    }

    fn supports_os_variant(&mut self, variant: &str) -> Result<bool> {
        Ok(self.os_variants.contains(variant))
    }

    fn network_exists(&mut self, name: &str) -> Result<bool> {
        Ok(self.networks.contains(name))
    }

    fn define_network(&mut self, name: &str, _xml: &str) -> Result<()> {
        self.mutations.push(format!("net-define {name}"));
        self.networks.insert(name.to_string());
        Ok(())
    }

    fn autostart_network(&mut self, name: &str) -> Result<()> {
        self.mutations.push(format!("net-autostart {name}"));
        Ok(())
    }

    fn start_network(&mut self, name: &str) -> Result<()> {
        self.mutations.push(format!("net-start {name}"));
        Ok(())
    }

    fn attach_disk(&mut self, req: &AttachRequest, live: bool) -> Result<()> {
        self.mutations.push(format!(
            "attach-disk {} {} {} live={live}",
            req.domain, req.source, req.target
        ));
        if live && self.reject_live {
            return Err(Error::Runtime("Operation not supported: live attach".into()));
        }
        self.devices.push(BlockDevice {
            kind: req.kind,
            target: req.target.clone(),
            source: Some(req.source.clone()),
        });
        Ok(())
    }

    fn change_media(
        &mut self,
        domain: &str,
        target: &str,
        source: &Utf8Path,
        live: bool,
    ) -> Result<()> {
        self.mutations
            .push(format!("change-media {domain} {target} {source} live={live}"));
        if live && self.reject_live {
            return Err(Error::Runtime(
                "Operation not supported: live media change".into(),
            ));
        }
        let slot = self
            .devices
            .iter_mut()
            .find(|d| d.target == target)
            .ok_or_else(|| Error::Runtime(format!("no such target {target}")))?;
        slot.source = Some(source.to_owned());
        Ok(())
    }
}
