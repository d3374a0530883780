//! Domain definition
//!
//! Composes the full `virt-install` invocation for the firewall VM:
//! CPU and memory shape, installer media first with boot priority 1,
//! persistent disk second with boot priority 2, the configuration ISO,
//! WAN and LAN NICs, console mode, and the OS hint. The definition
//! happens exactly once: callers must have checked that the domain
//! does not exist, and nothing here ever redefines one.

use camino::{Utf8Path, Utf8PathBuf};
use tracing::{debug, info};

use crate::env::{Env, WanMode};
use crate::errors::{Error, Result};
use crate::installer::MediaFormat;
use crate::virt::VirtManager;

/// Fully resolved shape of the domain to define.
#[derive(Debug, Clone)]
pub struct DomainSpec {
    /// Domain name.
    pub name: String,
    /// Virtual CPU count.
    pub vcpus: u32,
    /// Memory in MiB.
    pub memory_mb: u64,
    /// Staged installer media.
    pub installer: Utf8PathBuf,
    /// Installer payload format, which decides the attachment shape.
    pub installer_format: MediaFormat,
    /// Persistent disk location.
    pub disk: Utf8PathBuf,
    /// Persistent disk size in GiB.
    pub disk_gb: u64,
    /// Rendered configuration ISO.
    pub config_iso: Utf8PathBuf,
    /// WAN attachment.
    pub wan_mode: WanMode,
    /// Bridge (bridged mode) or host interface (macvtap mode).
    pub wan_source: String,
    /// LAN network name.
    pub lan_network: String,
    /// Serial-only console when true.
    pub headless: bool,
    /// OS-variant hint.
    pub os_variant: String,
    /// Whether KVM acceleration is available on this host.
    pub kvm: bool,
    /// Whether the manager's OS database recognizes `os_variant`.
    pub os_variant_supported: bool,
}

impl DomainSpec {
    /// Build a spec from the resolved environment and located media.
    pub fn from_env(
        env: &Env,
        installer: &Utf8Path,
        installer_format: MediaFormat,
        config_iso: &Utf8Path,
    ) -> Result<Self> {
        Ok(DomainSpec {
            name: env.vm_name.clone(),
            vcpus: env.vcpus,
            memory_mb: env.memory_mb,
            installer: installer.to_owned(),
            installer_format,
            disk: env.work_root.join(format!("{}.qcow2", env.vm_name)),
            disk_gb: parse_disk_size_gb(&env.disk_size)?,
            config_iso: config_iso.to_owned(),
            wan_mode: env.wan_mode,
            wan_source: match env.wan_mode {
                WanMode::Bridged => env.wan_bridge.clone(),
                WanMode::Macvtap => env.wan_iface.clone(),
            },
            lan_network: env.lan_network.clone(),
            headless: env.headless,
            os_variant: env.os_variant.clone(),
            kvm: Utf8Path::new("/dev/kvm").exists(),
            os_variant_supported: false,
        })
    }

    /// The composed `virt-install` argument vector.
    pub fn to_argv(&self) -> Vec<String> {
        let mut argv = vec![
            "--name".to_string(),
            self.name.clone(),
            "--vcpus".to_string(),
            self.vcpus.to_string(),
            "--memory".to_string(),
            self.memory_mb.to_string(),
            "--virt-type".to_string(),
            if self.kvm { "kvm" } else { "qemu" }.to_string(),
        ];

        // Installer first: it must win the boot order on first boot.
        let installer_disk = match self.installer_format {
            MediaFormat::OpticalImage => format!(
                "path={},device=cdrom,bus=sata,readonly=on,boot.order=1",
                self.installer
            ),
            // A memstick image is a bootable disk, not an optical one.
            MediaFormat::RawDisk => format!(
                "path={},device=disk,bus=usb,boot.order=1",
                self.installer
            ),
        };
        argv.push("--disk".to_string());
        argv.push(installer_disk);

        argv.push("--disk".to_string());
        argv.push(format!(
            "path={},size={},format=qcow2,bus=virtio,boot.order=2",
            self.disk, self.disk_gb
        ));

        argv.push("--disk".to_string());
        argv.push(format!(
            "path={},device=cdrom,bus=sata,readonly=on",
            self.config_iso
        ));

        match self.wan_mode {
            WanMode::Bridged => {
                argv.push("--network".to_string());
                argv.push(format!("bridge={},model=virtio", self.wan_source));
            }
            WanMode::Macvtap => {
                argv.push("--network".to_string());
                argv.push(format!(
                    "type=direct,source={},source.mode=bridge,model=virtio",
                    self.wan_source
                ));
            }
        }
        argv.push("--network".to_string());
        argv.push(format!("network={},model=virtio", self.lan_network));

        if self.headless {
            argv.push("--graphics".to_string());
            argv.push("none".to_string());
            argv.push("--console".to_string());
            argv.push("pty,target_type=serial".to_string());
        } else {
            argv.push("--graphics".to_string());
            argv.push("vnc,listen=127.0.0.1".to_string());
        }

        argv.push("--osinfo".to_string());
        if self.os_variant_supported {
            argv.push(self.os_variant.clone());
        } else {
            argv.push("detect=on,require=off".to_string());
        }

        // Return immediately, and leave the post-install reboot to the
        // operator finishing the installer dialog.
        argv.push("--noautoconsole".to_string());
        argv.push("--noreboot".to_string());
        argv.push("--wait".to_string());
        argv.push("-1".to_string());
        argv
    }
}

/// Define the domain described by `spec`. The OS hint is applied only
/// when the manager recognizes it; otherwise detection-without-
/// requirement keeps an unknown variant from failing the define.
pub fn define_domain(virt: &mut dyn VirtManager, mut spec: DomainSpec) -> Result<()> {
    spec.os_variant_supported = virt.supports_os_variant(&spec.os_variant)?;
    if !spec.os_variant_supported {
        debug!(
            "os variant '{}' not in the manager's database, using detect mode",
            spec.os_variant
        );
    }
    info!("defining domain {}", spec.name);
    virt.define_domain(&spec.to_argv())
}

/// Parse a disk size like `20G`, `20480M`, or `20` (GiB) into GiB.
fn parse_disk_size_gb(s: &str) -> Result<u64> {
    let s = s.trim();
    let (digits, unit) = match s.find(|c: char| !c.is_ascii_digit()) {
        Some(idx) => s.split_at(idx),
        None => (s, ""),
    };
    let value: u64 = digits
        .parse()
        .map_err(|_| Error::Config(format!("invalid disk size '{s}'")))?;
    match unit.trim().to_ascii_uppercase().as_str() {
        "" | "G" | "GB" | "GIB" => Ok(value),
        "M" | "MB" | "MIB" => Ok(value.div_ceil(1024)),
        other => Err(Error::Config(format!(
            "invalid disk size unit '{other}' in '{s}'"
        ))),
    }
}
