//! Full provisioning reconciliation
//!
//! Drives the whole pipeline in its fixed order: locate installer,
//! stage media, ensure the configuration ISO, ensure the LAN network,
//! define the domain if (and only if) it does not exist, then heal
//! removable-media attachments. Every step checks observed state
//! before acting, so a run interrupted at any point is completed by
//! simply running again. Steps are strictly sequential on purpose:
//! failure attribution stays unambiguous.

use tracing::{info, warn};

use crate::config_iso;
use crate::domain::{define_domain, DomainSpec};
use crate::env::Env;
use crate::errors::{Error, Result};
use crate::installer;
use crate::net;
use crate::stage;
use crate::virt::driver::Driver;
use crate::virt::{DeviceKind, VirtManager};

/// Reconcile the declared environment onto the hypervisor.
pub fn up(env: &Env, virt: &mut dyn VirtManager, driver: &Driver) -> Result<()> {
    // Fresh state query per step, never a cached object.
    let state = virt.domain_state(&env.vm_name)?;
    info!("domain {} is {state:?}", env.vm_name);

    let located = installer::locate(env)?;
    if located.is_none() && !state.is_defined() {
        return Err(Error::Config(format!(
            "no installer media found and domain {} does not exist; \
             set ZTP_INSTALLER or place an image under {}",
            env.vm_name, env.work_root
        )));
    }
    if located.is_none() {
        // Installer media is only needed to create the domain.
        warn!("no installer media found; continuing since the domain already exists");
    }

    let staged = match &located {
        Some(candidate) => Some((stage::stage(candidate, &env.work_root, driver)?, candidate)),
        None => None,
    };

    let iso = config_iso::ensure_config_iso(env, driver)?;

    net::ensure_network(virt, &env.lan_network, &env.lan_bridge)?;

    if !state.is_defined() {
        // Guarded by the state query above; an existing domain is
        // never redefined, whatever its disk topology looks like now.
        let (staged_path, candidate) = staged
            .as_ref()
            .ok_or_else(|| Error::Config("installer required to define the domain".into()))?;
        let spec = DomainSpec::from_env(env, staged_path, candidate.format, &iso)?;
        define_domain(virt, spec)?;
    }

    if driver.is_plan() && !state.is_defined() {
        // The planned define already carries both media; there is no
        // real domain whose inventory could be queried yet.
        info!("plan: skipping attachment reconciliation for a domain that is not defined yet");
        return Ok(());
    }

    // Always heal attachments, even when the domain pre-existed: a
    // re-rendered config ISO or re-staged installer shows up here as
    // source drift on the corresponding slot.
    if let Some((staged_path, candidate)) = &staged {
        let kind = match candidate.format {
            crate::installer::MediaFormat::OpticalImage => DeviceKind::Cdrom,
            crate::installer::MediaFormat::RawDisk => DeviceKind::Disk,
        };
        crate::attach::ensure_attached(virt, &env.vm_name, staged_path, kind, "installer")?;
    }
    crate::attach::ensure_attached(virt, &env.vm_name, &iso, DeviceKind::Cdrom, "config ISO")?;

    info!("reconciliation complete for domain {}", env.vm_name);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config_iso::CONFIG_ISO_LATEST;
    use crate::env::EnvOverrides;
    use crate::virt::fake::FakeVirt;
    use crate::virt::DomainState;
    use camino::Utf8PathBuf;
    use std::collections::HashMap;

    struct Fixture {
        _guard: tempfile::TempDir,
        env: Env,
    }

    fn fixture() -> Fixture {
        let guard = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(guard.path().to_path_buf()).unwrap();
        let mut keys = HashMap::new();
        keys.insert("ZTP_WORK_ROOT".to_string(), root.to_string());
        let env = Env::from_keys(&keys, &EnvOverrides::default()).unwrap();
        Fixture { _guard: guard, env }
    }

    fn write_gz(path: &camino::Utf8Path, payload: &[u8]) {
        use std::io::Write;
        let file = std::fs::File::create(path).unwrap();
        let mut enc =
            flate2::write::GzEncoder::new(file, flate2::Compression::fast());
        enc.write_all(payload).unwrap();
        enc.finish().unwrap();
    }

    #[test]
    fn test_fresh_environment_end_to_end() {
        let fx = fixture();
        write_gz(&fx.env.work_root.join("pfSense-2.7.2-serial.img.gz"), b"disk");
        std::fs::write(fx.env.work_root.join(CONFIG_ISO_LATEST), b"iso").unwrap();

        let mut virt = FakeVirt::new();
        let driver = Driver::default();
        up(&fx.env, &mut virt, &driver).unwrap();

        // Network created, domain defined, both media in the define.
        assert!(virt.networks.contains("pfsense-lan"));
        let define = virt
            .mutations
            .iter()
            .find(|m| m.starts_with("define-domain"))
            .unwrap();
        assert!(define.contains("pfsense-installer.img,device=disk,bus=usb,boot.order=1"));
        assert!(define.contains(&format!("{CONFIG_ISO_LATEST},device=cdrom")));
        assert_eq!(virt.state, DomainState::Running);

        // Attach healing found both sources already in the inventory.
        assert!(!virt.mutations.iter().any(|m| m.starts_with("attach-disk")));
    }

    #[test]
    fn test_second_run_is_mutation_free() {
        let fx = fixture();
        write_gz(&fx.env.work_root.join("pfSense-serial.img.gz"), b"disk");
        std::fs::write(fx.env.work_root.join(CONFIG_ISO_LATEST), b"iso").unwrap();

        let mut virt = FakeVirt::new();
        let driver = Driver::default();
        up(&fx.env, &mut virt, &driver).unwrap();
        let after_first = virt.mutation_count();
        assert!(after_first > 0);

        up(&fx.env, &mut virt, &driver).unwrap();
        assert_eq!(virt.mutation_count(), after_first, "second run must issue zero mutating calls");
    }

    #[test]
    fn test_plan_run_leaves_work_root_untouched() {
        let fx = fixture();
        let gz = fx.env.work_root.join("pfSense-2.7.2-serial.img.gz");
        write_gz(&gz, b"disk");
        std::fs::write(fx.env.work_root.join(CONFIG_ISO_LATEST), b"iso").unwrap();
        let before = fx.env.work_root.read_dir_utf8().unwrap().count();

        let mut virt = FakeVirt::new();
        let driver = Driver::new(crate::virt::driver::ExecMode::Plan);
        up(&fx.env, &mut virt, &driver).unwrap();

        // No staged media, no new files of any kind.
        assert!(!fx.env.work_root.join("pfsense-installer.img").exists());
        let after = fx.env.work_root.read_dir_utf8().unwrap().count();
        assert_eq!(before, after);
    }

    #[test]
    fn test_missing_installer_fatal_only_when_domain_undefined() {
        let fx = fixture();
        std::fs::write(fx.env.work_root.join(CONFIG_ISO_LATEST), b"iso").unwrap();

        let mut virt = FakeVirt::new();
        let driver = Driver::default();
        let err = up(&fx.env, &mut virt, &driver).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert_eq!(virt.mutation_count(), 0);

        // Same environment, but the domain already exists: warning only.
        virt.state = DomainState::Running;
        virt.networks.insert("pfsense-lan".to_string());
        virt.devices.push(crate::virt::BlockDevice {
            kind: DeviceKind::Cdrom,
            target: "sda".to_string(),
            source: Some(fx.env.work_root.join(CONFIG_ISO_LATEST)),
        });
        up(&fx.env, &mut virt, &driver).unwrap();
        assert_eq!(virt.mutation_count(), 0);
    }

    #[test]
    fn test_regenerated_config_iso_issues_single_change_media() {
        let fx = fixture();
        std::fs::write(fx.env.work_root.join(CONFIG_ISO_LATEST), b"v2").unwrap();
        // Installer already staged from an earlier run.
        std::fs::write(fx.env.work_root.join("pfsense-installer.img"), b"disk").unwrap();
        write_gz(&fx.env.work_root.join("pfSense-serial.img.gz"), b"disk");

        let mut virt = FakeVirt::new();
        virt.state = DomainState::Running;
        virt.networks.insert("pfsense-lan".to_string());
        virt.devices = vec![
            crate::virt::BlockDevice {
                kind: DeviceKind::Disk,
                target: "vda".to_string(),
                source: Some(fx.env.work_root.join("pfsense.qcow2")),
            },
            crate::virt::BlockDevice {
                kind: DeviceKind::Disk,
                target: "sda".to_string(),
                source: Some(fx.env.work_root.join("pfsense-installer.img")),
            },
            crate::virt::BlockDevice {
                kind: DeviceKind::Cdrom,
                target: "sdb".to_string(),
                source: Some(fx.env.work_root.join("pfSense-config.iso")),
            },
        ];

        let driver = Driver::default();
        up(&fx.env, &mut virt, &driver).unwrap();

        assert_eq!(virt.mutation_count(), 1);
        assert!(virt.mutations[0].starts_with("change-media pfsense sdb"));
        assert!(virt.mutations[0].contains(CONFIG_ISO_LATEST));
        assert!(virt.mutations[0].ends_with("live=true"));
    }
}
