//! Virtualization-manager boundary
//!
//! The reconciler never talks to the hypervisor directly; everything
//! goes through the narrow [`VirtManager`] capability interface so the
//! reconciliation logic is unit-testable against a fake instead of a
//! real libvirt. The one production implementation shells out to
//! `virsh`/`virt-install` through the plan-aware execution driver.

use camino::{Utf8Path, Utf8PathBuf};

use crate::errors::Result;

pub mod driver;
#[cfg(test)]
pub mod fake;
pub mod virsh;

/// Lifecycle state of a domain, fetched fresh before each step
/// (query-then-act; the small race window is accepted and documented).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DomainState {
    /// The virtualization manager has never heard of this domain.
    Undefined,
    /// Defined but not running.
    ShutOff,
    /// Currently executing.
    Running,
    /// Defined and started but suspended.
    Paused,
}

impl DomainState {
    /// Whether live device updates may be requested in this state.
    pub fn is_running(&self) -> bool {
        matches!(self, DomainState::Running)
    }

    /// Whether the domain exists at all.
    pub fn is_defined(&self) -> bool {
        !matches!(self, DomainState::Undefined)
    }
}

/// Kind of a block device slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    /// Regular disk (bus chosen separately).
    Disk,
    /// Removable optical media.
    Cdrom,
}

/// One entry of a domain's current block-device inventory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockDevice {
    /// Slot kind.
    pub kind: DeviceKind,
    /// Device target identifier (`vda`, `sdb`, ...).
    pub target: String,
    /// Backing file, if any ("-" slots report `None`).
    pub source: Option<Utf8PathBuf>,
}

/// A request to attach new media at a specific free slot.
#[derive(Debug, Clone)]
pub struct AttachRequest {
    /// Domain to attach to.
    pub domain: String,
    /// Backing file to attach.
    pub source: Utf8PathBuf,
    /// Free target identifier to claim.
    pub target: String,
    /// Slot kind; cdroms are attached read-only on a sata bus, raw
    /// disk installers on a usb bus.
    pub kind: DeviceKind,
}

/// Capability interface over the external virtualization manager.
///
/// Mutating operations go through the execution driver and are
/// therefore plan-mode aware; queries always execute for real.
pub trait VirtManager {
    /// Current lifecycle state of `name`.
    fn domain_state(&mut self, name: &str) -> Result<DomainState>;

    /// Current block-device inventory of `name`.
    fn list_block_devices(&mut self, name: &str) -> Result<Vec<BlockDevice>>;

    /// Define the domain from a fully composed creation argv.
    /// Precondition (caller-enforced): the domain does not exist.
    fn define_domain(&mut self, argv: &[String]) -> Result<()>;

    /// Whether the manager's OS database recognizes `variant`.
    fn supports_os_variant(&mut self, variant: &str) -> Result<bool>;

    /// Whether a network by this name is already known.
    fn network_exists(&mut self, name: &str) -> Result<bool>;

    /// Define a network from its XML document.
    fn define_network(&mut self, name: &str, xml: &str) -> Result<()>;

    /// Mark a network to start on host boot. Idempotent.
    fn autostart_network(&mut self, name: &str) -> Result<()>;

    /// Start a network now. A network that is already active is success.
    fn start_network(&mut self, name: &str) -> Result<()>;

    /// Attach new media at a free slot. `live` additionally applies
    /// the change to the running instance; persistence into the saved
    /// configuration is always requested.
    fn attach_disk(&mut self, req: &AttachRequest, live: bool) -> Result<()>;

    /// Point an existing removable slot at different media.
    fn change_media(
        &mut self,
        domain: &str,
        target: &str,
        source: &Utf8Path,
        live: bool,
    ) -> Result<()>;
}
