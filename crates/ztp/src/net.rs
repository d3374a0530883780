//! Isolated LAN network management
//!
//! Ensures the named LAN bridge network exists in the virtualization
//! manager. Existence is checked before any creation, and each of the
//! three creation sub-steps (define, autostart, start) is individually
//! idempotent, so re-running after a partial prior run just completes
//! whatever is missing.

use tracing::{debug, info};

use crate::errors::Result;
use crate::virt::VirtManager;
use crate::xml_utils::XmlWriter;

/// Render the minimal isolated bridged-L2 network document.
pub fn network_xml(name: &str, bridge: &str) -> Result<String> {
    let mut writer = XmlWriter::new();
    writer.start_element("network", &[])?;
    writer.write_text_element("name", name)?;
    // No <forward> element: isolated L2 segment, host-only bridge.
    writer.write_empty_element("bridge", &[("name", bridge), ("stp", "on"), ("delay", "0")])?;
    writer.end_element("network")?;
    writer.into_string()
}

/// Ensure the network `name` backed by `bridge` exists, autostarts,
/// and is active. No-op when the manager already knows the network.
pub fn ensure_network(virt: &mut dyn VirtManager, name: &str, bridge: &str) -> Result<()> {
    if virt.network_exists(name)? {
        debug!("network {name} already defined");
        return Ok(());
    }
    info!("defining isolated network {name} on bridge {bridge}");
    let xml = network_xml(name, bridge)?;
    virt.define_network(name, &xml)?;
    virt.autostart_network(name)?;
    virt.start_network(name)?;
    Ok(())
}
