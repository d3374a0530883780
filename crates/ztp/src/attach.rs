//! Removable-media attachment reconciliation
//!
//! Given a defined (possibly running) domain and one desired media
//! attachment, converge the domain onto it with the minimum number of
//! mutating calls. The idempotence anchor of the whole reconciler is
//! step one: if any existing slot already serves the exact source
//! path, nothing is issued at all. Otherwise an existing removable
//! slot of the right kind is re-pointed via change-media, and only as
//! a last resort is a new slot claimed.
//!
//! Live updates are requested only while the domain is running, and a
//! rejected live update is retried config-only before the failure is
//! escalated. There is no rollback; a partial prior run is simply
//! completed by the next one.

use camino::Utf8Path;
use tracing::{debug, info, warn};

use crate::errors::{Error, Result};
use crate::virt::{AttachRequest, DeviceKind, DomainState, VirtManager};

/// Target identifiers tried, in order, when a new slot is needed.
const TARGET_CANDIDATES: &[&str] = &["sda", "sdb", "sdc", "sdd", "sde", "sdf", "sdg", "sdh"];

/// How a desired attachment was satisfied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attachment {
    /// An existing slot already served the source; nothing was issued.
    AlreadySatisfied {
        /// Slot that serves the source.
        target: String,
    },
    /// An existing removable slot was re-pointed at the source.
    MediaChanged {
        /// Slot whose media was swapped.
        target: String,
    },
    /// The source was attached at a previously free slot.
    NewSlot {
        /// Slot that was claimed.
        target: String,
    },
}

/// Ensure `source` is attached to `domain` as a device of `kind`.
///
/// `label` names the attachment in logs and errors ("installer",
/// "config ISO"). The domain must already be defined.
pub fn ensure_attached(
    virt: &mut dyn VirtManager,
    domain: &str,
    source: &Utf8Path,
    kind: DeviceKind,
    label: &str,
) -> Result<Attachment> {
    let devices = virt.list_block_devices(domain)?;

    if let Some(existing) = devices
        .iter()
        .find(|d| d.source.as_deref() == Some(source))
    {
        debug!("{label} already attached to {domain} at {}", existing.target);
        return Ok(Attachment::AlreadySatisfied {
            target: existing.target.clone(),
        });
    }

    let state = virt.domain_state(domain)?;
    if state == DomainState::Paused {
        return Err(Error::NotReady(format!(
            "domain {domain} is paused; resume or shut it off before reconciling {label}"
        )));
    }
    let live = state.is_running();

    // Re-point an existing removable slot before claiming a new one.
    // Only cdroms are swappable; a usb installer disk is not removable
    // media as far as change-media is concerned.
    if kind == DeviceKind::Cdrom {
        // Prefer an empty tray over ejecting whatever another slot holds.
        let slot = devices
            .iter()
            .find(|d| d.kind == DeviceKind::Cdrom && d.source.is_none())
            .or_else(|| devices.iter().find(|d| d.kind == DeviceKind::Cdrom));
        if let Some(slot) = slot {
            info!(
                "swapping media of {domain}:{} to {source} ({label})",
                slot.target
            );
            return match virt.change_media(domain, &slot.target, source, live) {
                Ok(()) => Ok(Attachment::MediaChanged {
                    target: slot.target.clone(),
                }),
                Err(err) if live => {
                    warn!("live media change rejected ({err}), retrying config-only");
                    virt.change_media(domain, &slot.target, source, false)
                        .map_err(|e| attach_failure(label, source, domain, e))?;
                    Ok(Attachment::MediaChanged {
                        target: slot.target.clone(),
                    })
                }
                Err(err) => Err(attach_failure(label, source, domain, err)),
            };
        }
    }

    let target = first_free_target(&devices.iter().map(|d| d.target.as_str()).collect::<Vec<_>>())
        .ok_or_else(|| {
            Error::Runtime(format!(
                "no free device target on {domain} for {label} ({source})"
            ))
        })?;

    let req = AttachRequest {
        domain: domain.to_string(),
        source: source.to_owned(),
        target: target.to_string(),
        kind,
    };
    info!("attaching {label} {source} to {domain} at {target}");
    match virt.attach_disk(&req, live) {
        Ok(()) => Ok(Attachment::NewSlot {
            target: target.to_string(),
        }),
        Err(err) if live => {
            warn!("live attach rejected ({err}), retrying config-only");
            virt.attach_disk(&req, false)
                .map_err(|e| attach_failure(label, source, domain, e))?;
            Ok(Attachment::NewSlot {
                target: target.to_string(),
            })
        }
        Err(err) => Err(attach_failure(label, source, domain, err)),
    }
}

fn attach_failure(label: &str, source: &Utf8Path, domain: &str, err: Error) -> Error {
    Error::Runtime(format!(
        "attaching {label} {source} to domain {domain} failed: {err}"
    ))
}

fn first_free_target(used: &[&str]) -> Option<&'static str> {
    TARGET_CANDIDATES
        .iter()
        .copied()
        .find(|candidate| !used.contains(candidate))
}
