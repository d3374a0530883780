//! pfSense zero-touch provisioning reconciler
//!
//! Takes a declared desired state (installer media, rendered
//! configuration ISO, VM shape) and drives libvirt to an equivalent
//! running state, idempotently. Every component checks observed state
//! before acting, so partial prior runs, pre-existing domains, and
//! already-attached media are all converged rather than re-created.

pub mod attach;
pub mod cli;
pub mod config_iso;
pub mod domain;
pub mod env;
pub mod errors;
pub mod installer;
pub mod net;
pub mod reconcile;
pub mod stage;
pub mod status;
pub mod virt;
pub mod xml_utils;
