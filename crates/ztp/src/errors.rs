//! Error taxonomy and process exit-code contract
//!
//! Every failure the reconciler can surface falls into one of five
//! kinds, each mapped to a sysexits-style process exit code so the
//! invoking layer (Makefile, wrapper script) can tell retryable
//! readiness problems apart from hard failures.

use thiserror::Error;

/// Exit code for bad invocation arguments (EX_USAGE).
pub const EXIT_USAGE: i32 = 64;
/// Exit code for a required external tool being absent (EX_UNAVAILABLE).
pub const EXIT_MISSING_DEPENDENCY: i32 = 69;
/// Exit code for an external call failing despite valid inputs (EX_SOFTWARE).
pub const EXIT_RUNTIME: i32 = 70;
/// Exit code for a domain-state conflict that may clear on retry (EX_TEMPFAIL).
pub const EXIT_NOT_READY: i32 = 75;
/// Exit code for missing or invalid required input (EX_CONFIG).
pub const EXIT_CONFIG: i32 = 78;

/// Failure kinds surfaced by the reconciler.
///
/// None of these are retried internally; `NotReady` is the only kind
/// where the core first attempts a single fallback strategy
/// (config-only attach) before escalating to `Runtime`.
#[derive(Debug, Error)]
pub enum Error {
    /// Bad invocation arguments. Never retried.
    #[error("usage error: {0}")]
    Usage(String),

    /// A required external tool is not installed or not on PATH.
    #[error("missing dependency: {tool} ({hint})")]
    MissingDependency {
        /// Name of the absent executable.
        tool: String,
        /// Remediation hint for the operator.
        hint: String,
    },

    /// A required input or artifact is missing or invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// An external call failed despite valid inputs.
    #[error("runtime failure: {0}")]
    Runtime(String),

    /// The domain's current state conflicts with the requested operation.
    #[error("not ready: {0}")]
    NotReady(String),

    /// Filesystem access failed.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// Path the operation was touching.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    /// Shorthand for an [`Error::Io`] wrapping `source` with path context.
    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    /// The process exit code this error maps to.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Usage(_) => EXIT_USAGE,
            Error::MissingDependency { .. } => EXIT_MISSING_DEPENDENCY,
            Error::Config(_) => EXIT_CONFIG,
            // I/O failures are runtime failures of the filesystem collaborator
            Error::Runtime(_) | Error::Io { .. } => EXIT_RUNTIME,
            Error::NotReady(_) => EXIT_NOT_READY,
        }
    }
}

/// Crate-wide result alias.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_mapping() {
        assert_eq!(Error::Usage("x".into()).exit_code(), 64);
        assert_eq!(
            Error::MissingDependency {
                tool: "virsh".into(),
                hint: "install libvirt-clients".into()
            }
            .exit_code(),
            69
        );
        assert_eq!(Error::Config("x".into()).exit_code(), 78);
        assert_eq!(Error::Runtime("x".into()).exit_code(), 70);
        assert_eq!(Error::NotReady("x".into()).exit_code(), 75);
    }

    #[test]
    fn test_io_error_display_includes_path() {
        let err = Error::io(
            "/work/pfsense.img",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        let msg = err.to_string();
        assert!(msg.contains("/work/pfsense.img"));
        assert_eq!(err.exit_code(), 70);
    }
}
