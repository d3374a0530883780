//! Plan-aware execution of external commands
//!
//! Every mutating child-process invocation in the reconciler funnels
//! through [`Driver`]. In plan mode the fully-formed command line is
//! logged instead of executed; in execute mode failures are surfaced
//! with the external tool's stderr attached. This is the single seam
//! that makes the whole core dry-run-safe.

use std::process::Command;

use tracing::{debug, info};

use crate::errors::{Error, Result};

/// Whether mutating commands actually run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecMode {
    /// Run commands and propagate their failures.
    #[default]
    Execute,
    /// Log commands without running them; always reports success.
    Plan,
}

/// Executes (or plans) external commands.
#[derive(Debug, Clone, Copy, Default)]
pub struct Driver {
    mode: ExecMode,
}

impl Driver {
    /// Create a driver in the given mode.
    pub fn new(mode: ExecMode) -> Self {
        Self { mode }
    }

    /// Whether this driver is in plan mode.
    pub fn is_plan(&self) -> bool {
        self.mode == ExecMode::Plan
    }

    /// Run a mutating command.
    pub fn run(&self, cmd: &mut Command, what: &str) -> Result<()> {
        self.run_tolerating(cmd, what, &[])
    }

    /// Run a mutating command, treating a failure whose stderr
    /// contains any of `benign` as success (idempotent sub-steps like
    /// starting an already-active network).
    pub fn run_tolerating(&self, cmd: &mut Command, what: &str, benign: &[&str]) -> Result<()> {
        let rendered = render(cmd);
        if self.is_plan() {
            info!("plan: {rendered}");
            return Ok(());
        }
        debug!("exec: {rendered}");
        let output = cmd.output().map_err(|e| spawn_error(cmd, e))?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if benign.iter().any(|pat| stderr.contains(pat)) {
            debug!("{what}: already satisfied ({})", stderr.trim());
            return Ok(());
        }
        Err(Error::Runtime(format!(
            "{what} failed (`{rendered}`): {}",
            stderr.trim()
        )))
    }

    /// Run a read-only query. Queries execute even in plan mode; the
    /// raw output is returned for the caller to interpret, including
    /// unsuccessful exit statuses.
    pub fn query(&self, cmd: &mut Command) -> Result<std::process::Output> {
        debug!("query: {}", render(cmd));
        cmd.output().map_err(|e| spawn_error(cmd, e))
    }
}

/// Render a command the way a shell user would retype it.
pub fn render(cmd: &Command) -> String {
    let mut parts = vec![cmd.get_program().to_string_lossy().into_owned()];
    parts.extend(
        cmd.get_args()
            .map(|a| a.to_string_lossy().into_owned()),
    );
    shlex::try_join(parts.iter().map(String::as_str))
        .unwrap_or_else(|_| parts.join(" "))
}

fn spawn_error(cmd: &Command, err: std::io::Error) -> Error {
    let tool = cmd.get_program().to_string_lossy().into_owned();
    if err.kind() == std::io::ErrorKind::NotFound {
        Error::MissingDependency {
            hint: remediation_hint(&tool),
            tool,
        }
    } else {
        Error::Runtime(format!("failed to spawn {tool}: {err}"))
    }
}

fn remediation_hint(tool: &str) -> String {
    match tool {
        "virsh" => "install libvirt-clients and ensure libvirtd is running".to_string(),
        "virt-install" => "install virt-install (package 'virtinst')".to_string(),
        "osinfo-query" => "install libosinfo-bin".to_string(),
        other => format!("install '{other}' and make sure it is on PATH"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_mode_skips_execution() {
        let driver = Driver::new(ExecMode::Plan);
        // A command that would fail loudly if it ever ran.
        let mut cmd = Command::new("/nonexistent/virsh");
        cmd.args(["destroy", "pfsense"]);
        driver.run(&mut cmd, "destroy domain").unwrap();
    }

    #[test]
    fn test_missing_tool_maps_to_missing_dependency() {
        let driver = Driver::new(ExecMode::Execute);
        let mut cmd = Command::new("pfztp-definitely-not-installed");
        let err = driver.run(&mut cmd, "test").unwrap_err();
        assert!(matches!(err, Error::MissingDependency { .. }));
        assert_eq!(err.exit_code(), crate::errors::EXIT_MISSING_DEPENDENCY);
    }

    #[test]
    fn test_failure_carries_stderr_and_command() {
        let driver = Driver::new(ExecMode::Execute);
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo no such network >&2; exit 1"]);
        let err = driver.run(&mut cmd, "start network").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("start network"));
        assert!(msg.contains("no such network"));
    }

    #[test]
    fn test_benign_stderr_is_success() {
        let driver = Driver::new(ExecMode::Execute);
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo network is already active >&2; exit 1"]);
        driver
            .run_tolerating(&mut cmd, "start network", &["already active"])
            .unwrap();
    }

    #[test]
    fn test_render_quotes_awkward_arguments() {
        let mut cmd = Command::new("virsh");
        cmd.args(["change-media", "my vm", "sda"]);
        assert_eq!(render(&cmd), "virsh change-media 'my vm' sda");
    }
}
