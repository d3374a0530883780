//! Command-line interface and dispatch
//!
//! The CLI is a thin invoker over the reconciler core; the Makefile
//! wrapper around this binary adds nothing but target names.

use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};
use tracing::info;

use crate::env::{Env, EnvOverrides};
use crate::errors::{Error, Result};
use crate::status::OutputFormat;
use crate::virt::driver::{Driver, ExecMode};
use crate::virt::virsh::Virsh;
use crate::{installer, reconcile, status};

/// Zero-touch provisioning of a pfSense firewall VM on libvirt.
///
/// pfztp reconciles a declared environment (installer media, rendered
/// configuration ISO, VM shape, networking) onto the local hypervisor.
/// Re-running it is always safe: it only issues the calls needed to
/// close the gap between observed and declared state.
#[derive(Debug, Parser)]
#[command(name = "pfztp", version, about)]
pub struct Cli {
    /// Environment file with ZTP_* keys (default: ./ztp.env, then
    /// /etc/pfztp/ztp.env)
    #[clap(long, global = true)]
    pub env_file: Option<Utf8PathBuf>,

    /// Hypervisor connection URI (e.g. qemu:///system)
    #[clap(long, short = 'c', global = true)]
    pub connect: Option<String>,

    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Commands,
}

/// Options for the `up` command.
#[derive(Debug, Parser)]
pub struct UpOpts {
    /// Log every mutating command instead of executing it
    #[clap(long)]
    pub plan: bool,

    /// Override the work root
    #[clap(long)]
    pub work_root: Option<Utf8PathBuf>,

    /// Override the domain name
    #[clap(long)]
    pub name: Option<String>,

    /// Explicit installer media path (wins over every other source)
    #[clap(long)]
    pub installer: Option<Utf8PathBuf>,
}

/// Options for the `status` command.
#[derive(Debug, Parser)]
pub struct StatusOpts {
    /// Output format
    #[clap(long, default_value = "yaml", value_enum)]
    pub format: OutputFormat,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Reconcile the declared environment onto the hypervisor
    Up(UpOpts),

    /// Show what the reconciler observes, without mutating anything
    Status(StatusOpts),

    /// Print the installer media the locator would pick
    #[clap(name = "locate-installer")]
    LocateInstaller,
}

impl Cli {
    fn overrides(&self, up: Option<&UpOpts>) -> EnvOverrides {
        match up {
            Some(opts) => EnvOverrides {
                work_root: opts.work_root.clone(),
                vm_name: opts.name.clone(),
                installer: opts.installer.clone(),
            },
            None => EnvOverrides::default(),
        }
    }
}

/// Parse arguments and dispatch. Returns the error to map to an exit
/// code; `--help` and `--version` short-circuit as success.
pub fn run() -> Result<()> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err)
            if matches!(
                err.kind(),
                clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion
            ) =>
        {
            // Let clap print its own rendering.
            err.print().map_err(|e| Error::Runtime(e.to_string()))?;
            return Ok(());
        }
        Err(err) => {
            let _ = err.print();
            return Err(Error::Usage(err.kind().to_string()));
        }
    };

    match &cli.command {
        Commands::Up(opts) => {
            let env = Env::resolve(cli.env_file.as_deref(), &cli.overrides(Some(opts)))?;
            let mode = if opts.plan {
                ExecMode::Plan
            } else {
                ExecMode::Execute
            };
            let driver = Driver::new(mode);
            let mut virt = Virsh::new(driver, cli.connect.clone());
            reconcile::up(&env, &mut virt, &driver)
        }
        Commands::Status(opts) => {
            let env = Env::resolve(cli.env_file.as_deref(), &cli.overrides(None))?;
            let driver = Driver::new(ExecMode::Execute);
            let mut virt = Virsh::new(driver, cli.connect.clone());
            let report = status::collect(&env, &mut virt)?;
            println!("{}", status::render(&report, opts.format)?);
            Ok(())
        }
        Commands::LocateInstaller => {
            let env = Env::resolve(cli.env_file.as_deref(), &cli.overrides(None))?;
            match installer::locate(&env)? {
                Some(candidate) => {
                    info!(
                        "format {:?}, compression {:?}",
                        candidate.format, candidate.compression
                    );
                    println!("{}", candidate.path);
                    Ok(())
                }
                None => Err(Error::Config(
                    "no installer media found in any configured source".into(),
                )),
            }
        }
    }
}
