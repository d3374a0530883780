//! Binary entry point: logging, error reporting, exit-code mapping.

use pfztp::cli;

/// Install and configure the tracing/logging system.
///
/// Structured logging to stderr with environment-based filtering
/// (`RUST_LOG`, defaulting to `info`) and error layer integration.
fn install_tracing() {
    use tracing_error::ErrorLayer;
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let fmt_layer = fmt::layer().with_target(false).with_writer(std::io::stderr);
    let filter_layer = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_default();

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .with(ErrorLayer::default())
        .init();
}

fn main() {
    install_tracing();
    if let Err(err) = color_eyre::install() {
        eprintln!("failed to install error reporting: {err}");
    }

    if let Err(err) = cli::run() {
        eprintln!("error: {err}");
        std::process::exit(err.exit_code());
    }
}
