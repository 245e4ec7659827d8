//! Exposes the command line application.
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use robintrack_service::config::Config;
use robintrack_service::metrics;

use crate::healthcheck;
use crate::logging;
use crate::server;

/// Robintrack commands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Run the web server.
    Run,

    /// Check the health of a running server.
    Healthcheck {
        /// Address of the server. Defaults to the configured bind address.
        #[arg(long, value_name = "ADDR")]
        addr: Option<SocketAddr>,

        /// Request timeout in seconds.
        #[arg(long, value_name = "SECS", default_value_t = 5)]
        timeout: u64,
    },
}

/// Command line interface parser.
#[derive(Parser, Debug)]
#[command(name = "robintrack", version)]
struct Cli {
    /// Path to your configuration file.
    #[arg(long, short, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

impl Cli {
    /// Returns the path to the configuration file.
    fn config(&self) -> Option<&Path> {
        self.config.as_deref()
    }
}

/// Runs the main application.
pub fn execute() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::get(cli.config()).context("failed loading config")?;

    if let Command::Healthcheck { addr, timeout } = cli.command {
        return healthcheck::healthcheck(&config, addr, timeout);
    }

    let sentry = sentry::init(sentry::ClientOptions {
        dsn: config.sentry_dsn.clone(),
        release: sentry::release_name!(),
        session_mode: sentry::SessionMode::Request,
        auto_session_tracking: false,
        ..Default::default()
    });

    logging::init_logging(&config);

    if let Some(ref statsd) = config.metrics.statsd {
        let mut tags = config.metrics.custom_tags.clone();
        if let Some(tag) = config.metrics.hostname_tag.clone() {
            if let Some(hostname) = hostname::get().ok().and_then(|s| s.into_string().ok()) {
                tags.insert(tag, hostname);
            }
        }
        if let Some(tag) = config.metrics.environment_tag.clone() {
            if let Some(environment) = sentry.options().environment.as_ref() {
                tags.insert(tag, environment.to_string());
            }
        }
        metrics::configure_statsd(&config.metrics.prefix, statsd.as_str(), tags)
            .context("failed to configure metrics")?;
    }

    server::run(config).context("failed to start the server")
}
