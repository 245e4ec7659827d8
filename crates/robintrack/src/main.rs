//! Robintrack.
//!
//! Robintrack serves popularity rankings and histories of stock symbols. Every response is
//! computed at most once at a time across all workers and kept in a shared cache, so that bursts of
//! identical requests cost a single computation.

#![warn(missing_debug_implementations, unused_crate_dependencies, clippy::all)]

mod cli;
mod endpoints;
mod healthcheck;
mod logging;
mod server;

fn main() {
    match cli::execute() {
        Ok(()) => std::process::exit(0),
        Err(error) => {
            logging::ensure_log_error(&error);
            std::process::exit(1);
        }
    }
}
