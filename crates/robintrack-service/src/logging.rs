//! Log filter defaults and the JSON log sink shared by the server and tests.

use tracing::level_filters::LevelFilter;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::fmt::{fmt, MakeWriter};
use tracing_subscriber::prelude::*;
use tracing_subscriber::util::SubscriberInitExt;

/// Returns the default `RUST_LOG` directive for the configured level.
///
/// Chatty dependencies (the HTTP stack and the Redis client) are capped so that `debug` and
/// `trace` only turn up our own crates.
pub fn default_env_filter(level: LevelFilter) -> &'static str {
    match level {
        LevelFilter::OFF => "",
        LevelFilter::ERROR => "ERROR",
        LevelFilter::WARN => "WARN",
        LevelFilter::INFO => {
            "INFO,\
             hyper=WARN,\
             redis=WARN"
        }
        LevelFilter::DEBUG => {
            "INFO,\
             hyper=WARN,\
             redis=INFO,\
             robintrack=DEBUG,\
             robintrack_service=DEBUG"
        }
        LevelFilter::TRACE => {
            "INFO,\
             hyper=WARN,\
             redis=DEBUG,\
             robintrack=TRACE,\
             robintrack_service=TRACE"
        }
    }
}

/// Installs a global JSON-lines subscriber writing to `make_writer`.
///
/// Errors are additionally forwarded to Sentry.
pub fn init_json_logging<W>(env_filter: &str, make_writer: W)
where
    W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
{
    fmt()
        .with_timer(UtcTime::rfc_3339())
        .with_target(true)
        .with_env_filter(env_filter)
        .json()
        .flatten_event(true)
        .with_current_span(true)
        .with_span_list(true)
        .with_file(true)
        .with_line_number(true)
        .with_writer(make_writer)
        .finish()
        .with(sentry::integrations::tracing::layer())
        .init();
}
