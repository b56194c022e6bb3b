//! Subscriber setup for both binaries.
//!
//! Logs always go to stderr so encoded command output on stdout stays
//! intact.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Log filter of the `ipfs` binary, e.g. `IPFS_LOGGING=ipfs_cmds=debug`.
pub const ENV_LOGGING: &str = "IPFS_LOGGING";

const FALLBACK_ENV: &str = "RUST_LOG";
const DEFAULT_LEVEL: &str = "warn";
const DEBUG_LEVEL: &str = "debug";

/// Filter directive for the command line: `--debug` wins, then
/// `IPFS_LOGGING`, then `RUST_LOG`.
pub fn cli_directive<F>(lookup: F, debug: bool) -> String
where
    F: Fn(&str) -> Option<String>,
{
    if debug {
        return DEBUG_LEVEL.to_string();
    }
    lookup(ENV_LOGGING)
        .or_else(|| lookup(FALLBACK_ENV))
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_LEVEL.to_string())
}

pub fn init_cli_logging(debug: bool) {
    let directive = cli_directive(|key| std::env::var(key).ok(), debug);
    let filter = EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LEVEL));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(debug),
        )
        .try_init();
}

pub fn init_server_logging(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = tracing_subscriber::registry().with(filter);

    if json {
        let _ = subscriber
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .try_init();
    } else {
        let _ = subscriber
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init();
    }
}
