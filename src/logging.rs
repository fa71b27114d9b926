use tracing_subscriber::{EnvFilter, fmt};

pub const LOG_JSON_ENV: &str = "MATCHNET_LOG_JSON";
const DEFAULT_FILTER: &str = "matchnet=info";

/// Installs the global subscriber. `RUST_LOG` wins over the default filter;
/// setting `MATCHNET_LOG_JSON` switches to line-delimited JSON. Safe to call
/// more than once (later calls are no-ops).
pub fn init_logging() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let json_logging = std::env::var(LOG_JSON_ENV).is_ok();

    let _ = if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .with_writer(std::io::stderr)
            .try_init()
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .try_init()
    };
}
