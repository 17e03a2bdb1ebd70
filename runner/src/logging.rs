use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "SBX_RUNNER_LOG";
const DEFAULT_FILTER: &str = "warn";

/// Log events go to stderr; stdout is reserved for the result.
pub fn init() {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_target(false)
        .without_time()
        .try_init();
}
