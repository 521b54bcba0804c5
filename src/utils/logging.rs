use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::{fmt, EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use crate::config::settings::{LogFormat, LoggingConfig};
use crate::config::types::CacheConfig;


/// Resolve the logging config (explicit level override, then config file,
/// then `LOG_FORMAT`-driven defaults) and install the subscriber.
pub fn run(cache_config: &CacheConfig, level_override: Option<&str>) -> LoggingConfig {
    let logging_config = resolve_logging_config(cache_config, level_override);
    init_logging(&logging_config);
    logging_config
}

fn resolve_logging_config(cache_config: &CacheConfig, level_override: Option<&str>) -> LoggingConfig {
    let base = cache_config
        .settings
        .logging
        .to_owned()
        .unwrap_or_else(|| LoggingConfig::new("info".to_owned(), LogFormat::from_env()));

    match level_override {
        Some(level) => LoggingConfig::new(level.to_lowercase(), base.format),
        None => base,
    }
}


/// Initialize tracing with the desired config.
pub fn init_logging(cfg: &LoggingConfig) {
    let env_filter = EnvFilter::try_new(&cfg.level)
        .unwrap_or_else(|_| EnvFilter::new("debug"));

    // Base layer: filter + writer
    let registry = tracing_subscriber::registry().with(env_filter);

    // Choose format layer
    match cfg.format {
        LogFormat::Json => {
            let layer = fmt::layer()
                .json()
                .with_timer(UtcTime::rfc_3339())
                .flatten_event(true) // flattens fields, good for CRI log parsers
                .with_ansi(false); // CRI parsers dislike ANSI color codes

            let _ = registry.with(layer).try_init();
        }
        LogFormat::Compact => {
            let layer = fmt::layer()
                .compact()
                .with_timer(UtcTime::rfc_3339())
                .with_ansi(true);

            let _ = registry.with(layer).try_init();
        }
    };
}
