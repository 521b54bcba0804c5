//! Configuration validation with aggregated errors.
//! - Aggregates all issues into Vec<String>
//! - Checks window bounds, timeouts, retry and logging invariants

use tracing::error;

use crate::config::settings::{RetryConfig, SettingsConfig};
use crate::config::types::CacheConfig;

const WINDOW_SECONDS_MAX: u64 = 60 * 60 * 24 * 365;
const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Public entrypoint: returns Ok(()) or Err(Vec<String>) containing all issues.
pub fn validate_cache_config(cfg: &CacheConfig) -> Result<(), Vec<String>> {
    let mut errors: Vec<String> = Vec::new();

    validate_settings(&cfg.settings, &mut errors);

    for (name, credential) in &cfg.credentials {
        if name.trim().is_empty() {
            errors.push("credentials: credential name must not be empty".to_string());
        }
        validate_window(&format!("credentials['{}'].window_seconds", name), credential.window_seconds, &mut errors);
        validate_timeout(&format!("credentials['{}'].refresh_timeout_ms", name), credential.refresh_timeout_ms, &mut errors);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        for e in &errors {
            error!("config validation: {}", e);
        }
        Err(errors)
    }
}

fn validate_settings(settings: &SettingsConfig, errors: &mut Vec<String>) {
    // retry invariants
    if let Some(retry) = &settings.retry {
        validate_retry("settings.retry", retry, errors);
    }

    validate_window("settings.window_seconds", settings.window_seconds, errors);
    validate_timeout("settings.refresh_timeout_ms", settings.refresh_timeout_ms, errors);

    // logging level
    if let Some(logging) = &settings.logging {
        if !LOG_LEVELS.contains(&logging.level.as_str()) {
            errors.push(format!(
                "settings.logging.level '{}' invalid; allowed: {:?}",
                logging.level, LOG_LEVELS
            ));
        }
    }
}

fn validate_window(field: &str, window_seconds: Option<u64>, errors: &mut Vec<String>) {
    if let Some(w) = window_seconds {
        if w > WINDOW_SECONDS_MAX {
            errors.push(format!("{} ({}) is unreasonably large", field, w));
        }
    }
}

fn validate_timeout(field: &str, timeout_ms: Option<u64>, errors: &mut Vec<String>) {
    if timeout_ms == Some(0) {
        errors.push(format!("{} must be greater than 0", field));
    }
}

fn validate_retry(field: &str, retry: &RetryConfig, errors: &mut Vec<String>) {
    if retry.attempts == Some(0) {
        errors.push(format!("{}.attempts must be at least 1", field));
    }
    if let (Some(base), Some(max)) = (retry.base_delay_ms, retry.max_delay_ms) {
        if max < base {
            errors.push(format!(
                "{}.max_delay_ms ({}) must be >= base_delay_ms ({})",
                field, max, base
            ));
        }
    }
}
