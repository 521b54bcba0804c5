use std::path::Path;
use anyhow::{anyhow, Result};
use regex::Regex;
use tracing::{debug, error};

use crate::config::settings::{LoggingConfig, WINDOW_SECONDS_DEFAULT};
use crate::config::types::CacheConfig;
use crate::config::validator;

/// Load and validate config from YAML file
pub async fn file_to_config(path: &Path) -> Result<CacheConfig> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| anyhow!("cannot read config {}: {}", path.display(), e))?;

    let expanded = expand_env_vars(&content)?;
    parse_config(&expanded)
}

pub fn parse_config(content: &str) -> Result<CacheConfig> {
    let mut cache_config: CacheConfig = serde_yaml::from_str(content)
        .inspect_err(|e| {
            error!("parse config error: {}", e);
        })?;

    // Apply defaults
    if cache_config.settings.logging.is_none() {
        cache_config.settings.logging = Some(LoggingConfig::default());
    }
    if cache_config.settings.window_seconds.is_none() {
        cache_config.settings.window_seconds = Some(WINDOW_SECONDS_DEFAULT);
    }
    debug!("validation config ...");
    validator::validate_cache_config(&cache_config)
        .map_err(|errors| anyhow!("config is not valid: {}", errors.join("; ")))?;

    Ok(cache_config)
}

/// Replace `${VAR}` and `${VAR:default}` with environment values.
fn expand_env_vars(input: &str) -> Result<String> {
    let re = Regex::new(r"\$\{(\w+)(?::([^\}]+))?\}")?;
    Ok(re.replace_all(input, |caps: &regex::Captures| {
        let var = &caps[1];
        let default = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        std::env::var(var).unwrap_or_else(|_| default.to_string())
    })
    .to_string())
}
