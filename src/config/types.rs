use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

use crate::cache::credential::CredentialCache;
use crate::cache::kind::CredentialKind;
use crate::config::settings::{CredentialConfig, SettingsConfig};
use crate::helpers::time::get_window_seconds;
use crate::resilience::retry::RetrySettings;

/// ================================
/// Full cache configuration
/// ================================
#[derive(Debug, Deserialize, Clone, Default)]
pub struct CacheConfig {
    #[serde(default)]
    pub settings: SettingsConfig,
    /// keyed by credential name, e.g. `stable_token`
    #[serde(default)]
    pub credentials: HashMap<String, CredentialConfig>,
}

impl CacheConfig {
    pub fn window_seconds(&self, credential: &str) -> u64 {
        get_window_seconds(
            self.settings.window_seconds,
            self.credentials.get(credential).and_then(|c| c.window_seconds),
        )
    }

    pub fn refresh_timeout(&self, credential: &str) -> Option<Duration> {
        self.credentials
            .get(credential)
            .and_then(|c| c.refresh_timeout_ms)
            .or(self.settings.refresh_timeout_ms)
            .map(Duration::from_millis)
    }

    /// Construct an empty cache for `name` with its resolved window and timeout.
    /// The caller still installs the refresh operation.
    pub fn build_cache<K: CredentialKind>(&self, name: &str) -> CredentialCache<K> {
        let cache = CredentialCache::new(name, self.window_seconds(name));
        match self.refresh_timeout(name) {
            Some(timeout) => cache.with_refresh_timeout(timeout),
            None => cache,
        }
    }

    pub fn retry_settings(&self) -> RetrySettings {
        RetrySettings::from_config(self.settings.retry.as_ref())
    }
}
