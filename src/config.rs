use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

pub const DEFAULT_ENDPOINT: &str =
    "http://apis.data.go.kr/1471000/FoodNtrCpntDbInfo02/getFoodNtrCpntDbInq02";

/// Runtime settings, read from `foods.toml` (optional) and `FOODS_*` env vars.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub service_key: Option<String>,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_delay")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_rows")]
    pub num_of_rows: u32,
    #[serde(default = "default_only_zero")]
    pub only_zero: bool,
    #[serde(default = "default_dedupe_keys")]
    pub dedupe_keys: String,
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}
fn default_timeout() -> u64 {
    15
}
fn default_attempts() -> u32 {
    3
}
fn default_delay() -> u64 {
    1000
}
fn default_rows() -> u32 {
    100
}
fn default_only_zero() -> bool {
    true
}
fn default_dedupe_keys() -> String {
    "FOOD_CD,FOOD_NM_KR".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            service_key: None,
            endpoint: default_endpoint(),
            request_timeout_secs: default_timeout(),
            retry_attempts: default_attempts(),
            retry_delay_ms: default_delay(),
            num_of_rows: default_rows(),
            only_zero: default_only_zero(),
            dedupe_keys: default_dedupe_keys(),
        }
    }
}

impl Settings {
    pub fn load() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::with_name("foods").required(false))
            .add_source(Environment::with_prefix("FOODS"))
            .build()?
            .try_deserialize()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Non-blank service key, trimmed.
    pub fn service_key(&self) -> Option<&str> {
        self.service_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
    }

    pub fn dedupe_keys(&self) -> Vec<String> {
        split_keys(&self.dedupe_keys)
    }
}

/// Split a comma-separated key list, dropping blanks.
pub fn split_keys(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .collect()
}
