//! Configuration resolution for nutri-intake
//!
//! BPM connection settings resolve with ENV → TOML priority. The TOML file
//! keeps everything else; only credentials and the endpoint are commonly
//! overridden per deployment.

use nutri_common::config::{BpmConfig, TomlConfig};
use tracing::{info, warn};

pub const BPM_TOKEN_ENV: &str = "NUTRI_BPM_TOKEN";
pub const BPM_URL_ENV: &str = "NUTRI_BPM_URL";

/// Non-empty, non-whitespace
pub fn is_set(value: &str) -> bool {
    !value.trim().is_empty()
}

/// Resolve one setting from the environment, then TOML.
fn resolve_setting(name: &str, env_var: &str, toml_value: Option<&str>) -> Option<String> {
    let env_value = std::env::var(env_var).ok().filter(|v| is_set(v));
    let toml_value = toml_value.filter(|v| is_set(v));

    if env_value.is_some() && toml_value.is_some() {
        warn!(
            "{} found in multiple sources: environment, TOML. Using environment (highest priority).",
            name
        );
    }

    if let Some(value) = env_value {
        info!("{} loaded from environment variable {}", name, env_var);
        return Some(value.trim().to_string());
    }
    toml_value.map(|v| v.trim().to_string())
}

/// Bearer token for the BPM engine, if any
pub fn resolve_bpm_token(config: &TomlConfig) -> Option<String> {
    resolve_setting("BPM token", BPM_TOKEN_ENV, config.bpm.token.as_deref())
}

/// BPM base URL, falling back to the built-in default
pub fn resolve_bpm_base_url(config: &TomlConfig) -> String {
    resolve_setting("BPM base URL", BPM_URL_ENV, Some(config.bpm.base_url.as_str()))
        .unwrap_or_else(|| BpmConfig::default().base_url)
}

/// The `[bpm]` section with environment overrides applied
pub fn effective_bpm_config(config: &TomlConfig) -> (BpmConfig, Option<String>) {
    let mut bpm = config.bpm.clone();
    bpm.base_url = resolve_bpm_base_url(config);
    let token = resolve_bpm_token(config);
    bpm.token = None;
    (bpm, token)
}
