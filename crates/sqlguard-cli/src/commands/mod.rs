//! CLI command implementations.

pub mod assess;
pub mod classify;
pub mod exec;

use anyhow::{Context, Result};
use regex::Regex;
use sqlguard_core::GuardConfig;
use std::path::Path;

/// Load the configuration file if one was given, then apply a `--database-url` override.
pub fn load_config(path: Option<&Path>, database_url: Option<String>) -> Result<GuardConfig> {
    let mut config = match path {
        Some(path) => GuardConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => GuardConfig::default(),
    };

    if let Some(url) = database_url {
        config.upstream.database_url_env = None;
        config.upstream.database_url = Some(url);
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// Replace the password in a connection URL with `****`.
pub fn mask_password(url: &str) -> String {
    match Regex::new(r"^([a-zA-Z][a-zA-Z0-9+.-]*://[^:/@]+):[^@]*@") {
        Ok(re) => re.replace(url, "$1:****@").into_owned(),
        Err(_) => "<redacted>".to_string(),
    }
}
