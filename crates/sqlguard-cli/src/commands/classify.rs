//! `sqlguard classify` - show the gateway decision for SQL text.

use anyhow::{Context, Result};
use serde_json::{json, Value};
use sqlguard_core::AccessMode;
use sqlguard_gateway::Gateway;
use std::path::Path;

use super::load_config;

pub fn run(config_path: Option<&Path>, sql: &str, mode: AccessMode) -> Result<()> {
    let config = load_config(config_path, None)?;
    let gateway = Gateway::new(&config.gateway);
    let output = describe(&gateway, sql, mode);
    println!(
        "{}",
        serde_json::to_string_pretty(&output).context("Failed to serialize decision")?
    );
    Ok(())
}

fn describe(gateway: &Gateway, sql: &str, mode: AccessMode) -> Value {
    json!({
        "mode": mode,
        "decision": gateway.validate(sql, mode),
        "classification": gateway.classify(sql),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_stacked_drop() {
        let gateway = Gateway::default();
        let output = describe(
            &gateway,
            "SELECT 1; DROP TABLE test_users;--",
            AccessMode::Restricted,
        );
        assert_eq!(output["mode"], "restricted");
        assert_eq!(output["decision"]["decision"], "deny");
        assert_eq!(output["classification"]["statements"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_describe_unrestricted_allows() {
        let gateway = Gateway::default();
        let output = describe(&gateway, "DROP TABLE test_users", AccessMode::Unrestricted);
        assert_eq!(output["decision"]["decision"], "allow");
    }
}
