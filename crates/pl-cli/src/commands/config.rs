//! Config command implementations

use std::path::PathBuf;

use anyhow::{Context, Result};

use pl_core::config::{self, NodeConfig};

use crate::output::{print_error, print_info, print_success, print_warning};

fn resolve_path(config_path: Option<&PathBuf>) -> PathBuf {
    config_path
        .cloned()
        .unwrap_or_else(config::default_config_path)
}

/// Show current configuration
pub fn config_show(config_path: Option<&PathBuf>) -> Result<()> {
    let path = resolve_path(config_path);

    if !path.exists() {
        print_warning(&format!("No configuration file found at {:?}", path));
        print_info("Defaults are in effect; `peerlink config set` creates the file");
        return Ok(());
    }

    print_info(&format!("Configuration file: {:?}", path));
    println!();

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;
    println!("{}", content);

    Ok(())
}

/// Get a config value by key
pub fn config_get(config_path: Option<&PathBuf>, key: &str) -> Result<()> {
    let path = resolve_path(config_path);

    if !path.exists() {
        print_error(&format!("Config file not found: {:?}", path));
        return Ok(());
    }

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;
    let table: toml::Table =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    // Navigate through the key path (e.g. "peers.workstation")
    let mut current = &toml::Value::Table(table);
    for part in key.split('.') {
        let toml::Value::Table(t) = current else {
            print_error(&format!("Key not found: {}", key));
            return Ok(());
        };
        match t.get(part) {
            Some(value) => current = value,
            None => {
                print_error(&format!("Key not found: {}", key));
                return Ok(());
            }
        }
    }

    match current {
        toml::Value::String(s) => println!("{}", s),
        toml::Value::Table(_) => println!("{}", toml::to_string_pretty(current)?),
        other => println!("{}", other),
    }

    Ok(())
}

/// Set a config value by key
pub fn config_set(config_path: Option<&PathBuf>, key: &str, value: &str) -> Result<()> {
    let path = resolve_path(config_path);

    // Materialize the defaults on first use
    if !path.exists() {
        print_info("Creating default configuration...");
        config::save_config(&path, &NodeConfig::default())?;
    }

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;
    let mut table: toml::Table =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    let parts: Vec<&str> = key.split('.').collect();
    if parts.is_empty() || parts.iter().any(|p| p.is_empty()) {
        anyhow::bail!("Invalid key: {}", key);
    }

    // Navigate/create the path to the parent table
    let mut current = &mut table;
    for part in &parts[..parts.len() - 1] {
        current = current
            .entry(part.to_string())
            .or_insert_with(|| toml::Value::Table(toml::Table::new()))
            .as_table_mut()
            .ok_or_else(|| anyhow::anyhow!("Cannot navigate to key: {}", key))?;
    }

    let toml_value = if value == "true" {
        toml::Value::Boolean(true)
    } else if value == "false" {
        toml::Value::Boolean(false)
    } else if let Ok(i) = value.parse::<i64>() {
        toml::Value::Integer(i)
    } else {
        toml::Value::String(value.to_string())
    };
    let last_key = parts[parts.len() - 1];
    current.insert(last_key.to_string(), toml_value);

    // Reject values the node would refuse to load
    let _: NodeConfig = toml::Value::Table(table.clone())
        .try_into()
        .with_context(|| format!("{} = {} does not form a valid configuration", key, value))?;

    let new_content = toml::to_string_pretty(&table)?;
    std::fs::write(&path, new_content)
        .with_context(|| format!("Failed to write config file: {:?}", path))?;

    print_success(&format!("Set {} = {}", key, value));
    Ok(())
}

/// Print the config directory path
pub fn config_path() -> Result<()> {
    println!("{}", config::default_config_dir().display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_set_creates_and_validates() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");

        config_set(Some(&path), "control_port", "4000").unwrap();

        let loaded: NodeConfig = config::load_config(&path).unwrap();
        assert_eq!(loaded.control_port, 4000);
    }

    #[test]
    fn test_config_set_nested_peer() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");

        config_set(Some(&path), "peers.workstation", "10.0.0.7:2225").unwrap();

        let loaded: NodeConfig = config::load_config(&path).unwrap();
        assert_eq!(
            loaded.peers.get("workstation").map(String::as_str),
            Some("10.0.0.7:2225")
        );
    }

    #[test]
    fn test_config_set_rejects_invalid_value() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");

        // Ports are numbers; a string must not be written back.
        assert!(config_set(Some(&path), "control_port", "not-a-port").is_err());
    }
}
