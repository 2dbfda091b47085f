use anyhow::{Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::config::AppConfig;

#[derive(Serialize)]
struct CheckResult {
    valid: bool,
    config_type: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    details: serde_json::Value,
}

/// Expand path with tilde (~) and make it absolute
pub fn expand_path(path: &str) -> Result<String> {
    let expanded = shellexpand::tilde(path);
    let path_buf = PathBuf::from(expanded.as_ref());

    if path_buf.is_absolute() {
        Ok(expanded.into_owned())
    } else {
        std::env::current_dir()
            .context("Failed to get current directory")?
            .join(&path_buf)
            .to_str()
            .map(|s| s.to_string())
            .ok_or_else(|| anyhow::anyhow!("Invalid path: {}", path))
    }
}

fn print_result(result: &CheckResult) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(result)?);
    Ok(())
}

/// Check configuration file format
pub fn check_config(config_path: &str, format: &str) -> Result<()> {
    let path = Path::new(config_path);

    if !path.exists() {
        if format == "json" {
            print_result(&CheckResult {
                valid: false,
                config_type: "unknown".to_string(),
                warnings: vec![],
                error: Some(format!("Configuration file not found: {}", config_path)),
                details: serde_json::json!({}),
            })?;
        } else {
            println!("✗ Configuration file not found: {}", config_path);
        }
        anyhow::bail!("Configuration file not found: {}", config_path);
    }

    if format == "text" {
        println!("Checking configuration file: {}\n", config_path);
    }

    let loaded = AppConfig::from_file(config_path);
    let (config_type, details, warnings) = match &loaded {
        Ok(AppConfig::Server(config)) => {
            let channel = config.channel_config();
            let mut warnings = Vec::new();
            if config.server.bind_addr == "127.0.0.1" || config.server.bind_addr == "localhost" {
                warnings.push("bind_addr is loopback, remote clients cannot reach it".to_string());
            }
            let details = serde_json::json!({
                "bind": format!("{}:{}", config.server.bind_addr, config.server.bind_port),
                "target": format!("{}:{}", config.server.target_addr, config.server.target_port),
                "mode": config.server.mode.to_string(),
                "interval_ms": channel.interval_ms,
                "kcp": config.kcp,
                "limits": config.limits,
            });
            ("server", details, warnings)
        }
        Ok(AppConfig::Client(config)) => {
            let channel = config.channel_config();
            let mut warnings = Vec::new();
            if config.client.listen_addr == "0.0.0.0" {
                warnings.push("listen_addr exposes the tunnel to all interfaces".to_string());
            }
            let details = serde_json::json!({
                "server": format!("{}:{}", config.client.server_addr, config.client.server_port),
                "listen": format!("{}:{}", config.client.listen_addr, config.client.listen_port),
                "mode": config.client.mode.to_string(),
                "interval_ms": channel.interval_ms,
                "kcp": config.kcp,
                "limits": config.limits,
            });
            ("client", details, warnings)
        }
        Err(e) => {
            if format == "json" {
                print_result(&CheckResult {
                    valid: false,
                    config_type: "unknown".to_string(),
                    warnings: vec![],
                    error: Some(format!("{:#}", e)),
                    details: serde_json::json!({}),
                })?;
            } else {
                println!("✗ Configuration validation failed!");
                println!("\nError details:");
                println!("{:#}", e);
                println!("\nCommon issues:");
                println!("  1. Check TOML syntax (brackets, quotes, commas)");
                println!("  2. Ensure the [server] or [client] section is present");
                println!("  3. Ensure port numbers are valid (1-65535)");
                println!("  4. mode must be one of: default, normal, fast, fast2, fast3");
                println!("  5. kcp.mtu must be within 50..=1500");
            }
            anyhow::bail!("Invalid configuration: {}", config_path);
        }
    };

    if format == "json" {
        print_result(&CheckResult {
            valid: true,
            config_type: config_type.to_string(),
            warnings,
            error: None,
            details,
        })?;
    } else {
        println!("✓ Configuration type: {}", config_type);
        if let Some(map) = details.as_object() {
            for (key, value) in map {
                println!("✓ {}: {}", key, value);
            }
        }
        for warning in &warnings {
            println!("⚠ Warning: {}", warning);
        }
        println!("\n✓ Configuration is valid!");
    }

    Ok(())
}
