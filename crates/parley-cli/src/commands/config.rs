//! Config command handlers

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

use parley_core::Config;

use crate::output::{Output, OutputFormat};

/// Keys accepted by `config set`
const KEYS: &str = "api_url, push_url, token, user_id, data_dir, log_file, log_level, \
                    typing_ttl_ms, message_page_size, keep_failed_sends, \
                    reconnect.base_delay_ms, reconnect.max_delay_ms, reconnect.max_attempts, \
                    requests.retry_attempts, requests.retry_base_delay_ms, \
                    requests.retry_max_delay_ms, requests.timeout_ms";

/// Show current configuration
pub fn show(config_path: Option<&Path>, output: &Output) -> Result<()> {
    let config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "api_url": config.api_url,
                    "push_url": config.push_url,
                    "token": config.token.as_deref().map(mask),
                    "user_id": config.user_id,
                    "data_dir": config.data_dir,
                    "log_file": config.log_path(),
                    "log_level": config.log_level,
                    "typing_ttl_ms": config.typing_ttl_ms,
                    "message_page_size": config.message_page_size,
                    "keep_failed_sends": config.keep_failed_sends,
                    "reconnect": config.reconnect,
                    "requests": config.requests
                })
            );
        }
        OutputFormat::Quiet => {
            println!("{}", config.api_url);
        }
        OutputFormat::Human => {
            let effective_path = config_path
                .map(Path::to_path_buf)
                .unwrap_or_else(Config::config_file_path);
            println!("Configuration:");
            println!("  api_url:           {}", config.api_url);
            println!("  push_url:          {}", config.push_url);
            println!(
                "  token:             {}",
                config
                    .token
                    .as_deref()
                    .map(mask)
                    .unwrap_or_else(|| "(not set)".to_string())
            );
            println!(
                "  user_id:           {}",
                config.user_id.as_deref().unwrap_or("(from token)")
            );
            println!("  data_dir:          {}", config.data_dir.display());
            println!("  log_file:          {}", config.log_path().display());
            println!("  log_level:         {}", config.log_level);
            println!("  typing_ttl_ms:     {}", config.typing_ttl_ms);
            println!("  message_page_size: {}", config.message_page_size);
            println!("  keep_failed_sends: {}", config.keep_failed_sends);
            println!(
                "  reconnect:         {}ms base, {}ms cap, {} attempts",
                config.reconnect.base_delay_ms,
                config.reconnect.max_delay_ms,
                config.reconnect.max_attempts
            );
            println!(
                "  requests:          {} attempts, {}ms timeout",
                config.requests.retry_attempts, config.requests.timeout_ms
            );
            println!();
            println!("Config file: {}", effective_path.display());
        }
    }

    Ok(())
}

/// Set a configuration value
pub fn set(key: String, value: String, config_path: Option<&Path>, output: &Output) -> Result<()> {
    let mut config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;

    apply(&mut config, &key, &value)?;

    // Save to the CLI-specified path or default
    let save_path = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(Config::config_file_path);
    config
        .save_to_path(&save_path)
        .context("Failed to save configuration")?;

    let shown = if key == "token" { mask(&value) } else { value };
    output.success(&format!("Set {} = {}", key, shown));

    Ok(())
}

/// Apply one `key = value` change
fn apply(config: &mut Config, key: &str, value: &str) -> Result<()> {
    match key {
        "api_url" => config.api_url = value.to_string(),
        "push_url" => config.push_url = value.to_string(),
        "token" => config.token = optional(value),
        "user_id" => config.user_id = optional(value),
        "data_dir" => config.data_dir = PathBuf::from(value),
        "log_file" => config.log_file = optional(value).map(PathBuf::from),
        "log_level" => config.log_level = value.to_string(),
        "typing_ttl_ms" => config.typing_ttl_ms = number(key, value)?,
        "message_page_size" => config.message_page_size = number(key, value)?,
        "keep_failed_sends" => {
            config.keep_failed_sends = value
                .parse()
                .context("Invalid value for keep_failed_sends. Use 'true' or 'false'.")?;
        }
        "reconnect.base_delay_ms" => config.reconnect.base_delay_ms = number(key, value)?,
        "reconnect.max_delay_ms" => config.reconnect.max_delay_ms = number(key, value)?,
        "reconnect.max_attempts" => config.reconnect.max_attempts = number(key, value)?,
        "requests.retry_attempts" => config.requests.retry_attempts = number(key, value)?,
        "requests.retry_base_delay_ms" => {
            config.requests.retry_base_delay_ms = number(key, value)?
        }
        "requests.retry_max_delay_ms" => config.requests.retry_max_delay_ms = number(key, value)?,
        "requests.timeout_ms" => config.requests.timeout_ms = number(key, value)?,
        _ => {
            bail!(
                "Unknown configuration key: '{}'\nValid keys: {}",
                key,
                KEYS
            );
        }
    }
    Ok(())
}

/// Empty or "none" clears an optional value
fn optional(value: &str) -> Option<String> {
    if value.is_empty() || value == "none" {
        None
    } else {
        Some(value.to_string())
    }
}

fn number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| anyhow::anyhow!("Invalid value for {}: expected a number", key))
}

/// Hide all but the last four characters of a secret
fn mask(secret: &str) -> String {
    let count = secret.chars().count();
    if count <= 4 {
        return "****".to_string();
    }
    let tail: String = secret.chars().skip(count - 4).collect();
    format!("****{}", tail)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_known_keys() {
        let mut config = Config::default();
        apply(&mut config, "push_url", "wss://chat.example.com/events").unwrap();
        apply(&mut config, "keep_failed_sends", "true").unwrap();
        apply(&mut config, "reconnect.max_attempts", "3").unwrap();
        apply(&mut config, "token", "abc").unwrap();

        assert_eq!(config.push_url, "wss://chat.example.com/events");
        assert!(config.keep_failed_sends);
        assert_eq!(config.reconnect.max_attempts, 3);
        assert_eq!(config.token.as_deref(), Some("abc"));

        apply(&mut config, "token", "none").unwrap();
        assert!(config.token.is_none());
    }

    #[test]
    fn test_apply_rejects_bad_input() {
        let mut config = Config::default();
        assert!(apply(&mut config, "colour", "blue").is_err());
        assert!(apply(&mut config, "typing_ttl_ms", "soon").is_err());
        assert!(apply(&mut config, "keep_failed_sends", "maybe").is_err());
    }

    #[test]
    fn test_mask() {
        assert_eq!(mask("abc"), "****");
        assert_eq!(mask("eyJhbGciOi.secret"), "****cret");
    }

    #[test]
    fn test_set_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let initial = Config {
            data_dir: dir.path().join("data"),
            ..Config::default()
        };
        initial.save_to_path(&path).unwrap();
        let output = Output::new(OutputFormat::Quiet);

        set(
            "message_page_size".to_string(),
            "25".to_string(),
            Some(path.as_path()),
            &output,
        )
        .unwrap();

        let config = Config::load_from_path(&path).unwrap();
        assert_eq!(config.message_page_size, 25);
    }
}
