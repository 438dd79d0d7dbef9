use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use valwatch_notifier::NotifyConfig;
use valwatch_watcher::{ChainConfig, WatcherConfig};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub log_level: Option<String>,
    #[serde(default)]
    pub chains: Vec<ChainConfig>,
    #[serde(default)]
    pub notifications: NotificationsConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationsConfig {
    #[serde(default)]
    pub discord: Option<DiscordConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscordConfig {
    pub webhook: String,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config = serde_json::from_str(&data)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        config
            .watcher_config()
            .validate()
            .context("Invalid config")?;

        Ok(config)
    }

    /// `tracing` filter directive for the configured level; `info` when unset or unknown.
    pub fn log_filter(&self) -> &'static str {
        match self
            .log_level
            .as_deref()
            .map(str::to_ascii_uppercase)
            .as_deref()
        {
            Some("DEBUG") => "debug",
            Some("WARN") => "warn",
            Some("ERROR") => "error",
            _ => "info",
        }
    }

    pub fn watcher_config(&self) -> WatcherConfig {
        WatcherConfig::new(self.chains.clone())
    }

    /// The `DISCORD_WEBHOOK` environment variable takes precedence over the file.
    pub fn notify_config(&self) -> NotifyConfig {
        let discord_webhook = std::env::var("DISCORD_WEBHOOK")
            .ok()
            .filter(|w| !w.is_empty())
            .or_else(|| self.notifications.discord.as_ref().map(|d| d.webhook.clone()));

        NotifyConfig { discord_webhook }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"{
        "log_level": "debug",
        "chains": [{
            "name": "cosmoshub",
            "validator_address": "cosmosvaloper1abc",
            "rpc": ["http://a:26657", "http://b:26657"],
            "token": { "label": "ATOM" },
            "notification": { "minimum_delegation": 100 }
        }],
        "notifications": { "discord": { "webhook": "https://discord.invalid/hook" } }
    }"#;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_sample() {
        let file = write_config(SAMPLE);
        let config = Config::load(file.path()).unwrap();

        assert_eq!(config.log_filter(), "debug");
        assert_eq!(config.chains.len(), 1);
        assert_eq!(config.chains[0].endpoints.len(), 2);
        assert_eq!(config.chains[0].token_coefficient(), 1_000_000);
        assert_eq!(
            config.notifications.discord.unwrap().webhook,
            "https://discord.invalid/hook"
        );
    }

    #[test]
    fn test_load_rejects_empty_chain_list() {
        let file = write_config(r#"{ "chains": [] }"#);
        assert!(Config::load(file.path()).is_err());
    }

    #[test]
    fn test_load_rejects_invalid_json() {
        let file = write_config("chains: []");
        assert!(Config::load(file.path()).is_err());
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(Config::load(Path::new("/nonexistent/valwatch.json")).is_err());
    }

    #[test]
    fn test_unknown_log_level_defaults_to_info() {
        let config = Config {
            log_level: Some("TRACE-ALL".to_string()),
            ..Default::default()
        };
        assert_eq!(config.log_filter(), "info");
        assert_eq!(Config::default().log_filter(), "info");
    }
}
