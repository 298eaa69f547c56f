use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const DEFAULT_CONFIG_PATH: &str = "config/client.json";

/// What happens to the typed text when the durable send fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendFailurePolicy {
    #[default]
    Discard,
    Retain,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub api_base_url: String,
    pub push_addr: String,
    pub user_id: Option<String>,
    pub typing_quiet_ms: u64,
    pub peer_typing_timeout_ms: u64,
    pub send_failure_policy: SendFailurePolicy,
    pub request_timeout_secs: u64,
    pub channel_capacity: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:5000/api".to_string(),
            push_addr: "127.0.0.1:5001".to_string(),
            user_id: None,
            typing_quiet_ms: 2000,
            peer_typing_timeout_ms: 5000,
            send_failure_policy: SendFailurePolicy::Discard,
            request_timeout_secs: 10,
            channel_capacity: 256,
        }
    }
}

impl AppConfig {
    pub fn typing_quiet(&self) -> Duration {
        Duration::from_millis(self.typing_quiet_ms)
    }

    pub fn peer_typing_timeout(&self) -> Duration {
        Duration::from_millis(self.peer_typing_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Applies `CHAT_USER_ID` and `CHAT_API_URL` on top of the file values.
    pub fn apply_env(&mut self) {
        if let Ok(user_id) = std::env::var("CHAT_USER_ID") {
            if !user_id.trim().is_empty() {
                self.user_id = Some(user_id.trim().to_string());
            }
        }
        if let Ok(url) = std::env::var("CHAT_API_URL") {
            if !url.trim().is_empty() {
                self.api_base_url = url.trim().to_string();
            }
        }
    }
}

pub fn load_config(path: &str) -> AppConfig {
    let path = Path::new(path);
    match fs::read_to_string(path) {
        Ok(content) => parse_config(&content).unwrap_or_else(|err| {
            log::warn!("Failed to parse config file {}: {err}", path.display());
            AppConfig::default()
        }),
        Err(err) => {
            log::info!(
                "Config file {} not found ({err}); using defaults",
                path.display()
            );
            AppConfig::default()
        }
    }
}

pub fn parse_config(content: &str) -> Result<AppConfig, serde_json::Error> {
    serde_json::from_str::<AppConfig>(content)
}

pub fn save_config(path: &str, config: &AppConfig) -> Result<(), ConfigError> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let json = serde_json::to_string_pretty(config)?;
    fs::write(path, json)?;
    Ok(())
}
