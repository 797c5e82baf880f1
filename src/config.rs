use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::chat::{MergeOrder, ReconnectPolicy, SessionOptions};

pub const DEFAULT_CONFIG_PATH: &str = "config/chat.json";
pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8080/api";
pub const DEFAULT_BROKER_URL: &str = "ws://localhost:8080/ws/websocket";
pub const DEFAULT_DATABASE_PATH: &str = "data/client.db";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub api_base_url: String,
    pub broker_url: String,
    pub database_path: String,
    pub merge_order: MergeOrder,
    pub reconnect: ReconnectPolicy,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            broker_url: DEFAULT_BROKER_URL.to_string(),
            database_path: DEFAULT_DATABASE_PATH.to_string(),
            merge_order: MergeOrder::default(),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl AppConfig {
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            merge_order: self.merge_order,
            reconnect: self.reconnect,
        }
    }
}

pub fn load_config(path: &str) -> AppConfig {
    let path = Path::new(path);
    let config = match fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str::<AppConfig>(&content) {
            Ok(config) => config,
            Err(err) => {
                log::warn!("Failed to parse config file {}: {err}", path.display());
                AppConfig::default()
            }
        },
        Err(err) => {
            log::info!(
                "Config file {} not found ({err}); using defaults",
                path.display()
            );
            AppConfig::default()
        }
    };
    apply_overrides(config, |key| std::env::var(key).ok())
}

/// Biến môi trường (kể cả từ `.env`) ghi đè giá trị trong file.
pub fn apply_overrides(
    mut config: AppConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> AppConfig {
    let set = |key: &str, field: &mut String| {
        if let Some(value) = lookup(key).filter(|value| !value.trim().is_empty()) {
            log::debug!("{key} overrides configured value");
            *field = value;
        }
    };
    set("CHAT_API_URL", &mut config.api_base_url);
    set("CHAT_BROKER_URL", &mut config.broker_url);
    set("CHAT_DATABASE_PATH", &mut config.database_path);
    config
}
