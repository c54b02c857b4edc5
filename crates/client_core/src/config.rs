use std::{collections::HashMap, fs, path::Path};

use thiserror::Error;
use tracing::warn;
use url::Url;

pub const DEFAULT_SETTINGS_FILE: &str = "chat_client.toml";
/// Largest page the server hands out for one `list_messages` call.
pub const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    pub server_url: String,
    pub access_token: Option<String>,
    pub account_id: i64,
    pub page_size: u32,
    pub upload_chunk_size: usize,
    pub event_buffer: usize,
    /// Read tracking is disabled unless explicitly enabled.
    pub mark_read_on_open: bool,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:8443".into(),
            access_token: None,
            account_id: 0,
            page_size: 50,
            upload_chunk_size: 64 * 1024,
            event_buffer: 256,
            mark_read_on_open: false,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid server url '{url}': {source}")]
    InvalidServerUrl {
        url: String,
        source: url::ParseError,
    },
    #[error("server url '{0}' must use http or https")]
    UnsupportedScheme(String),
    #[error("{field} must be greater than zero")]
    ZeroValue { field: &'static str },
    #[error("page_size {0} exceeds the server maximum page size")]
    PageSizeTooLarge(u32),
}

impl ClientSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let parsed =
            Url::parse(&self.server_url).map_err(|source| ConfigError::InvalidServerUrl {
                url: self.server_url.clone(),
                source,
            })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ConfigError::UnsupportedScheme(self.server_url.clone()));
        }
        if self.page_size == 0 {
            return Err(ConfigError::ZeroValue { field: "page_size" });
        }
        if self.page_size > MAX_PAGE_SIZE {
            return Err(ConfigError::PageSizeTooLarge(self.page_size));
        }
        if self.upload_chunk_size == 0 {
            return Err(ConfigError::ZeroValue {
                field: "upload_chunk_size",
            });
        }
        if self.event_buffer == 0 {
            return Err(ConfigError::ZeroValue {
                field: "event_buffer",
            });
        }
        Ok(())
    }

    /// Server url without a trailing slash, ready for path concatenation.
    pub fn base_url(&self) -> &str {
        self.server_url.trim_end_matches('/')
    }
}

pub fn load_settings() -> Result<ClientSettings, ConfigError> {
    load_settings_from(Path::new(DEFAULT_SETTINGS_FILE), |key| std::env::var(key).ok())
}

pub fn load_settings_from(
    path: &Path,
    env: impl Fn(&str) -> Option<String>,
) -> Result<ClientSettings, ConfigError> {
    let mut settings = ClientSettings::default();

    if let Ok(raw) = fs::read_to_string(path) {
        match toml::from_str::<HashMap<String, toml::Value>>(&raw) {
            Ok(file_cfg) => apply_file_values(&mut settings, &file_cfg),
            Err(err) => warn!(
                path = %path.display(),
                "config: ignoring unparseable settings file: {err}"
            ),
        }
    }

    if let Some(v) = env("CHAT_SERVER_URL") {
        settings.server_url = v;
    }
    if let Some(v) = env("APP__SERVER_URL") {
        settings.server_url = v;
    }

    if let Some(v) = env("CHAT_ACCESS_TOKEN") {
        settings.access_token = Some(v);
    }
    if let Some(v) = env("APP__ACCESS_TOKEN") {
        settings.access_token = Some(v);
    }

    if let Some(parsed) = env("APP__ACCOUNT_ID").and_then(|v| v.parse().ok()) {
        settings.account_id = parsed;
    }
    if let Some(parsed) = env("APP__PAGE_SIZE").and_then(|v| v.parse().ok()) {
        settings.page_size = parsed;
    }
    if let Some(parsed) = env("APP__UPLOAD_CHUNK_SIZE").and_then(|v| v.parse().ok()) {
        settings.upload_chunk_size = parsed;
    }
    if let Some(parsed) = env("APP__MARK_READ_ON_OPEN").and_then(|v| parse_flag(&v)) {
        settings.mark_read_on_open = parsed;
    }

    settings.validate()?;
    Ok(settings)
}

fn apply_file_values(settings: &mut ClientSettings, file_cfg: &HashMap<String, toml::Value>) {
    if let Some(v) = file_cfg.get("server_url").and_then(toml::Value::as_str) {
        settings.server_url = v.to_string();
    }
    if let Some(v) = file_cfg.get("access_token").and_then(toml::Value::as_str) {
        settings.access_token = Some(v.to_string());
    }
    if let Some(v) = file_cfg.get("account_id").and_then(toml::Value::as_integer) {
        settings.account_id = v;
    }
    if let Some(v) = file_cfg
        .get("page_size")
        .and_then(toml::Value::as_integer)
        .and_then(|v| u32::try_from(v).ok())
    {
        settings.page_size = v;
    }
    if let Some(v) = file_cfg
        .get("upload_chunk_size")
        .and_then(toml::Value::as_integer)
        .and_then(|v| usize::try_from(v).ok())
    {
        settings.upload_chunk_size = v;
    }
    if let Some(v) = file_cfg
        .get("event_buffer")
        .and_then(toml::Value::as_integer)
        .and_then(|v| usize::try_from(v).ok())
    {
        settings.event_buffer = v;
    }
    if let Some(v) = file_cfg.get("mark_read_on_open").and_then(toml::Value::as_bool) {
        settings.mark_read_on_open = v;
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
