//! Configuration loading.
//!
//! Handles reading the stompws configuration file and applying environment
//! overrides. Credentials may live in the file or come from `STOMPWS_LOGIN` /
//! `STOMPWS_PASSCODE`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::header;
use crate::frame::Headers;
use crate::reconnect::ReconnectOptions;
use crate::transport::ConnectRequest;
use crate::ws::http_to_ws_scheme;

/// Configuration for the stompws CLI.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Broker WebSocket URL. `http(s)://` is rewritten to `ws(s)://`.
    pub url: String,
    /// STOMP login.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub login: Option<String>,
    /// STOMP passcode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub passcode: Option<String>,
    /// Virtual host sent in the `host` header.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    /// Value of the CONNECT `heart-beat` header, e.g. `"0,10000"`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heart_beat: Option<String>,
    /// Seconds between reconnect checks. Unset disables reconnection.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconnect_interval_secs: Option<u64>,
    /// Double the reconnect delay while the broker stays unreachable.
    pub backoff: bool,
    /// Accept any server certificate.
    pub trust_all_certificates: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            url: "ws://localhost:61614/stomp".to_string(),
            login: None,
            passcode: None,
            host: None,
            heart_beat: None,
            reconnect_interval_secs: None,
            backoff: false,
            trust_all_certificates: false,
        }
    }
}

impl Config {
    /// Returns the platform configuration directory for stompws
    /// (Linux: `~/.config/stompws`, macOS: `~/Library/Application Support/stompws`).
    pub fn config_dir() -> Result<PathBuf> {
        Ok(dirs::config_dir()
            .context("Could not determine config directory")?
            .join("stompws"))
    }

    /// Loads configuration with environment variable overrides.
    ///
    /// An explicit `path` must exist. Without one, the default
    /// `config.json` is read when present and defaults are used otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load_from_file(path)?,
            None => {
                let default_path = Self::config_dir()?.join("config.json");
                if default_path.exists() {
                    Self::load_from_file(&default_path)?
                } else {
                    log::debug!("No config file at {}, using defaults", default_path.display());
                    Self::default()
                }
            }
        };
        config.apply_env_overrides();
        Ok(config)
    }

    fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply `STOMPWS_*` overrides resolved through `lookup`.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("STOMPWS_URL") {
            self.url = url;
        }

        if let Some(login) = lookup("STOMPWS_LOGIN") {
            self.login = Some(login);
        }

        if let Some(passcode) = lookup("STOMPWS_PASSCODE") {
            self.passcode = Some(passcode);
        }

        if let Some(host) = lookup("STOMPWS_HOST") {
            self.host = Some(host);
        }

        if let Some(interval) = lookup("STOMPWS_RECONNECT_INTERVAL") {
            match interval.parse::<u64>() {
                Ok(secs) => self.reconnect_interval_secs = Some(secs),
                Err(_) => log::warn!("Ignoring invalid STOMPWS_RECONNECT_INTERVAL: {interval}"),
            }
        }
    }

    /// CONNECT headers derived from the configured credentials.
    pub fn connect_headers(&self) -> Headers {
        let mut headers = Headers::new();
        let entries = [
            (header::LOGIN, &self.login),
            (header::PASSCODE, &self.passcode),
            (header::HOST, &self.host),
            (header::HEART_BEAT, &self.heart_beat),
        ];
        for (key, value) in entries {
            if let Some(value) = value {
                headers.insert(key.to_string(), value.clone());
            }
        }
        headers
    }

    /// Transport request for the configured broker.
    pub fn connect_request(&self) -> ConnectRequest {
        ConnectRequest::new(http_to_ws_scheme(&self.url))
            .trust_all_certificates(self.trust_all_certificates)
    }

    /// Reconnect settings, if reconnection is enabled.
    pub fn reconnect_options(&self) -> Option<ReconnectOptions> {
        self.reconnect_interval_secs.map(|secs| {
            ReconnectOptions::new(Duration::from_secs(secs))
                .headers(self.connect_headers())
                .backoff(self.backoff)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.url, "ws://localhost:61614/stomp");
        assert!(config.login.is_none());
        assert!(config.reconnect_options().is_none());
        assert!(config.connect_headers().is_empty());
    }

    #[test]
    fn test_load_from_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{"url": "https://broker.example.com/ws", "login": "guest", "heart_beat": "0,10000"}"#,
        )
        .unwrap();

        let config = Config::load_from_file(&path).unwrap();
        assert_eq!(config.login.as_deref(), Some("guest"));
        assert!(!config.backoff);
        assert_eq!(config.connect_request().url, "wss://broker.example.com/ws");
    }

    #[test]
    fn test_load_missing_explicit_path_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.json");
        let err = Config::load(Some(path.as_path())).unwrap_err();
        assert!(format!("{err:#}").contains("Failed to read config file"));
    }

    #[test]
    fn test_load_invalid_json_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(Config::load_from_file(&path).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("STOMPWS_URL", "ws://other:1234/stomp"),
            ("STOMPWS_LOGIN", "admin"),
            ("STOMPWS_PASSCODE", "secret"),
            ("STOMPWS_RECONNECT_INTERVAL", "5"),
        ]);
        let mut config = Config::default();
        config.apply_overrides(|key| env.get(key).map(|v| (*v).to_string()));

        assert_eq!(config.url, "ws://other:1234/stomp");
        assert_eq!(config.login.as_deref(), Some("admin"));
        assert_eq!(config.passcode.as_deref(), Some("secret"));
        assert_eq!(config.reconnect_interval_secs, Some(5));
    }

    #[test]
    fn test_invalid_reconnect_interval_is_ignored() {
        let mut config = Config::default();
        config.apply_overrides(|key| (key == "STOMPWS_RECONNECT_INTERVAL").then(|| "soon".into()));
        assert_eq!(config.reconnect_interval_secs, None);
    }

    #[test]
    fn test_connect_headers() {
        let config = Config {
            login: Some("guest".into()),
            passcode: Some("guest".into()),
            host: Some("/".into()),
            heart_beat: Some("0,10000".into()),
            ..Config::default()
        };
        let headers = config.connect_headers();
        assert_eq!(headers.len(), 4);
        assert_eq!(headers["heart-beat"], "0,10000");
        assert_eq!(headers["host"], "/");
    }

    #[test]
    fn test_reconnect_options_carry_headers() {
        let config = Config {
            login: Some("guest".into()),
            reconnect_interval_secs: Some(3),
            backoff: true,
            ..Config::default()
        };
        let options = config.reconnect_options().unwrap();
        assert_eq!(options.interval, Duration::from_secs(3));
        assert!(options.backoff);
        assert_eq!(options.headers["login"], "guest");
    }

    #[test]
    fn test_serialization_skips_unset_fields() {
        let json = serde_json::to_string(&Config::default()).unwrap();
        assert!(!json.contains("login"));
        assert!(!json.contains("passcode"));
    }
}
