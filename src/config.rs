//! Konfiguration
//!
//! Reihenfolge: Defaults, dann optional `config.json` im Config-Verzeichnis
//! der Plattform, dann Umgebungsvariablen.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

const DEFAULT_SIGNALING_URL: &str = "http://localhost:5050";
const DEFAULT_STUN_URLS: [&str; 2] = [
    "stun:stun.l.google.com:19302",
    "stun:stun1.l.google.com:19302",
];
const DEFAULT_KEEPALIVE_SECS: u64 = 25;

const CONFIG_FILE: &str = "config.json";

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid signaling URL {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Incomplete TURN configuration: {0} missing")]
    IncompleteTurn(&'static str),
}

// ============================================================================
// CONFIG
// ============================================================================

/// TURN Server mit Zugangsdaten
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnServer {
    pub url: String,
    pub username: String,
    pub credential: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Adresse des Relays (http/https oder ws/wss)
    pub signaling_url: String,
    pub stun_urls: Vec<String>,
    pub turn: Option<TurnServer>,
    /// Intervall der WebSocket-Pings
    pub keepalive_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            signaling_url: DEFAULT_SIGNALING_URL.to_string(),
            stun_urls: DEFAULT_STUN_URLS.iter().map(|s| s.to_string()).collect(),
            turn: None,
            keepalive_secs: DEFAULT_KEEPALIVE_SECS,
        }
    }
}

impl Config {
    /// Lädt die Konfiguration aus Datei und Umgebung
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match Self::config_path() {
            Some(path) if path.exists() => {
                tracing::info!("Loading config from {}", path.display());
                Self::from_file(&path)?
            }
            _ => Self::default(),
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        config.websocket_url()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Fehlende Felder bekommen ihre Defaults
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Überschreibt Werte aus `SIGNALING_URL` und `TURN_*`
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("SIGNALING_URL") {
            self.signaling_url = url;
        }

        let turn_url = lookup("TURN_URL");
        let username = lookup("TURN_USERNAME");
        let credential = lookup("TURN_CREDENTIAL");

        if let Some(url) = turn_url {
            let username = username
                .or_else(|| self.turn.as_ref().map(|t| t.username.clone()))
                .ok_or(ConfigError::IncompleteTurn("TURN_USERNAME"))?;
            let credential = credential
                .or_else(|| self.turn.as_ref().map(|t| t.credential.clone()))
                .ok_or(ConfigError::IncompleteTurn("TURN_CREDENTIAL"))?;
            self.turn = Some(TurnServer {
                url,
                username,
                credential,
            });
        } else if let Some(turn) = self.turn.as_mut() {
            if let Some(username) = username {
                turn.username = username;
            }
            if let Some(credential) = credential {
                turn.credential = credential;
            }
        }

        Ok(())
    }

    /// WebSocket-URL des Relays (http → ws, https → wss)
    pub fn websocket_url(&self) -> Result<Url, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidUrl {
            url: self.signaling_url.clone(),
            reason,
        };

        let mut url = Url::parse(&self.signaling_url).map_err(|e| invalid(e.to_string()))?;

        let scheme = match url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => return Err(invalid(format!("unsupported scheme {other:?}"))),
        };
        url.set_scheme(scheme)
            .map_err(|_| invalid("cannot change scheme".to_string()))?;

        Ok(url)
    }

    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs.max(1))
    }

    fn config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("org", "echolink", "echolink")
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_point_at_local_relay() {
        let config = Config::default();
        assert_eq!(config.signaling_url, "http://localhost:5050");
        assert_eq!(config.stun_urls.len(), 2);
        assert!(config.turn.is_none());
        assert_eq!(config.keepalive(), Duration::from_secs(25));
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let config =
            Config::from_json(r#"{"signaling_url": "https://relay.example.org"}"#).unwrap();

        assert_eq!(config.signaling_url, "https://relay.example.org");
        assert_eq!(config.stun_urls, Config::default().stun_urls);
        assert_eq!(config.keepalive_secs, 25);
    }

    #[test]
    fn malformed_file_is_rejected() {
        assert!(matches!(
            Config::from_json("{ signaling_url"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn environment_overrides_file() {
        let mut config = Config::from_json(r#"{"signaling_url": "http://a:1"}"#).unwrap();
        config
            .apply_env(env(&[
                ("SIGNALING_URL", "http://b:2"),
                ("TURN_URL", "turn:turn.example.org:3478"),
                ("TURN_USERNAME", "alice"),
                ("TURN_CREDENTIAL", "secret"),
            ]))
            .unwrap();

        assert_eq!(config.signaling_url, "http://b:2");
        assert_eq!(
            config.turn,
            Some(TurnServer {
                url: "turn:turn.example.org:3478".into(),
                username: "alice".into(),
                credential: "secret".into(),
            })
        );
    }

    #[test]
    fn turn_url_without_credentials_fails() {
        let mut config = Config::default();
        let result = config.apply_env(env(&[("TURN_URL", "turn:t:3478")]));
        assert!(matches!(
            result,
            Err(ConfigError::IncompleteTurn("TURN_USERNAME"))
        ));
    }

    #[test]
    fn turn_credentials_update_file_server() {
        let mut config = Config::from_json(
            r#"{"turn": {"url": "turn:t:3478", "username": "old", "credential": "old"}}"#,
        )
        .unwrap();
        config
            .apply_env(env(&[("TURN_CREDENTIAL", "new")]))
            .unwrap();

        let turn = config.turn.unwrap();
        assert_eq!(turn.username, "old");
        assert_eq!(turn.credential, "new");
    }

    #[test]
    fn websocket_url_maps_scheme() {
        let mut config = Config::default();
        assert_eq!(config.websocket_url().unwrap().as_str(), "ws://localhost:5050/");

        config.signaling_url = "https://relay.example.org/socket".into();
        assert_eq!(
            config.websocket_url().unwrap().as_str(),
            "wss://relay.example.org/socket"
        );

        config.signaling_url = "ftp://relay.example.org".into();
        assert!(matches!(
            config.websocket_url(),
            Err(ConfigError::InvalidUrl { .. })
        ));
    }
}
