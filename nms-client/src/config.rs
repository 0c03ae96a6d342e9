//! Load client config from file and environment.
//!
//! Two file formats are accepted. The line format holds one `Key value` pair per line:
//!
//! ```text
//! Id Sw-001
//! MAC 23F474D2AC67
//! NMS-Id localhost
//! NMS-UDP-port 2023
//! ```
//!
//! Files ending in `.toml` are read as TOML (`id`, `mac`, `server`, `udp_port` and an
//! optional `[timing]` table). Env overrides: NMS_CLIENT_ID, NMS_CLIENT_MAC, NMS_SERVER,
//! NMS_UDP_PORT.

use std::path::{Path, PathBuf};

use nms_core::{ClientIdentity, FieldError, ServerEndpoint, Timing};
use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error(transparent)]
    Toml(#[from] toml::de::Error),
    #[error("line {line}: {reason}")]
    Line { line: usize, reason: String },
    #[error("missing {0}")]
    Missing(&'static str),
    #[error("timing.{0} must be greater than zero")]
    Timing(&'static str),
    #[error("invalid {field}: {source}")]
    Identity {
        field: &'static str,
        source: FieldError,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Equipment id, at most 6 characters.
    #[serde(default)]
    pub id: String,
    /// Equipment MAC, 12 hex digits.
    #[serde(default)]
    pub mac: String,
    /// NMS server host name or address (default localhost).
    #[serde(default = "default_server")]
    pub server: String,
    /// NMS server UDP port (default 2023).
    #[serde(default = "default_udp_port")]
    pub udp_port: u16,
    #[serde(default)]
    pub timing: Timing,
}

fn default_server() -> String {
    "localhost".to_string()
}
fn default_udp_port() -> u16 {
    2023
}

impl Default for Config {
    fn default() -> Self {
        Self {
            id: String::new(),
            mac: String::new(),
            server: default_server(),
            udp_port: default_udp_port(),
            timing: Timing::default(),
        }
    }
}

/// Load config: file, then env vars, then validation.
pub fn load(path: &Path) -> Result<Config, ConfigError> {
    load_with(path, |key| std::env::var(key).ok())
}

fn load_with(path: &Path, env: impl Fn(&str) -> Option<String>) -> Result<Config, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let mut c = if path.extension().is_some_and(|ext| ext == "toml") {
        toml::from_str::<Config>(&text)?
    } else {
        parse_lines(&text)?
    };
    c.apply_env(env);
    c.validate()?;
    Ok(c)
}

/// Parse the line format. Keys are case-insensitive and may come in any order.
pub fn parse_lines(text: &str) -> Result<Config, ConfigError> {
    let mut c = Config::default();
    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut words = line.split_whitespace();
        let key = words.next().unwrap_or_default();
        let value = words.next().ok_or_else(|| ConfigError::Line {
            line: idx + 1,
            reason: format!("{key} has no value"),
        })?;
        match key.to_ascii_lowercase().as_str() {
            "id" => c.id = value.to_string(),
            "mac" => c.mac = value.to_string(),
            "nms-id" => c.server = value.to_string(),
            "nms-udp-port" => {
                c.udp_port = value.parse().map_err(|_| ConfigError::Line {
                    line: idx + 1,
                    reason: format!("bad UDP port {value:?}"),
                })?
            }
            _ => tracing::warn!(line = idx + 1, key, "ignoring unknown config key"),
        }
    }
    Ok(c)
}

impl Config {
    fn apply_env(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(s) = env("NMS_CLIENT_ID") {
            self.id = s;
        }
        if let Some(s) = env("NMS_CLIENT_MAC") {
            self.mac = s;
        }
        if let Some(s) = env("NMS_SERVER") {
            self.server = s;
        }
        if let Some(s) = env("NMS_UDP_PORT") {
            match s.parse::<u16>() {
                Ok(p) => self.udp_port = p,
                Err(_) => tracing::warn!(value = %s, "ignoring invalid NMS_UDP_PORT"),
            }
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.id.is_empty() {
            return Err(ConfigError::Missing("Id"));
        }
        if self.mac.is_empty() {
            return Err(ConfigError::Missing("MAC"));
        }
        if self.server.is_empty() {
            return Err(ConfigError::Missing("NMS-Id"));
        }
        self.validate_timing()?;
        self.identity().map(|_| ())
    }

    /// Zero counts or intervals would spin the workers or re-register every cycle.
    fn validate_timing(&self) -> Result<(), ConfigError> {
        let t = &self.timing;
        let nonzero = [
            ("unit_ms", t.unit_ms),
            ("alive_interval", t.alive_interval),
            ("max_pending_alives", u64::from(t.max_pending_alives)),
            ("packets_per_round", u64::from(t.packets_per_round)),
            ("rounds", u64::from(t.rounds)),
        ];
        match nonzero.iter().find(|(_, v)| *v == 0) {
            Some((name, _)) => Err(ConfigError::Timing(*name)),
            None => Ok(()),
        }
    }

    pub fn identity(&self) -> Result<ClientIdentity, ConfigError> {
        ClientIdentity::new(&self.id, &self.mac).map_err(|source| ConfigError::Identity {
            field: if self.id.len() > nms_core::identity::ID_LEN { "Id" } else { "MAC" },
            source,
        })
    }

    pub fn endpoint(&self) -> ServerEndpoint {
        ServerEndpoint {
            host: self.server.clone(),
            udp_port: self.udp_port,
        }
    }
}
