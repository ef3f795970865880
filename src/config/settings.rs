//! TOML settings file.
//!
//! ```toml
//! [continuation]
//! anchor_chars = 10
//! max_steps = 8
//!
//! [flush]
//! min_chars = 32
//! interval_ms = 50
//!
//! [request]
//! timeout_secs = 120
//!
//! [providers.ollama]
//! base_url = "http://gpu-box:11434"
//!
//! [agents.reviewer]
//! system = "You review patches."
//! user = "Review this:\n{input}"
//! temperature = 0.2
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::MoaiError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub continuation: ContinuationSettings,
    pub flush: FlushSettings,
    pub request: RequestSettings,
    pub providers: BTreeMap<String, ProviderSettings>,
    pub agents: BTreeMap<String, AgentSettings>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContinuationSettings {
    /// Characters taken from the end of the buffer as splice anchor.
    pub anchor_chars: usize,
    /// Continuation calls allowed after the first one.
    pub max_steps: u32,
    /// Characters held back on continuation steps for echo detection.
    /// Defaults to four times `anchor_chars`.
    pub echo_window: Option<usize>,
}

impl Default for ContinuationSettings {
    fn default() -> Self {
        Self {
            anchor_chars: 10,
            max_steps: 8,
            echo_window: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlushSettings {
    pub min_chars: usize,
    pub interval_ms: u64,
}

impl Default for FlushSettings {
    fn default() -> Self {
        Self {
            min_chars: 32,
            interval_ms: 50,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestSettings {
    pub timeout_secs: Option<u64>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
}

impl Default for RequestSettings {
    fn default() -> Self {
        Self {
            timeout_secs: Some(120),
            max_tokens: None,
            temperature: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    pub system: Option<String>,
    pub user: Option<String>,
    pub temperature: Option<f64>,
}

impl Settings {
    /// Parse settings from TOML text.
    pub fn from_toml(text: &str) -> Result<Self, MoaiError> {
        Ok(toml::from_str(text)?)
    }

    /// Load settings from `path`. A missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self, MoaiError> {
        match std::fs::read_to_string(path) {
            Ok(text) => Self::from_toml(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// `<config_dir>/moai/config.toml`, when a home directory is known.
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "moai")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }
}
