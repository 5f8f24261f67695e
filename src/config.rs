//! Optional TOML profile holding connection defaults.
//!
//! ```toml
//! host = "127.0.0.1"
//! port = 8100
//! access_key = "accessKey1"
//! secret_key = "verySecretKey1"
//! ssl = false
//! ```
//!
//! Values given on the command line always win over the profile.

use serde::Deserialize;
use std::path::Path;

use crate::error::ConfigError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Profile {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub ssl: Option<bool>,
}

impl Profile {
    pub fn from_toml(path: &str, text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_string(),
            source,
        })
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let display = path.display().to_string();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: display.clone(),
            source,
        })?;
        Self::from_toml(&display, &text)
    }
}
