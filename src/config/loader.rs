use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::env::Protocol;

/// Environment variable naming the config file when `--config` is absent.
pub const CONFIG_FILE_ENV_VARIABLE: &str = "API_DIFF_CONFIG";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthStyle {
    Header,
    Param,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct HostEntry {
    pub host: String,
    pub aliases: Vec<String>,
    pub protocol: Option<Protocol>,
    pub takes_arg: bool,
    pub key_env: Option<String>,
    pub key_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct ApiDiffConfig {
    pub name: Option<String>,
    pub auth_style: Option<AuthStyle>,
    pub auth_param: Option<String>,
    pub auth_type: Option<String>,
    pub key_types: Vec<String>,
    pub hosts: BTreeMap<String, HostEntry>,
}

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: ApiDiffConfig,
    pub path: Option<PathBuf>,
}

/// How requests authenticate, derived once from the config file.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AuthSettings {
    #[default]
    None,
    /// `Authorization: <scheme> <key>`
    Header { scheme: Option<String> },
    /// Key sent as a request parameter.
    Param { name: String },
}

impl ApiDiffConfig {
    pub fn auth_settings(&self) -> Result<AuthSettings> {
        match self.auth_style {
            None => Ok(AuthSettings::None),
            Some(AuthStyle::Header) => Ok(AuthSettings::Header {
                scheme: self.auth_type.clone().filter(|s| !s.is_empty()),
            }),
            Some(AuthStyle::Param) => match self.auth_param.as_deref() {
                Some(name) if !name.is_empty() => Ok(AuthSettings::Param {
                    name: name.to_string(),
                }),
                _ => bail!("authStyle \"param\" requires authParam in the config file"),
            },
        }
    }

    pub fn requires_key(&self) -> bool {
        self.auth_style.is_some()
    }

    /// Finds a host entry by name or alias.
    pub fn find_host(&self, name: &str) -> Option<(&str, &HostEntry)> {
        self.hosts
            .iter()
            .find(|(key, entry)| key.as_str() == name || entry.aliases.iter().any(|a| a == name))
            .map(|(key, entry)| (key.as_str(), entry))
    }
}

/// Picks the explicit path, falling back to `API_DIFF_CONFIG`.
pub fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    explicit.map(Path::to_path_buf).or_else(|| {
        std::env::var(CONFIG_FILE_ENV_VARIABLE)
            .ok()
            .filter(|value| !value.is_empty())
            .map(PathBuf::from)
    })
}

pub fn load_config(path: Option<&Path>) -> Result<LoadedConfig> {
    let Some(path) = path else {
        return Ok(LoadedConfig {
            config: ApiDiffConfig::default(),
            path: None,
        });
    };

    if !path.exists() {
        bail!("config file {} missing", path.display());
    }

    let contents = fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;

    // Hjson: plain JSON plus comments, quoteless keys and values
    let config: ApiDiffConfig = deser_hjson::from_str(&contents)
        .with_context(|| format!("parsing config {}", path.display()))?;

    // Validate auth settings up front so a bad file fails before any query runs.
    config.auth_settings()?;

    Ok(LoadedConfig {
        config,
        path: Some(path.to_path_buf()),
    })
}
