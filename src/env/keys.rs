use std::{
    fs,
    io::Cursor,
    path::Path,
};

use anyhow::{Context, Result};
use tracing::{debug, info};

use super::EnvMap;

/// Parses a dotenv file without touching the process environment.
pub fn read_env_file(path: &Path) -> Result<EnvMap> {
    let content =
        fs::read_to_string(path).with_context(|| format!("reading key file {}", path.display()))?;
    dotenvy::from_read_iter(Cursor::new(content))
        .map(|item| item.with_context(|| format!("parsing key file {}", path.display())))
        .collect()
}

/// `[name, keyEnv, keyType, "KEY"]`, empty parts skipped, joined by `_`, uppercased.
pub fn key_variable_name(name: Option<&str>, key_env: Option<&str>, key_type: Option<&str>) -> String {
    [name, key_env, key_type, Some("KEY")]
        .into_iter()
        .flatten()
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_")
        .to_uppercase()
}

/// API keys from a `.env` file, with the process environment as fallback.
#[derive(Debug, Clone, Default)]
pub struct KeyStore {
    vars: EnvMap,
}

impl KeyStore {
    pub fn new(vars: EnvMap) -> Self {
        Self { vars }
    }

    /// Loads `path` when it exists; a missing file yields an empty store.
    pub fn from_dotenv(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let vars = read_env_file(path)?;
        debug!(path = %path.display(), count = vars.len(), "loaded key file");
        Ok(Self { vars })
    }

    pub fn lookup(&self, variable: &str) -> Option<String> {
        info!("Looking for key in env {variable}");
        self.vars
            .get(variable)
            .cloned()
            .or_else(|| std::env::var(variable).ok())
            .filter(|value| !value.is_empty())
    }
}
