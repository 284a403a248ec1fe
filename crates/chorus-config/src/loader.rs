use std::path::{Path, PathBuf};

use chorus_common::{Error, Result};
use tracing::{debug, info};

use crate::model::AppConfig;

const CONFIG_FILE_NAMES: [&str; 3] = ["config.yml", "config.yaml", "config.toml"];

/// Loads `AppConfig` from `~/.chorus` (or an explicit directory) and layers
/// `CHORUS_*` environment overrides on top.
pub struct ConfigLoader {
    config_dir: PathBuf,
}

impl ConfigLoader {
    pub fn new() -> Result<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| Error::Config("could not determine home directory".into()))?;
        Ok(Self::with_dir(home.join(".chorus")))
    }

    pub fn with_dir(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
        }
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// First existing config file in the directory, if any.
    pub fn config_path(&self) -> Option<PathBuf> {
        CONFIG_FILE_NAMES
            .iter()
            .map(|name| self.config_dir.join(name))
            .find(|path| path.is_file())
    }

    /// Load the config file (defaults when absent), apply env overrides, validate.
    pub fn load(&self) -> Result<AppConfig> {
        dotenvy::dotenv().ok();

        let mut config = match self.config_path() {
            Some(path) => Self::load_from(&path)?,
            None => {
                info!(
                    "no config file in {}, using defaults",
                    self.config_dir.display()
                );
                AppConfig::default()
            }
        };

        apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a single file; the format is chosen by extension.
    pub fn load_from(path: &Path) -> Result<AppConfig> {
        info!("loading config from {}", path.display());
        let raw = std::fs::read_to_string(path)?;
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        match extension {
            "yml" | "yaml" => serde_yaml::from_str(&raw)
                .map_err(|e| Error::Config(format!("invalid YAML in {}: {e}", path.display()))),
            "toml" => toml::from_str(&raw)
                .map_err(|e| Error::Config(format!("invalid TOML in {}: {e}", path.display()))),
            other => Err(Error::Config(format!(
                "unsupported config extension '{other}' for {}",
                path.display()
            ))),
        }
    }
}

/// Apply `CHORUS_LLM_PROVIDER`, `CHORUS_LLM_MODEL`, `CHORUS_MAX_SESSIONS`
/// and `CHORUS_SESSION_TTL_SECS` from `lookup`.
pub fn apply_env_overrides<F>(config: &mut AppConfig, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(provider) = lookup("CHORUS_LLM_PROVIDER") {
        debug!("CHORUS_LLM_PROVIDER override: {provider}");
        config.llm.provider = provider;
    }
    if let Some(model) = lookup("CHORUS_LLM_MODEL") {
        debug!("CHORUS_LLM_MODEL override: {model}");
        config.llm.model = model;
    }
    if let Some(raw) = lookup("CHORUS_MAX_SESSIONS") {
        config.sessions.max_sessions = raw
            .trim()
            .parse()
            .map_err(|_| Error::Config(format!("CHORUS_MAX_SESSIONS is not a number: '{raw}'")))?;
    }
    if let Some(raw) = lookup("CHORUS_SESSION_TTL_SECS") {
        config.sessions.session_ttl_secs = raw.trim().parse().map_err(|_| {
            Error::Config(format!("CHORUS_SESSION_TTL_SECS is not a number: '{raw}'"))
        })?;
    }
    Ok(())
}
