use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;

use crate::errors::ConfigError;

pub const CONFIG_DIR_NAME: &str = ".moss";
pub const CONFIG_FILE_NAME: &str = "config.yml";
pub const MCP_MANIFEST_FILE: &str = "mcp.json";
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_CLOSE_TIMEOUT_MS: u64 = 5_000;

/// Environment variables consulted, in order, when no api key is configured.
pub const API_KEY_ENV_VARS: [&str; 3] = ["OPENROUTER_API_KEY", "OPENAI_API_KEY", "OR_API_KEY"];

#[derive(Debug, Clone, Deserialize)]
pub struct MossConfig {
    #[serde(skip)]
    pub config_dir: PathBuf,
    pub provider: String,
    #[serde(default)]
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub system_prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
    #[serde(default)]
    pub mcp_config: Option<PathBuf>,
    pub lock_timeout_ms: u64,
    pub close_timeout_ms: u64,
}

impl MossConfig {
    /// Load settings for the config directory discovered from the working directory.
    pub fn load() -> Result<Self, ConfigError> {
        let config_dir = find_config_dir()?;
        Self::load_from(&config_dir)
    }

    /// Load settings layered over the defaults for `config_dir`.
    pub fn load_from(config_dir: &Path) -> Result<Self, ConfigError> {
        let mut settings: MossConfig = layered(config_dir)?.try_deserialize()?;
        settings.config_dir = config_dir.to_path_buf();

        if settings.api_key.trim().is_empty() {
            settings.api_key = API_KEY_ENV_VARS
                .iter()
                .find_map(|var| std::env::var(var).ok().filter(|key| !key.trim().is_empty()))
                .ok_or(ConfigError::MissingApiKey)?;
        }

        tracing::debug!(
            config_dir = %settings.config_dir.display(),
            model = %settings.model,
            "Loaded configuration"
        );
        Ok(settings)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }

    /// The remote tool manifest to load, if any.
    ///
    /// An explicitly configured path is always returned, relative paths resolved
    /// against the config directory. The default `mcp.json` is only used when present.
    pub fn mcp_manifest(&self) -> Option<PathBuf> {
        match &self.mcp_config {
            Some(path) if path.is_absolute() => Some(path.clone()),
            Some(path) => Some(self.config_dir.join(path)),
            None => {
                let default = self.config_dir.join(MCP_MANIFEST_FILE);
                default.is_file().then_some(default)
            }
        }
    }
}

/// Defaults, then `config.yml` in `config_dir`, then `MOSS_*` environment variables.
fn layered(config_dir: &Path) -> Result<Config, ConfigError> {
    Ok(Config::builder()
        .set_default("provider", default_provider())?
        .set_default("base_url", default_base_url())?
        .set_default("model", default_model())?
        .set_default("system_prompt", default_system_prompt())?
        .set_default("temperature", 0.5)?
        .set_default("max_tokens", 32_000_i64)?
        .set_default("lock_timeout_ms", DEFAULT_LOCK_TIMEOUT_MS)?
        .set_default("close_timeout_ms", DEFAULT_CLOSE_TIMEOUT_MS)?
        .add_source(
            File::from(config_dir.join(CONFIG_FILE_NAME))
                .format(FileFormat::Yaml)
                .required(false),
        )
        .add_source(
            Environment::with_prefix("MOSS")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()?)
}

/// The configured lock timeout, readable without a usable api key.
pub fn lock_timeout_in(config_dir: &Path) -> Result<Duration, ConfigError> {
    let timeout: u64 = layered(config_dir)?.get("lock_timeout_ms")?;
    Ok(Duration::from_millis(timeout))
}

/// Find the config directory for the current working directory.
pub fn find_config_dir() -> Result<PathBuf, ConfigError> {
    let cwd = std::env::current_dir().map_err(|source| ConfigError::Directory {
        path: PathBuf::from("."),
        source,
    })?;
    discover_config_dir(&cwd, dirs::home_dir().as_deref())
}

/// Walk up from `start` looking for `.moss/`, then try `home`, else create `start/.moss/`.
pub fn discover_config_dir(start: &Path, home: Option<&Path>) -> Result<PathBuf, ConfigError> {
    let found = start
        .ancestors()
        .chain(home)
        .map(|dir| dir.join(CONFIG_DIR_NAME))
        .find(|candidate| candidate.is_dir());
    if let Some(dir) = found {
        return Ok(dir);
    }

    let created = start.join(CONFIG_DIR_NAME);
    std::fs::create_dir_all(&created).map_err(|source| ConfigError::Directory {
        path: created.clone(),
        source,
    })?;
    Ok(created)
}

fn default_provider() -> String {
    "openrouter".to_string()
}

fn default_base_url() -> String {
    "https://openrouter.ai/api/v1".to_string()
}

fn default_model() -> String {
    "anthropic/claude-sonnet-4".to_string()
}

fn default_system_prompt() -> String {
    "You are moss, a careful assistant working in the user's terminal. \
     You can read and write files, list directories and run shell commands through your tools. \
     Prefer inspecting the environment over guessing, explain what you are about to change, \
     and keep answers concise."
        .to_string()
}
