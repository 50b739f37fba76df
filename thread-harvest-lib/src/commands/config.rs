use crate::Result;
use camino::{Utf8Path, Utf8PathBuf};
use ohno::{IntoAppError, bail};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;

/// The default configuration TOML content, embedded from `default_config.toml`
pub const DEFAULT_CONFIG_TOML: &str = include_str!("../../default_config.toml");

/// File looked up in the working directory when no `--config` is given.
pub const DEFAULT_CONFIG_FILE: &str = "harvest.toml";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Account or organization owning the repository
    #[serde(default)]
    pub owner: String,

    /// Repository name
    #[serde(default)]
    pub repo: String,

    /// Directory receiving checkpoint files
    #[serde(default = "default_output_dir")]
    pub output_dir: Utf8PathBuf,

    /// REST API root
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Threads processed at the same time
    #[serde(default = "default_max_concurrent_threads")]
    pub max_concurrent_threads: usize,

    /// Issue list pages to fetch, 0 for all
    #[serde(default)]
    pub max_issue_pages: u32,

    /// Completed threads between periodic checkpoints, 0 to disable
    #[serde(default = "default_checkpoint_every")]
    pub checkpoint_every: usize,

    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_output_dir() -> Utf8PathBuf {
    Utf8PathBuf::from("./data")
}

fn default_api_base_url() -> String {
    "https://api.github.com".to_string()
}

const fn default_max_concurrent_threads() -> usize {
    10
}

const fn default_checkpoint_every() -> usize {
    250
}

const fn default_request_timeout_secs() -> u64 {
    60
}

impl Config {
    /// Load configuration from a file or use defaults
    ///
    /// Without an explicit path, `harvest.toml` in `base_dir` is used if present.
    /// The result is not validated, since command-line overrides may still apply.
    pub fn load(base_dir: &Utf8Path, config_path: Option<&Utf8PathBuf>) -> Result<Self> {
        let (final_path, text) = if let Some(path) = config_path {
            let text = fs::read_to_string(path).into_app_err_with(|| format!("reading configuration file '{path}'"))?;
            (path.clone(), text)
        } else {
            let path = base_dir.join(DEFAULT_CONFIG_FILE);
            match fs::read_to_string(&path) {
                Ok(text) => (path, text),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    return Ok(Self::default());
                }
                Err(e) => return Err(e).into_app_err_with(|| format!("reading configuration file '{path}'")),
            }
        };

        toml::from_str(&text).into_app_err_with(|| format!("parsing configuration file '{final_path}'"))
    }

    /// Save the default configuration to a TOML file
    pub fn save_default(output_path: &Utf8Path) -> Result<()> {
        fs::write(output_path, DEFAULT_CONFIG_TOML).into_app_err_with(|| format!("writing default configuration to {output_path}"))?;
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.owner.trim().is_empty() {
            bail!("owner must not be empty");
        }

        if self.repo.trim().is_empty() {
            bail!("repo must not be empty");
        }

        if self.max_concurrent_threads == 0 {
            bail!("max_concurrent_threads must be at least 1");
        }

        if self.request_timeout_secs == 0 {
            bail!("request_timeout_secs must be at least 1");
        }

        if !(self.api_base_url.starts_with("http://") || self.api_base_url.starts_with("https://")) {
            bail!("api_base_url must be an http or https URL, got '{}'", self.api_base_url);
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        toml::from_str(DEFAULT_CONFIG_TOML).expect("default_config.toml should be valid TOML that deserializes to Config")
    }
}
