use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::app::DEFAULT_ACCOUNT_URL;
use crate::error::MirrorError;
use crate::fetcher::Layout;
use crate::remote::DEFAULT_TIMEOUT_SECS;
use crate::store::DEFAULT_MOUNT_ROOT;

pub const CONFIG_FILE_NAME: &str = "hrm-mirror.json";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub mount_root: Option<String>,
    #[serde(default)]
    pub catalog: Option<String>,
    #[serde(default)]
    pub layout: Option<Layout>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub account_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub mount_root: Utf8PathBuf,
    pub catalog: Option<Utf8PathBuf>,
    pub layout: Layout,
    pub timeout: Duration,
    pub account_url: String,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Reads `path` when given; otherwise `./hrm-mirror.json`, then the user
    /// config directory, falling back to defaults when neither exists.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, MirrorError> {
        let config_path = match path {
            Some(path) => Some(PathBuf::from(path)),
            None => Self::default_locations().into_iter().find(|path| path.exists()),
        };

        let Some(config_path) = config_path else {
            return Self::resolve_config(Config::default());
        };

        let content = fs::read_to_string(&config_path)
            .map_err(|_| MirrorError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| MirrorError::ConfigParse(err.to_string()))?;
        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, MirrorError> {
        let timeout_secs = config.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS);
        if timeout_secs == 0 {
            return Err(MirrorError::ConfigParse(
                "timeout_secs must be greater than zero".to_string(),
            ));
        }
        Ok(ResolvedConfig {
            mount_root: Utf8PathBuf::from(
                config
                    .mount_root
                    .unwrap_or_else(|| DEFAULT_MOUNT_ROOT.to_string()),
            ),
            catalog: config.catalog.map(Utf8PathBuf::from),
            layout: config.layout.unwrap_or_default(),
            timeout: Duration::from_secs(timeout_secs),
            account_url: config
                .account_url
                .unwrap_or_else(|| DEFAULT_ACCOUNT_URL.to_string()),
        })
    }

    fn default_locations() -> Vec<PathBuf> {
        let mut locations = vec![PathBuf::from(CONFIG_FILE_NAME)];
        if let Some(dirs) = ProjectDirs::from("", "", "hrm-mirror") {
            locations.push(dirs.config_dir().join("config.json"));
        }
        locations
    }
}
