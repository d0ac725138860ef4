//! Layered configuration
//!
//! Later layers win: built-in defaults, the user file
//! (`$XDG_CONFIG_HOME/dossier/config.toml`), the project file
//! (`<root>/.dossier/config.toml`), then `DOSSIER_*` environment variables
//! with `__` separating tables (`DOSSIER_LLM__COST_CEILING=4`).

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::types::Config;
use crate::types::{DossierError, Result};

const APP_DIR: &str = "dossier";
const PROJECT_DIR: &str = ".dossier";
const FILE_NAME: &str = "config.toml";
const ENV_PREFIX: &str = "DOSSIER_";

pub struct ConfigLoader;

impl ConfigLoader {
    /// Resolve every layer relative to the current directory
    pub fn load() -> Result<Config> {
        Self::load_in(Path::new("."))
    }

    /// Resolve every layer with the project file taken from `root`
    pub fn load_in(root: &Path) -> Result<Config> {
        let mut figment = Self::defaults();
        for path in Self::user_config_path()
            .into_iter()
            .chain([Self::project_config_path(root)])
        {
            if path.is_file() {
                debug!(path = %path.display(), "merging config file");
                figment = figment.merge(Toml::file(path));
            }
        }
        Self::extract(figment.merge(Env::prefixed(ENV_PREFIX).split("__").lowercase(true)))
    }

    /// Defaults overlaid with one file, ignoring the environment
    pub fn load_from_file(path: &Path) -> Result<Config> {
        Self::extract(Self::defaults().merge(Toml::file(path)))
    }

    fn defaults() -> Figment {
        Figment::from(Serialized::defaults(Config::default()))
    }

    fn extract(figment: Figment) -> Result<Config> {
        let config: Config = figment
            .extract()
            .map_err(|e| DossierError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn user_config_path() -> Option<PathBuf> {
        std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config")))
            .map(|base| base.join(APP_DIR).join(FILE_NAME))
    }

    pub fn project_dir(root: &Path) -> PathBuf {
        root.join(PROJECT_DIR)
    }

    pub fn project_config_path(root: &Path) -> PathBuf {
        Self::project_dir(root).join(FILE_NAME)
    }

    /// Effective configuration as TOML; API keys are skipped on serialization
    pub fn render_toml(config: &Config) -> Result<String> {
        toml::to_string_pretty(config).map_err(|e| DossierError::Config(e.to_string()))
    }

    /// Write the defaults to the project file unless one already exists
    pub fn init_project(root: &Path) -> Result<PathBuf> {
        let path = Self::project_config_path(root);
        if path.exists() {
            return Ok(path);
        }
        fs::create_dir_all(Self::project_dir(root))?;
        fs::write(&path, Self::render_toml(&Config::default())?)?;
        info!(path = %path.display(), "created project config");
        Ok(path)
    }
}
