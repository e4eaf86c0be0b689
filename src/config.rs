use anyhow::{Context, Result, anyhow, bail};
use bitsend::{DEFAULT_BASE_URL, Settings, transport::DEFAULT_CHUNK_SIZE};
use dotenvy::dotenv;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};
use url::Url;

#[derive(Debug, Deserialize, Serialize, Default, PartialEq)]
pub struct ConfigFile {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<Url>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload_url: Option<Url>,
    /// Human readable duration, e.g. `30s` or `2m`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_size: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct ConfigEnv {
    bitsend_base_url: Option<Url>,
    bitsend_upload_url: Option<Url>,
    bitsend_timeout: Option<String>,
    bitsend_chunk_size: Option<usize>,
}

#[derive(Debug)]
pub struct Config {
    pub base_url: Url,
    pub upload_url: Option<Url>,
    pub timeout: Option<Duration>,
    pub chunk_size: usize,
}

impl Config {
    pub fn settings(&self, debug: bool) -> Settings {
        Settings {
            base_url: self.base_url.clone(),
            upload_url: self.upload_url.clone(),
            timeout: self.timeout,
            chunk_size: self.chunk_size,
            debug,
        }
    }
}

fn merge_config(base: ConfigFile, override_config: ConfigEnv) -> Result<Config> {
    let base_url = match override_config.bitsend_base_url.or(base.base_url) {
        Some(url) => url,
        None => Url::parse(DEFAULT_BASE_URL)?,
    };

    let upload_url = override_config.bitsend_upload_url.or(base.upload_url);

    let timeout = override_config
        .bitsend_timeout
        .or(base.timeout)
        .map(|t| humantime::parse_duration(&t).with_context(|| format!("Invalid timeout '{t}'")))
        .transpose()?;

    let chunk_size = override_config
        .bitsend_chunk_size
        .or(base.chunk_size)
        .unwrap_or(DEFAULT_CHUNK_SIZE);
    if chunk_size == 0 {
        bail!("chunk_size must be greater than zero");
    }

    Ok(Config {
        base_url,
        upload_url,
        timeout,
        chunk_size,
    })
}

pub fn config_path() -> Result<PathBuf> {
    let project_dirs = directories::ProjectDirs::from("jp", "bitsend", "bitsend")
        .ok_or(anyhow!("Unable to determine home directory"))?;
    Ok(project_dirs.config_dir().join("config.toml"))
}

fn load_config_file(path: &Path) -> Result<ConfigFile> {
    match fs::read_to_string(path) {
        Ok(config) => toml::from_str(&config)
            .with_context(|| format!("Failed to parse {}", path.display())),
        Err(_) => Ok(ConfigFile::default()),
    }
}

pub fn read_config() -> Result<Config> {
    let _ = dotenv();
    let env_config = envy::from_env::<ConfigEnv>().unwrap_or_default();
    let file_config = load_config_file(&config_path()?)?;

    merge_config(file_config, env_config)
}

pub fn write_config(config: &ConfigFile) -> Result<PathBuf> {
    let path = config_path()?;
    save_config_file(&path, config)?;
    Ok(path)
}

fn save_config_file(path: &Path, config: &ConfigFile) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("Failed to create config directory")?;
    }
    fs::write(path, toml::to_string_pretty(config)?).context("Failed to write config file")?;
    Ok(())
}
