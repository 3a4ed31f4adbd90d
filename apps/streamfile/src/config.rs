//! Server configuration.
//!
//! Reads JSON at `~/.config/streamfile/server.json` (or the `--config`
//! path). A missing file means defaults.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use streamfile_protocol::ServiceInfo;
use streamfile_transfer::ServiceConfig;

/// On-disk config format.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigFile {
    #[serde(default)]
    listen: String,
    #[serde(default)]
    storage_root: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    auth_token: Option<String>,
    #[serde(default)]
    chunk_size: usize,
    #[serde(default)]
    max_chunk_size: usize,
    #[serde(default)]
    name: String,
    #[serde(default)]
    description: String,
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen: SocketAddr,
    pub storage_root: PathBuf,
    pub auth_token: Option<String>,
    pub chunk_size: usize,
    pub max_chunk_size: usize,
    pub name: String,
    pub description: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let service = ServiceConfig::default();
        Self {
            listen: ([0, 0, 0, 0], 7700).into(),
            storage_root: PathBuf::from(expand_path("~/streamfile")),
            auth_token: None,
            chunk_size: service.chunk_size,
            max_chunk_size: service.max_chunk_size,
            name: "streamfile".into(),
            description: "chunked file transfer server".into(),
        }
    }
}

impl ServerConfig {
    /// Loads `path`, or the default location when `None`.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let file_path = match path {
            Some(path) => path.to_path_buf(),
            None => config_file_path()?,
        };
        if !file_path.exists() {
            tracing::debug!(path = %file_path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&file_path)?;
        match serde_json::from_str::<ConfigFile>(&content) {
            Ok(file) => Ok(Self::from_file(file)),
            Err(e) => {
                tracing::warn!(
                    path = %file_path.display(),
                    "failed to parse server config, using defaults: {e}"
                );
                Ok(Self::default())
            }
        }
    }

    fn from_file(file: ConfigFile) -> Self {
        let mut config = Self::default();
        if !file.listen.is_empty() {
            match file.listen.parse() {
                Ok(addr) => config.listen = addr,
                Err(_) => tracing::warn!(listen = %file.listen, "invalid listen address ignored"),
            }
        }
        if !file.storage_root.is_empty() {
            config.storage_root = PathBuf::from(expand_path(&file.storage_root));
        }
        config.auth_token = file.auth_token.filter(|t| !t.is_empty());
        if file.max_chunk_size > 0 {
            config.max_chunk_size = file.max_chunk_size;
        }
        if file.chunk_size > 0 && file.chunk_size <= config.max_chunk_size {
            config.chunk_size = file.chunk_size;
        } else {
            config.chunk_size = config.chunk_size.min(config.max_chunk_size);
        }
        if !file.name.is_empty() {
            config.name = file.name;
        }
        if !file.description.is_empty() {
            config.description = file.description;
        }
        config
    }

    pub fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            chunk_size: self.chunk_size,
            max_chunk_size: self.max_chunk_size,
            ..ServiceConfig::default()
        }
    }

    pub fn service_info(&self) -> ServiceInfo {
        ServiceInfo {
            name: self.name.clone(),
            description: self.description.clone(),
            version: env!("CARGO_PKG_VERSION").into(),
        }
    }
}

/// Expands `~` in paths to the `$HOME` directory.
fn expand_path(path: &str) -> String {
    if path.starts_with("~/")
        && let Ok(home) = std::env::var("HOME")
    {
        return format!("{}{}", home, &path[1..]);
    }
    path.to_string()
}

fn config_file_path() -> anyhow::Result<PathBuf> {
    let config_dir = config_base_dir()?;
    Ok(config_dir.join("streamfile").join("server.json"))
}

fn config_base_dir() -> anyhow::Result<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        Ok(PathBuf::from(appdata))
    }

    #[cfg(not(target_os = "windows"))]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        Ok(PathBuf::from(home).join(".config"))
    }
}
