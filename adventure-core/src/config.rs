use std::fs;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::geometry::Size;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path:?}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path:?}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    pub document_extension: String,
    pub branch_extension: String,
    /// Used when the terminal does not report its pixel size.
    pub viewport: Size,
    pub log_filter: String,
    /// Rasterizer worker threads; 0 lets the pool decide.
    pub render_threads: usize,
    /// Number of partial updates a page is delivered in.
    pub progress_bands: u32,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            document_extension: "pdf".to_owned(),
            branch_extension: "txt".to_owned(),
            viewport: Size::new(800, 600),
            log_filter: "info".to_owned(),
            render_threads: 0,
            progress_bands: 4,
        }
    }
}

impl ViewerConfig {
    pub fn default_path(dirs: &ProjectDirs) -> PathBuf {
        dirs.config_dir().join("config.toml")
    }

    /// Missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }
}
