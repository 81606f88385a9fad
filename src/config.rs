//! Build configuration.
//!
//! Everything here has a default, so the config file is optional. Tool
//! locations can also be overridden from the environment, e.g.
//! `VIRT_BUILDER_PATH=/opt/libguestfs/bin/virt-builder`.
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Reading file {0}: {1}")]
    Io(PathBuf, std::io::Error),
    #[error("Parsing file {0}: {1}")]
    Parse(PathBuf, serde_yml::Error),
    #[error("Invalid compression level {0:?}, expected best, fast or 0-9")]
    CompressionLevel(String),
}

fn tool_path(env_var: &str, default: &str) -> PathBuf {
    std::env::var_os(env_var)
        .unwrap_or_else(|| default.into())
        .into()
}

/// Paths to the external programs used to build images.
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct Tools {
    pub virt_builder: PathBuf,
    pub virt_sysprep: PathBuf,
    pub virt_sparsify: PathBuf,
    pub xz: PathBuf,
}

impl Default for Tools {
    fn default() -> Self {
        Self {
            virt_builder: tool_path("VIRT_BUILDER_PATH", "virt-builder"),
            virt_sysprep: tool_path("VIRT_SYSPREP_PATH", "virt-sysprep"),
            virt_sparsify: tool_path("VIRT_SPARSIFY_PATH", "virt-sparsify"),
            xz: tool_path("XZ_PATH", "xz"),
        }
    }
}

/// Settings passed to `xz`.
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct Compression {
    /// `best`, `fast` or a preset from 0 to 9.
    pub level: String,
    /// Zero lets xz pick one thread per core.
    pub threads: u32,
    /// virt-builder recommends 16 MiB blocks so images can be
    /// decompressed in parallel.
    pub block_size: u64,
}

impl Default for Compression {
    fn default() -> Self {
        Self {
            level: "best".to_string(),
            threads: 0,
            block_size: 16_777_216,
        }
    }
}

impl Compression {
    /// The xz flag selecting the compression level, e.g. `--best` or `-9`.
    pub fn level_arg(&self) -> Result<OsString, ConfigError> {
        match self.level.as_str() {
            "best" | "fast" => Ok(format!("--{}", self.level).into()),
            level if level.len() == 1 && level.chars().all(|c| c.is_ascii_digit()) => {
                Ok(format!("-{level}").into())
            }
            other => Err(ConfigError::CompressionLevel(other.to_string())),
        }
    }
}

/// The build config file.
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct BuildConfig {
    pub root_password: String,
    /// Disk format produced by virt-builder and advertised in the index.
    pub image_format: String,
    pub tools: Tools,
    pub compression: Compression,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            root_password: "123456".to_string(),
            image_format: "qcow2".to_string(),
            tools: Tools::default(),
            compression: Compression::default(),
        }
    }
}

impl BuildConfig {
    /// Load the build config.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let file: String = std::fs::read_to_string(path)
            .map_err(|err| ConfigError::Io(path.to_path_buf(), err))?;
        let config: BuildConfig = serde_yml::from_str(&file)
            .map_err(|err| ConfigError::Parse(path.to_path_buf(), err))?;
        config.compression.level_arg()?;
        Ok(config)
    }
}
