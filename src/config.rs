//! Configuration loading
//!
//! All settings live in one TOML file, `shadowcall.toml` by default, with a
//! table per layer. Every key is optional.
//!
//! ```toml
//! [rewrite]
//! marker = "Pure"
//! clone_suffix = "__impl"
//! strict_branches = false
//! patch_strategy = "at_consumption"   # or "at_store"
//!
//! [runtime]
//! worker_threads = 4                  # omit to use the global pool, 0 = one per CPU
//! resolve_timeout_ms = 5000
//! max_call_depth = 1024               # VMs running hidden implementations
//!
//! [vm]
//! max_call_depth = 1024               # the VM running the entry point
//! trace = false
//! ```
//!
//! The two `max_call_depth` keys are independent. `[vm]` bounds the call
//! stack of the thread running the entry point, stubs included. `[runtime]`
//! bounds each worker VM, which starts at the hidden implementation; its
//! depth does not add to the caller's.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::backend::bytecode::VmConfig;
use crate::backend::dispatch::RuntimeConfig;
use crate::backend::rewrite::RewriteConfig;

/// Default configuration file name looked up next to the working directory
pub const CONFIG_FILE_NAME: &str = "shadowcall.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub rewrite: RewriteConfig,
    pub runtime: RuntimeConfig,
    pub vm: VmConfig,
}

impl Config {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Load `shadowcall.toml` from `dir` if present, else the defaults
    pub fn discover(dir: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = dir.as_ref().join(CONFIG_FILE_NAME);
        if path.is_file() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }
}
