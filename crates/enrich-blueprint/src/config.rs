//! TOML configuration for the default transform stack.
//!
//! ```toml
//! [serverside]
//! backend = "filesystem"        # or "memory"
//! cache_dir = "file_system_backend"
//! default_timeout_secs = 300    # 0: never expire
//! session_check = false
//! arg_check = true
//!
//! [blocking]
//! timeout_secs = 60
//! policy = "queue"              # or "reject"
//!
//! [multiplexer]
//! proxy_location = "in-place"   # or a container component id
//!
//! [prefix]
//! prefix = "page"
//! ```
//!
//! Every key is optional; unknown keys are rejected.

use crate::transform::serverside::ServersideDefaults;
use crate::transform::{
    BlockingPolicy, BlockingTransform, CycleBreakerTransform, LogTransform, MultiplexerTransform,
    NoOutputTransform, PrefixIdTransform, ProxyLocation, ServersideTransform, Transform,
    TriggerTransform,
};
use enrich_kernel::{ComponentId, EnrichError};
use enrich_store::{BackendRegistry, FileSystemBackend, MemoryBackend, ServersideBackend};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub const IN_PLACE: &str = "in-place";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    ReadFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid toml at {path}: {source}")]
    ParseToml {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

impl From<ConfigError> for EnrichError {
    fn from(err: ConfigError) -> Self {
        EnrichError::Config(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    #[default]
    Filesystem,
    Memory,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServersideConfig {
    pub backend: BackendKind,
    pub cache_dir: PathBuf,
    pub default_timeout_secs: u64,
    pub session_check: bool,
    pub arg_check: bool,
}

impl Default for ServersideConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Filesystem,
            cache_dir: PathBuf::from(enrich_store::filesystem::DEFAULT_CACHE_DIR),
            default_timeout_secs: enrich_store::filesystem::DEFAULT_TIMEOUT.as_secs(),
            session_check: false,
            arg_check: true,
        }
    }
}

impl ServersideConfig {
    pub fn backend(&self) -> Arc<dyn ServersideBackend> {
        let timeout = Duration::from_secs(self.default_timeout_secs);
        match self.backend {
            BackendKind::Filesystem => {
                Arc::new(FileSystemBackend::new(&self.cache_dir).with_timeout(timeout))
            }
            BackendKind::Memory if timeout.is_zero() => Arc::new(MemoryBackend::new()),
            BackendKind::Memory => Arc::new(MemoryBackend::new().with_timeout(timeout)),
        }
    }

    pub fn defaults(&self) -> ServersideDefaults {
        ServersideDefaults {
            session_check: self.session_check,
            arg_check: self.arg_check,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BlockingConfig {
    pub timeout_secs: u64,
    pub policy: BlockingPolicy,
}

impl Default for BlockingConfig {
    fn default() -> Self {
        Self {
            timeout_secs: crate::transform::blocking::DEFAULT_TIMEOUT.as_secs(),
            policy: BlockingPolicy::Queue,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MultiplexerConfig {
    pub proxy_location: String,
}

impl Default for MultiplexerConfig {
    fn default() -> Self {
        Self {
            proxy_location: IN_PLACE.to_string(),
        }
    }
}

impl MultiplexerConfig {
    pub fn location(&self) -> ProxyLocation {
        match self.proxy_location.as_str() {
            IN_PLACE => ProxyLocation::InPlace,
            container => ProxyLocation::Container(ComponentId::from(container)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PrefixConfig {
    pub prefix: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EnrichConfig {
    pub serverside: ServersideConfig,
    pub blocking: BlockingConfig,
    pub multiplexer: MultiplexerConfig,
    pub prefix: PrefixConfig,
}

impl EnrichConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Self::parse(text, "<inline>")
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&text, &path.display().to_string())
    }

    fn parse(text: &str, path: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|source| ConfigError::ParseToml {
            path: path.to_string(),
            source,
        })
    }

    /// The default stack, plus blocking and log support and an optional
    /// prefix. The blueprint orders them by rank.
    pub fn default_transforms(&self) -> Vec<Box<dyn Transform>> {
        let registry = BackendRegistry::new(self.serverside.backend());
        let mut transforms: Vec<Box<dyn Transform>> = vec![
            Box::new(TriggerTransform::new()),
            Box::new(CycleBreakerTransform::new()),
            Box::new(MultiplexerTransform::new(self.multiplexer.location())),
            Box::new(NoOutputTransform::new()),
            Box::new(ServersideTransform::with_defaults(
                registry,
                self.serverside.defaults(),
            )),
            Box::new(BlockingTransform::new(
                Duration::from_secs(self.blocking.timeout_secs),
                self.blocking.policy,
            )),
            Box::new(LogTransform::default()),
        ];
        if let Some(prefix) = &self.prefix.prefix {
            transforms.push(Box::new(PrefixIdTransform::new(prefix.as_str())));
        }
        transforms
    }
}
