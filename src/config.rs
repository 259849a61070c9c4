//! File-backed configuration for relay servers and clients.
//!
//! Configuration is a TOML document with three parts, each optional:
//!
//! ```toml
//! [socket]
//! receive_timeout_ms = 1000
//! use_network_order = false
//! chunk_length = 0
//!
//! [server]
//! listen_address = "127.0.0.1:5555"
//! worker_threads = 15
//!
//! [[indexes]]
//! name = "by_score"
//! sort_field = "score"
//! is_tag = true
//! tags = [{ name = "score", data_type = "Int32" }]
//! sort_orders = [{ data_type = "Int32", sort_by = "Desc" }]
//! ```
//!
//! Missing fields take the defaults documented on each setting, so an empty file is a
//! valid configuration.
use std::{
    collections::HashSet,
    fs,
    net::SocketAddr,
    path::{Path, PathBuf},
    time::Duration,
};

use log::debug;
use serde::Deserialize;

use crate::index::{BaseComparer, DataType, SortOrder};

use self::error::ConfigError;

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub socket: SocketSettings,
    pub server: ServerSettings,
    pub indexes: Vec<IndexSchema>,
}

impl RelayConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        debug!("loaded configuration from {}", path.display());
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects duplicate index names and sort specs that do not build a comparer.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for index in &self.indexes {
            if !seen.insert(index.name.as_str()) {
                return Err(ConfigError::DuplicateIndex(index.name.clone()));
            }
            index.comparer()?;
        }
        Ok(())
    }

    pub fn index(&self, name: &str) -> Option<&IndexSchema> {
        self.indexes.iter().find(|index| index.name == name)
    }

    /// Comparer for the named index, `None` when no such index is configured.
    pub fn comparer_for(&self, name: &str) -> Result<Option<BaseComparer>, ConfigError> {
        self.index(name).map(IndexSchema::comparer).transpose()
    }
}

/// Per-connection socket behaviour shared by clients and servers.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SocketSettings {
    pub connect_timeout_ms: u64,
    pub receive_timeout_ms: u64,
    pub send_timeout_ms: u64,
    /// Read buffer placed in front of the socket.
    pub receive_buffer_size: usize,
    /// Capacity reserved when encoding an outgoing frame.
    pub send_buffer_size: usize,
    /// Capacity of a freshly allocated pooled message buffer.
    pub initial_message_size: usize,
    /// Pooled buffers that grew beyond this are released instead of reused.
    pub maximum_message_size: usize,
    /// Frames declaring a larger length are rejected before their payload is read.
    pub maximum_frame_length: usize,
    /// Big-endian frame fields when set, little-endian otherwise.
    pub use_network_order: bool,
    /// Messages per bulk frame, `0` for one frame per list.
    pub chunk_length: usize,
    pub buffer_pool_capacity: usize,
    /// Threads completing asynchronous sends.
    pub async_workers: usize,
}

impl Default for SocketSettings {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 1000,
            receive_timeout_ms: 1000,
            send_timeout_ms: 1000,
            receive_buffer_size: 8192,
            send_buffer_size: 8192,
            initial_message_size: 8192,
            maximum_message_size: 20480,
            maximum_frame_length: 16 * 1024 * 1024,
            use_network_order: false,
            chunk_length: 0,
            buffer_pool_capacity: 16,
            async_workers: 2,
        }
    }
}

impl SocketSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// `None` when configured as `0`, meaning block indefinitely.
    pub fn receive_timeout(&self) -> Option<Duration> {
        (self.receive_timeout_ms > 0).then(|| Duration::from_millis(self.receive_timeout_ms))
    }

    pub fn send_timeout(&self) -> Option<Duration> {
        (self.send_timeout_ms > 0).then(|| Duration::from_millis(self.send_timeout_ms))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub listen_address: SocketAddr,
    pub worker_threads: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            listen_address: SocketAddr::from(([127, 0, 0, 1], 5555)),
            worker_threads: 15,
        }
    }
}

/// Schema of one index type: its tags and how its items are ordered.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub struct IndexSchema {
    pub name: String,
    pub tags: Vec<TagSchema>,
    pub sort_orders: Vec<SortOrder>,
    /// Tag sorted on when `is_tag` is set.
    pub sort_field: String,
    pub is_tag: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TagSchema {
    pub name: String,
    pub data_type: DataType,
}

impl IndexSchema {
    pub fn tag_type(&self, name: &str) -> Option<DataType> {
        self.tags
            .iter()
            .find(|tag| tag.name == name)
            .map(|tag| tag.data_type)
    }

    /// An index without a sort spec is ordered by item id with the default order.
    pub fn comparer(&self) -> Result<BaseComparer, ConfigError> {
        if self.is_tag && self.tag_type(&self.sort_field).is_none() {
            return Err(ConfigError::UnknownSortTag {
                index: self.name.clone(),
                tag: self.sort_field.clone(),
            });
        }
        if self.sort_orders.is_empty() && !self.is_tag {
            return Ok(BaseComparer::for_item_ids(SortOrder::default()));
        }
        BaseComparer::new(self.is_tag, self.sort_field.clone(), self.sort_orders.clone()).map_err(
            |source| ConfigError::Index {
                index: self.name.clone(),
                source,
            },
        )
    }
}

pub mod error {
    use std::{io, path::PathBuf};

    use thiserror::Error;

    use crate::index::error::IndexError;

    #[derive(Debug, Error)]
    pub enum ConfigError {
        #[error("[config][{}] {source}", .path.display())]
        Io {
            path: PathBuf,
            #[source]
            source: io::Error,
        },

        #[error("[config] {0}")]
        Parse(#[from] toml::de::Error),

        #[error("[config][index {index}] {source}")]
        Index {
            index: String,
            #[source]
            source: IndexError,
        },

        #[error("[config][index {index}] sort tag '{tag}' is not declared")]
        UnknownSortTag { index: String, tag: String },

        #[error("[config] index '{0}' is declared twice")]
        DuplicateIndex(String),
    }
}

/// Default location looked up by the binaries when `--config` is not given.
pub fn default_config_path() -> PathBuf {
    PathBuf::from("datarelay.toml")
}
