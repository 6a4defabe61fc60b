use config::{Config, File};
use ng_edge_error::EdgeResult;
use serde::Deserialize;
use std::{ops::Deref, sync::Arc, time::Duration};

/// Shared, immutable hub configuration.
///
/// Built once at startup from an optional TOML file plus `NG`-prefixed
/// environment variables (`NG__CACHE__REFRESH_INTERVAL_SECS=600`).
#[derive(Debug, Clone)]
pub struct Settings(Arc<Inner>);

impl Deref for Settings {
    type Target = Inner;
    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

impl Settings {
    pub fn new(config_path: &str) -> EdgeResult<Self> {
        let builder = Config::builder()
            .add_source(File::with_name(config_path).required(false))
            .add_source(
                config::Environment::with_prefix("NG")
                    .separator("__")
                    .try_parsing(true),
            );
        let inner: Inner = builder.build()?.try_deserialize()?;
        Ok(Self(Arc::new(inner)))
    }

    /// Build settings directly from an edge device id with defaults for
    /// everything else. Used by tests and embedded callers.
    pub fn for_edge_device(edge_device_id: impl Into<String>) -> Self {
        let mut general = General::default();
        general.edge_device_id = edge_device_id.into();
        Self(Arc::new(Inner {
            general,
            cache: CacheSettings::default(),
            connectivity: Connectivity::default(),
            method: MethodSettings::default(),
        }))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Inner {
    #[serde(default)]
    pub general: General,
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub connectivity: Connectivity,
    #[serde(default)]
    pub method: MethodSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct General {
    /// Identity key of the edge device hosting this hub. Root of the local
    /// trust hierarchy.
    #[serde(default)]
    pub edge_device_id: String,

    /// Directory holding the persistent identity mirror.
    #[serde(default = "General::data_dir_default")]
    pub data_dir: String,
}

impl General {
    fn data_dir_default() -> String {
        "./data".to_string()
    }
}

impl Default for General {
    fn default() -> Self {
        Self {
            edge_device_id: String::new(),
            data_dir: Self::data_dir_default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheSettings {
    /// Period between scheduled full refresh cycles, in seconds.
    #[serde(default = "CacheSettings::refresh_interval_secs_default")]
    pub refresh_interval_secs: u64,

    /// Number of shards in the per-identity lock provider.
    #[serde(default = "CacheSettings::lock_shards_default")]
    pub lock_shards: usize,

    /// File name of the identity store inside `general.data_dir`.
    #[serde(default = "CacheSettings::store_file_default")]
    pub store_file: String,
}

impl CacheSettings {
    fn refresh_interval_secs_default() -> u64 {
        3600
    }

    fn lock_shards_default() -> usize {
        16
    }

    fn store_file_default() -> String {
        "identities.redb".to_string()
    }

    #[inline]
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            refresh_interval_secs: Self::refresh_interval_secs_default(),
            lock_shards: Self::lock_shards_default(),
            store_file: Self::store_file_default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Connectivity {
    /// Upper bound for a single cloud-proxy call issued while reconciling
    /// subscription state.
    #[serde(default = "Connectivity::cloud_call_timeout_secs_default")]
    pub cloud_call_timeout_secs: u64,
}

impl Connectivity {
    fn cloud_call_timeout_secs_default() -> u64 {
        20
    }

    #[inline]
    pub fn cloud_call_timeout(&self) -> Duration {
        Duration::from_secs(self.cloud_call_timeout_secs)
    }
}

impl Default for Connectivity {
    fn default() -> Self {
        Self {
            cloud_call_timeout_secs: Self::cloud_call_timeout_secs_default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MethodSettings {
    /// Default response timeout for direct method invocations, in seconds.
    #[serde(default = "MethodSettings::default_timeout_secs_default")]
    pub default_timeout_secs: u64,
}

impl MethodSettings {
    fn default_timeout_secs_default() -> u64 {
        30
    }

    #[inline]
    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }
}

impl Default for MethodSettings {
    fn default() -> Self {
        Self {
            default_timeout_secs: Self::default_timeout_secs_default(),
        }
    }
}
