use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// The resolver's complete configuration, loaded once at the edge and passed
/// in as an immutable value. Components never read globals.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "kebab-case")]
pub struct CoversConfig {
    pub cache: CacheConfig,
    pub object_store: ObjectStoreConfig,
    pub providers: ProvidersConfig,
    pub debug: DebugConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "kebab-case")]
pub struct CacheConfig {
    /// Master switch; when false every resolve returns the placeholder.
    pub enabled: bool,
    pub dir: PathBuf,
    pub max_age_days: u64,
    pub max_file_size_bytes: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: PathBuf::from("/tmp/book-covers"),
            max_age_days: 30,
            max_file_size_bytes: 5_242_880,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "kebab-case")]
pub struct ObjectStoreConfig {
    pub enabled: bool,
    pub bucket: String,
    pub cdn_url: String,
    pub public_cdn_url: String,
    pub endpoint: String,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl ObjectStoreConfig {
    /// The base URL public object URLs are built from.
    pub fn public_base(&self) -> &str {
        if self.public_cdn_url.is_empty() {
            &self.cdn_url
        } else {
            &self.public_cdn_url
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "kebab-case")]
pub struct ProvidersConfig {
    pub google: GoogleProviderConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "kebab-case")]
pub struct GoogleProviderConfig {
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "kebab-case")]
pub struct DebugConfig {
    /// Upload the provenance record next to the final image.
    pub cover_provenance: bool,
}

/// An error loading the config file.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "failed to read config: {e}"),
            ConfigError::Parse(e) => write!(f, "failed to parse config: {e}"),
        }
    }
}
impl std::error::Error for ConfigError {}

impl CoversConfig {
    /// Load from a TOML file, falling back to defaults when the file does
    /// not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).map_err(ConfigError::Parse),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("no config file at {}, using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(ConfigError::Io(e)),
        }
    }
}
