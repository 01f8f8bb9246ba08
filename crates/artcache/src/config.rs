use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Configuration for a [`ResourceCache`](crate::ResourceCache).
///
/// All fields have usable defaults. Hosts typically construct this in code
/// and override a field or two, or load it from a YAML file via
/// [`CacheConfig::get`].
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Base directory for the disk tier.
    ///
    /// Files are written directly into this directory, one per cached key.
    /// `None` disables the disk tier entirely; the cache then serves from
    /// memory and network only.
    pub cache_dir: Option<PathBuf>,

    /// Maximum number of entries the memory tier holds.
    ///
    /// `None` means no count limit.
    pub max_entries: Option<usize>,

    /// Maximum summed cost (approximate bytes) of all memory tier entries.
    ///
    /// `None` means no cost limit.
    pub max_total_cost: Option<u64>,

    /// The timeout for establishing a network connection.
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// The idle timeout between two received chunks of a response body.
    #[serde(with = "humantime_serde")]
    pub read_timeout: Duration,
}

/// Default value for the "cache_dir" configuration.
fn default_cache_dir() -> Option<PathBuf> {
    dirs::cache_dir().map(|dir| dir.join("artcache"))
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            max_entries: None,
            max_total_cost: None,
            connect_timeout: Duration::from_secs(30),
            read_timeout: Duration::from_secs(30),
        }
    }
}

impl CacheConfig {
    pub fn get(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_reader(
                fs::File::open(path).context("failed to open configuration file")?,
            ),
            None => Ok(CacheConfig::default()),
        }
    }

    fn from_reader(mut reader: impl std::io::Read) -> Result<Self> {
        let mut config = String::new();
        reader
            .read_to_string(&mut config)
            .context("failed reading config file")?;
        if config.trim().is_empty() {
            anyhow::bail!("config file empty");
        }
        serde_yaml::from_str(&config).context("failed to parse config YAML")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CacheConfig::get(None).unwrap();

        assert_eq!(config.max_entries, None);
        assert_eq!(config.max_total_cost, None);
        assert_eq!(config.connect_timeout, Duration::from_secs(30));
        assert_eq!(config.read_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
cache_dir: /tmp/artwork
max_entries: 200
max_total_cost: 52428800
connect_timeout: 5s
read_timeout: 1m
"#;
        let config: CacheConfig = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.cache_dir, Some(PathBuf::from("/tmp/artwork")));
        assert_eq!(config.max_entries, Some(200));
        assert_eq!(config.max_total_cost, Some(52_428_800));
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.read_timeout, Duration::from_secs(60));
    }
}
