//! Client configuration file parsing (.surfstore.toml)

use std::path::Path;
use std::time::Duration;

use color_eyre::eyre::bail;

use crate::chunker::DEFAULT_BLOCK_SIZE;

/// Config file name
pub const CONFIG_FILE: &str = ".surfstore.toml";

/// Default per-call RPC timeout in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 1000;

/// Per-directory sync configuration
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Metadata service address (`host:port`)
    pub meta_addr: Option<String>,

    /// Chunk size in bytes; every client of a server must agree on it
    pub block_size: usize,

    /// Per-call timeout for remote calls
    pub timeout_ms: u64,

    /// Extra ignore patterns beyond .gitignore
    pub ignore: Vec<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            meta_addr: None,
            block_size: DEFAULT_BLOCK_SIZE,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            ignore: Vec::new(),
        }
    }
}

impl SyncConfig {
    /// Load config from the sync root.
    ///
    /// Returns default config if .surfstore.toml doesn't exist.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be parsed.
    pub fn load(root: &Path) -> color_eyre::Result<Self> {
        let config_path = root.join(CONFIG_FILE);
        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: Self = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Reject values no sync run can work with
    ///
    /// # Errors
    /// Returns an error for a zero block size or timeout
    pub fn validate(&self) -> color_eyre::Result<()> {
        if self.block_size == 0 {
            bail!("block_size must be greater than zero");
        }
        if self.timeout_ms == 0 {
            bail!("timeout_ms must be greater than zero");
        }
        Ok(())
    }

    /// Per-call timeout
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
meta_addr = "10.0.0.5:8080"
block_size = 1024
timeout_ms = 2500
ignore = ["*.tmp", "build/"]
"#;

        let config: SyncConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.meta_addr.as_deref(), Some("10.0.0.5:8080"));
        assert_eq!(config.block_size, 1024);
        assert_eq!(config.timeout(), Duration::from_millis(2500));
        assert_eq!(config.ignore, vec!["*.tmp", "build/"]);
        config.validate().unwrap();
    }

    #[test]
    fn test_parse_empty_config() {
        let config: SyncConfig = toml::from_str("").unwrap();
        assert_eq!(config, SyncConfig::default());
        assert_eq!(config.block_size, 4096);
        assert_eq!(config.timeout_ms, 1000);
    }

    #[test]
    fn test_zero_block_size_is_invalid() {
        let config: SyncConfig = toml::from_str("block_size = 0").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(SyncConfig::load(dir.path()).unwrap(), SyncConfig::default());
    }

    #[test]
    fn test_load_from_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "meta_addr = \"localhost:9000\"\n").unwrap();

        let config = SyncConfig::load(dir.path()).unwrap();
        assert_eq!(config.meta_addr.as_deref(), Some("localhost:9000"));
        assert_eq!(config.block_size, DEFAULT_BLOCK_SIZE);
    }
}
