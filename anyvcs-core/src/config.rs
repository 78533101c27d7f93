//! Repository configuration stored at `<root>/.anyvcs/config.json`

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Name of the control directory each backend keeps at the repository root.
pub const CONTROL_DIR: &str = ".anyvcs";

const CONFIG_FILE: &str = "config.json";

/// Per-repository configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VcsConfig {
    /// Author recorded on commits when the changeset does not override it.
    #[serde(default = "default_author")]
    pub author: String,

    /// Author email, if any.
    #[serde(default)]
    pub email: Option<String>,

    /// Capacity of the base-text LRU cache held by the repository facade.
    #[serde(default = "default_base_text_cache_size")]
    pub base_text_cache_size: usize,
}

fn default_author() -> String {
    "anonymous".to_string()
}

fn default_base_text_cache_size() -> usize {
    64
}

impl Default for VcsConfig {
    fn default() -> Self {
        Self {
            author: default_author(),
            email: None,
            base_text_cache_size: default_base_text_cache_size(),
        }
    }
}

impl VcsConfig {
    /// Load the configuration for a repository root, falling back to
    /// defaults when no config file exists.
    pub fn load(root: &Path) -> Result<Self> {
        let path = root.join(CONTROL_DIR).join(CONFIG_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&data)?)
    }

    /// Persist the configuration under the repository's control directory.
    pub fn save(&self, root: &Path) -> Result<()> {
        let dir = root.join(CONTROL_DIR);
        fs::create_dir_all(&dir)?;
        let data = serde_json::to_string_pretty(self)?;
        fs::write(dir.join(CONFIG_FILE), data)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_when_missing() {
        let dir = TempDir::new().unwrap();
        let config = VcsConfig::load(dir.path()).unwrap();
        assert_eq!(config.author, "anonymous");
        assert!(config.email.is_none());
        assert_eq!(config.base_text_cache_size, 64);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = TempDir::new().unwrap();
        let config = VcsConfig {
            author: "author".to_string(),
            email: Some("email@service.domain".to_string()),
            base_text_cache_size: 16,
        };
        config.save(dir.path()).unwrap();

        let loaded = VcsConfig::load(dir.path()).unwrap();
        assert_eq!(loaded.author, "author");
        assert_eq!(loaded.email.as_deref(), Some("email@service.domain"));
        assert_eq!(loaded.base_text_cache_size, 16);
    }
}
