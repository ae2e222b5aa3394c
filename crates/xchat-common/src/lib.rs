//! Centralized directory structure management for xchat
//!
//! Directory layout:
//! ```text
//! xchat_data/
//! ├── chat.xml        # The single shared data document
//! └── uploads/        # Stored message attachments
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable overriding the data root
pub const ROOT_ENV: &str = "XCHAT_ROOT";

/// File name of the shared XML document inside the data root
pub const DATA_FILE_NAME: &str = "chat.xml";

#[derive(Serialize, Deserialize, Debug, Default)]
struct RootConfig {
    data_root: Option<PathBuf>,
}

/// Get the global configuration path
fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("xchat").join("config.json"))
}

fn read_root_config(path: &Path) -> Option<PathBuf> {
    if !path.exists() {
        return None;
    }

    match fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str::<RootConfig>(&content) {
            Ok(config) => config.data_root,
            Err(e) => {
                warn!("Failed to parse config file at {:?}: {}", path, e);
                None
            }
        },
        Err(e) => {
            warn!("Failed to read config file at {:?}: {}", path, e);
            None
        }
    }
}

fn write_root_config(path: &Path, root: PathBuf) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let config = RootConfig {
        data_root: Some(root),
    };
    let json = serde_json::to_string_pretty(&config)?;
    fs::write(path, json)?;
    Ok(())
}

/// Load the persistent root from the user config file
pub fn load_persistent_root() -> Option<PathBuf> {
    read_root_config(&config_path()?)
}

/// Save a path as the persistent data root
pub fn save_persistent_root(root: PathBuf) -> anyhow::Result<()> {
    let path = config_path().ok_or_else(|| anyhow::anyhow!("Could not determine config dir"))?;
    write_root_config(&path, root.clone())?;
    info!("Persisted data root {:?} in {:?}", root, path);
    Ok(())
}

/// Get the data root from environment, persistent config, or default
pub fn data_root() -> PathBuf {
    if let Ok(val) = std::env::var(ROOT_ENV) {
        return PathBuf::from(val);
    }

    if let Some(root) = load_persistent_root() {
        return root;
    }

    PathBuf::from("xchat_data")
}

/// Path of the shared XML document
pub fn data_file() -> PathBuf {
    data_root().join(DATA_FILE_NAME)
}

/// Attachment storage directory
pub fn uploads_dir() -> PathBuf {
    data_root().join("uploads")
}

/// Ensure a single directory exists
pub fn ensure_dir(path: &Path) -> anyhow::Result<()> {
    if !path.exists() {
        fs::create_dir_all(path)?;
        info!("Created directory: {:?}", path);
    }
    Ok(())
}

/// Ensure a file's parent directory exists
pub fn ensure_parent(path: &Path) -> anyhow::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => ensure_dir(parent),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_root_config_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.json");

        assert_eq!(read_root_config(&path), None);

        write_root_config(&path, PathBuf::from("/srv/chat")).unwrap();
        assert_eq!(read_root_config(&path), Some(PathBuf::from("/srv/chat")));
    }

    #[test]
    fn test_corrupt_root_config_is_ignored() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();

        assert_eq!(read_root_config(&path), None);
    }

    #[test]
    fn test_data_paths_live_under_root() {
        let root = data_root();
        assert!(data_file().starts_with(&root));
        assert!(data_file().ends_with(DATA_FILE_NAME));
        assert!(uploads_dir().starts_with(&root));
    }

    #[test]
    fn test_ensure_parent_creates_directories() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("a").join("b").join("chat.xml");

        ensure_parent(&file).unwrap();
        assert!(dir.path().join("a").join("b").is_dir());
        ensure_parent(Path::new("chat.xml")).unwrap();
    }
}
