//! Application paths for config and data.

use directories::ProjectDirs;
use std::path::{Path, PathBuf};

/// File name of the local store inside the data directory.
pub const DATABASE_FILE: &str = "courier.sqlite";

/// File name of the config file inside the config directory.
pub const CONFIG_FILE: &str = "config.toml";

/// Application paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppPaths {
    /// Configuration directory.
    pub config: PathBuf,
    /// Data directory (local store).
    pub data: PathBuf,
}

impl AppPaths {
    /// Platform paths for courier.
    #[must_use]
    pub fn new() -> Self {
        if let Some(proj_dirs) = ProjectDirs::from("dev", "courier", "courier") {
            Self {
                config: proj_dirs.config_dir().to_path_buf(),
                data: proj_dirs.data_dir().to_path_buf(),
            }
        } else {
            let home = directories::BaseDirs::new()
                .map_or_else(|| PathBuf::from("."), |d| d.home_dir().to_path_buf());
            Self {
                config: home.join(".config/courier"),
                data: home.join(".local/share/courier"),
            }
        }
    }

    /// Replace the data directory.
    #[must_use]
    pub fn with_data_dir(mut self, data: impl AsRef<Path>) -> Self {
        self.data = data.as_ref().to_path_buf();
        self
    }

    /// Default config file location.
    #[must_use]
    pub fn config_file(&self) -> PathBuf {
        self.config.join(CONFIG_FILE)
    }

    /// Local store location.
    #[must_use]
    pub fn database_file(&self) -> PathBuf {
        self.data.join(DATABASE_FILE)
    }
}

impl Default for AppPaths {
    fn default() -> Self {
        Self::new()
    }
}
