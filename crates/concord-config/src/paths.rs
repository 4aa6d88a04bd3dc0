//! Path utilities and XDG directory discovery.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;

use crate::ConfigError;

pub struct Paths {
    project_dirs: Option<ProjectDirs>,
}

impl Paths {
    pub fn new() -> Self {
        Self {
            project_dirs: ProjectDirs::from("rs", "concord", "concord"),
        }
    }

    pub fn user_config_dir(&self) -> Result<PathBuf, ConfigError> {
        self.project_dirs
            .as_ref()
            .map(|p| p.config_dir().to_path_buf())
            .ok_or_else(|| ConfigError::Xdg("failed to determine user config directory".into()))
    }

    pub fn user_config_file(&self) -> Result<PathBuf, ConfigError> {
        Ok(self.user_config_dir()?.join("config.toml"))
    }

    pub fn node_config_file(node_dir: impl AsRef<Path>) -> PathBuf {
        node_dir.as_ref().join("concord.toml")
    }

    pub fn local_config_file(node_dir: impl AsRef<Path>) -> PathBuf {
        node_dir.as_ref().join("concord.local.toml")
    }

    pub fn state_dir(node_dir: impl AsRef<Path>) -> PathBuf {
        node_dir.as_ref().join(".concord")
    }
}

impl Default for Paths {
    fn default() -> Self {
        Self::new()
    }
}
