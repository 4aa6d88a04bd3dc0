//! Configuration loader with multi-source merging.

use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::{NodeConfig, Paths};

pub struct ConfigLoader {
    node_dir: PathBuf,
    env_prefix: String,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            node_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            env_prefix: "CONCORD".to_string(),
        }
    }

    pub fn with_node_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.node_dir = dir.into();
        self
    }

    pub fn load(self) -> Result<NodeConfig> {
        let mut builder = config::Config::builder();

        let defaults = NodeConfig::default();
        builder = builder.add_source(config::Config::try_from(&defaults)?);

        let paths = Paths::new();
        if let Ok(user_config_file) = paths.user_config_file() {
            if user_config_file.exists() {
                builder = builder.add_source(
                    config::File::from(user_config_file)
                        .required(false)
                        .format(config::FileFormat::Toml),
                );
            }
        }

        let node_config_file = Paths::node_config_file(&self.node_dir);
        if node_config_file.exists() {
            builder = builder.add_source(
                config::File::from(node_config_file)
                    .required(false)
                    .format(config::FileFormat::Toml),
            );
        }

        let local_config_file = Paths::local_config_file(&self.node_dir);
        if local_config_file.exists() {
            builder = builder.add_source(
                config::File::from(local_config_file)
                    .required(false)
                    .format(config::FileFormat::Toml),
            );
        }

        builder = builder.add_source(
            config::Environment::with_prefix(&self.env_prefix)
                .separator("_")
                .try_parsing(true),
        );

        let built = builder.build().context("failed to build configuration")?;
        let mut node_config: NodeConfig = built
            .try_deserialize()
            .context("failed to deserialize configuration")?;

        node_config.resolve_paths(&self.node_dir);
        Ok(node_config)
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::*;

    #[test]
    fn loads_defaults_when_no_files_present() {
        let temp_dir = tempdir().expect("tempdir");
        let config = ConfigLoader::new()
            .with_node_dir(temp_dir.path())
            .load()
            .expect("load");
        assert_eq!(config.network.bind_address, "127.0.0.1:7700");
    }

    #[test]
    fn node_config_overrides_defaults() {
        let temp_dir = tempdir().expect("tempdir");
        let node_dir = temp_dir.path();

        fs::write(
            node_dir.join("concord.toml"),
            r#"
[network]
bind_address = "0.0.0.0:9000"

[timing]
request_t = 500
"#,
        )
        .expect("write node config");

        let config = ConfigLoader::new()
            .with_node_dir(node_dir)
            .load()
            .expect("load");
        assert_eq!(config.network.bind_address, "0.0.0.0:9000");
        assert_eq!(config.timing.request_t, 500);
    }

    #[test]
    fn local_config_overrides_node_config() {
        let temp_dir = tempdir().expect("tempdir");
        let node_dir = temp_dir.path();

        fs::write(
            node_dir.join("concord.toml"),
            "[network]\nbind_address = \"127.0.0.1:7700\"\n",
        )
        .expect("write node config");
        fs::write(
            node_dir.join("concord.local.toml"),
            "[network]\nbind_address = \"127.0.0.1:7777\"\n",
        )
        .expect("write local config");

        let config = ConfigLoader::new()
            .with_node_dir(node_dir)
            .load()
            .expect("load");
        assert_eq!(config.network.bind_address, "127.0.0.1:7777");
    }
}
