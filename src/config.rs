use std::{
    env, fs,
    path::{Path, PathBuf},
};

use crate::prelude::*;
use nestify::nest;
use serde::{Deserialize, Serialize};

nest! {
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]*
    #[serde(rename_all = "kebab-case", default)]*
    /// Persistent configuration for checkpoint-tree.
    ///
    /// Stored by default at `~/.config/checkpoint-tree/config.yaml`, following the XDG Base
    /// Directory Specification. It holds the display defaults applied to every inspected
    /// archive; command line flags can only enable more sections.
    pub struct CheckpointTreeConfig {
        pub display: pub struct DisplayOptions {
            pub mounts: bool,
            pub stats: bool,
            pub ps_tree: bool,
        }
    }
}

impl DisplayOptions {
    /// Enable every section that is enabled in `other`.
    pub fn merge(self, other: DisplayOptions) -> Self {
        Self {
            mounts: self.mounts || other.mounts,
            stats: self.stats || other.stats,
            ps_tree: self.ps_tree || other.ps_tree,
        }
    }
}

/// Get the path to the default configuration file, following the XDG Base Directory
/// Specification at https://specifications.freedesktop.org/basedir-spec/basedir-spec-latest.html
fn get_configuration_file_path() -> Result<PathBuf> {
    let config_dir = match env::var("XDG_CONFIG_HOME") {
        Ok(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => {
            let home = env::var("HOME").context("HOME env variable not set")?;
            PathBuf::from(home).join(".config")
        }
    };
    Ok(config_dir.join("checkpoint-tree").join("config.yaml"))
}

impl CheckpointTreeConfig {
    /// Load the configuration.
    ///
    /// An explicit `config_path` must exist. Without one, the default location is used and
    /// a missing file yields the default configuration.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let (config_path, required) = match config_path {
            Some(path) => {
                let expanded = shellexpand::tilde(&path.to_string_lossy()).into_owned();
                (PathBuf::from(expanded), true)
            }
            None => (get_configuration_file_path()?, false),
        };

        match fs::read(&config_path) {
            Ok(config_str) => {
                let config: CheckpointTreeConfig = serde_yaml::from_slice(&config_str)
                    .with_context(|| {
                        format!(
                            "Failed to parse checkpoint-tree config at {}",
                            config_path.display()
                        )
                    })?;
                debug!("Config loaded from {}", config_path.display());
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && !required => {
                debug!("Config file not found at {}", config_path.display());
                Ok(CheckpointTreeConfig::default())
            }
            Err(e) => bail!(
                "Failed to load config at {}: {e}",
                config_path.display()
            ),
        }
    }
}
