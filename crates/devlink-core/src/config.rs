//! Runtime configuration.

use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Configuration shared by the directory and the devices it creates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DevlinkConfig {
    /// Root of the sysfs mount used to resolve PCI parents.
    pub sysfs_root: PathBuf,
    /// Kernel firmware loader custom search path parameter.
    pub firmware_class_path: PathBuf,
    /// Package cache directory; firmware is staged under `devlink/firmware`.
    pub cache_dir: PathBuf,
    /// Sets of fixed version names used to build component instance keys,
    /// each comma separated (e.g. `"asic.id,asic.rev"`).
    pub fixed_versions: Vec<String>,
    /// Device snapshot to replay instead of talking to the kernel.
    pub emulation: Option<PathBuf>,
    /// Where to write a snapshot of the recorded exchanges.
    pub record: Option<PathBuf>,
}

impl Default for DevlinkConfig {
    fn default() -> Self {
        Self {
            sysfs_root: PathBuf::from("/sys"),
            firmware_class_path: PathBuf::from("/sys/module/firmware_class/parameters/path"),
            cache_dir: PathBuf::from("/var/cache/fwupd"),
            fixed_versions: Vec::new(),
            emulation: None,
            record: None,
        }
    }
}

impl DevlinkConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: DevlinkConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Directory the firmware images are written to before flashing.
    pub fn firmware_dir(&self) -> PathBuf {
        self.cache_dir.join("devlink").join("firmware")
    }

    /// `fixed_versions` split into name lists, empty names dropped.
    pub fn fixed_version_sets(&self) -> Vec<Vec<String>> {
        self.fixed_versions
            .iter()
            .map(|set| {
                set.split(',')
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .filter(|set| !set.is_empty())
            .collect()
    }
}
