// Helper configuration: tool locations, staging paths and driver source
//
// Every field has a default, so a missing or partial TOML file is valid.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

/// Environment variable naming an explicit configuration file.
pub const CONFIG_ENV: &str = "V2V_HELPER_CONFIG";

const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HelperConfig {
    pub tools: ToolsConfig,
    pub paths: PathsConfig,
    pub driver: DriverConfig,
    pub logging: LoggingConfig,
}

/// External programs and the libguestfs backend they run with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub guestfish: String,
    pub virt_v2v_in_place: String,
    pub lsblk: String,
    pub ntfsfix: String,
    /// Value of LIBGUESTFS_BACKEND passed to every guest tool child
    pub libguestfs_backend: String,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            guestfish: "guestfish".to_string(),
            virt_v2v_in_place: "virt-v2v-in-place".to_string(),
            lsblk: "lsblk".to_string(),
            ntfsfix: "ntfsfix".to_string(),
            libguestfs_backend: "direct".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Local directory for network config and first-boot scripts
    pub staging_dir: PathBuf,
    /// Where a downloaded driver package is staged during conversion
    pub driver_iso: PathBuf,
    /// Directory checked for a driver package shipped with the appliance
    pub driver_predownload_dir: PathBuf,
    pub driver_predownload_name: String,
    /// In-guest destination of the wildcard network config
    pub guest_network_config: PathBuf,
    /// Root device used when no inspection result is available
    pub default_root: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            staging_dir: PathBuf::from("/home/fedora"),
            driver_iso: PathBuf::from("/tmp/virtio.iso"),
            driver_predownload_dir: PathBuf::from("/home/fedora/virtio-win"),
            driver_predownload_name: "virtio-win.iso".to_string(),
            guest_network_config: PathBuf::from("/etc/systemd/network/99-wildcard.network"),
            default_root: "/dev/sda1".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Driver package URL used when none is given on the command line
    pub url: Option<String>,
    /// Expected SHA-256 of the package, hex encoded
    pub sha256: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// When set, logs are also written to `v2v-helper.log` in this directory
    pub dir: Option<PathBuf>,
}

impl HelperConfig {
    pub fn from_toml_content(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse helper configuration")
    }

    pub fn to_toml_content(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize helper configuration")
    }

    /// Pick the configuration file: an explicit path, `$V2V_HELPER_CONFIG`,
    /// or the per-user config file if it exists.
    pub fn resolve_path(explicit: Option<&Path>) -> Option<PathBuf> {
        if let Some(path) = explicit {
            return Some(path.to_path_buf());
        }

        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return Some(PathBuf::from(path));
        }

        default_config_path().filter(|path| path.exists())
    }

    /// Load the resolved configuration file, or the defaults when there is none.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        match Self::resolve_path(explicit) {
            Some(path) => Self::load_file(&path),
            None => Ok(Self::default()),
        }
    }

    pub fn load_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file: {}", path.display()))?;
        Self::from_toml_content(&content)
            .with_context(|| format!("Invalid configuration file: {}", path.display()))
    }

    /// Location of the wildcard network file before upload.
    pub fn network_staging_path(&self) -> PathBuf {
        let name = self
            .paths
            .guest_network_config
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "99-wildcard.network".into());
        self.paths.staging_dir.join(name)
    }

    /// Location of a staged first-boot script.
    pub fn firstboot_script_path(&self, name: &str) -> PathBuf {
        self.paths.staging_dir.join(format!("{}.sh", name))
    }

    pub fn predownloaded_driver_path(&self) -> PathBuf {
        self.paths
            .driver_predownload_dir
            .join(&self.paths.driver_predownload_name)
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    ProjectDirs::from("io", "v2v", "v2v-helper")
        .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
}
