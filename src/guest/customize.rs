// Post-conversion customizations: network config upload and first-boot scripts

use std::path::{Path, PathBuf};

use tracing::info;

use super::GuestCommandRunner;
use crate::config::HelperConfig;
use crate::error::{Result, V2vError};
use crate::exec::Executor;
use crate::models::{CancelToken, GuestCommand, VirtualDisk};

/// systemd-networkd unit enabling DHCP on every `en*` interface.
pub const WILDCARD_NETWORK_CONFIG: &str = "[Match]
Name=en*

[Network]
DHCP=yes";

pub struct GuestCustomizer<'a, E> {
    runner: &'a GuestCommandRunner<E>,
    config: &'a HelperConfig,
}

impl<'a, E: Executor> GuestCustomizer<'a, E> {
    pub fn new(runner: &'a GuestCommandRunner<E>, config: &'a HelperConfig) -> Self {
        Self { runner, config }
    }

    /// Stage the wildcard network config locally and upload it into the guest.
    ///
    /// A single-disk guest gets a session on that disk; with several disks
    /// the session spans all of them, since the primary disk is not known yet.
    pub async fn add_wildcard_network(
        &self,
        disks: &[VirtualDisk],
        cancel: &CancelToken,
    ) -> Result<PathBuf> {
        let staged = self.config.network_staging_path();
        let target = &self.config.paths.guest_network_config;

        if disks.is_empty() {
            return Err(V2vError::CustomizationFailure {
                path: target.clone(),
                reason: "no disks to upload into".to_string(),
            });
        }

        write_staging_file(&staged, WILDCARD_NETWORK_CONFIG)?;
        info!("Created local network config {}", staged.display());

        let session: &[VirtualDisk] = if disks.len() == 1 {
            info!("Uploading network config to single disk {}", disks[0].path.display());
            &disks[..1]
        } else {
            info!("Uploading network config across {} disks", disks.len());
            disks
        };

        let upload = GuestCommand::read_write("upload")
            .arg(staged.to_string_lossy())
            .arg(target.to_string_lossy());
        self.runner.run(session, &upload, cancel).await?;

        info!("Uploaded network config to {}", target.display());
        Ok(staged)
    }

    /// Write a first-boot script to `<staging_dir>/<name>.sh`.
    ///
    /// The script is only staged here; it is not uploaded into the guest.
    pub fn add_firstboot_script(&self, script: &str, name: &str) -> Result<PathBuf> {
        let path = self.config.firstboot_script_path(name);
        if name.is_empty() || name.contains(['/', '\\']) || name == ".." {
            return Err(V2vError::CustomizationFailure {
                path,
                reason: format!("invalid script name '{}'", name),
            });
        }

        write_staging_file(&path, script)?;
        info!("Created firstboot script {}", name);
        Ok(path)
    }
}

fn write_staging_file(path: &Path, content: &str) -> Result<()> {
    let failure = |e: std::io::Error| V2vError::CustomizationFailure {
        path: path.to_path_buf(),
        reason: e.to_string(),
    };

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(failure)?;
    }
    std::fs::write(path, content).map_err(failure)
}
