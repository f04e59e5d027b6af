// Driver package retrieval for Windows conversions

use std::path::{Path, PathBuf};

use futures_util::StreamExt;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::config::HelperConfig;
use crate::error::{Result, V2vError};
use crate::models::CancelToken;

/// A driver package on local disk.
///
/// Downloaded packages are removed when the value is dropped; packages that
/// shipped with the appliance are left in place.
#[derive(Debug)]
pub struct StagedDriver {
    path: PathBuf,
    persistent: bool,
}

impl StagedDriver {
    pub fn downloaded(path: PathBuf) -> Self {
        Self {
            path,
            persistent: false,
        }
    }

    pub fn preinstalled(path: PathBuf) -> Self {
        Self {
            path,
            persistent: true,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_persistent(&self) -> bool {
        self.persistent
    }
}

impl Drop for StagedDriver {
    fn drop(&mut self) {
        if self.persistent {
            return;
        }

        if self.path.exists() {
            if let Err(e) = std::fs::remove_file(&self.path) {
                warn!("Failed to remove staged driver {}: {}", self.path.display(), e);
            } else {
                debug!("Removed staged driver {}", self.path.display());
            }
        }
    }
}

/// Use the appliance's bundled driver package if present, otherwise download
/// `url` to the configured staging path.
pub async fn stage_driver(
    config: &HelperConfig,
    url: Option<&str>,
    cancel: &CancelToken,
) -> Result<StagedDriver> {
    let bundled = config.predownloaded_driver_path();
    if bundled.is_file() {
        info!("Found bundled virtio drivers at {}", bundled.display());
        return Ok(StagedDriver::preinstalled(bundled));
    }

    let url = url
        .or(config.driver.url.as_deref())
        .ok_or_else(|| V2vError::DownloadFailure {
            url: String::new(),
            reason: "no driver package URL configured".to_string(),
        })?;

    info!("Downloading Windows virtio driver...");
    let staged = StagedDriver::downloaded(reserve_staging_path(&config.paths.driver_iso, url)?);
    download_file(url, staged.path(), config.driver.sha256.as_deref(), cancel).await?;
    Ok(staged)
}

/// Claim a unique file next to `template`, e.g. `/tmp/virtio-Ab12Cd.iso`,
/// so concurrent runs never share a driver package.
fn reserve_staging_path(template: &Path, url: &str) -> Result<PathBuf> {
    let failure = |reason: String| V2vError::DownloadFailure {
        url: url.to_string(),
        reason,
    };

    let dir = template
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let prefix = format!(
        "{}-",
        template
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "virtio".to_string())
    );
    let suffix = template
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    std::fs::create_dir_all(dir)
        .map_err(|e| failure(format!("failed to create {}: {}", dir.display(), e)))?;
    let reserved = tempfile::Builder::new()
        .prefix(&prefix)
        .suffix(&suffix)
        .tempfile_in(dir)
        .map_err(|e| failure(format!("failed to reserve staging file in {}: {}", dir.display(), e)))?;
    let path = reserved
        .into_temp_path()
        .keep()
        .map_err(|e| failure(format!("failed to keep staging file: {}", e)))?;
    debug!("Reserved driver staging file {}", path.display());
    Ok(path)
}

/// Fetch `url` into `path`, optionally checking its SHA-256.
///
/// The body is written to `<path>.download` and renamed once complete.
pub async fn download_file(
    url: &str,
    path: &Path,
    expected_sha256: Option<&str>,
    cancel: &CancelToken,
) -> Result<u64> {
    let failure = |reason: String| V2vError::DownloadFailure {
        url: url.to_string(),
        reason,
    };

    let response = tokio::select! {
        response = reqwest::get(url) => {
            response.map_err(|e| failure(format!("failed to download file: {}", e)))?
        }
        _ = cancel.cancelled() => return Err(failure("cancelled".to_string())),
    };

    if response.status() != reqwest::StatusCode::OK {
        return Err(failure(format!("bad status: {}", response.status())));
    }

    let mut temp_name = path.as_os_str().to_os_string();
    temp_name.push(".download");
    let temp_path = PathBuf::from(temp_name);

    let mut output_file = tokio::fs::File::create(&temp_path)
        .await
        .map_err(|e| failure(format!("failed to create file {}: {}", temp_path.display(), e)))?;

    let mut hasher = Sha256::new();
    let mut downloaded = 0u64;
    let mut stream = response.bytes_stream();

    let result: std::result::Result<(), String> = async {
        loop {
            let item = tokio::select! {
                item = stream.next() => item,
                _ = cancel.cancelled() => return Err("cancelled".to_string()),
            };
            let Some(item) = item else { break };
            let chunk = item.map_err(|e| format!("failed to download chunk: {}", e))?;

            output_file
                .write_all(&chunk)
                .await
                .map_err(|e| format!("failed to write chunk: {}", e))?;
            hasher.update(&chunk);
            downloaded += chunk.len() as u64;
        }

        output_file
            .flush()
            .await
            .map_err(|e| format!("failed to flush file: {}", e))
    }
    .await;
    drop(output_file);

    if let Err(reason) = result {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(failure(reason));
    }

    if let Some(expected) = expected_sha256 {
        let hash_hex = hex::encode(hasher.finalize());
        if hash_hex != expected.trim().to_lowercase() {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(failure(format!(
                "hash verification failed. Expected: {}, got: {}",
                expected, hash_hex
            )));
        }
    }

    if let Err(e) = tokio::fs::rename(&temp_path, path).await {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(failure(format!("failed to rename file: {}", e)));
    }

    info!("Downloaded {} bytes to {}", downloaded, path.display());
    Ok(downloaded)
}
