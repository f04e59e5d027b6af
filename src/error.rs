//! Error types for guest inspection, conversion and customization.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, V2vError>;

/// Why an in-place conversion did not complete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversionCause {
    /// The run's cancel token fired while the tool was running
    Cancelled,
    /// The tool could not be started or exited unsuccessfully
    Tool(String),
}

impl std::fmt::Display for ConversionCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConversionCause::Cancelled => write!(f, "cancelled"),
            ConversionCause::Tool(reason) => write!(f, "{}", reason),
        }
    }
}

#[derive(Debug, Error)]
pub enum V2vError {
    /// A guest tool invocation exited unsuccessfully.
    #[error("failed to run command ({command}) on [{disks}]: {reason}: {output}")]
    GuestToolFailure {
        command: String,
        disks: String,
        reason: String,
        output: String,
    },

    #[error("bootable volume not found across {disk_count} disk(s)")]
    BootableVolumeNotFound { disk_count: usize },

    #[error("LVM not found for root '{os_root}': {listing:?}, {count}")]
    LvmNotFound {
        os_root: String,
        listing: Vec<String>,
        count: usize,
    },

    #[error("conversion of {disk} ({descriptor}) failed: {cause}")]
    ConversionFailure {
        disk: PathBuf,
        descriptor: PathBuf,
        cause: ConversionCause,
    },

    #[error("customization failed for {path}: {reason}")]
    CustomizationFailure { path: PathBuf, reason: String },

    #[error("failed to download {url}: {reason}")]
    DownloadFailure { url: String, reason: String },

    /// The tool succeeded but its output could not be interpreted.
    #[error("unexpected output from ({command}): '{output}'")]
    UnexpectedOutput { command: String, output: String },

    /// A host utility (lsblk, ntfsfix) failed.
    #[error("{program} failed: {reason}")]
    CommandFailure { program: String, reason: String },

    #[error("command ({command}) cancelled")]
    Cancelled { command: String },
}

impl V2vError {
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            V2vError::Cancelled { .. }
                | V2vError::ConversionFailure {
                    cause: ConversionCause::Cancelled,
                    ..
                }
        )
    }
}
