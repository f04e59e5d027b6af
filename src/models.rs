// Shared types for a single guest conversion run

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

/// A partition token exactly as the guest tool reports it (e.g. "/dev/sdb2").
pub type PartitionRef = String;

/// One disk image attached to the guest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualDisk {
    /// Path to the disk image or host block device
    pub path: PathBuf,
    /// Zero-based index in attachment order
    pub position: usize,
}

impl VirtualDisk {
    pub fn new(path: impl Into<PathBuf>, position: usize) -> Self {
        Self {
            path: path.into(),
            position,
        }
    }

    /// Build the disk set for a guest, numbering disks in the order given.
    pub fn from_paths<I, P>(paths: I) -> Vec<VirtualDisk>
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        paths
            .into_iter()
            .enumerate()
            .map(|(position, path)| VirtualDisk::new(path, position))
            .collect()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Render a disk set for log lines and error messages.
pub fn describe_disks(disks: &[VirtualDisk]) -> String {
    disks
        .iter()
        .map(|d| d.path.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Whether a guest session may modify the disks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    ReadOnly,
    ReadWrite,
}

impl AccessMode {
    pub fn flag(&self) -> &'static str {
        match self {
            AccessMode::ReadOnly => "--ro",
            AccessMode::ReadWrite => "--rw",
        }
    }
}

/// One guest introspection or mutation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuestCommand {
    pub verb: String,
    pub arguments: Vec<String>,
    pub mode: AccessMode,
}

impl GuestCommand {
    pub fn read_only(verb: &str) -> Self {
        Self {
            verb: verb.to_string(),
            arguments: Vec::new(),
            mode: AccessMode::ReadOnly,
        }
    }

    pub fn read_write(verb: &str) -> Self {
        Self {
            verb: verb.to_string(),
            arguments: Vec::new(),
            mode: AccessMode::ReadWrite,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.arguments.push(arg.into());
        self
    }

    /// The command line fed to the guest tool.
    ///
    /// Arguments that would be split by the tool's shell-like parser are
    /// wrapped in double quotes.
    pub fn script_line(&self) -> String {
        let mut line = self.verb.clone();
        for arg in &self.arguments {
            line.push(' ');
            line.push_str(&quote_argument(arg));
        }
        line
    }
}

impl std::fmt::Display for GuestCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.script_line())
    }
}

fn quote_argument(arg: &str) -> String {
    let needs_quotes = arg.is_empty()
        || arg
            .chars()
            .any(|c| c.is_whitespace() || c == '"' || c == '\'' || c == '\\' || c == '#');
    if !needs_quotes {
        return arg.to_string();
    }

    let mut quoted = String::with_capacity(arg.len() + 2);
    quoted.push('"');
    for c in arg.chars() {
        if c == '"' || c == '\\' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

/// Operating system family of the guest being converted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OsFamily {
    Linux,
    Windows,
}

impl OsFamily {
    pub fn is_windows(&self) -> bool {
        matches!(self, OsFamily::Windows)
    }
}

impl std::str::FromStr for OsFamily {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "linux" => Ok(OsFamily::Linux),
            "windows" => Ok(OsFamily::Windows),
            other => Err(format!(
                "unsupported OS family '{}' (available: linux, windows)",
                other
            )),
        }
    }
}

impl std::fmt::Display for OsFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OsFamily::Linux => write!(f, "linux"),
            OsFamily::Windows => write!(f, "windows"),
        }
    }
}

// A simple cancel token for aborting external invocations.
// Clones share state, so one token covers every component of a run.
#[derive(Debug, Clone)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once `cancel` has been called.
    pub async fn cancelled(&self) {
        loop {
            // Register before checking the flag so a concurrent cancel is not missed
            let notified = self.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}
