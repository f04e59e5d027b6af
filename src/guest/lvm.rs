// Detect whether the guest's root filesystem sits on a logical volume

use tracing::info;

use super::GuestCommandRunner;
use crate::error::{Result, V2vError};
use crate::exec::Executor;
use crate::models::{CancelToken, GuestCommand, VirtualDisk};

/// Return the OS root if it appears in the logical volume listing.
pub async fn detect_lvm_root<E: Executor>(
    runner: &GuestCommandRunner<E>,
    disks: &[VirtualDisk],
    cancel: &CancelToken,
) -> Result<String> {
    let os_root = runner
        .run(disks, &GuestCommand::read_only("inspect-os"), cancel)
        .await?;
    let listing = runner
        .run(disks, &GuestCommand::read_only("lvs"), cancel)
        .await?;
    match_lvm_root(&os_root, &listing)
}

/// Membership test of the trimmed root in the newline separated listing.
pub fn match_lvm_root(os_root: &str, listing: &str) -> Result<String> {
    let root = os_root.trim();
    let volumes: Vec<String> = listing.split('\n').map(str::to_string).collect();

    if !root.is_empty() && volumes.iter().any(|lv| lv.trim() == root) {
        info!("Guest root {} is a logical volume", root);
        return Ok(root.to_string());
    }

    Err(V2vError::LvmNotFound {
        os_root: root.to_string(),
        count: volumes.len(),
        listing: volumes,
    })
}
