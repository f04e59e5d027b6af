// One read-only inspection pass shared by the bootable resolver and LVM check

use tracing::info;

use super::{BootableVolume, GuestCommandRunner, match_lvm_root, resolve_from_partitions};
use crate::error::Result;
use crate::exec::Executor;
use crate::models::{CancelToken, GuestCommand, PartitionRef, VirtualDisk};
use crate::utils::non_empty_lines;

/// Results of the heavy listing commands, taken once per run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InspectionSnapshot {
    pub partitions: Vec<PartitionRef>,
    /// Output of `inspect-os`; empty when no operating system was found
    pub os_root: String,
    /// Raw newline separated output of `lvs`
    pub logical_volumes: String,
}

impl InspectionSnapshot {
    /// The OS root, if it lives on a logical volume.
    pub fn lvm_root(&self) -> Result<String> {
        match_lvm_root(&self.os_root, &self.logical_volumes)
    }
}

pub struct GuestInspector<'a, E> {
    runner: &'a GuestCommandRunner<E>,
}

impl<'a, E: Executor> GuestInspector<'a, E> {
    pub fn new(runner: &'a GuestCommandRunner<E>) -> Self {
        Self { runner }
    }

    pub async fn snapshot(
        &self,
        disks: &[VirtualDisk],
        cancel: &CancelToken,
    ) -> Result<InspectionSnapshot> {
        let partitions = self
            .runner
            .run(disks, &GuestCommand::read_only("list-partitions"), cancel)
            .await?;
        let os_root = self
            .runner
            .run(disks, &GuestCommand::read_only("inspect-os"), cancel)
            .await?;
        let logical_volumes = self
            .runner
            .run(disks, &GuestCommand::read_only("lvs"), cancel)
            .await?;

        let snapshot = InspectionSnapshot {
            partitions: non_empty_lines(&partitions),
            os_root,
            logical_volumes,
        };
        info!(
            "Inspected {} disk(s): {} partition(s), os root '{}'",
            disks.len(),
            snapshot.partitions.len(),
            snapshot.os_root
        );
        Ok(snapshot)
    }

    /// Resolve the bootable volume from the snapshot's partition listing.
    pub async fn bootable_volume(
        &self,
        snapshot: &InspectionSnapshot,
        disks: &[VirtualDisk],
        cancel: &CancelToken,
    ) -> Result<BootableVolume> {
        resolve_from_partitions(self.runner, disks, &snapshot.partitions, cancel).await
    }

    /// Read the guest's `/etc/os-release` (normalized).
    pub async fn os_release(&self, disks: &[VirtualDisk], cancel: &CancelToken) -> Result<String> {
        self.runner
            .run(
                disks,
                &GuestCommand::read_only("cat").arg("/etc/os-release"),
                cancel,
            )
            .await
    }
}

/// Look up a key in os-release content, stripping surrounding quotes.
pub fn os_release_field(os_release: &str, key: &str) -> Option<String> {
    os_release.lines().find_map(|line| {
        let (k, v) = line.trim().split_once('=')?;
        if !k.trim().eq_ignore_ascii_case(key) {
            return None;
        }
        Some(v.trim().trim_matches(|c| c == '"' || c == '\'').to_string())
    })
}
