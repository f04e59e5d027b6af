//! One conversion run for one guest.
//!
//! Inspection runs first (read-only) so the conversion can be pointed at the
//! resolved root. Afterwards Windows guests get an NTFS repair pass and
//! Linux guests get the wildcard network config.

use std::path::PathBuf;

use tracing::{info, warn};

use crate::config::HelperConfig;
use crate::convert::{ConversionRequest, DiskConverter, RootTarget};
use crate::error::{Result, V2vError};
use crate::exec::Executor;
use crate::guest::{
    BootableVolume, GuestCommandRunner, GuestCustomizer, GuestInspector, InspectionSnapshot,
};
use crate::models::{CancelToken, OsFamily, VirtualDisk};
use crate::repair::{NtfsRepairer, RepairReport};
use crate::timing::TimingTracker;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirstbootScript {
    pub name: String,
    pub body: String,
}

/// Everything needed to convert one guest.
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub disks: Vec<VirtualDisk>,
    pub descriptor: PathBuf,
    pub os_family: OsFamily,
    pub driver_url: Option<String>,
    pub firstboot_scripts: Vec<FirstbootScript>,
}

#[derive(Debug)]
pub struct RunReport {
    pub snapshot: InspectionSnapshot,
    pub bootable: Option<BootableVolume>,
    pub lvm_root: Option<String>,
    pub root: RootTarget,
    /// Position of the disk handed to the converter
    pub primary_disk: usize,
    pub repairs: Vec<RepairReport>,
    pub network_config: Option<PathBuf>,
    pub firstboot_scripts: Vec<PathBuf>,
    /// The run's tracker, handed back so incremental passes can be added
    pub timing: TimingTracker,
}

pub struct Orchestrator<E> {
    executor: E,
    config: HelperConfig,
}

impl<E: Executor> Orchestrator<E> {
    pub fn new(executor: E, config: HelperConfig) -> Self {
        Self { executor, config }
    }

    pub async fn run(
        &self,
        plan: &RunPlan,
        mut timing: TimingTracker,
        cancel: &CancelToken,
    ) -> Result<RunReport> {
        let runner = GuestCommandRunner::new(&self.executor, &self.config.tools);
        let inspector = GuestInspector::new(&runner);

        let snapshot = inspector.snapshot(&plan.disks, cancel).await?;

        let bootable = match inspector
            .bootable_volume(&snapshot, &plan.disks, cancel)
            .await
        {
            Ok(volume) => Some(volume),
            Err(V2vError::BootableVolumeNotFound { disk_count }) => {
                warn!("No bootable partition flagged across {} disk(s)", disk_count);
                None
            }
            Err(e) => return Err(e),
        };

        let lvm_root = match snapshot.lvm_root() {
            Ok(root) => Some(root),
            Err(e) => {
                info!("Root is not on LVM: {}", e);
                None
            }
        };

        let root = select_root(&self.config, &snapshot, bootable.as_ref(), lvm_root.as_deref());
        let primary_disk = bootable
            .as_ref()
            .map(|v| v.position)
            .filter(|p| *p < plan.disks.len())
            .unwrap_or(0);
        let disk = plan
            .disks
            .get(primary_disk)
            .ok_or(V2vError::BootableVolumeNotFound { disk_count: 0 })?;
        info!(
            "Using disk {} ({}) with root {}",
            primary_disk,
            disk.path.display(),
            root.device()
        );

        let converter = DiskConverter::new(&self.executor, &self.config);
        let elapsed = converter
            .convert(
                &ConversionRequest {
                    disk: &disk.path,
                    descriptor: &plan.descriptor,
                    os_family: plan.os_family,
                    driver_url: plan.driver_url.as_deref(),
                    root: root.clone(),
                },
                cancel,
            )
            .await?;
        timing.record_first_copy(elapsed);

        let mut repairs = Vec::new();
        if plan.os_family.is_windows() {
            let repairer = NtfsRepairer::new(&self.executor, &self.config.tools);
            for d in &plan.disks {
                repairs.push(
                    repairer
                        .repair_disk(&d.path.to_string_lossy(), cancel)
                        .await,
                );
            }
        }

        let customizer = GuestCustomizer::new(&runner, &self.config);
        let network_config = if plan.os_family == OsFamily::Linux {
            Some(customizer.add_wildcard_network(&plan.disks, cancel).await?)
        } else {
            None
        };

        let firstboot_scripts = plan
            .firstboot_scripts
            .iter()
            .map(|s| customizer.add_firstboot_script(&s.body, &s.name))
            .collect::<Result<Vec<_>>>()?;

        timing.summary().log();

        Ok(RunReport {
            snapshot,
            bootable,
            lvm_root,
            root,
            primary_disk,
            repairs,
            network_config,
            firstboot_scripts,
            timing,
        })
    }
}

/// LVM root first, then the single root inspect-os reported, then the
/// bootable partition, then the configured default.
///
/// The bootable flag often marks `/boot` or a system-reserved partition, so
/// it only stands in for the root when inspection found none.
pub fn select_root(
    config: &HelperConfig,
    snapshot: &InspectionSnapshot,
    bootable: Option<&BootableVolume>,
    lvm_root: Option<&str>,
) -> RootTarget {
    if let Some(lv) = lvm_root {
        return RootTarget::LogicalVolume(lv.to_string());
    }
    let os_root = snapshot.os_root.trim();
    if !os_root.is_empty() && !os_root.contains('\n') {
        return RootTarget::Fixed(os_root.to_string());
    }
    if let Some(volume) = bootable {
        return RootTarget::Bootable(volume.clone());
    }
    RootTarget::Fixed(config.paths.default_root.clone())
}
