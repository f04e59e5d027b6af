// In-place conversion of a guest disk with virt-v2v-in-place
//
// The conversion tool is opaque: we only look at its exit status and how long
// it took. Its output goes straight to the operator's terminal.

use std::path::Path;
use std::time::{Duration, Instant};

use tracing::{error, info};

use crate::config::HelperConfig;
use crate::error::{ConversionCause, Result, V2vError};
use crate::exec::{ExecError, Executor, ProcessSpec};
use crate::guest::{BACKEND_ENV, BootableVolume};
use crate::models::{CancelToken, OsFamily};

mod driver;

pub use driver::{StagedDriver, download_file, stage_driver};

/// Environment variable pointing virt-v2v at the Windows driver package.
pub const VIRTIO_WIN_ENV: &str = "VIRTIO_WIN";

/// Which device the conversion tool should treat as the guest root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RootTarget {
    /// A device named up front, e.g. the "/dev/sda1" default
    Fixed(String),
    /// The partition found by the bootable volume resolver
    Bootable(BootableVolume),
    /// A logical volume holding the OS root
    LogicalVolume(String),
}

impl RootTarget {
    pub fn device(&self) -> &str {
        match self {
            RootTarget::Fixed(device) => device,
            RootTarget::Bootable(volume) => &volume.partition,
            RootTarget::LogicalVolume(lv) => lv,
        }
    }
}

/// One conversion job.
#[derive(Debug, Clone)]
pub struct ConversionRequest<'a> {
    pub disk: &'a Path,
    /// libvirt domain XML describing the guest
    pub descriptor: &'a Path,
    pub os_family: OsFamily,
    /// Driver package source for Windows guests; falls back to the config
    pub driver_url: Option<&'a str>,
    pub root: RootTarget,
}

pub struct DiskConverter<'a, E> {
    executor: &'a E,
    config: &'a HelperConfig,
}

impl<'a, E: Executor> DiskConverter<'a, E> {
    pub fn new(executor: &'a E, config: &'a HelperConfig) -> Self {
        Self { executor, config }
    }

    pub fn build_spec(
        &self,
        request: &ConversionRequest<'_>,
        driver: Option<&StagedDriver>,
    ) -> ProcessSpec {
        let mut spec = ProcessSpec::new(&self.config.tools.virt_v2v_in_place)
            .args(["-i", "libvirtxml"])
            .arg(request.descriptor.to_string_lossy())
            .arg("--root")
            .arg(request.root.device())
            .env(BACKEND_ENV, &self.config.tools.libguestfs_backend)
            .inherit_output();
        if let Some(driver) = driver {
            spec = spec.env(VIRTIO_WIN_ENV, driver.path().to_string_lossy());
        }
        spec
    }

    /// Convert the disk in place and return the wall-clock time it took.
    ///
    /// For Windows guests the driver package is staged first and removed
    /// again once the tool exits, whatever the outcome.
    pub async fn convert(
        &self,
        request: &ConversionRequest<'_>,
        cancel: &CancelToken,
    ) -> Result<Duration> {
        let failure = |cause: ConversionCause| V2vError::ConversionFailure {
            disk: request.disk.to_path_buf(),
            descriptor: request.descriptor.to_path_buf(),
            cause,
        };

        let driver = if request.os_family.is_windows() {
            match stage_driver(self.config, request.driver_url, cancel).await {
                Ok(driver) => Some(driver),
                Err(_) if cancel.is_cancelled() => return Err(failure(ConversionCause::Cancelled)),
                Err(e) => return Err(e),
            }
        } else {
            None
        };

        info!(
            "Converting {} ({}) with root {}",
            request.disk.display(),
            request.os_family,
            request.root.device()
        );

        let spec = self.build_spec(request, driver.as_ref());
        let start = Instant::now();
        let outcome = self.executor.run(&spec, cancel).await;
        let elapsed = start.elapsed();
        drop(driver);

        match outcome {
            Ok(output) if output.success => {
                info!("Disk conversion done in: {:?}", elapsed);
                Ok(elapsed)
            }
            Ok(output) => {
                error!("Conversion of {} failed: {}", request.disk.display(), output.status);
                Err(failure(ConversionCause::Tool(output.status)))
            }
            Err(ExecError::Cancelled) => {
                info!("Conversion of {} cancelled", request.disk.display());
                Err(failure(ConversionCause::Cancelled))
            }
            Err(e) => Err(failure(ConversionCause::Tool(e.to_string()))),
        }
    }
}
