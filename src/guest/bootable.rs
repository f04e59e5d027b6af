// Locate the disk that holds the bootable partition

use tracing::{debug, info};

use super::GuestCommandRunner;
use crate::error::{Result, V2vError};
use crate::exec::Executor;
use crate::models::{CancelToken, GuestCommand, PartitionRef, VirtualDisk};
use crate::utils::non_empty_lines;

/// The first partition flagged bootable, and the disk it lives on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootableVolume {
    /// Zero-based position of the owning disk in attachment order
    pub position: usize,
    /// Partition as named inside the appliance, e.g. "/dev/sdb2"
    pub partition: PartitionRef,
    /// Owning device, e.g. "/dev/sdb"
    pub device: String,
    pub partition_number: u32,
}

/// List partitions across all disks and resolve the bootable one.
pub async fn resolve_bootable_volume<E: Executor>(
    runner: &GuestCommandRunner<E>,
    disks: &[VirtualDisk],
    cancel: &CancelToken,
) -> Result<BootableVolume> {
    let listing = runner
        .run(disks, &GuestCommand::read_only("list-partitions"), cancel)
        .await?;
    let partitions = non_empty_lines(&listing);
    debug!("Partitions: {:?}", partitions);
    resolve_from_partitions(runner, disks, &partitions, cancel).await
}

/// Walk an already listed set of partitions in order; the first one whose
/// bootable flag is set wins. Any tool failure aborts the walk.
pub async fn resolve_from_partitions<E: Executor>(
    runner: &GuestCommandRunner<E>,
    disks: &[VirtualDisk],
    partitions: &[PartitionRef],
    cancel: &CancelToken,
) -> Result<BootableVolume> {
    for partition in partitions {
        let partition = partition.trim();

        let device = runner
            .run(
                disks,
                &GuestCommand::read_only("part-to-dev").arg(partition),
                cancel,
            )
            .await?;

        let partnum_cmd = GuestCommand::read_only("part-to-partnum").arg(partition);
        let partnum_raw = runner.run(disks, &partnum_cmd, cancel).await?;
        let partition_number =
            partnum_raw
                .parse::<u32>()
                .map_err(|_| V2vError::UnexpectedOutput {
                    command: partnum_cmd.script_line(),
                    output: partnum_raw.clone(),
                })?;

        let bootable = runner
            .run(
                disks,
                &GuestCommand::read_only("part-get-bootable")
                    .arg(device.as_str())
                    .arg(partnum_raw.as_str()),
                cancel,
            )
            .await?;

        if bootable != "true" {
            continue;
        }

        let index_cmd = GuestCommand::read_only("device-index").arg(device.as_str());
        let index_raw = runner.run(disks, &index_cmd, cancel).await?;
        let position = index_raw
            .parse::<usize>()
            .map_err(|_| V2vError::UnexpectedOutput {
                command: index_cmd.script_line(),
                output: index_raw.clone(),
            })?;

        info!(
            "Bootable partition {} on {} (disk position {})",
            partition, device, position
        );
        return Ok(BootableVolume {
            position,
            partition: partition.to_string(),
            device,
            partition_number,
        });
    }

    Err(V2vError::BootableVolumeNotFound {
        disk_count: disks.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ToolsConfig;
    use crate::exec::ProcessOutput;
    use crate::exec::testing::ScriptedExecutor;

    /// Script one partition's part-to-dev / part-to-partnum / part-get-bootable answers.
    fn script_partition(
        executor: &ScriptedExecutor,
        partition: &str,
        device: &str,
        num: u32,
        bootable: bool,
    ) {
        executor.respond(
            &format!("part-to-dev {}", partition),
            ProcessOutput::ok(format!("{}\n", device)),
        );
        executor.respond(
            &format!("part-to-partnum {}", partition),
            ProcessOutput::ok(format!("{}\n", num)),
        );
        executor.respond(
            &format!("part-get-bootable {} {}", device, num),
            ProcessOutput::ok(if bootable { "true\n" } else { "false\n" }),
        );
    }

    fn two_disk_guest(executor: &ScriptedExecutor, sdb2_bootable: bool) {
        executor.respond(
            "list-partitions",
            ProcessOutput::ok("/dev/sda1\n/dev/sdb1\n/dev/sdb2\n"),
        );
        script_partition(executor, "/dev/sda1", "/dev/sda", 1, false);
        script_partition(executor, "/dev/sdb1", "/dev/sdb", 1, false);
        script_partition(executor, "/dev/sdb2", "/dev/sdb", 2, sdb2_bootable);
        executor.respond("device-index /dev/sda", ProcessOutput::ok("0\n"));
        executor.respond("device-index /dev/sdb", ProcessOutput::ok("1\n"));
    }

    #[tokio::test]
    async fn test_bootable_partition_on_second_disk() {
        let executor = ScriptedExecutor::new();
        two_disk_guest(&executor, true);
        let runner = GuestCommandRunner::new(&executor, &ToolsConfig::default());
        let disks = VirtualDisk::from_paths(["/var/lib/disks/a.qcow2", "/var/lib/disks/b.qcow2"]);

        let volume = resolve_bootable_volume(&runner, &disks, &CancelToken::new())
            .await
            .unwrap();

        // Positions are zero-based: the second attached disk is 1
        assert_eq!(
            volume,
            BootableVolume {
                position: 1,
                partition: "/dev/sdb2".to_string(),
                device: "/dev/sdb".to_string(),
                partition_number: 2,
            }
        );
        assert_eq!(executor.keys().last().unwrap(), "device-index /dev/sdb");
    }

    #[tokio::test]
    async fn test_first_bootable_partition_wins() {
        let executor = ScriptedExecutor::new();
        executor.respond("list-partitions", ProcessOutput::ok("/dev/sda1\n/dev/sdb1\n"));
        script_partition(&executor, "/dev/sda1", "/dev/sda", 1, true);
        script_partition(&executor, "/dev/sdb1", "/dev/sdb", 1, true);
        executor.respond("device-index /dev/sda", ProcessOutput::ok("0"));
        let runner = GuestCommandRunner::new(&executor, &ToolsConfig::default());
        let disks = VirtualDisk::from_paths(["/dev/vdb", "/dev/vdc"]);

        let volume = resolve_bootable_volume(&runner, &disks, &CancelToken::new())
            .await
            .unwrap();
        assert_eq!(volume.position, 0);
        assert!(!executor.keys().iter().any(|k| k.contains("/dev/sdb1")));
    }

    #[tokio::test]
    async fn test_no_bootable_partition() {
        let executor = ScriptedExecutor::new();
        two_disk_guest(&executor, false);
        let runner = GuestCommandRunner::new(&executor, &ToolsConfig::default());
        let disks = VirtualDisk::from_paths(["/dev/vdb", "/dev/vdc"]);

        let err = resolve_bootable_volume(&runner, &disks, &CancelToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            V2vError::BootableVolumeNotFound { disk_count: 2 }
        ));
        assert!(!executor.keys().iter().any(|k| k.starts_with("device-index")));
    }

    #[tokio::test]
    async fn test_step_failure_aborts_resolution() {
        let executor = ScriptedExecutor::new();
        executor.respond("list-partitions", ProcessOutput::ok("/dev/sda1\n/dev/sda2\n"));
        executor.respond("part-to-dev /dev/sda1", ProcessOutput::ok("/dev/sda"));
        executor.respond(
            "part-to-partnum /dev/sda1",
            ProcessOutput::failed(1, "libguestfs: error: part_to_partnum"),
        );
        let runner = GuestCommandRunner::new(&executor, &ToolsConfig::default());
        let disks = VirtualDisk::from_paths(["/dev/vdb"]);

        let err = resolve_bootable_volume(&runner, &disks, &CancelToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, V2vError::GuestToolFailure { ref command, .. } if command == "part-to-partnum /dev/sda1"));
        assert!(!executor.keys().iter().any(|k| k.contains("/dev/sda2")));
    }

    #[tokio::test]
    async fn test_garbled_device_index() {
        let executor = ScriptedExecutor::new();
        executor.respond("list-partitions", ProcessOutput::ok("/dev/sda1\n"));
        script_partition(&executor, "/dev/sda1", "/dev/sda", 1, true);
        executor.respond("device-index /dev/sda", ProcessOutput::ok("zero"));
        let runner = GuestCommandRunner::new(&executor, &ToolsConfig::default());
        let disks = VirtualDisk::from_paths(["/dev/vdb"]);

        let err = resolve_bootable_volume(&runner, &disks, &CancelToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, V2vError::UnexpectedOutput { .. }));
    }
}
