// Best-effort NTFS repair of every partition on a disk
//
// ntfsfix only clears the dirty flag and resets the journal, so a failure on
// one partition never stops the others or the conversion.

use std::path::Path;

use tracing::{info, warn};

use crate::config::ToolsConfig;
use crate::error::V2vError;
use crate::exec::{Executor, ProcessSpec};
use crate::models::CancelToken;
use crate::utils::retain_alphanumeric;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepairOutcome {
    Repaired,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionRepair {
    pub partition: String,
    pub outcome: RepairOutcome,
}

/// What happened to each partition of one disk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepairReport {
    pub disk: String,
    pub partitions: Vec<PartitionRepair>,
    /// Set when the partition listing itself could not be obtained
    pub listing_error: Option<String>,
}

impl RepairReport {
    pub fn repaired(&self) -> impl Iterator<Item = &str> {
        self.partitions
            .iter()
            .filter(|p| p.outcome == RepairOutcome::Repaired)
            .map(|p| p.partition.as_str())
    }

    pub fn failed(&self) -> impl Iterator<Item = &PartitionRepair> {
        self.partitions
            .iter()
            .filter(|p| matches!(p.outcome, RepairOutcome::Failed(_)))
    }

    pub fn is_clean(&self) -> bool {
        self.listing_error.is_none() && self.failed().next().is_none()
    }
}

/// Turn `lsblk -no NAME <disk>` output into partition device paths, dropping
/// the disk's own entry.
pub fn parse_partitions(lsblk_output: &str, disk: &str) -> Vec<String> {
    let file_name = Path::new(disk)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let disk_name = retain_alphanumeric(&file_name);

    lsblk_output
        .lines()
        .map(retain_alphanumeric)
        .filter(|name| !name.is_empty() && *name != disk_name)
        .map(|name| format!("/dev/{}", name))
        .collect()
}

pub struct NtfsRepairer<'a, E> {
    executor: &'a E,
    tools: &'a ToolsConfig,
}

impl<'a, E: Executor> NtfsRepairer<'a, E> {
    pub fn new(executor: &'a E, tools: &'a ToolsConfig) -> Self {
        Self { executor, tools }
    }

    pub async fn list_partitions(
        &self,
        disk: &str,
        cancel: &CancelToken,
    ) -> Result<Vec<String>, V2vError> {
        let spec = ProcessSpec::new(&self.tools.lsblk).args(["-no", "NAME", disk]);
        let output = self
            .executor
            .run(&spec, cancel)
            .await
            .map_err(|e| V2vError::CommandFailure {
                program: self.tools.lsblk.clone(),
                reason: e.to_string(),
            })?;
        if !output.success {
            return Err(V2vError::CommandFailure {
                program: self.tools.lsblk.clone(),
                reason: format!("{}: {}", output.status, output.stderr.trim()),
            });
        }
        Ok(parse_partitions(&output.stdout, disk))
    }

    /// Run ntfsfix on every partition of `disk`; never fails.
    pub async fn repair_disk(&self, disk: &str, cancel: &CancelToken) -> RepairReport {
        let mut report = RepairReport {
            disk: disk.to_string(),
            ..Default::default()
        };

        let partitions = match self.list_partitions(disk, cancel).await {
            Ok(partitions) => partitions,
            Err(e) => {
                warn!("Skipping NTFS fix on {}: {}", disk, e);
                report.listing_error = Some(e.to_string());
                return report;
            }
        };
        info!("Partitions: {:?}", partitions);

        for partition in partitions {
            let outcome = self.repair_partition(&partition, cancel).await;
            match &outcome {
                RepairOutcome::Repaired => info!("Fixed NTFS on {}", partition),
                RepairOutcome::Failed(reason) => {
                    warn!("Skipping NTFS fix on {}: {}", partition, reason)
                }
            }
            report.partitions.push(PartitionRepair { partition, outcome });
        }

        report
    }

    async fn repair_partition(&self, partition: &str, cancel: &CancelToken) -> RepairOutcome {
        let spec = ProcessSpec::new(&self.tools.ntfsfix).arg(partition);
        match self.executor.run(&spec, cancel).await {
            Ok(output) if output.success => RepairOutcome::Repaired,
            Ok(output) => RepairOutcome::Failed(output.status),
            Err(e) => RepairOutcome::Failed(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::ProcessOutput;
    use crate::exec::testing::ScriptedExecutor;

    #[test]
    fn test_parse_partitions_skips_whole_disk() {
        assert_eq!(
            parse_partitions("sda\nsda1\nsda2\n", "sda"),
            vec!["/dev/sda1", "/dev/sda2"]
        );
        assert_eq!(
            parse_partitions("vdb\n├─vdb1\n└─vdb2\n\n", "/dev/vdb"),
            vec!["/dev/vdb1", "/dev/vdb2"]
        );
        assert!(parse_partitions("vdc\n", "/dev/vdc").is_empty());
    }

    #[tokio::test]
    async fn test_repair_continues_past_failures() {
        let executor = ScriptedExecutor::new();
        executor.respond("lsblk -no NAME sda", ProcessOutput::ok("sda\nsda1\nsda2\n"));
        executor.respond(
            "ntfsfix /dev/sda1",
            ProcessOutput::failed(1, "Volume is corrupt"),
        );
        executor.respond("ntfsfix /dev/sda2", ProcessOutput::ok("NTFS partition was processed successfully."));
        let tools = ToolsConfig::default();
        let repairer = NtfsRepairer::new(&executor, &tools);

        let report = repairer.repair_disk("sda", &CancelToken::new()).await;

        assert_eq!(
            executor.keys(),
            vec!["lsblk -no NAME sda", "ntfsfix /dev/sda1", "ntfsfix /dev/sda2"]
        );
        assert_eq!(report.repaired().collect::<Vec<_>>(), vec!["/dev/sda2"]);
        let failed: Vec<_> = report.failed().collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].partition, "/dev/sda1");
        assert!(!report.is_clean());
    }

    #[tokio::test]
    async fn test_listing_failure_is_reported_not_raised() {
        let executor = ScriptedExecutor::new();
        executor.respond(
            "lsblk -no NAME /dev/vdz",
            ProcessOutput::failed(32, "lsblk: /dev/vdz: not a block device"),
        );
        let tools = ToolsConfig::default();
        let repairer = NtfsRepairer::new(&executor, &tools);

        let report = repairer.repair_disk("/dev/vdz", &CancelToken::new()).await;
        assert!(report.partitions.is_empty());
        assert!(report.listing_error.unwrap().contains("not a block device"));
    }

    #[tokio::test]
    async fn test_clean_report() {
        let executor = ScriptedExecutor::new();
        executor.respond("lsblk -no NAME /dev/vdb", ProcessOutput::ok("vdb\n└─vdb1\n"));
        executor.respond("ntfsfix /dev/vdb1", ProcessOutput::ok(""));
        let tools = ToolsConfig::default();
        let repairer = NtfsRepairer::new(&executor, &tools);

        let report = repairer.repair_disk("/dev/vdb", &CancelToken::new()).await;
        assert!(report.is_clean());
        assert_eq!(report.disk, "/dev/vdb");
    }
}
