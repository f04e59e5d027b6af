// Guest inspection and mutation through guestfish
//
// Every guest command goes through GuestCommandRunner::run. The bootable
// volume resolver, LVM detector and customizer sit on top of it.

use tracing::{debug, warn};

use crate::config::ToolsConfig;
use crate::error::{Result, V2vError};
use crate::exec::{ExecError, Executor, ProcessSpec};
use crate::models::{CancelToken, GuestCommand, VirtualDisk, describe_disks};
use crate::utils::normalize_output;

mod bootable;
mod customize;
mod inspect;
mod lvm;

pub use bootable::{BootableVolume, resolve_bootable_volume, resolve_from_partitions};
pub use customize::{GuestCustomizer, WILDCARD_NETWORK_CONFIG};
pub use inspect::{GuestInspector, InspectionSnapshot, os_release_field};
pub use lvm::{detect_lvm_root, match_lvm_root};

/// Environment variable selecting the libguestfs backend.
pub const BACKEND_ENV: &str = "LIBGUESTFS_BACKEND";

/// Runs guestfish against a set of attached disks.
#[derive(Debug, Clone)]
pub struct GuestCommandRunner<E> {
    executor: E,
    guestfish: String,
    backend: String,
}

impl<E: Executor> GuestCommandRunner<E> {
    pub fn new(executor: E, tools: &ToolsConfig) -> Self {
        Self {
            executor,
            guestfish: tools.guestfish.clone(),
            backend: tools.libguestfs_backend.clone(),
        }
    }

    /// Build the guestfish invocation: access flag, one `-a` per disk in
    /// attachment order, `-i`, and the command on stdin.
    pub fn build_spec(&self, disks: &[VirtualDisk], command: &GuestCommand) -> ProcessSpec {
        let mut spec = ProcessSpec::new(&self.guestfish).arg(command.mode.flag());
        for disk in disks {
            spec = spec
                .arg("-a")
                .arg(disk.path.to_string_lossy().into_owned());
        }
        spec.arg("-i")
            .env(BACKEND_ENV, &self.backend)
            .stdin(command.script_line())
    }

    /// Run one command and return its lower-cased, trimmed output.
    pub async fn run(
        &self,
        disks: &[VirtualDisk],
        command: &GuestCommand,
        cancel: &CancelToken,
    ) -> Result<String> {
        if disks.is_empty() {
            return Err(V2vError::GuestToolFailure {
                command: command.script_line(),
                disks: String::new(),
                reason: "no disks attached".to_string(),
                output: String::new(),
            });
        }

        let spec = self.build_spec(disks, command);
        let output = match self.executor.run(&spec, cancel).await {
            Ok(output) => output,
            Err(ExecError::Cancelled) => {
                return Err(V2vError::Cancelled {
                    command: command.script_line(),
                });
            }
            Err(e) => {
                return Err(V2vError::GuestToolFailure {
                    command: command.script_line(),
                    disks: describe_disks(disks),
                    reason: e.to_string(),
                    output: String::new(),
                });
            }
        };

        let combined = output.combined();
        if !output.success {
            warn!(
                "guestfish command ({}) failed with {}",
                command.script_line(),
                output.status
            );
            return Err(V2vError::GuestToolFailure {
                command: command.script_line(),
                disks: describe_disks(disks),
                reason: output.status,
                output: combined.trim().to_string(),
            });
        }

        let normalized = normalize_output(&combined);
        debug!("({}) -> {:?}", command.script_line(), normalized);
        Ok(normalized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::ProcessOutput;
    use crate::exec::testing::ScriptedExecutor;

    fn runner(executor: &ScriptedExecutor) -> GuestCommandRunner<&ScriptedExecutor> {
        GuestCommandRunner::new(executor, &ToolsConfig::default())
    }

    #[test]
    fn test_build_spec_attaches_every_disk_in_order() {
        let executor = ScriptedExecutor::new();
        let disks = VirtualDisk::from_paths(["/dev/vdb", "/dev/vdc"]);
        let spec = runner(&executor).build_spec(
            &disks,
            &GuestCommand::read_write("upload").arg("/a").arg("/b"),
        );

        assert_eq!(spec.program, "guestfish");
        assert_eq!(
            spec.args,
            vec!["--rw", "-a", "/dev/vdb", "-a", "/dev/vdc", "-i"]
        );
        assert_eq!(spec.stdin.as_deref(), Some("upload /a /b"));
        assert_eq!(
            spec.envs,
            vec![(BACKEND_ENV.to_string(), "direct".to_string())]
        );
    }

    #[tokio::test]
    async fn test_run_normalizes_output() {
        let executor = ScriptedExecutor::new();
        executor.respond("inspect-os", ProcessOutput::ok("  /dev/RHEL/Root\n"));
        let disks = VirtualDisk::from_paths(["/dev/vdb"]);

        let out = runner(&executor)
            .run(&disks, &GuestCommand::read_only("inspect-os"), &CancelToken::new())
            .await
            .unwrap();
        assert_eq!(out, "/dev/rhel/root");
        assert_eq!(executor.calls()[0].args[0], "--ro");
    }

    #[tokio::test]
    async fn test_run_failure_carries_command_and_output() {
        let executor = ScriptedExecutor::new();
        executor.respond(
            "lvs",
            ProcessOutput::failed(1, "libguestfs: error: lvs: No LVM found\n"),
        );
        let disks = VirtualDisk::from_paths(["/dev/vdb", "/dev/vdc"]);

        let err = runner(&executor)
            .run(&disks, &GuestCommand::read_only("lvs"), &CancelToken::new())
            .await
            .unwrap_err();
        match err {
            V2vError::GuestToolFailure {
                command,
                disks,
                reason,
                output,
            } => {
                assert_eq!(command, "lvs");
                assert_eq!(disks, "/dev/vdb, /dev/vdc");
                assert_eq!(reason, "exit status: 1");
                assert_eq!(output, "libguestfs: error: lvs: No LVM found");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_run_without_disks_fails_before_spawning() {
        let executor = ScriptedExecutor::new();
        let err = runner(&executor)
            .run(&[], &GuestCommand::read_only("lvs"), &CancelToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, V2vError::GuestToolFailure { .. }));
        assert!(executor.calls().is_empty());
    }

    #[tokio::test]
    async fn test_run_cancelled() {
        let executor = ScriptedExecutor::new();
        let cancel = CancelToken::new();
        cancel.cancel();
        let disks = VirtualDisk::from_paths(["/dev/vdb"]);
        let err = runner(&executor)
            .run(&disks, &GuestCommand::read_only("lvs"), &cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }
}
