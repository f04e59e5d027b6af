//! External process execution.
//!
//! Every program this crate drives (guestfish, virt-v2v-in-place, lsblk,
//! ntfsfix) is started through an [`Executor`]. Environment variables are
//! attached to the child only, never to the current process.

use std::process::Stdio;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::models::CancelToken;

/// Where the child's stdout/stderr go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Collect output for the caller
    Capture,
    /// Stream straight to the operator's terminal
    Inherit,
}

/// Description of one external invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSpec {
    pub program: String,
    pub args: Vec<String>,
    pub envs: Vec<(String, String)>,
    pub stdin: Option<String>,
    pub output: OutputMode,
}

impl ProcessSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
            stdin: None,
            output: OutputMode::Capture,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn inherit_output(mut self) -> Self {
        self.output = OutputMode::Inherit;
        self
    }

    /// Human readable command line, used in logs.
    pub fn command_line(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

/// Result of a child that ran to completion (successfully or not).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    pub success: bool,
    /// Exit status as reported by the OS, e.g. "exit status: 1"
    pub status: String,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            status: "exit status: 0".to_string(),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            status: format!("exit status: {}", code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Stdout followed by stderr.
    pub fn combined(&self) -> String {
        let mut out = self.stdout.clone();
        if !self.stderr.is_empty() {
            if !out.is_empty() && !out.ends_with('\n') {
                out.push('\n');
            }
            out.push_str(&self.stderr);
        }
        out
    }
}

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed while waiting for {program}: {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cancelled")]
    Cancelled,
}

/// Runs external programs.
#[allow(async_fn_in_trait)]
pub trait Executor {
    async fn run(&self, spec: &ProcessSpec, cancel: &CancelToken)
    -> Result<ProcessOutput, ExecError>;
}

impl<E: Executor> Executor for &E {
    async fn run(
        &self,
        spec: &ProcessSpec,
        cancel: &CancelToken,
    ) -> Result<ProcessOutput, ExecError> {
        (**self).run(spec, cancel).await
    }
}

/// Executor backed by `tokio::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemExecutor;

impl Executor for SystemExecutor {
    async fn run(
        &self,
        spec: &ProcessSpec,
        cancel: &CancelToken,
    ) -> Result<ProcessOutput, ExecError> {
        if cancel.is_cancelled() {
            return Err(ExecError::Cancelled);
        }

        match &spec.stdin {
            Some(input) => info!("Executing {} <<< {}", spec.command_line(), input.trim()),
            None => info!("Executing {}", spec.command_line()),
        }

        let mut cmd = tokio::process::Command::new(&spec.program);
        cmd.args(&spec.args)
            .envs(spec.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .kill_on_drop(true)
            .stdin(if spec.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            });

        match spec.output {
            OutputMode::Capture => {
                cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
            }
            OutputMode::Inherit => {
                cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());
            }
        }

        let mut child = cmd.spawn().map_err(|source| ExecError::Spawn {
            program: spec.program.clone(),
            source,
        })?;

        if let Some(input) = &spec.stdin {
            if let Some(mut stdin) = child.stdin.take() {
                let mut script = input.clone();
                if !script.ends_with('\n') {
                    script.push('\n');
                }
                if let Err(source) = stdin.write_all(script.as_bytes()).await {
                    // The tool may exit before reading its input; its status tells the rest
                    if source.kind() != std::io::ErrorKind::BrokenPipe {
                        return Err(ExecError::Wait {
                            program: spec.program.clone(),
                            source,
                        });
                    }
                }
                // Closing stdin lets the tool exit after the last command
                drop(stdin);
            }
        }

        // Dropping the wait future on cancellation kills the child (kill_on_drop)
        let output = tokio::select! {
            res = child.wait_with_output() => res.map_err(|source| ExecError::Wait {
                program: spec.program.clone(),
                source,
            })?,
            _ = cancel.cancelled() => {
                info!("Cancelled {}", spec.program);
                return Err(ExecError::Cancelled);
            }
        };

        debug!("{} finished with {}", spec.program, output.status);

        Ok(ProcessOutput {
            success: output.status.success(),
            status: output.status.to_string(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
