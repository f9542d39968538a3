// kiln-aio/src/process.rs
//! Spawning external tools. Every process kiln starts goes through a [`CommandRunner`],
//! so the pipeline can be driven against a recording fake in tests.

use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use kiln_common::error::{KilnError, Result};
use tracing::{debug, error};

/// A fully described process launch.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub envs: BTreeMap<String, String>,
    /// Start from an empty environment instead of inheriting the host's.
    pub env_clear: bool,
    /// Text written to the child's stdin; stdin is null when `None`.
    pub stdin: Option<String>,
}

impl Invocation {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
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

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn envs(mut self, envs: BTreeMap<String, String>) -> Self {
        self.envs = envs;
        self.env_clear = true;
        self
    }

    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// Program followed by its arguments, as recorded in execution results.
    pub fn argv(&self) -> Vec<String> {
        std::iter::once(self.program.to_string_lossy().into_owned())
            .chain(self.args.iter().cloned())
            .collect()
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.argv().join(" "))
    }
}

/// Captured result of a finished process.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
    /// `None` when the process was terminated by a signal.
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// stdout followed by stderr.
    pub fn combined(&self) -> String {
        let mut out = String::with_capacity(self.stdout.len() + self.stderr.len());
        out.push_str(&self.stdout);
        out.push_str(&self.stderr);
        out
    }
}

pub trait CommandRunner: Send + Sync {
    /// Runs `invocation` to completion. A nonzero exit is a successful `Ok` result;
    /// only a failure to start the process is an error.
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput>;
}

/// Runs processes on the host with piped, captured output.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput> {
        debug!(
            "Running command: {} (cwd: {:?}, envs: {:?})",
            invocation,
            invocation.cwd,
            invocation.envs.keys().collect::<Vec<_>>()
        );
        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args);
        if let Some(dir) = &invocation.cwd {
            cmd.current_dir(dir);
        }
        if invocation.env_clear {
            cmd.env_clear();
        }
        cmd.envs(&invocation.envs);
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.stdin(if invocation.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });

        let mut child = cmd.spawn().map_err(|e| {
            error!("Failed to execute {}: {}", invocation.program.display(), e);
            KilnError::CommandExecError(format!("{}: {}", invocation.program.display(), e))
        })?;

        // Feed stdin from a separate thread so a chatty child cannot deadlock us.
        let writer = match (child.stdin.take(), invocation.stdin.clone()) {
            (Some(mut pipe), Some(input)) => Some(std::thread::spawn(move || {
                pipe.write_all(input.as_bytes())
            })),
            _ => None,
        };

        let output = child.wait_with_output()?;
        if let Some(handle) = writer {
            match handle.join() {
                Ok(Err(e)) if e.kind() != std::io::ErrorKind::BrokenPipe => {
                    debug!("Writing stdin of {} failed: {}", invocation.program.display(), e);
                }
                Err(_) => error!("stdin writer for {} panicked", invocation.program.display()),
                _ => {}
            }
        }

        let result = CommandOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        if result.success() {
            debug!("Command finished successfully.");
        } else {
            debug!("Command failed with status: {}", output.status);
            if !result.stdout.trim().is_empty() {
                debug!("Stdout:\n{}", result.stdout.trim());
            }
            if !result.stderr.trim().is_empty() {
                debug!("Stderr:\n{}", result.stderr.trim());
            }
        }
        Ok(result)
    }
}
