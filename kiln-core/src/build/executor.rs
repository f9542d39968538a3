// kiln-core/src/build/executor.rs
//! Runs the configure and build+install phases of a source build.
//!
//! Each phase is a single external process (or one per build target) run through a
//! [`CommandRunner`]. The first nonzero exit aborts the build with
//! [`KilnError::BuildPhase`], and a tool that cannot be spawned aborts it with
//! [`KilnError::PhaseNotStarted`]. Nothing is retried and nothing is cleaned up.

use std::path::{Path, PathBuf};

use kiln_aio::process::{CommandRunner, Invocation};
use kiln_common::config::Config;
use kiln_common::error::{KilnError, Result};
use kiln_common::model::build::{BuildConfig, BuildSystem};
use kiln_common::model::formula::Formula;
use kiln_common::pipeline::{ExecutionResult, Phase, PipelineEvent};
use tokio::sync::broadcast;
use tracing::{debug, error, info};

use super::env::BuildEnvironment;

/// The per-run working directory: `<workdir>/src` holds the staged source and
/// `<workdir>/build` is where the tools run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildWorkspace {
    pub workdir: PathBuf,
    pub source_dir: PathBuf,
    pub build_dir: PathBuf,
}

impl BuildWorkspace {
    /// Creates `<root>/kiln_build/<name>-<version>-XXXXXX`. The directory is kept on
    /// disk after the run, whatever its outcome.
    pub fn create(config: &Config, formula: &Formula) -> Result<Self> {
        let build_root = config.build_dir();
        kiln_aio::fs::create_dir_all(&build_root)?;
        let prefix = format!("{}-{}-", formula.name(), formula.version_str_full());
        let workdir = tempfile::Builder::new()
            .prefix(&prefix)
            .rand_bytes(6)
            .tempdir_in(&build_root)?
            .keep();
        debug!("Created build workdir {}", workdir.display());
        Ok(Self::at(workdir))
    }

    pub fn at(workdir: PathBuf) -> Self {
        Self {
            source_dir: workdir.join("src"),
            build_dir: workdir.join("build"),
            workdir,
        }
    }

    /// Copies a source tree, or unpacks a source tarball, into `source_dir`.
    pub fn stage_source(&self, source: &Path) -> Result<()> {
        info!("Staging {} into {}", source.display(), self.source_dir.display());
        if source.is_dir() {
            kiln_aio::fs::copy_dir_all(source, &self.source_dir)?;
        } else if source.is_file() {
            kiln_aio::extract::extract_source_archive(source, &self.source_dir)?;
        } else {
            return Err(KilnError::NotFound(format!(
                "source {} does not exist",
                source.display()
            )));
        }
        kiln_aio::fs::create_dir_all(&self.build_dir)
    }

    /// Directory the build tool runs in for `system`.
    pub fn tool_dir(&self, system: BuildSystem) -> &Path {
        match system {
            BuildSystem::Make => &self.source_dir,
            BuildSystem::Cmake | BuildSystem::Autotools => &self.build_dir,
        }
    }
}

pub struct BuildExecutor<'a> {
    runner: &'a dyn CommandRunner,
    env: &'a BuildEnvironment,
    event_tx: Option<&'a broadcast::Sender<PipelineEvent>>,
    target_id: String,
}

impl<'a> BuildExecutor<'a> {
    pub fn new(
        runner: &'a dyn CommandRunner,
        env: &'a BuildEnvironment,
        target_id: impl Into<String>,
    ) -> Self {
        Self {
            runner,
            env,
            event_tx: None,
            target_id: target_id.into(),
        }
    }

    pub fn with_events(mut self, event_tx: &'a broadcast::Sender<PipelineEvent>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    fn emit(&self, event: PipelineEvent) {
        if let Some(tx) = self.event_tx {
            let _ = tx.send(event);
        }
    }

    /// Runs the configuration tool with the source directory and `args`.
    pub fn configure(
        &self,
        build: &BuildConfig,
        workspace: &BuildWorkspace,
        args: &[String],
        results: &mut Vec<ExecutionResult>,
    ) -> Result<()> {
        let cwd = workspace.tool_dir(build.system);
        let invocation = match build.system {
            BuildSystem::Cmake => Invocation::new(self.env.resolve_tool("cmake", cwd))
                .arg(workspace.source_dir.to_string_lossy())
                .args(args.iter().cloned()),
            BuildSystem::Autotools => Invocation::new(workspace.source_dir.join("configure"))
                .args(args.iter().cloned()),
            BuildSystem::Make => {
                debug!("[{}] make has no configure step, skipping", self.target_id);
                results.push(ExecutionResult {
                    phase: Phase::Configure,
                    command: Vec::new(),
                    exit_status: Some(0),
                    captured_output: "skipped: no configure step for make".to_string(),
                });
                return Ok(());
            }
        };
        self.run_phase(Phase::Configure, invocation.current_dir(cwd), results)
    }

    /// Runs the native build tool once per configured target. The last target is the
    /// install step; any targets before it are plain build steps.
    pub fn build_and_install(
        &self,
        build: &BuildConfig,
        workspace: &BuildWorkspace,
        results: &mut Vec<ExecutionResult>,
    ) -> Result<()> {
        let cwd = workspace.tool_dir(build.system);
        let make = self.env.resolve_tool("make", cwd);
        let last = build.targets.len().saturating_sub(1);
        for (index, target) in build.targets.iter().enumerate() {
            let phase = if index == last {
                Phase::Install
            } else {
                Phase::Build
            };
            let invocation = Invocation::new(&make).arg(target.as_str()).current_dir(cwd);
            self.run_phase(phase, invocation, results)?;
        }
        Ok(())
    }

    fn run_phase(
        &self,
        phase: Phase,
        invocation: Invocation,
        results: &mut Vec<ExecutionResult>,
    ) -> Result<()> {
        let invocation = invocation.envs(self.env.get_vars().clone());
        let command = invocation.argv();
        info!("==> [{}] {}: {}", self.target_id, phase, invocation);
        self.emit(PipelineEvent::PhaseStarted {
            target_id: self.target_id.clone(),
            phase,
            command: command.clone(),
        });

        let output = self.runner.run(&invocation);
        let (exit_status, captured_output) = match &output {
            Ok(output) => (output.status, output.combined()),
            Err(e) => (None, e.to_string()),
        };
        results.push(ExecutionResult {
            phase,
            command,
            exit_status,
            captured_output: captured_output.clone(),
        });
        self.emit(PipelineEvent::PhaseFinished {
            target_id: self.target_id.clone(),
            phase,
            exit_status,
        });
        if let Err(e) = output {
            error!("[{}] {} phase could not start: {}", self.target_id, phase, e);
            return Err(KilnError::PhaseNotStarted {
                phase,
                reason: e.to_string(),
            });
        }

        if exit_status == Some(0) {
            debug!("[{}] {} phase finished successfully", self.target_id, phase);
            return Ok(());
        }
        error!(
            "[{}] {} phase failed (status {:?}):\n{}",
            self.target_id,
            phase,
            exit_status,
            captured_output.trim_end()
        );
        Err(KilnError::BuildPhase {
            phase,
            exit_status,
            captured_output,
        })
    }
}
