// kiln-core/src/pipeline/engine.rs
//! Drives one formula from `Pending` to a terminal state.
//!
//! Resolve, configure, build+install and verify run strictly in that order. The first
//! failure moves the run to `Failed(phase)` and nothing after it is attempted.

use std::path::{Path, PathBuf};

use kiln_aio::process::CommandRunner;
use kiln_common::config::Config;
use kiln_common::dependency::{DependencyResolver, DependencyTag, ResolvedDependency};
use kiln_common::error::{KilnError, Result};
use kiln_common::model::build::Overrides;
use kiln_common::model::formula::Formula;
use kiln_common::pipeline::{
    ExecutionResult, InstallReport, InstallState, Phase, PipelineEvent,
};
use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument, warn};

use crate::build::{standard_args, BuildEnvironment, BuildExecutor, BuildWorkspace};
use crate::install::{self, InstallReceipt};
use crate::verify::Verifier;

#[derive(Debug, Clone, Default)]
pub struct InstallOptions {
    /// Source tree or tarball to build from.
    pub source: PathBuf,
    pub overrides: Overrides,
    pub skip_verify: bool,
    /// Overrides the configured fixtures directory.
    pub fixtures_dir: Option<PathBuf>,
    /// Overrides the configured job count.
    pub jobs: Option<usize>,
}

pub struct InstallPipeline<'a> {
    config: &'a Config,
    runner: &'a dyn CommandRunner,
    resolver: &'a dyn DependencyResolver,
    event_tx: Option<broadcast::Sender<PipelineEvent>>,
}

// Mutable bookkeeping for a single run.
struct Run<'p> {
    target_id: String,
    state: InstallState,
    transitions: Vec<InstallState>,
    results: Vec<ExecutionResult>,
    workdir: Option<PathBuf>,
    event_tx: Option<&'p broadcast::Sender<PipelineEvent>>,
}

impl Run<'_> {
    fn emit(&self, event: PipelineEvent) {
        if let Some(tx) = self.event_tx {
            let _ = tx.send(event);
        }
    }

    fn enter(&mut self, next: InstallState) -> Result<()> {
        self.state = self.state.advance(next)?;
        self.transitions.push(self.state);
        debug!("[{}] -> {}", self.target_id, self.state);
        self.emit(PipelineEvent::StateChanged {
            target_id: self.target_id.clone(),
            state: self.state,
        });
        Ok(())
    }

    fn fail(&mut self, phase: Phase, err: &KilnError) {
        error!("[{}] {} failed: {}", self.target_id, phase, err);
        if let Some(workdir) = &self.workdir {
            error!(
                "[{}] Build directory kept at {}",
                self.target_id,
                workdir.display()
            );
        }
        if let Err(e) = self.enter(InstallState::Failed(phase)) {
            warn!("[{}] {}", self.target_id, e);
        }
        self.emit(PipelineEvent::job_failed(self.target_id.clone(), err));
    }
}

impl<'a> InstallPipeline<'a> {
    pub fn new(
        config: &'a Config,
        runner: &'a dyn CommandRunner,
        resolver: &'a dyn DependencyResolver,
    ) -> Self {
        Self {
            config,
            runner,
            resolver,
            event_tx: None,
        }
    }

    pub fn with_events(mut self, event_tx: broadcast::Sender<PipelineEvent>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    fn fixtures_dir(&self, explicit: Option<&PathBuf>) -> PathBuf {
        explicit
            .cloned()
            .unwrap_or_else(|| self.config.fixtures_dir())
    }

    /// Builds, installs and (unless skipped) verifies `formula`. Never panics on a
    /// failed run; the outcome is in the returned report.
    #[instrument(skip_all, fields(formula = %formula.name()))]
    pub fn install(&self, formula: &Formula, options: &InstallOptions) -> InstallReport {
        let keg_path = formula.install_prefix(&self.config.cellar_dir());
        let mut run = Run {
            target_id: formula.name().to_string(),
            state: InstallState::Pending,
            transitions: vec![InstallState::Pending],
            results: Vec::new(),
            workdir: None,
            event_tx: self.event_tx.as_ref(),
        };

        let error = match self.drive(&mut run, formula, options, &keg_path) {
            Ok(()) => None,
            Err((phase, err)) => {
                run.fail(phase, &err);
                Some(err)
            }
        };

        InstallReport {
            name: formula.name().to_string(),
            version: formula.version_str_full(),
            final_state: run.state,
            transitions: run.transitions,
            results: run.results,
            workdir: run.workdir,
            keg_path,
            error,
        }
    }

    fn drive(
        &self,
        run: &mut Run<'_>,
        formula: &Formula,
        options: &InstallOptions,
        keg_path: &Path,
    ) -> std::result::Result<(), (Phase, KilnError)> {
        let at = |phase: Phase| move |e: KilnError| (phase, e);

        // Overrides are checked before anything touches the disk.
        let configure_args = formula
            .build
            .configure_args(&standard_args(formula.build.system, keg_path), &options.overrides)
            .map_err(at(Phase::Configure))?;
        debug!("[{}] configure args: {:?}", run.target_id, configure_args);

        run.enter(InstallState::Resolving).map_err(at(Phase::Resolve))?;
        let mut include = DependencyTag::RUNTIME | DependencyTag::BUILD;
        if !options.skip_verify {
            include |= DependencyTag::TEST;
        }
        let deps = self
            .resolver
            .resolve(formula, include)
            .map_err(at(Phase::Resolve))?;
        info!("==> [{}] resolved {} dependencies", run.target_id, deps.len());

        run.enter(InstallState::Configuring).map_err(at(Phase::Configure))?;
        let jobs = options.jobs.unwrap_or(self.config.make_jobs);
        let env = BuildEnvironment::new(self.config, &deps, jobs).map_err(at(Phase::Configure))?;
        let workspace =
            BuildWorkspace::create(self.config, formula).map_err(at(Phase::Configure))?;
        run.workdir = Some(workspace.workdir.clone());
        run.emit(PipelineEvent::WorkdirCreated {
            target_id: run.target_id.clone(),
            path: workspace.workdir.clone(),
        });
        workspace
            .stage_source(&options.source)
            .map_err(at(Phase::Configure))?;

        let mut executor = BuildExecutor::new(self.runner, &env, run.target_id.clone());
        if let Some(tx) = run.event_tx {
            executor = executor.with_events(tx);
        }
        executor
            .configure(&formula.build, &workspace, &configure_args, &mut run.results)
            .map_err(at(Phase::Configure))?;

        run.enter(InstallState::Building).map_err(at(Phase::Build))?;
        executor
            .build_and_install(&formula.build, &workspace, &mut run.results)
            .map_err(|e| (e.phase().unwrap_or(Phase::Build), e))?;

        if options.skip_verify {
            info!("[{}] Verification skipped", run.target_id);
        } else {
            run.enter(InstallState::Verifying).map_err(at(Phase::Verify))?;
            let mut verifier = Verifier::new(
                self.runner,
                &env,
                self.fixtures_dir(options.fixtures_dir.as_ref()),
            );
            if let Some(tx) = run.event_tx {
                verifier = verifier.with_events(tx);
            }
            verifier
                .verify(formula, keg_path, &mut run.results)
                .map_err(at(Phase::Verify))?;
        }

        run.enter(InstallState::Installed).map_err(at(Phase::Install))?;
        self.finish(run, formula, keg_path, &configure_args, &deps, !options.skip_verify);
        Ok(())
    }

    // Receipt and opt link are best effort once the keg is installed.
    fn finish(
        &self,
        run: &Run<'_>,
        formula: &Formula,
        keg_path: &Path,
        configure_args: &[String],
        deps: &[ResolvedDependency],
        verified: bool,
    ) {
        let receipt = InstallReceipt::new(formula, configure_args, deps, verified);
        if let Err(e) = install::write_receipt(&receipt, keg_path) {
            warn!("[{}] Could not write install receipt: {}", run.target_id, e);
            run.emit(PipelineEvent::LogWarn {
                message: format!("could not write install receipt: {e}"),
            });
        }
        if let Err(e) = install::link_opt(self.config, formula, keg_path) {
            warn!("[{}] Could not link opt path: {}", run.target_id, e);
            run.emit(PipelineEvent::LogWarn {
                message: format!("could not link opt path: {e}"),
            });
        }
        run.emit(PipelineEvent::JobSuccess {
            target_id: run.target_id.clone(),
            keg_path: keg_path.to_path_buf(),
        });
        info!("==> [{}] installed to {}", run.target_id, keg_path.display());
    }

    /// Runs only the checks of `formula` against its installed keg.
    pub fn verify_installed(
        &self,
        formula: &Formula,
        fixtures_dir: Option<&PathBuf>,
    ) -> Result<Vec<ExecutionResult>> {
        let opt_path = self.config.formula_opt_path(formula.name());
        let keg_path = if opt_path.exists() {
            opt_path
        } else {
            formula.install_prefix(&self.config.cellar_dir())
        };
        if !keg_path.is_dir() {
            return Err(KilnError::NotFound(format!(
                "{} is not installed (no keg at {})",
                formula.name(),
                keg_path.display()
            )));
        }
        let deps = self
            .resolver
            .resolve(formula, DependencyTag::RUNTIME | DependencyTag::TEST)?;
        let env = BuildEnvironment::new(self.config, &deps, self.config.make_jobs)?;
        let mut verifier = Verifier::new(self.runner, &env, self.fixtures_dir(fixtures_dir));
        if let Some(tx) = &self.event_tx {
            verifier = verifier.with_events(tx);
        }
        let mut results = Vec::new();
        verifier.verify(formula, &keg_path, &mut results)?;
        Ok(results)
    }
}
