// kiln-common/src/pipeline.rs
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{KilnError, Result};

// --- Shared Enums / Structs ---

/// One discrete step of the install pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Resolve,
    Configure,
    Build,
    Install,
    Verify,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Resolve => "resolve",
            Phase::Configure => "configure",
            Phase::Build => "build",
            Phase::Install => "install",
            Phase::Verify => "verify",
        };
        f.write_str(s)
    }
}

/// Lifecycle of a single formula installation.
///
/// `Pending → Resolving → Configuring → Building → Verifying → {Installed | Failed(phase)}`.
/// No transition re-enters an earlier state. Verification may be skipped, in which case
/// `Building` moves straight to `Installed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallState {
    Pending,
    Resolving,
    Configuring,
    Building,
    Verifying,
    Installed,
    Failed(Phase),
}

impl InstallState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, InstallState::Installed | InstallState::Failed(_))
    }

    fn can_move_to(&self, next: &InstallState) -> bool {
        use InstallState::*;
        match (self, next) {
            (Installed | Failed(_), _) => false,
            (_, Failed(_)) => true,
            (Pending, Resolving)
            | (Resolving, Configuring)
            | (Configuring, Building)
            | (Building, Verifying)
            | (Building, Installed)
            | (Verifying, Installed) => true,
            _ => false,
        }
    }

    /// Moves to `next`, rejecting any transition the state machine does not allow.
    pub fn advance(self, next: InstallState) -> Result<InstallState> {
        if self.can_move_to(&next) {
            Ok(next)
        } else {
            Err(KilnError::IllegalTransition {
                from: self.to_string(),
                to: next.to_string(),
            })
        }
    }
}

impl fmt::Display for InstallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstallState::Pending => f.write_str("pending"),
            InstallState::Resolving => f.write_str("resolving"),
            InstallState::Configuring => f.write_str("configuring"),
            InstallState::Building => f.write_str("building"),
            InstallState::Verifying => f.write_str("verifying"),
            InstallState::Installed => f.write_str("installed"),
            InstallState::Failed(phase) => write!(f, "failed({phase})"),
        }
    }
}

/// Outcome of one external process invocation within a phase.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecutionResult {
    pub phase: Phase,
    pub command: Vec<String>,
    pub exit_status: Option<i32>,
    pub captured_output: String,
}

impl ExecutionResult {
    pub fn success(&self) -> bool {
        self.exit_status == Some(0)
    }
}

/// Everything a finished (or aborted) pipeline run produced.
#[derive(Debug, Clone)]
pub struct InstallReport {
    pub name: String,
    pub version: String,
    pub final_state: InstallState,
    pub transitions: Vec<InstallState>,
    pub results: Vec<ExecutionResult>,
    pub workdir: Option<PathBuf>,
    pub keg_path: PathBuf,
    pub error: Option<KilnError>,
}

impl InstallReport {
    /// Exit code for the whole run: 0 when installed, otherwise the failure's code.
    pub fn exit_code(&self) -> i32 {
        match (&self.final_state, &self.error) {
            (InstallState::Installed, _) => 0,
            (_, Some(err)) => err.exit_code(),
            _ => 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PipelineEvent {
    StateChanged {
        target_id: String,
        state: InstallState,
    },
    WorkdirCreated {
        target_id: String,
        path: PathBuf,
    },
    PhaseStarted {
        target_id: String,
        phase: Phase,
        command: Vec<String>,
    },
    PhaseFinished {
        target_id: String,
        phase: Phase,
        exit_status: Option<i32>,
    },
    CheckStarted {
        target_id: String,
        check_index: usize,
        description: String,
    },
    CheckPassed {
        target_id: String,
        check_index: usize,
    },
    JobSuccess {
        target_id: String,
        keg_path: PathBuf,
    },
    JobFailed {
        target_id: String,
        phase: Option<Phase>,
        error: String, // Keep as String
    },
    LogInfo {
        message: String,
    },
    LogWarn {
        message: String,
    },
}

impl PipelineEvent {
    // KilnError kept for internal use, but events use String for error messages
    pub fn job_failed(target_id: String, error: &KilnError) -> Self {
        PipelineEvent::JobFailed {
            target_id,
            phase: error.phase(),
            error: error.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_transitions_are_allowed() {
        let mut state = InstallState::Pending;
        for next in [
            InstallState::Resolving,
            InstallState::Configuring,
            InstallState::Building,
            InstallState::Verifying,
            InstallState::Installed,
        ] {
            state = state.advance(next).unwrap();
        }
        assert!(state.is_terminal());
    }

    #[test]
    fn no_state_is_re_entered() {
        assert!(InstallState::Building
            .advance(InstallState::Configuring)
            .is_err());
        assert!(InstallState::Verifying
            .advance(InstallState::Verifying)
            .is_err());
        assert!(InstallState::Pending
            .advance(InstallState::Building)
            .is_err());
    }

    #[test]
    fn terminal_states_are_final() {
        let failed = InstallState::Failed(Phase::Configure);
        assert!(failed.advance(InstallState::Building).is_err());
        assert!(failed.advance(InstallState::Failed(Phase::Build)).is_err());
        assert!(InstallState::Installed
            .advance(InstallState::Failed(Phase::Verify))
            .is_err());
    }

    #[test]
    fn verification_may_be_skipped() {
        assert_eq!(
            InstallState::Building
                .advance(InstallState::Installed)
                .unwrap(),
            InstallState::Installed
        );
    }

    #[test]
    fn failed_state_displays_phase() {
        assert_eq!(
            InstallState::Failed(Phase::Configure).to_string(),
            "failed(configure)"
        );
    }
}
