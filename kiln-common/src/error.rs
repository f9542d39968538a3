use std::sync::Arc;

use thiserror::Error;

use crate::pipeline::Phase;

#[derive(Error, Debug, Clone)]
pub enum KilnError {
    #[error("I/O Error: {0}")]
    Io(#[from] Arc<std::io::Error>),

    #[error("JSON Parsing Error: {0}")]
    Json(#[from] Arc<serde_json::Error>),

    #[error("TOML Parsing Error: {0}")]
    Toml(#[from] Arc<toml::de::Error>),

    #[error("Configuration Error: {0}")]
    Config(String),

    #[error("Malformed formula: {0}")]
    MalformedFormula(String),

    #[error("Unresolved dependency '{name}': {reason}")]
    UnresolvedDependency { name: String, reason: String },

    #[error("{phase} phase failed with exit status {}", display_status(.exit_status))]
    BuildPhase {
        phase: Phase,
        exit_status: Option<i32>,
        captured_output: String,
    },

    #[error("{phase} phase could not start: {reason}")]
    PhaseNotStarted { phase: Phase, reason: String },

    #[error("Verification check #{check_index} failed: expected {expected:?}, got {actual:?}")]
    Verification {
        check_index: usize,
        expected: String,
        actual: String,
    },

    #[error("Invalid override for flag '{0}': {1}")]
    InvalidOverride(String, String),

    #[error("Illegal pipeline transition from {from} to {to}")]
    IllegalTransition { from: String, to: String },

    #[error("Failed to execute command: {0}")]
    CommandExecError(String),

    #[error("Build environment setup failed: {0}")]
    BuildEnvError(String),

    #[error("Extraction Error: {0}")]
    Extract(String),

    #[error("Resource Not Found: {0}")]
    NotFound(String),

    #[error("Generic Error: {0}")]
    Generic(String),
}

fn display_status(status: &Option<i32>) -> String {
    match status {
        Some(code) => code.to_string(),
        None => "<terminated by signal>".to_string(),
    }
}

impl KilnError {
    /// Process exit code to report for this error.
    ///
    /// A failing build phase propagates the tool's own status unchanged; every
    /// other failure maps to 1, including a tool that died without a status or
    /// never started.
    pub fn exit_code(&self) -> i32 {
        match self {
            KilnError::BuildPhase {
                exit_status: Some(code),
                ..
            } if *code != 0 => *code,
            _ => 1,
        }
    }

    /// The pipeline phase this error aborted, if it came from one.
    pub fn phase(&self) -> Option<Phase> {
        match self {
            KilnError::BuildPhase { phase, .. } | KilnError::PhaseNotStarted { phase, .. } => {
                Some(*phase)
            }
            KilnError::Verification { .. } => Some(Phase::Verify),
            _ => None,
        }
    }
}

impl From<std::io::Error> for KilnError {
    fn from(err: std::io::Error) -> Self {
        KilnError::Io(Arc::new(err))
    }
}

impl From<serde_json::Error> for KilnError {
    fn from(err: serde_json::Error) -> Self {
        KilnError::Json(Arc::new(err))
    }
}

impl From<toml::de::Error> for KilnError {
    fn from(err: toml::de::Error) -> Self {
        KilnError::Toml(Arc::new(err))
    }
}

pub type Result<T> = std::result::Result<T, KilnError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_phase_propagates_tool_status() {
        let err = KilnError::BuildPhase {
            phase: Phase::Configure,
            exit_status: Some(3),
            captured_output: String::new(),
        };
        assert_eq!(err.exit_code(), 3);
        assert_eq!(err.phase(), Some(Phase::Configure));
    }

    #[test]
    fn tool_that_never_started_is_not_reported_as_a_signal() {
        let err = KilnError::PhaseNotStarted {
            phase: Phase::Configure,
            reason: "cmake: No such file or directory (os error 2)".to_string(),
        };
        assert_eq!(err.exit_code(), 1);
        assert_eq!(err.phase(), Some(Phase::Configure));
        let message = err.to_string();
        assert!(message.contains("could not start"), "{message}");
        assert!(message.contains("cmake: No such file or directory"), "{message}");
        assert!(!message.contains("signal"), "{message}");
    }

    #[test]
    fn signal_death_and_other_failures_exit_one() {
        let killed = KilnError::BuildPhase {
            phase: Phase::Build,
            exit_status: None,
            captured_output: String::new(),
        };
        assert_eq!(killed.exit_code(), 1);
        assert!(killed.to_string().contains("terminated by signal"));

        let verify = KilnError::Verification {
            check_index: 0,
            expected: "a".into(),
            actual: "b".into(),
        };
        assert_eq!(verify.exit_code(), 1);
        assert_eq!(KilnError::MalformedFormula("x".into()).exit_code(), 1);
    }
}
