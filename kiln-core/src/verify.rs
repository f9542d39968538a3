// kiln-core/src/verify.rs
//! Post-install checks.
//!
//! Checks run in declaration order against the installed prefix and stop at the first
//! failure. A check passes only if its process exits zero and its output satisfies
//! the check's matcher.
//!
//! Checks see the build environment extended with the keg under test, so a script
//! check can import modules the formula installed. Placeholders are expanded in
//! commands, arguments and matchers; script bodies reach the interpreter verbatim.

use std::path::{Path, PathBuf};

use kiln_aio::process::{CommandRunner, Invocation};
use kiln_common::error::{KilnError, Result};
use kiln_common::model::check::CheckSpec;
use kiln_common::model::formula::Formula;
use kiln_common::pipeline::{ExecutionResult, Phase, PipelineEvent};
use tokio::sync::broadcast;
use tracing::{debug, error, info};

use crate::build::BuildEnvironment;

/// Values substituted for `{name}`, `{version}`, `{prefix}`, `{bin}` and `{fixture}`.
#[derive(Debug, Clone)]
struct Placeholders<'a> {
    name: &'a str,
    version: &'a str,
    prefix: &'a Path,
    fixture: Option<PathBuf>,
}

impl Placeholders<'_> {
    fn expand(&self, text: &str) -> String {
        let mut out = text
            .replace("{name}", self.name)
            .replace("{version}", self.version)
            .replace("{prefix}", &self.prefix.to_string_lossy())
            .replace("{bin}", &self.prefix.join("bin").to_string_lossy());
        if let Some(fixture) = &self.fixture {
            out = out.replace("{fixture}", &fixture.to_string_lossy());
        }
        out
    }
}

pub struct Verifier<'a> {
    runner: &'a dyn CommandRunner,
    env: &'a BuildEnvironment,
    fixtures_dir: PathBuf,
    event_tx: Option<&'a broadcast::Sender<PipelineEvent>>,
}

impl<'a> Verifier<'a> {
    pub fn new(
        runner: &'a dyn CommandRunner,
        env: &'a BuildEnvironment,
        fixtures_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            runner,
            env,
            fixtures_dir: fixtures_dir.into(),
            event_tx: None,
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

    /// Runs every check of `formula` against `prefix`, failing fast.
    pub fn verify(
        &self,
        formula: &Formula,
        prefix: &Path,
        results: &mut Vec<ExecutionResult>,
    ) -> Result<()> {
        if formula.checks.is_empty() {
            info!("[{}] No checks declared", formula.name());
            return Ok(());
        }
        let env = self.env.for_keg(prefix)?;
        for (check_index, check) in formula.checks.iter().enumerate() {
            self.emit(PipelineEvent::CheckStarted {
                target_id: formula.name().to_string(),
                check_index,
                description: check.to_string(),
            });
            self.run_check(formula, prefix, &env, check_index, check, results)?;
            self.emit(PipelineEvent::CheckPassed {
                target_id: formula.name().to_string(),
                check_index,
            });
        }
        Ok(())
    }

    fn run_check(
        &self,
        formula: &Formula,
        prefix: &Path,
        env: &BuildEnvironment,
        check_index: usize,
        check: &CheckSpec,
        results: &mut Vec<ExecutionResult>,
    ) -> Result<()> {
        let fixture = match check {
            CheckSpec::Cli {
                fixture: Some(name),
                ..
            } => Some(self.fixtures_dir.join(name)),
            _ => None,
        };
        let placeholders = Placeholders {
            name: formula.name(),
            version: formula.version(),
            prefix,
            fixture: fixture.clone(),
        };
        let expected = check
            .expect()
            .expected_text(|s| placeholders.expand(s), formula.version());
        let fail = |actual: String| KilnError::Verification {
            check_index,
            expected: expected.clone(),
            actual,
        };

        if let Some(path) = &fixture {
            if !path.is_file() {
                error!("[{}] Fixture {} is missing", formula.name(), path.display());
                return Err(fail(format!("fixture {} not found", path.display())));
            }
        }

        let (invocation, use_combined) = match check {
            CheckSpec::Cli { command, args, .. } => {
                let command = placeholders.expand(command);
                let program = if Path::new(&command).is_absolute() {
                    PathBuf::from(command)
                } else {
                    prefix.join("bin").join(command)
                };
                let inv = Invocation::new(program)
                    .args(args.iter().map(|a| placeholders.expand(a)));
                (inv, true)
            }
            CheckSpec::Script {
                interpreter,
                script,
                ..
            } => {
                let inv = Invocation::new(env.resolve_tool(interpreter, prefix))
                    .stdin(script.clone());
                (inv, false)
            }
        };
        let invocation = invocation
            .current_dir(prefix)
            .envs(env.get_vars().clone());
        debug!("[{}] check #{}: {}", formula.name(), check_index, invocation);

        let output = match self.runner.run(&invocation) {
            Ok(output) => output,
            Err(e) => {
                results.push(ExecutionResult {
                    phase: Phase::Verify,
                    command: invocation.argv(),
                    exit_status: None,
                    captured_output: e.to_string(),
                });
                return Err(fail(e.to_string()));
            }
        };
        let combined = output.combined();
        let actual = if use_combined {
            &combined
        } else {
            &output.stdout
        };
        results.push(ExecutionResult {
            phase: Phase::Verify,
            command: invocation.argv(),
            exit_status: output.status,
            captured_output: combined.clone(),
        });

        if !output.success() {
            error!(
                "[{}] check #{} exited with {:?}",
                formula.name(),
                check_index,
                output.status
            );
            let status = output
                .status
                .map_or_else(|| "signal".to_string(), |s| s.to_string());
            return Err(fail(format!("{} (exit status {status})", combined.trim_end())));
        }
        if !check.expect().is_match(actual, &expected) {
            error!(
                "[{}] check #{} output did not match {:?}",
                formula.name(),
                check_index,
                expected
            );
            return Err(fail(combined));
        }
        info!("==> [{}] check #{} passed", formula.name(), check_index);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use kiln_aio::process::CommandOutput;
    use kiln_common::config::Config;
    use kiln_common::model::check::OutputMatcher;

    use super::*;
    use crate::test_support::{exited, oiio_descriptor, program_name, RecordingRunner};

    struct Fixture {
        _root: tempfile::TempDir,
        prefix: PathBuf,
        fixtures: PathBuf,
        env: BuildEnvironment,
    }

    fn fixture() -> Fixture {
        let root = tempfile::tempdir().unwrap();
        let config = Config::with_root(root.path());
        let prefix = config.formula_keg_path("openimageio", "2.1.17");
        let fixtures = root.path().join("fixtures");
        fs::create_dir_all(&fixtures).unwrap();
        fs::write(fixtures.join("test.jpg"), b"\xff\xd8\xff").unwrap();
        let env = BuildEnvironment::from_host_vars(Vec::new(), &config, &[], 1).unwrap();
        Fixture {
            _root: root,
            prefix,
            fixtures,
            env,
        }
    }

    fn oiio_runner(info_output: String, version: &'static str) -> RecordingRunner {
        RecordingRunner::new(move |inv| {
            Ok(match program_name(inv) {
                "oiiotool" => exited(0, &info_output),
                _ => exited(0, version),
            })
        })
    }

    #[test]
    fn both_check_kinds_pass() {
        let fx = fixture();
        let formula = Formula::from_toml_str(&oiio_descriptor("")).unwrap();
        let image = fx.fixtures.join("test.jpg");
        let runner = oiio_runner(
            format!("{} :    1 x    1, 3 channel, uint8 jpeg\n", image.display()),
            "2.1.17\n",
        );
        let verifier = Verifier::new(&runner, &fx.env, &fx.fixtures);
        let mut results = Vec::new();
        verifier.verify(&formula, &fx.prefix, &mut results).unwrap();

        let calls = runner.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].program, fx.prefix.join("bin/oiiotool"));
        assert_eq!(calls[0].args, ["--info".to_string(), image.display().to_string()]);
        assert_eq!(program_name(&calls[1]), "python");
        assert!(calls[1].stdin.as_deref().unwrap().contains("VERSION_STRING"));
        assert!(results.iter().all(|r| r.phase == Phase::Verify));
    }

    #[test]
    fn missing_substring_fails_the_first_check() {
        let fx = fixture();
        let formula = Formula::from_toml_str(&oiio_descriptor("")).unwrap();
        let runner = oiio_runner("oiiotool: unknown format\n".to_string(), "2.1.17\n");
        let verifier = Verifier::new(&runner, &fx.env, &fx.fixtures);
        let err = verifier
            .verify(&formula, &fx.prefix, &mut Vec::new())
            .unwrap_err();
        match err {
            KilnError::Verification {
                check_index,
                expected,
                actual,
            } => {
                assert_eq!(check_index, 0);
                assert!(expected.ends_with(" :    1 x    1, 3 channel, uint8 jpeg"));
                assert_eq!(actual, "oiiotool: unknown format\n");
            }
            other => panic!("expected Verification, got {other:?}"),
        }
        assert_eq!(runner.calls().len(), 1);
    }

    #[test]
    fn stops_after_the_first_failing_check() {
        let fx = fixture();
        let extra = r#"
[[test]]
kind = "cli"
command = "iinfo"
args = ["--version"]
expect = "version"
"#;
        let mut formula = Formula::from_toml_str(&oiio_descriptor(extra)).unwrap();
        formula.checks.remove(0);
        assert_eq!(formula.checks.len(), 2);
        formula.checks.insert(
            0,
            CheckSpec::Cli {
                command: "maketx".into(),
                args: vec![],
                fixture: None,
                expect: kiln_common::model::check::OutputMatcher::Contains("maketx".into()),
            },
        );
        let runner = RecordingRunner::new(|inv| {
            Ok(match program_name(inv) {
                "maketx" => exited(0, "maketx 2.1.17"),
                _ => exited(0, "2.1.16\n"),
            })
        });
        let verifier = Verifier::new(&runner, &fx.env, &fx.fixtures);
        let err = verifier
            .verify(&formula, &fx.prefix, &mut Vec::new())
            .unwrap_err();
        assert!(matches!(err, KilnError::Verification { check_index: 1, .. }));
        assert_eq!(runner.programs(), ["maketx", "python"]);
    }

    #[test]
    fn missing_fixture_fails_without_running() {
        let fx = fixture();
        fs::remove_file(fx.fixtures.join("test.jpg")).unwrap();
        let formula = Formula::from_toml_str(&oiio_descriptor("")).unwrap();
        let runner = RecordingRunner::succeeding();
        let verifier = Verifier::new(&runner, &fx.env, &fx.fixtures);
        let err = verifier
            .verify(&formula, &fx.prefix, &mut Vec::new())
            .unwrap_err();
        assert!(matches!(err, KilnError::Verification { check_index: 0, .. }));
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn nonzero_exit_fails_even_with_matching_output() {
        let fx = fixture();
        let mut formula = Formula::from_toml_str(&oiio_descriptor("")).unwrap();
        formula.checks.remove(0);
        let runner = RecordingRunner::new(|_| Ok(exited(1, "2.1.17\n")));
        let verifier = Verifier::new(&runner, &fx.env, &fx.fixtures);
        let err = verifier
            .verify(&formula, &fx.prefix, &mut Vec::new())
            .unwrap_err();
        assert!(err.to_string().contains("exit status 1"), "{err}");
    }

    #[test]
    fn spawn_failure_is_a_verification_error() {
        let fx = fixture();
        let formula = Formula::from_toml_str(&oiio_descriptor("")).unwrap();
        let runner =
            RecordingRunner::new(|_| Err(KilnError::CommandExecError("oiiotool: not found".into())));
        let verifier = Verifier::new(&runner, &fx.env, &fx.fixtures);
        match verifier.verify(&formula, &fx.prefix, &mut Vec::new()) {
            Err(KilnError::Verification { actual, .. }) => {
                assert!(actual.contains("oiiotool: not found"))
            }
            other => panic!("expected Verification, got {other:?}"),
        }
    }

    fn script_check(interpreter: &str, script: &str, expect: OutputMatcher) -> CheckSpec {
        CheckSpec::Script {
            interpreter: interpreter.to_string(),
            script: script.to_string(),
            expect,
        }
    }

    #[test]
    fn failing_script_reports_its_stderr() {
        let fx = fixture();
        let mut formula = Formula::from_toml_str(&oiio_descriptor("")).unwrap();
        formula.checks.remove(0);
        let runner = RecordingRunner::new(|_| {
            Ok(CommandOutput {
                status: Some(1),
                stdout: String::new(),
                stderr: "ModuleNotFoundError: No module named 'OpenImageIO'\n".to_string(),
            })
        });
        let verifier = Verifier::new(&runner, &fx.env, &fx.fixtures);
        let mut results = Vec::new();
        match verifier.verify(&formula, &fx.prefix, &mut results) {
            Err(KilnError::Verification { actual, .. }) => {
                assert!(actual.contains("No module named 'OpenImageIO'"), "{actual}");
                assert!(actual.ends_with("(exit status 1)"), "{actual}");
            }
            other => panic!("expected Verification, got {other:?}"),
        }
        assert!(results[0].captured_output.contains("ModuleNotFoundError"));
    }

    #[test]
    fn script_output_matches_on_stdout_but_reports_both_streams() {
        let fx = fixture();
        let mut formula = Formula::from_toml_str(&oiio_descriptor("")).unwrap();
        formula.checks = vec![script_check(
            "python",
            "print('2.1')",
            OutputMatcher::Equals("2.1.17".into()),
        )];
        // The version only appears on stderr, which must not satisfy the matcher.
        let runner = RecordingRunner::new(|_| {
            Ok(CommandOutput {
                status: Some(0),
                stdout: "2.1\n".to_string(),
                stderr: "warning: built against 2.1.17\n".to_string(),
            })
        });
        let verifier = Verifier::new(&runner, &fx.env, &fx.fixtures);
        match verifier.verify(&formula, &fx.prefix, &mut Vec::new()) {
            Err(KilnError::Verification { actual, .. }) => {
                assert_eq!(actual, "2.1\nwarning: built against 2.1.17\n");
            }
            other => panic!("expected Verification, got {other:?}"),
        }
    }

    #[test]
    fn script_bodies_are_passed_verbatim() {
        let fx = fixture();
        let mut formula = Formula::from_toml_str(&oiio_descriptor("")).unwrap();
        let script = "import OpenImageIO\nversion = OpenImageIO.VERSION_STRING\nprint(f\"{version}\")\n";
        formula.checks = vec![script_check("python", script, OutputMatcher::Version)];
        let runner = RecordingRunner::new(|_| Ok(exited(0, "2.1.17\n")));
        let verifier = Verifier::new(&runner, &fx.env, &fx.fixtures);
        verifier.verify(&formula, &fx.prefix, &mut Vec::new()).unwrap();
        assert_eq!(runner.calls()[0].stdin.as_deref(), Some(script));
    }

    #[cfg(unix)]
    #[test]
    fn checks_run_with_the_keg_on_path_and_pythonpath() {
        use std::os::unix::fs::PermissionsExt;

        use kiln_aio::process::SystemRunner;

        let fx = fixture();
        let site = fx.prefix.join("lib/python3.11/site-packages");
        fs::create_dir_all(&site).unwrap();
        fs::create_dir_all(fx.prefix.join("bin")).unwrap();
        let tool = fx.prefix.join("bin/oiio-version");
        fs::write(&tool, "#!/bin/sh\necho 2.1.17\n").unwrap();
        fs::set_permissions(&tool, fs::Permissions::from_mode(0o755)).unwrap();

        let mut formula = Formula::from_toml_str(&oiio_descriptor("")).unwrap();
        formula.checks = vec![
            script_check("sh", "oiio-version\n", OutputMatcher::Version),
            script_check(
                "sh",
                "printf '%s\\n' \"$PYTHONPATH\"\n",
                OutputMatcher::Equals(site.display().to_string()),
            ),
        ];
        let verifier = Verifier::new(&SystemRunner, &fx.env, &fx.fixtures);
        let mut results = Vec::new();
        verifier.verify(&formula, &fx.prefix, &mut results).unwrap();
        assert_eq!(results.len(), 2);
    }

    #[cfg(unix)]
    #[test]
    fn python_checks_import_modules_installed_into_the_keg() {
        use kiln_aio::process::SystemRunner;

        let fx = fixture();
        let site = fx.prefix.join("lib/python3.11/site-packages");
        fs::create_dir_all(&site).unwrap();
        if which::which_in("python3", fx.env.get_path_string(), &fx.prefix).is_err() {
            eprintln!("python3 not on the build PATH, skipping");
            return;
        }
        fs::write(site.join("OpenImageIO.py"), "VERSION_STRING = \"2.1.17\"\n").unwrap();

        let mut formula = Formula::from_toml_str(&oiio_descriptor("")).unwrap();
        formula.checks = vec![script_check(
            "python3",
            "import OpenImageIO\nprint(OpenImageIO.VERSION_STRING)\n",
            OutputMatcher::Version,
        )];
        let verifier = Verifier::new(&SystemRunner, &fx.env, &fx.fixtures);
        let mut results = Vec::new();
        let outcome = verifier.verify(&formula, &fx.prefix, &mut results);
        assert!(outcome.is_ok(), "{outcome:?}: {:?}", results);
    }
}
