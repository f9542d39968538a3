// kiln-common/src/model/check.rs
use std::fmt;

use serde::{Deserialize, Serialize};

/// A post-install check, described as data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CheckSpec {
    /// Runs an installed executable and matches its combined stdout/stderr.
    Cli {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        fixture: Option<String>,
        expect: OutputMatcher,
    },
    /// Feeds `script` to `interpreter` on stdin and matches its stdout.
    Script {
        interpreter: String,
        script: String,
        #[serde(default = "version_matcher")]
        expect: OutputMatcher,
    },
}

fn version_matcher() -> OutputMatcher {
    OutputMatcher::Version
}

impl CheckSpec {
    pub fn expect(&self) -> &OutputMatcher {
        match self {
            CheckSpec::Cli { expect, .. } | CheckSpec::Script { expect, .. } => expect,
        }
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        match self {
            CheckSpec::Cli { command, .. } if command.trim().is_empty() => {
                Err("cli check has an empty command".to_string())
            }
            CheckSpec::Script { interpreter, .. } if interpreter.trim().is_empty() => {
                Err("script check has an empty interpreter".to_string())
            }
            CheckSpec::Script { script, .. } if script.trim().is_empty() => {
                Err("script check has an empty script".to_string())
            }
            _ => Ok(()),
        }
    }
}

impl fmt::Display for CheckSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckSpec::Cli { command, args, .. } => {
                write!(f, "{command}")?;
                for arg in args {
                    write!(f, " {arg}")?;
                }
                Ok(())
            }
            CheckSpec::Script { interpreter, .. } => write!(f, "{interpreter} <inline script>"),
        }
    }
}

/// How a check's captured output is judged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputMatcher {
    /// Output contains the text verbatim (extra banners are fine).
    Contains(String),
    /// Trimmed output equals the trimmed text.
    Equals(String),
    /// Trimmed output equals or contains the formula version.
    Version,
}

impl OutputMatcher {
    /// The text this matcher looks for, after placeholder expansion.
    pub fn expected_text(&self, expand: impl Fn(&str) -> String, version: &str) -> String {
        match self {
            OutputMatcher::Contains(text) | OutputMatcher::Equals(text) => expand(text),
            OutputMatcher::Version => version.to_string(),
        }
    }

    pub fn is_match(&self, output: &str, expected: &str) -> bool {
        match self {
            OutputMatcher::Contains(_) => output.contains(expected),
            OutputMatcher::Equals(_) => output.trim() == expected.trim(),
            OutputMatcher::Version => {
                let trimmed = output.trim();
                trimmed == expected || trimmed.contains(expected)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Deserialize)]
    struct Holder {
        test: Vec<CheckSpec>,
    }

    #[test]
    fn parses_both_check_kinds() {
        let holder: Holder = toml::from_str(
            r#"
[[test]]
kind = "cli"
command = "oiiotool"
args = ["--info", "{fixture}"]
fixture = "test.jpg"
expect = { contains = "{fixture} :    1 x    1, 3 channel, uint8 jpeg" }

[[test]]
kind = "script"
interpreter = "python"
script = "import OpenImageIO\nprint(OpenImageIO.VERSION_STRING)\n"
"#,
        )
        .unwrap();
        assert_eq!(holder.test.len(), 2);
        assert!(matches!(holder.test[0].expect(), OutputMatcher::Contains(_)));
        assert_eq!(holder.test[1].expect(), &OutputMatcher::Version);
        assert_eq!(holder.test[0].to_string(), "oiiotool --info {fixture}");
    }

    #[test]
    fn contains_is_substring_not_equality() {
        let matcher = OutputMatcher::Contains("1 x    1".into());
        assert!(matcher.is_match("banner\n/t.jpg :    1 x    1, 3 channel\n", "1 x    1"));
        assert!(!matcher.is_match("2 x 2", "1 x    1"));
    }

    #[test]
    fn version_matcher_trims() {
        let matcher = OutputMatcher::Version;
        assert!(matcher.is_match("2.1.17\n", "2.1.17"));
        assert!(matcher.is_match("OpenImageIO 2.1.17 (release)\n", "2.1.17"));
        assert!(!matcher.is_match("2.1.16\n", "2.1.17"));
        assert_eq!(matcher.expected_text(|s| s.to_string(), "2.1.17"), "2.1.17");
    }

    #[test]
    fn empty_commands_are_invalid() {
        let check = CheckSpec::Cli {
            command: " ".into(),
            args: vec![],
            fixture: None,
            expect: OutputMatcher::Version,
        };
        assert!(check.validate().is_err());
    }
}
