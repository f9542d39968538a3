// kiln-core/src/test_support.rs
// Recording CommandRunner used by the executor, verifier and pipeline tests.

use std::sync::Mutex;

use kiln_aio::process::{CommandOutput, CommandRunner, Invocation};
use kiln_common::error::Result;

type Responder = Box<dyn Fn(&Invocation) -> Result<CommandOutput> + Send + Sync>;

pub(crate) struct RecordingRunner {
    calls: Mutex<Vec<Invocation>>,
    respond: Responder,
}

impl RecordingRunner {
    pub(crate) fn new(
        respond: impl Fn(&Invocation) -> Result<CommandOutput> + Send + Sync + 'static,
    ) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            respond: Box::new(respond),
        }
    }

    pub(crate) fn succeeding() -> Self {
        Self::new(|_| Ok(exited(0, "")))
    }

    pub(crate) fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().unwrap().clone()
    }

    /// File names of every program run so far, in order.
    pub(crate) fn programs(&self) -> Vec<String> {
        self.calls()
            .iter()
            .map(|inv| program_name(inv).to_string())
            .collect()
    }
}

impl CommandRunner for RecordingRunner {
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput> {
        self.calls.lock().unwrap().push(invocation.clone());
        (self.respond)(invocation)
    }
}

pub(crate) fn program_name(invocation: &Invocation) -> &str {
    invocation
        .program
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
}

pub(crate) fn exited(status: i32, stdout: &str) -> CommandOutput {
    CommandOutput {
        status: Some(status),
        stdout: stdout.to_string(),
        stderr: String::new(),
    }
}

pub(crate) const SHA256: &str =
    "6f20536226f1da4fbf0d522815de47eef60a443f9b67a15705b96c34cc8921a7";

/// Descriptor close to the OpenImageIO formula, with `extra` appended verbatim.
pub(crate) fn oiio_descriptor(extra: &str) -> String {
    format!(
        r#"
name = "openimageio"
url = "https://github.com/OpenImageIO/oiio/archive/Release-2.1.17.0.tar.gz"
version = "2.1.17"
sha256 = "{SHA256}"

[build]
system = "cmake"
flags = [
  {{ name = "CCACHE_FOUND" }},
  {{ name = "EMBEDPLUGINS", value = "ON" }},
  {{ name = "USE_QT", value = "OFF", overridable = true }},
]

[[test]]
kind = "cli"
command = "oiiotool"
args = ["--info", "{{fixture}}"]
fixture = "test.jpg"
expect = {{ contains = "{{fixture}} :    1 x    1, 3 channel, uint8 jpeg" }}

[[test]]
kind = "script"
interpreter = "python"
script = "import OpenImageIO\nprint(OpenImageIO.VERSION_STRING)\n"
{extra}
"#
    )
}
