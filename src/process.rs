use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use anyhow::{anyhow, Context};
use tracing::debug;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Capture {
    /// Send stdout and stderr to the null device.
    Discard,

    /// Collect stdout and stderr as text.
    Text,
}

/// A single external command line, run to completion before anything else starts.
#[derive(Clone, Debug)]
pub struct Invocation {
    program: PathBuf,
    arguments: Vec<OsString>,
    capture: Capture,
}

impl Invocation {
    #[must_use]
    pub fn new(program: &Path, capture: Capture) -> Self {
        Self {
            program: program.to_path_buf(),
            arguments: vec![],
            capture,
        }
    }

    #[must_use]
    pub fn arg<S: Into<OsString>>(mut self, argument: S) -> Self {
        self.arguments.push(argument.into());
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, arguments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.arguments.extend(arguments.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn program(&self) -> &Path {
        &self.program
    }

    #[must_use]
    pub fn arguments(&self) -> &[OsString] {
        &self.arguments
    }

    #[must_use]
    pub const fn capture(&self) -> Capture {
        self.capture
    }

    #[must_use]
    pub fn command_line(&self) -> String {
        let mut line = self.program.to_string_lossy().to_string();

        for argument in &self.arguments {
            line.push(' ');
            line.push_str(&argument.to_string_lossy());
        }

        line
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Output {
    pub success: bool,
    pub status: String,

    /// Captured stdout followed by stderr. Empty when output was discarded.
    pub text: String,
}

/// Runs external commands. The driver stages only ever talk to this trait.
pub trait Runner {
    fn run(&self, invocation: &Invocation) -> anyhow::Result<Output>;
}

/// Runs commands on the host with [`std::process::Command`], blocking until they exit.
#[derive(Copy, Clone, Debug, Default)]
pub struct SystemRunner;

impl Runner for SystemRunner {
    fn run(&self, invocation: &Invocation) -> anyhow::Result<Output> {
        debug!("Running {}", invocation.command_line());

        let (stdout, stderr) = match invocation.capture {
            Capture::Discard => (Stdio::null(), Stdio::null()),
            Capture::Text => (Stdio::piped(), Stdio::piped()),
        };

        let child = Command::new(&invocation.program)
            .args(&invocation.arguments)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .spawn()
            .with_context(|| format!("Unable to spawn {:?}", invocation.program))?;

        let result = child
            .wait_with_output()
            .with_context(|| format!("Unable to wait for {:?}", invocation.program))?;

        let mut text = String::from_utf8_lossy(&result.stdout).to_string();
        text.push_str(&String::from_utf8_lossy(&result.stderr));

        Ok(Output {
            success: result.status.success(),
            status: result.status.to_string(),
            text,
        })
    }
}

fn output_tail(text: &str, lines: usize) -> String {
    let all_lines: Vec<&str> = text.lines().collect();
    let start = all_lines.len().saturating_sub(lines);

    all_lines.get(start..).unwrap_or_default().join("\n")
}

/// Runs an invocation whose failure invalidates everything downstream of it.
pub fn run_checked(runner: &dyn Runner, invocation: &Invocation) -> anyhow::Result<Output> {
    let output = runner
        .run(invocation)
        .with_context(|| format!("Unable to run {}", invocation.command_line()))?;

    if !output.success {
        return Err(anyhow!(
            "{} exited with status {} and the following output:\n{}",
            invocation.command_line(),
            output.status,
            output_tail(&output.text, 32)
        ));
    }

    Ok(output)
}
