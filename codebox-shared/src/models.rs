//! Wire-level value types for project execution.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Mapping of virtual file paths to UTF-8 file contents.
///
/// Keys may carry a leading `/`; it is stripped before staging. A `BTreeMap`
/// keeps staging order deterministic, so the same project always surfaces the
/// same first error.
pub type Sourcefiles = BTreeMap<String, String>;

/// One command to run against a staged project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    /// Invocation line, split with POSIX shell-word rules before spawning.
    pub command: String,

    /// Text delivered on the child's standard input.
    #[serde(default)]
    pub stdin: Option<String>,

    /// Wall-clock deadline in seconds. `None` means the configured default.
    #[serde(default)]
    pub timeout: Option<f64>,
}

impl Command {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            stdin: None,
            timeout: None,
        }
    }

    pub fn stdin(mut self, text: impl Into<String>) -> Self {
        self.stdin = Some(text.into());
        self
    }

    pub fn timeout(mut self, seconds: f64) -> Self {
        self.timeout = Some(seconds);
        self
    }
}

/// A complete project submission: sources plus the commands to run, in order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectCore {
    pub sources: Sourcefiles,
    pub commands: Vec<Command>,
}

/// Outcome of one command.
///
/// `exit_code` semantics: `0` success, positive values are the child's exit
/// status, `128 + N` means the child was terminated by signal `N`, and `-1`
/// is a supervisor-level failure (deadline breach, spawn failure, rejected
/// source path, output-cap abort).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Response {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,

    /// Wall-clock seconds between spawn and collection. Not part of value
    /// equality.
    #[serde(default)]
    pub elapsed_time: f64,
}

impl Response {
    pub fn new(stdout: impl Into<String>, stderr: impl Into<String>, exit_code: i32) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: stderr.into(),
            exit_code,
            elapsed_time: 0.0,
        }
    }

    /// A supervisor-level failure: the message lands in `stderr`, the exit
    /// code is `-1`.
    pub fn from_error(message: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: message.into(),
            exit_code: -1,
            elapsed_time: 0.0,
        }
    }
}

impl PartialEq for Response {
    fn eq(&self, other: &Self) -> bool {
        // elapsed_time is not compared because it is never reproducible.
        self.stdout == other.stdout
            && self.stderr == other.stderr
            && self.exit_code == other.exit_code
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Response(stdout={:?}, stderr={:?}, exit_code={}, elapsed_time={:.0}ms)",
            self.stdout,
            self.stderr,
            self.exit_code,
            self.elapsed_time * 1000.0
        )
    }
}
