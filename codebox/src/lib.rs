//! Codebox execution core.
//!
//! This crate stages a client-submitted source tree into a scratch directory
//! and runs the submitted commands inside an nsjail envelope, collecting
//! stdout, stderr, exit status and wall-clock time for each one.
//!
//! The crate knows nothing about languages: a "Python project" is just a
//! source map and a command line that happens to start a Python interpreter.
//! Per-language behavior is the caller's choice of command.

use std::sync::OnceLock;

use tracing_subscriber::EnvFilter;

pub mod config;
pub mod exec;
pub mod jail;
pub mod runner;
pub mod scratch;
pub mod util;

pub use codebox_shared::errors::{CodeboxError, CodeboxResult};
pub use codebox_shared::models::{Command, ProjectCore, Response, Sourcefiles};
pub use exec::ExecutionMode;
pub use runner::{run_project, run_project_with};

static INIT_LOGGING: OnceLock<()> = OnceLock::new();

/// Install the process-wide tracing subscriber.
///
/// Filtering comes from `RUST_LOG` when set, otherwise from the configured
/// log level. Records go to stderr so stdout stays free for payload.
/// Idempotent; a host that already installed its own subscriber wins.
pub fn init_logging() {
    INIT_LOGGING.get_or_init(|| {
        let settings = config::settings();
        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&settings.log_level))
            .unwrap_or_else(|_| EnvFilter::new("info"));

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init();
    });
}
