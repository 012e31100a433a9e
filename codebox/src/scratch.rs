//! Per-project scratch directory lifecycle.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use tempfile::TempDir;

use codebox_shared::{CodeboxError, CodeboxResult};

/// Prefix for scratch directories under the system temp root.
const SCRATCH_PREFIX: &str = "sandbox_";

/// A uniquely named scratch directory, removed on every exit path (drop runs
/// on panics too).
///
/// The directory is made world-accessible on purpose: the jail bind-mounts it
/// and the unprivileged in-jail user must read and write the staged tree.
#[derive(Debug)]
pub struct ScratchDir {
    dir: TempDir,
}

impl ScratchDir {
    pub fn new() -> CodeboxResult<Self> {
        let dir = tempfile::Builder::new()
            .prefix(SCRATCH_PREFIX)
            .tempdir()
            .map_err(|e| {
                CodeboxError::Internal(format!("failed to create scratch directory: {}", e))
            })?;

        fs::set_permissions(dir.path(), fs::Permissions::from_mode(0o777)).map_err(|e| {
            CodeboxError::Internal(format!(
                "failed to open up scratch directory {}: {}",
                dir.path().display(),
                e
            ))
        })?;

        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}
