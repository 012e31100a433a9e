//! Project staging and sequential command execution.

use std::path::{Component, Path, PathBuf};

use codebox_shared::models::{Command, Response, Sourcefiles};
use codebox_shared::{CodeboxError, CodeboxResult};

use crate::exec::{self, ExecutionMode};
use crate::scratch::ScratchDir;

/// Run a project inside the jail: stage `sources`, then run each command in
/// order.
///
/// One `Response` per command, matching command order. Commands are reported
/// independently; a failed build step does not suppress the steps after it.
/// A staging failure short-circuits: the returned vector holds the single
/// response describing it and no command runs.
pub async fn run_project(sources: &Sourcefiles, commands: &[Command]) -> Vec<Response> {
    run_project_with(ExecutionMode::Isolated, sources, commands).await
}

/// [`run_project`] with an explicit execution mode.
pub async fn run_project_with(
    mode: ExecutionMode,
    sources: &Sourcefiles,
    commands: &[Command],
) -> Vec<Response> {
    let scratch = match ScratchDir::new() {
        Ok(scratch) => scratch,
        Err(e) => {
            tracing::error!(error = %e, "Could not acquire a scratch directory");
            return vec![Response::from_error(e.to_string())];
        }
    };

    for (path, contents) in sources {
        if let Err(e) = stage_source(scratch.path(), path, contents).await {
            tracing::warn!(path = %path, error = %e, "Rejected source file");
            return vec![Response::from_error(e.to_string())];
        }
    }

    let mut responses = Vec::with_capacity(commands.len());
    for command in commands {
        let response = exec::execute_with(mode, command, scratch.path()).await;
        tracing::debug!(command = %command.command, "{}", response);
        responses.push(response);
    }
    responses
}

/// Write one source file under `scratch`.
///
/// The virtual path may carry a leading separator (stripped) and nested
/// directories (created). The destination must stay a strict descendant of
/// `scratch` after resolution; `..` hops and symlinked components are
/// rejected with the escaping path reported back to the client.
pub async fn stage_source(scratch: &Path, path: &str, contents: &str) -> CodeboxResult<()> {
    let canonical_scratch = tokio::fs::canonicalize(scratch).await.map_err(|e| {
        CodeboxError::Staging(format!(
            "cannot resolve scratch directory {}: {}",
            scratch.display(),
            e
        ))
    })?;

    let destination = resolve_destination(&canonical_scratch, path)?;

    // The final component never pre-exists as a directory or symlink in a
    // fresh scratch, so containment hinges on the parent alone: create it,
    // then judge its canonicalized location.
    let parent = destination
        .parent()
        .ok_or_else(|| CodeboxError::InvalidPath(destination.display().to_string()))?;
    tokio::fs::create_dir_all(parent).await.map_err(|e| {
        CodeboxError::Staging(format!(
            "cannot create directories for {}: {}",
            destination.display(),
            e
        ))
    })?;

    let real_parent = tokio::fs::canonicalize(parent).await.map_err(|e| {
        CodeboxError::Staging(format!("cannot resolve {}: {}", parent.display(), e))
    })?;
    if !real_parent.starts_with(&canonical_scratch) {
        let file_name = destination.file_name().unwrap_or_default();
        return Err(CodeboxError::InvalidPath(
            real_parent.join(file_name).display().to_string(),
        ));
    }

    tokio::fs::write(&destination, contents).await.map_err(|e| {
        CodeboxError::Staging(format!("cannot write {}: {}", destination.display(), e))
    })?;
    Ok(())
}

/// Resolve a virtual path against the scratch root, lexically.
///
/// The full resolution is computed even when it escapes, so the error can
/// name the path the client actually aimed at.
fn resolve_destination(canonical_scratch: &Path, virtual_path: &str) -> CodeboxResult<PathBuf> {
    let trimmed = virtual_path.trim_start_matches('/');

    let mut resolved = canonical_scratch.to_path_buf();
    let mut escaped = false;
    for component in Path::new(trimmed).components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                resolved.pop();
            }
            Component::RootDir | Component::Prefix(_) => escaped = true,
        }
        if !resolved.starts_with(canonical_scratch) {
            escaped = true;
        }
    }

    if escaped || resolved == *canonical_scratch {
        return Err(CodeboxError::InvalidPath(resolved.display().to_string()));
    }
    Ok(resolved)
}
