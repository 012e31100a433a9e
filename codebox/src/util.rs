//! Small host-environment helpers.

use std::path::Path;

/// True when the process is running inside a container.
///
/// The staged tree and the commands run against it are hostile input, so
/// unconfined execution is only sane on a disposable filesystem. Detection
/// covers Docker (`/.dockerenv`), Podman (`/run/.containerenv`) and the
/// cgroup ancestry of PID 1 as a fallback.
pub fn inside_container() -> bool {
    detect(
        Path::new("/.dockerenv"),
        Path::new("/run/.containerenv"),
        Path::new("/proc/1/cgroup"),
    )
}

fn detect(dockerenv: &Path, containerenv: &Path, proc_cgroup: &Path) -> bool {
    if dockerenv.exists() || containerenv.exists() {
        return true;
    }
    std::fs::read_to_string(proc_cgroup)
        .map(|contents| contents.lines().any(|line| line.contains(":/docker")))
        .unwrap_or(false)
}
