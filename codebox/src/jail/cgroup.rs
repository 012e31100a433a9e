//! Cgroup hierarchy preparation for the isolation tool.
//!
//! nsjail creates one cgroup per jail but cannot create the parent cgroup it
//! nests them under (that usually needs privileges it has dropped). This
//! module prepares that parent, works out which cgroup version the kernel
//! offers, and records whether swap accounting is usable.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use codebox_shared::{CodeboxError, CodeboxResult};

use super::swap;
use crate::config::{self, Settings};

/// Resolved cgroup facts, computed once per process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CgroupProfile {
    /// Cgroup version the jail arguments should target (1 or 2).
    pub version: u8,

    /// True when swap-limit arguments must be omitted because the kernel has
    /// no usable swap-accounting controller.
    pub ignore_swap_limits: bool,

    /// Parent cgroup name under which per-jail children are created.
    pub parent: String,
}

/// Filesystem locations probed during detection and setup.
///
/// Split out from [`Settings`] so tests can aim the probes at a scratch tree.
#[derive(Debug, Clone)]
pub struct CgroupLayout {
    pub mem_mount: PathBuf,
    pub pids_mount: PathBuf,
    pub net_cls_mount: PathBuf,
    pub cpu_mount: PathBuf,
    pub unified_mount: PathBuf,
    pub parent: String,
    pub prefer_v2: bool,
}

impl CgroupLayout {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            mem_mount: settings.cgroup_mem_mount.clone(),
            pids_mount: settings.cgroup_pids_mount.clone(),
            net_cls_mount: settings.cgroup_net_cls_mount.clone(),
            cpu_mount: settings.cgroup_cpu_mount.clone(),
            unified_mount: settings.cgroupv2_mount.clone(),
            parent: settings.cgroup_parent.clone(),
            prefer_v2: settings.prefer_cgroupv2,
        }
    }

    fn v1_controller_mounts(&self) -> [&Path; 4] {
        [
            &self.mem_mount,
            &self.pids_mount,
            &self.net_cls_mount,
            &self.cpu_mount,
        ]
    }
}

/// Guess the cgroup version from what is mounted.
///
/// Hybrid systems mount both hierarchies; the configured preference decides
/// there. A system where neither shows up is misconfigured, so warn and
/// assume v2.
pub(crate) fn detect_version(layout: &CgroupLayout) -> u8 {
    let v1_exists = layout.v1_controller_mounts().iter().any(|m| m.exists());
    let v2_exists = layout.unified_mount.join("cgroup.controllers").exists();

    match (v1_exists, v2_exists) {
        (true, true) => {
            if layout.prefer_v2 {
                2
            } else {
                1
            }
        }
        (true, false) => 1,
        (false, true) => 2,
        (false, false) => {
            tracing::warn!(
                unified_mount = %layout.unified_mount.display(),
                "Neither the cgroup v1 controller mounts nor cgroup.controllers exist; \
                 either the mounts are misconfigured or all controllers are disabled. \
                 Assuming cgroup v2"
            );
            2
        }
    }
}

/// Create the parent cgroup under the pids and memory v1 hierarchies.
fn init_v1(layout: &CgroupLayout) -> CodeboxResult<()> {
    for mount in [&layout.pids_mount, &layout.mem_mount] {
        let parent = mount.join(&layout.parent);
        fs::create_dir_all(&parent).map_err(|e| {
            CodeboxError::Cgroup(format!(
                "failed to create parent cgroup {}: {}",
                parent.display(),
                e
            ))
        })?;
    }
    Ok(())
}

/// Enable v2 controllers for grandchildren of the unified root.
///
/// nsjail creates its cgroups two levels below the root, so the root's
/// `subtree_control` must advertise the controllers.
fn init_v2(layout: &CgroupLayout) -> CodeboxResult<()> {
    let root = &layout.unified_mount;
    let subtree_control = root.join("cgroup.subtree_control");

    let enabled = fs::read_to_string(&subtree_control).map_err(|e| {
        CodeboxError::Cgroup(format!(
            "failed to read {}: {}",
            subtree_control.display(),
            e
        ))
    })?;
    if !enabled.trim().is_empty() {
        // Controllers already delegated; nothing to do.
        return Ok(());
    }

    // Processes still attached to the root make subtree_control writes fail
    // with EBUSY; move them all into an init child first.
    let init_cgroup = root.join("init");
    fs::create_dir_all(&init_cgroup).map_err(|e| {
        CodeboxError::Cgroup(format!(
            "failed to create init cgroup {}: {}",
            init_cgroup.display(),
            e
        ))
    })?;

    let root_procs = root.join("cgroup.procs");
    let procs = fs::read_to_string(&root_procs)
        .map_err(|e| CodeboxError::Cgroup(format!("failed to read {}: {}", root_procs.display(), e)))?;
    for pid in procs.split_whitespace() {
        // The kernel rejects batched writes here: one PID per write. A PID
        // that exits between the read and the write is not our problem.
        if let Err(e) = fs::write(init_cgroup.join("cgroup.procs"), pid) {
            tracing::warn!(pid, error = %e, "Could not migrate process out of the root cgroup");
        }
    }

    let controllers = fs::read_to_string(root.join("cgroup.controllers")).map_err(|e| {
        CodeboxError::Cgroup(format!("failed to read cgroup.controllers: {}", e))
    })?;
    for controller in controllers.split_whitespace() {
        fs::write(&subtree_control, format!("+{controller}")).map_err(|e| {
            CodeboxError::Cgroup(format!("failed to enable {} controller: {}", controller, e))
        })?;
    }

    Ok(())
}

/// Detect the version and initialise the matching hierarchy.
pub(crate) fn init(layout: &CgroupLayout) -> CodeboxResult<u8> {
    let version = detect_version(layout);
    if version == 1 {
        init_v1(layout)?;
    } else {
        init_v2(layout)?;
    }
    Ok(version)
}

pub(crate) fn build_profile(layout: &CgroupLayout) -> CgroupProfile {
    let version = match init(layout) {
        Ok(version) => version,
        Err(e) => {
            tracing::warn!(error = %e, "Cgroup initialisation failed; jail limits may not apply");
            detect_version(layout)
        }
    };
    let ignore_swap_limits = swap::should_ignore_limit(layout, version);

    tracing::info!("Assuming cgroup version {}", version);

    CgroupProfile {
        version,
        ignore_swap_limits,
        parent: layout.parent.clone(),
    }
}

/// Prepare the cgroup hierarchy and return the resolved profile.
///
/// Computed at most once per process; only the first call touches the
/// filesystem. Safe to call from multiple threads. Setup failures degrade to
/// a warning: a service that cannot prepare cgroups still answers requests,
/// it just cannot promise the limits.
pub fn profile() -> &'static CgroupProfile {
    static PROFILE: OnceLock<CgroupProfile> = OnceLock::new();
    PROFILE.get_or_init(|| {
        let layout = CgroupLayout::from_settings(config::settings());
        build_profile(&layout)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn layout_under(root: &Path, prefer_v2: bool) -> CgroupLayout {
        CgroupLayout {
            mem_mount: root.join("memory"),
            pids_mount: root.join("pids"),
            net_cls_mount: root.join("net_cls"),
            cpu_mount: root.join("cpu"),
            unified_mount: root.join("unified"),
            parent: "NSJAIL".to_string(),
            prefer_v2,
        }
    }

    #[test]
    fn detects_v1_from_controller_mounts() {
        let dir = TempDir::new().unwrap();
        let layout = layout_under(dir.path(), true);
        fs::create_dir_all(&layout.mem_mount).unwrap();

        assert_eq!(detect_version(&layout), 1);
    }

    #[test]
    fn detects_v2_from_unified_controllers_file() {
        let dir = TempDir::new().unwrap();
        let layout = layout_under(dir.path(), true);
        fs::create_dir_all(&layout.unified_mount).unwrap();
        fs::write(layout.unified_mount.join("cgroup.controllers"), "memory pids").unwrap();

        assert_eq!(detect_version(&layout), 2);
    }

    #[test]
    fn hybrid_mode_trusts_the_preference() {
        let dir = TempDir::new().unwrap();
        let layout = layout_under(dir.path(), false);
        fs::create_dir_all(&layout.pids_mount).unwrap();
        fs::create_dir_all(&layout.unified_mount).unwrap();
        fs::write(layout.unified_mount.join("cgroup.controllers"), "memory").unwrap();

        assert_eq!(detect_version(&layout), 1);

        let layout = CgroupLayout {
            prefer_v2: true,
            ..layout
        };
        assert_eq!(detect_version(&layout), 2);
    }

    #[test]
    fn neither_hierarchy_defaults_to_v2() {
        let dir = TempDir::new().unwrap();
        let layout = layout_under(dir.path(), false);
        assert_eq!(detect_version(&layout), 2);
    }

    #[test]
    fn v1_init_creates_parent_cgroups() {
        let dir = TempDir::new().unwrap();
        let layout = layout_under(dir.path(), false);
        fs::create_dir_all(&layout.mem_mount).unwrap();
        fs::create_dir_all(&layout.pids_mount).unwrap();

        init_v1(&layout).unwrap();
        assert!(layout.mem_mount.join("NSJAIL").is_dir());
        assert!(layout.pids_mount.join("NSJAIL").is_dir());

        // Idempotent: a second run must not fail on existing directories.
        init_v1(&layout).unwrap();
    }

    #[test]
    fn v2_init_migrates_procs_and_enables_controllers() {
        let dir = TempDir::new().unwrap();
        let layout = layout_under(dir.path(), true);
        let root = &layout.unified_mount;
        fs::create_dir_all(root).unwrap();
        fs::write(root.join("cgroup.controllers"), "cpu memory pids\n").unwrap();
        fs::write(root.join("cgroup.subtree_control"), "").unwrap();
        fs::write(root.join("cgroup.procs"), "12\n345\n").unwrap();

        init_v2(&layout).unwrap();

        assert!(root.join("init").is_dir());
        // A plain file cannot model the kernel's accumulating semantics, but
        // every controller write must have gone through; the last one sticks.
        let subtree = fs::read_to_string(root.join("cgroup.subtree_control")).unwrap();
        assert_eq!(subtree, "+pids");
        let migrated = fs::read_to_string(root.join("init").join("cgroup.procs")).unwrap();
        assert_eq!(migrated, "345");
    }

    #[test]
    fn v2_init_returns_early_when_already_delegated() {
        let dir = TempDir::new().unwrap();
        let layout = layout_under(dir.path(), true);
        let root = &layout.unified_mount;
        fs::create_dir_all(root).unwrap();
        fs::write(root.join("cgroup.subtree_control"), "+cpu +memory\n").unwrap();

        init_v2(&layout).unwrap();
        assert!(!root.join("init").exists());
    }

    #[test]
    fn profile_survives_setup_failure() {
        // No mounts exist at all: detection falls back to v2 and init fails
        // on the missing subtree_control, which must degrade, not abort.
        let dir = TempDir::new().unwrap();
        let layout = layout_under(dir.path(), true);

        let profile = build_profile(&layout);
        assert_eq!(profile.version, 2);
        assert_eq!(profile.parent, "NSJAIL");
    }
}
