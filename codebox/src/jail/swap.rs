//! Swap-accounting detection.
//!
//! Handing nsjail a swap limit on a kernel without the swap controller makes
//! it fail while writing a cgroup file that does not exist, so the limit
//! arguments have to be dropped up front on such hosts.

use std::fs;
use std::path::Path;

use uuid::Uuid;

use super::cgroup::CgroupLayout;
use crate::config;

/// True when the swap memory cgroup controller is usable.
pub(crate) fn controller_exists(layout: &CgroupLayout, version: u8) -> bool {
    if version == 1 {
        return layout
            .mem_mount
            .join("memory.memsw.max_usage_in_bytes")
            .exists();
    }

    // memory.swap.* is not exposed in the v2 root cgroup; probe a throwaway
    // child instead.
    let probe = layout
        .unified_mount
        .join(format!("codebox-probe-{}", Uuid::new_v4()));
    if let Err(e) = fs::create_dir(&probe) {
        tracing::warn!(
            path = %probe.display(),
            error = %e,
            "Could not create probe cgroup; assuming the swap controller is missing"
        );
        return false;
    }

    let exists = probe.join("memory.swap.max").exists();

    if let Err(e) = fs::remove_dir(&probe) {
        tracing::warn!(path = %probe.display(), error = %e, "Could not remove probe cgroup");
    }
    exists
}

/// True when the host has any swap configured (`SwapTotal` in meminfo).
pub(crate) fn swap_enabled(meminfo: &Path) -> bool {
    if let Ok(contents) = fs::read_to_string(meminfo) {
        for line in contents.lines() {
            let mut fields = line.split_whitespace();
            if fields.next() == Some("SwapTotal:") {
                return fields.next().is_some_and(|value| value != "0");
            }
        }
    }
    tracing::warn!("Couldn't determine if swap is on or off. Assuming it's off.");
    false
}

/// Decide whether the jail's swap-limit arguments should be omitted.
///
/// Warn when swap is active but the controller is missing: the jail then
/// cannot limit memory effectively and the operator should turn swap off or
/// enable the controller.
pub(crate) fn should_ignore_limit(layout: &CgroupLayout, version: u8) -> bool {
    if config::CGROUP_MEM_MAX <= 0 {
        // Memory is unlimited, so no swap limit will be set either.
        return false;
    }

    let missing = !controller_exists(layout, version);
    if missing && swap_enabled(Path::new("/proc/meminfo")) {
        tracing::warn!(
            "Swap memory is available, but the swap memory controller is not enabled \
             (CONFIG_MEMCG_SWAP kernel parameters are likely unset); the jail will not \
             be able to limit memory effectively. Turn off swap or enable the controller."
        );
    }
    missing
}
