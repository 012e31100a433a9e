//! Process-wide settings, read from the environment once.

use std::env;
use std::path::PathBuf;
use std::sync::OnceLock;

use codebox_shared::{CodeboxError, CodeboxResult};

/// Default wall-clock deadline for a command, in seconds.
pub const DEFAULT_TIMEOUT: f64 = 0.2;

/// Memory cap for one jail, in bytes.
pub const CGROUP_MEM_MAX: i64 = 64_000_000;

/// Swap cap for one jail, in bytes. Zero means swap is not allowed.
pub const CGROUP_MEM_SWAP_MAX: i64 = 0;

/// Process-count cap for one jail. Compilers fork more than you'd think.
pub const CGROUP_PIDS_MAX: u32 = 12;

/// Upper bound on captured stdout bytes per command.
pub const OUTPUT_MAX: usize = 1_000_000;

/// Pipe read granularity for the capped reader.
pub const READ_CHUNK_SIZE: usize = 10_000;

/// Deployment environment, from the `ENV` variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Production,
    Development,
    Testing,
}

impl Environment {
    fn parse(value: &str) -> CodeboxResult<Self> {
        match value.to_ascii_lowercase().as_str() {
            "production" => Ok(Self::Production),
            "development" => Ok(Self::Development),
            "testing" => Ok(Self::Testing),
            other => Err(CodeboxError::Config(format!(
                "ENV={} is not valid; expected 'production', 'development' or 'testing'",
                other
            ))),
        }
    }
}

/// Static service configuration.
///
/// Built from environment variables at first use and shared for the process
/// lifetime; see [`settings`].
#[derive(Debug, Clone)]
pub struct Settings {
    pub env: Environment,

    /// Default log filter when `RUST_LOG` is unset.
    pub log_level: String,

    /// Path to the nsjail binary.
    pub nsjail_path: PathBuf,

    /// Path to the base nsjail configuration file.
    pub nsjail_config: PathBuf,

    // Cgroup filesystem layout. v1 mounts one hierarchy per controller; v2
    // is a single unified mount.
    pub cgroup_mem_mount: PathBuf,
    pub cgroup_pids_mount: PathBuf,
    pub cgroup_net_cls_mount: PathBuf,
    pub cgroup_cpu_mount: PathBuf,
    pub cgroupv2_mount: PathBuf,

    /// Parent cgroup name under which nsjail creates per-jail children.
    pub cgroup_parent: String,

    /// Version to trust when both hierarchies look mounted (hybrid mode).
    pub prefer_cgroupv2: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            env: Environment::Production,
            log_level: "info".to_string(),
            nsjail_path: PathBuf::from("/usr/sbin/nsjail"),
            nsjail_config: PathBuf::from("/etc/codebox/nsjail.cfg"),
            cgroup_mem_mount: PathBuf::from("/sys/fs/cgroup/memory"),
            cgroup_pids_mount: PathBuf::from("/sys/fs/cgroup/pids"),
            cgroup_net_cls_mount: PathBuf::from("/sys/fs/cgroup/net_cls"),
            cgroup_cpu_mount: PathBuf::from("/sys/fs/cgroup/cpu"),
            cgroupv2_mount: PathBuf::from("/sys/fs/cgroup"),
            cgroup_parent: "NSJAIL".to_string(),
            prefer_cgroupv2: true,
        }
    }
}

impl Settings {
    /// Build settings from the environment, falling back to defaults for
    /// anything unset.
    pub fn from_env() -> CodeboxResult<Self> {
        let mut settings = Self::default();

        if let Ok(value) = env::var("ENV") {
            settings.env = Environment::parse(&value)?;
        }
        if let Ok(value) = env::var("LOG_LEVEL") {
            settings.log_level = value;
        } else if settings.debug() {
            settings.log_level = "debug".to_string();
        }
        if let Ok(value) = env::var("NSJAIL_PATH") {
            settings.nsjail_path = PathBuf::from(value);
        }
        if let Ok(value) = env::var("NSJAIL_CFG") {
            settings.nsjail_config = PathBuf::from(value);
        }

        Ok(settings)
    }

    /// Verbose diagnostics are on outside production.
    pub fn debug(&self) -> bool {
        self.env != Environment::Production
    }
}

/// Process-wide settings, built on first use.
///
/// An invalid environment is reported once and replaced with defaults; a
/// misconfigured `ENV` must not take the whole service down mid-request.
pub fn settings() -> &'static Settings {
    static SETTINGS: OnceLock<Settings> = OnceLock::new();
    SETTINGS.get_or_init(|| match Settings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            tracing::warn!(error = %e, "Invalid environment configuration, using defaults");
            Settings::default()
        }
    })
}
