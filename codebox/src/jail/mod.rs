//! Invocation plumbing for the external isolation tool (nsjail).
//!
//! What nsjail provides: namespace isolation, seccomp, per-jail cgroup
//! limits, and descendant reaping on termination.
//!
//! What this module adds outside nsjail:
//! - parent-cgroup preparation and version detection ([`cgroup`])
//! - swap-capability detection ([`swap`])
//! - per-invocation argument assembly (this file)
//! - forwarding of the tool's log lines into the host logger ([`log`])

pub mod cgroup;
pub mod log;
pub mod swap;

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use codebox_shared::{CodeboxError, CodeboxResult};

use crate::config::{self, Settings};
use self::cgroup::CgroupProfile;

/// Child-visible mount point of the scratch directory.
pub const SANDBOX_MOUNT: &str = "/sandbox";

/// Resource and cgroup arguments, fixed for the process lifetime.
fn limit_args(profile: &CgroupProfile) -> Vec<String> {
    let mut args = vec![
        "--cgroup_mem_max".to_string(),
        config::CGROUP_MEM_MAX.to_string(),
        "--cgroup_pids_max".to_string(),
        config::CGROUP_PIDS_MAX.to_string(),
    ];
    if profile.version == 2 {
        args.push("--use_cgroupv2".to_string());
    }
    // Omitted entirely when the kernel has no swap controller: nsjail would
    // fail writing a cgroup file that does not exist.
    if !profile.ignore_swap_limits {
        args.push("--cgroup_mem_swap_max".to_string());
        args.push(config::CGROUP_MEM_SWAP_MAX.to_string());
    }
    args
}

/// Cached limit arguments, derived from the memoized cgroup profile.
fn cached_limit_args() -> &'static [String] {
    static ARGS: OnceLock<Vec<String>> = OnceLock::new();
    ARGS.get_or_init(|| limit_args(cgroup::profile()))
}

/// One assembled nsjail invocation: the program plus its full argument
/// vector, ending in `--` and the user command words.
#[derive(Debug, Clone)]
pub struct Invocation {
    program: PathBuf,
    args: Vec<String>,
}

impl Invocation {
    /// Assemble the invocation for `command_words` against `scratch`.
    ///
    /// `log_file` receives the tool's own log for this run; it is private to
    /// the invocation and read back only when the jail fails silently.
    pub fn new(scratch: &Path, log_file: &Path, command_words: &[String]) -> Self {
        Self::assemble(
            config::settings(),
            cached_limit_args(),
            scratch,
            log_file,
            command_words,
        )
    }

    fn assemble(
        settings: &Settings,
        limits: &[String],
        scratch: &Path,
        log_file: &Path,
        command_words: &[String],
    ) -> Self {
        let mut args = vec![
            "--config".to_string(),
            settings.nsjail_config.display().to_string(),
            "--log".to_string(),
            log_file.display().to_string(),
            "--bindmount".to_string(),
            format!("{}:{}", scratch.display(), SANDBOX_MOUNT),
            "--env".to_string(),
            format!("HOME={}", SANDBOX_MOUNT),
            "--cwd".to_string(),
            SANDBOX_MOUNT.to_string(),
        ];
        args.extend(limits.iter().cloned());
        args.push("--".to_string());
        args.extend(command_words.iter().cloned());

        Self {
            program: settings.nsjail_path.clone(),
            args,
        }
    }

    /// Build the process command for this invocation.
    pub fn to_command(&self) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(&self.args);
        cmd
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }
}

/// Split a command line with POSIX shell-word rules.
///
/// No shell is involved at spawn time; this is purely lexical.
pub(crate) fn split_command(line: &str) -> CodeboxResult<Vec<String>> {
    shell_words::split(line)
        .map_err(|e| CodeboxError::Spawn(format!("unparsable command line: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_settings() -> Settings {
        Settings {
            nsjail_path: PathBuf::from("/usr/sbin/nsjail"),
            nsjail_config: PathBuf::from("/etc/codebox/nsjail.cfg"),
            ..Settings::default()
        }
    }

    fn words(line: &str) -> Vec<String> {
        split_command(line).unwrap()
    }

    #[test]
    fn v2_limits_include_flag_and_swap_cap() {
        let profile = CgroupProfile {
            version: 2,
            ignore_swap_limits: false,
            parent: "NSJAIL".to_string(),
        };
        let args = limit_args(&profile);
        assert_eq!(
            args,
            vec![
                "--cgroup_mem_max",
                "64000000",
                "--cgroup_pids_max",
                "12",
                "--use_cgroupv2",
                "--cgroup_mem_swap_max",
                "0",
            ]
        );
    }

    #[test]
    fn swap_arguments_are_omitted_when_ignoring_limits() {
        let profile = CgroupProfile {
            version: 2,
            ignore_swap_limits: true,
            parent: "NSJAIL".to_string(),
        };
        let args = limit_args(&profile);
        assert!(!args.iter().any(|a| a.contains("swap")));
        assert!(args.contains(&"--use_cgroupv2".to_string()));
    }

    #[test]
    fn v1_limits_have_no_v2_flag() {
        let profile = CgroupProfile {
            version: 1,
            ignore_swap_limits: false,
            parent: "NSJAIL".to_string(),
        };
        assert!(!limit_args(&profile).contains(&"--use_cgroupv2".to_string()));
    }

    #[test]
    fn invocation_mounts_scratch_and_terminates_options() {
        let limits = vec!["--cgroup_mem_max".to_string(), "64000000".to_string()];
        let invocation = Invocation::assemble(
            &test_settings(),
            &limits,
            Path::new("/tmp/sandbox_abc"),
            Path::new("/tmp/nsjail.log"),
            &words("/bin/echo 1 2 3"),
        );

        assert_eq!(invocation.program(), Path::new("/usr/sbin/nsjail"));

        let args = invocation.args();
        let bindmount = args
            .iter()
            .position(|a| a == "--bindmount")
            .expect("bindmount present");
        assert_eq!(args[bindmount + 1], "/tmp/sandbox_abc:/sandbox");
        assert!(args.contains(&"HOME=/sandbox".to_string()));
        assert!(args.contains(&"--cwd".to_string()));

        // Everything after `--` is the user command, verbatim.
        let separator = args.iter().position(|a| a == "--").expect("-- present");
        let command: Vec<&str> = args[separator + 1..].iter().map(|a| a.as_str()).collect();
        assert_eq!(command, vec!["/bin/echo", "1", "2", "3"]);
        // Limit args come before the separator.
        assert!(args.iter().position(|a| a == "--cgroup_mem_max").unwrap() < separator);
    }

    #[test]
    fn command_splitting_honors_quotes() {
        assert_eq!(
            words(r#"/usr/bin/python -c "print(1, 2, 3)""#),
            vec!["/usr/bin/python", "-c", "print(1, 2, 3)"]
        );
        assert_eq!(words(""), Vec::<String>::new());
        assert!(split_command(r#"/bin/echo "unterminated"#).is_err());
    }
}
