//! Demultiplexer for the isolation tool's log output.
//!
//! nsjail writes its own log file per invocation, with lines shaped like
//! `[W][2024-03-01T10:00:02+0000][517] bool setupLimits():103 message`. Each
//! line is re-emitted through the host logger at a matching severity so jail
//! failures show up where operators actually look.

use std::sync::LazyLock;

use regex::Regex;

use crate::config;

/// `[level][timestamp]` optionally followed by a `[pid] signature:line`
/// prefix, then the message.
static LOG_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\[(?P<level>[DIWEF])\]\[.+?\](?P<func>\[\d+\] .+?:\d+ )? ?(?P<msg>.+)$")
        .expect("log pattern is valid")
});

/// Message prefixes that are pure startup chatter unless debugging.
const LOG_BLACKLIST: &[&str] = &["Process will be "];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Severity {
    Debug,
    Info,
    Warning,
    Error,
}

/// Routing decision for one tool log line.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Routed {
    /// The line did not match the pattern; warn quoting it verbatim.
    Unparsed,
    /// Matched but filtered out.
    Dropped,
    Record(Severity, String),
}

pub(crate) fn route(line: &str, debug: bool) -> Routed {
    let Some(caps) = LOG_PATTERN.captures(line) else {
        return Routed::Unparsed;
    };

    let mut msg = caps["msg"].to_string();
    if !debug && LOG_BLACKLIST.iter().any(|prefix| msg.starts_with(prefix)) {
        return Routed::Dropped;
    }
    if debug && let Some(func) = caps.name("func") {
        msg = format!("{}{}", func.as_str(), msg);
    }

    match &caps["level"] {
        "D" => Routed::Record(Severity::Debug, msg),
        "I" => {
            // `pid=` lines carry the child's exit status; everything else at
            // this level is only interesting when debugging.
            if debug || msg.starts_with("pid=") {
                Routed::Record(Severity::Info, msg)
            } else {
                Routed::Dropped
            }
        }
        "W" => Routed::Record(Severity::Warning, msg),
        // E and F both surface as errors.
        _ => Routed::Record(Severity::Error, msg),
    }
}

/// Forward the tool's log lines into the host logger.
pub fn forward<'a>(lines: impl IntoIterator<Item = &'a str>) {
    let debug = config::settings().debug();
    for line in lines {
        match route(line, debug) {
            Routed::Unparsed => tracing::warn!("Failed to parse log line '{}'", line),
            Routed::Dropped => {}
            Routed::Record(Severity::Debug, msg) => tracing::debug!(target: "nsjail", "{msg}"),
            Routed::Record(Severity::Info, msg) => tracing::info!(target: "nsjail", "{msg}"),
            Routed::Record(Severity::Warning, msg) => tracing::warn!(target: "nsjail", "{msg}"),
            Routed::Record(Severity::Error, msg) => tracing::error!(target: "nsjail", "{msg}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WARNING_LINE: &str =
        "[W][2024-03-01T10:00:02+0000][517] bool setupLimits():103 write failed";

    #[test]
    fn warning_line_routes_to_warning() {
        assert_eq!(
            route(WARNING_LINE, false),
            Routed::Record(Severity::Warning, "write failed".to_string())
        );
    }

    #[test]
    fn debug_mode_prepends_pid_and_signature() {
        assert_eq!(
            route(WARNING_LINE, true),
            Routed::Record(
                Severity::Warning,
                "[517] bool setupLimits():103 write failed".to_string()
            )
        );
    }

    #[test]
    fn fatal_routes_to_error() {
        let line = "[F][2024-03-01T10:00:02+0000][517] void exec():88 execve failed";
        assert_eq!(
            route(line, false),
            Routed::Record(Severity::Error, "execve failed".to_string())
        );
    }

    #[test]
    fn info_is_dropped_unless_exit_status_or_debug() {
        let chatty = "[I][2024-03-01T10:00:02+0000] Executing '/bin/echo'";
        assert_eq!(route(chatty, false), Routed::Dropped);
        assert_eq!(
            route(chatty, true),
            Routed::Record(Severity::Info, "Executing '/bin/echo'".to_string())
        );

        let exit = "[I][2024-03-01T10:00:02+0000] pid=9 exited with status: 0";
        assert_eq!(
            route(exit, false),
            Routed::Record(Severity::Info, "pid=9 exited with status: 0".to_string())
        );
    }

    #[test]
    fn blacklisted_chatter_is_dropped_outside_debug() {
        let line = "[I][2024-03-01T10:00:02+0000] Process will be UID/EUID=1000";
        assert_eq!(route(line, false), Routed::Dropped);

        let warn = "[W][2024-03-01T10:00:02+0000][517] f():1 Process will be killed";
        assert_eq!(route(warn, false), Routed::Dropped);
        // Debug mode keeps it, signature included.
        assert_eq!(
            route(warn, true),
            Routed::Record(
                Severity::Warning,
                "[517] f():1 Process will be killed".to_string()
            )
        );
    }

    #[test]
    fn garbage_is_unparsed() {
        assert_eq!(route("not a log line", false), Routed::Unparsed);
        assert_eq!(route("", false), Routed::Unparsed);
        assert_eq!(route("[X][ts] nope", false), Routed::Unparsed);
    }
}
