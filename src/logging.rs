//! Structured log sink (§6, §7): a hand-rolled `log::Log` implementation
//! writing `zfs-helper [LEVEL] message key=value key=value` lines to
//! stderr, grounded in this corpus's `StderrLogger` pattern but without the
//! timestamp/unit-name prefix this daemon's log format doesn't call for.

use std::io::Write;

struct StderrLogger;

impl log::Log for StderrLogger {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let level = record.level().to_string().to_uppercase();
        let _ = writeln!(
            std::io::stderr(),
            "zfs-helper [{level}] {}",
            record.args()
        );
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

static LOGGER: StderrLogger = StderrLogger;

/// Install the stderr sink as the global `log` backend. Safe to call more
/// than once; later calls are no-ops.
pub fn init() {
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(log::LevelFilter::Info);
}

/// Build the space-separated `key=value` tail of a structured log line.
/// Values are passed through as given — callers sanitize free-text fields
/// (e.g. `info`) themselves via `sanitize_value` before handing them here.
pub fn kv(pairs: &[(&str, &str)]) -> String {
    pairs
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Truncate a free-text value to 200 characters and replace spaces with
/// underscores, matching the log-line hygiene rule this daemon inherited
/// from its predecessor (SPEC_FULL §D) — distinct from the untouched `info`
/// field on the wire reply. Only the `info` pair gets this treatment;
/// structured fields like `status` and `peer_uid` are already well-formed.
pub fn sanitize_value(value: &str) -> String {
    let truncated: String = value.chars().take(200).collect();
    truncated.replace(' ', "_")
}

/// Emit one connection-outcome log line tagged `ALLOW`, `DENY`, or `ERROR`
/// (§4.8), at the level the status taxonomy maps to.
pub fn log_outcome(level: &str, message: &str, pairs: &[(&str, &str)]) {
    let tail = kv(pairs);
    let line = if tail.is_empty() {
        message.to_string()
    } else {
        format!("{message} {tail}")
    };
    match level {
        "ALLOW" => log::info!("{line}"),
        "DENY" => log::warn!("{line}"),
        "ERROR" => log::error!("{line}"),
        _ => log::info!("{line}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_truncates_and_replaces_spaces() {
        let long = "a".repeat(250);
        assert_eq!(sanitize_value(&long).len(), 200);
        assert_eq!(sanitize_value("hello world"), "hello_world");
    }

    #[test]
    fn kv_joins_pairs_with_spaces() {
        assert_eq!(
            kv(&[("status", "OK"), ("user", "alice")]),
            "status=OK user=alice"
        );
    }

    #[test]
    fn kv_does_not_sanitize_unsanitized_values() {
        assert_eq!(
            kv(&[("unit", "app-foo bar.service")]),
            "unit=app-foo bar.service"
        );
    }
}
