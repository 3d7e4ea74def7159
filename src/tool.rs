//! Invoking the real `zfs` binary (§4.5), grounded in the
//! `Command::new(...).output()` style this corpus uses for `mount`/`umount`
//! wrapping rather than anything more elaborate.

use std::process::Command;

/// Outcome of running one `zfs` subcommand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolResult {
    pub success: bool,
    pub info: String,
}

/// Invokes `zfs_bin` with `args`, capturing stdout/stderr and mapping the
/// process result to the broker's `{success, info}` shape:
///
/// - exit 0: success, `info` is trimmed stdout
/// - nonzero exit: failure, `info` is trimmed stderr, or `rc=<n>` if stderr
///   is empty
/// - the binary could not even be spawned: failure, `info` is the spawn
///   error, as if the process had exited with status 127
pub fn run_zfs(zfs_bin: &str, args: &[&str]) -> ToolResult {
    match Command::new(zfs_bin).args(args).output() {
        Ok(output) => {
            if output.status.success() {
                ToolResult {
                    success: true,
                    info: String::from_utf8_lossy(&output.stdout).trim().to_string(),
                }
            } else {
                let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
                let info = if stderr.is_empty() {
                    format!("rc={}", output.status.code().unwrap_or(-1))
                } else {
                    stderr
                };
                ToolResult {
                    success: false,
                    info,
                }
            }
        }
        Err(err) => ToolResult {
            success: false,
            info: format!("failed to spawn {zfs_bin}: {err}"),
        },
    }
}

/// Run `zfs <subcommand> <args...>` with a single leading subcommand word,
/// the shape nearly every call site needs.
pub fn run(zfs_bin: &str, subcommand: &str, args: &[&str]) -> ToolResult {
    let mut full = Vec::with_capacity(args.len() + 1);
    full.push(subcommand);
    full.extend_from_slice(args);
    run_zfs(zfs_bin, &full)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_captures_trimmed_stdout() {
        let result = run_zfs("/bin/echo", &["hello"]);
        assert!(result.success);
        assert_eq!(result.info, "hello");
    }

    #[test]
    fn nonzero_exit_captures_trimmed_stderr() {
        let result = run_zfs("/bin/sh", &["-c", "echo boom 1>&2; exit 3"]);
        assert!(!result.success);
        assert_eq!(result.info, "boom");
    }

    #[test]
    fn nonzero_exit_with_empty_stderr_falls_back_to_rc() {
        let result = run_zfs("/bin/sh", &["-c", "exit 5"]);
        assert!(!result.success);
        assert_eq!(result.info, "rc=5");
    }

    #[test]
    fn missing_binary_reports_spawn_failure() {
        let result = run_zfs("/no/such/zfs-binary-zfs-helper-test", &["list"]);
        assert!(!result.success);
        assert!(result.info.contains("failed to spawn"));
    }
}
