//! Linux cgroup-v2 membership check for a peer process (§4.3, §9).
//!
//! This is intentionally narrow and pluggable: `user_service_unit` is the
//! single implementation of `(pid, uid) -> Option<UnitName>` the daemon
//! uses today; a non-Linux or non-systemd host would need a different one
//! behind the same signature.

use std::fs;
use std::path::PathBuf;

/// Read `/proc/<pid>/cgroup` and, if `pid` belongs to `uid`'s systemd user
/// service tree, return the `<unit>.service` name.
///
/// Looks for the hierarchy-id-`0` (unified) line and requires its path to
/// contain `/user.slice/user-<uid>.slice/user@<uid>.service/app.slice/`,
/// then extracts the segment up to the next `.service`.
pub fn user_service_unit(pid: i32, uid: u32) -> Option<String> {
    user_service_unit_from_path(&proc_cgroup_path(pid), uid)
}

fn proc_cgroup_path(pid: i32) -> PathBuf {
    PathBuf::from(format!("/proc/{pid}/cgroup"))
}

fn user_service_unit_from_path(path: &std::path::Path, uid: u32) -> Option<String> {
    let contents = fs::read_to_string(path).ok()?;
    user_service_unit_from_contents(&contents, uid)
}

fn user_service_unit_from_contents(contents: &str, uid: u32) -> Option<String> {
    let cgroup_path = contents
        .lines()
        .find_map(|line| {
            let mut parts = line.splitn(3, ':');
            let hierarchy = parts.next()?;
            let _controllers = parts.next()?;
            let path = parts.next()?;
            (hierarchy == "0").then_some(path)
        })?;

    let wanted = format!("/user.slice/user-{uid}.slice/user@{uid}.service/app.slice/");
    if !cgroup_path.contains(&wanted) {
        return None;
    }

    let after_app_slice = cgroup_path.split("/app.slice/").nth(1)?;
    let segment = after_app_slice.split(".service").next()?;
    if segment.is_empty() {
        return None;
    }
    Some(format!("{segment}.service"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_unit_from_unified_hierarchy_line() {
        let contents = "0::/user.slice/user-1000.slice/user@1000.service/app.slice/app-myshell.service\n";
        assert_eq!(
            user_service_unit_from_contents(contents, 1000),
            Some("app-myshell.service".to_string())
        );
    }

    #[test]
    fn rejects_path_for_a_different_uid() {
        let contents = "0::/user.slice/user-1000.slice/user@1000.service/app.slice/app-myshell.service\n";
        assert_eq!(user_service_unit_from_contents(contents, 1001), None);
    }

    #[test]
    fn ignores_non_unified_hierarchy_lines() {
        let contents = "1:name=systemd:/user.slice/user-1000.slice/user@1000.service/app.slice/app-myshell.service\n";
        assert_eq!(user_service_unit_from_contents(contents, 1000), None);
    }

    #[test]
    fn rejects_paths_outside_app_slice() {
        let contents = "0::/system.slice/sshd.service\n";
        assert_eq!(user_service_unit_from_contents(contents, 1000), None);
    }

    #[test]
    fn truncates_at_first_dot_service_after_app_slice() {
        let contents =
            "0::/user.slice/user-1000.slice/user@1000.service/app.slice/foo.service/extra\n";
        assert_eq!(
            user_service_unit_from_contents(contents, 1000),
            Some("foo.service".to_string())
        );
    }
}
