//! Exercises the action dispatcher against a scratch policy tree and a
//! fake `zfs` binary (a shell script) — no real socket, root, or ZFS pool
//! involved.

use std::fs;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;

use zfs_helper::config::Config;
use zfs_helper::dispatch::{dispatch, Caller};
use zfs_helper::policy::load_policy;
use zfs_helper::request::parse_request;

/// Write a shell script standing in for `zfs` that always succeeds and
/// echoes its arguments, so dispatcher tests can assert on command shape
/// without touching a real pool.
fn fake_zfs_bin(dir: &std::path::Path, script: &str) -> String {
    let path = dir.join("fake-zfs");
    let mut file = fs::File::create(&path).unwrap();
    writeln!(file, "#!/bin/sh\n{script}").unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path.to_string_lossy().into_owned()
}

fn write_policy(root: &std::path::Path, user: &str, file: &str, contents: &str) {
    let dir = root.join(user);
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join(file), contents).unwrap();
}

#[test]
fn mount_allowed_by_policy_succeeds() {
    let policy_root = tempfile::tempdir().unwrap();
    let bin_dir = tempfile::tempdir().unwrap();
    write_policy(
        policy_root.path(),
        "alice",
        "mount.list",
        "alice tank/home/alice/**\n",
    );

    let config = Config {
        zfs_bin: fake_zfs_bin(bin_dir.path(), "echo ok"),
        ..Config::defaults()
    };
    let policy = load_policy(policy_root.path(), "alice");
    let caller = Caller {
        username: "alice",
        uid: 1000,
    };

    let (action_name, action) =
        parse_request(br#"{"action":"mount","dataset":"tank/home/alice/docs"}"#).unwrap();
    let reply = dispatch(&config, &policy, &caller, &action_name, action);

    assert_eq!(reply.status, "OK");
    assert_eq!(reply.info, "ok");
}

#[test]
fn mount_denied_outside_policy_glob() {
    let policy_root = tempfile::tempdir().unwrap();
    let bin_dir = tempfile::tempdir().unwrap();
    write_policy(
        policy_root.path(),
        "alice",
        "mount.list",
        "alice tank/home/alice/**\n",
    );

    let config = Config {
        zfs_bin: fake_zfs_bin(bin_dir.path(), "echo should-not-run"),
        ..Config::defaults()
    };
    let policy = load_policy(policy_root.path(), "alice");
    let caller = Caller {
        username: "alice",
        uid: 1000,
    };

    let (action_name, action) =
        parse_request(br#"{"action":"mount","dataset":"tank/home/bob"}"#).unwrap();
    let reply = dispatch(&config, &policy, &caller, &action_name, action);

    assert_eq!(reply.status, "DENY_POLICY");
}

#[test]
fn invalid_dataset_is_rejected_before_tool_invocation() {
    let policy_root = tempfile::tempdir().unwrap();
    let bin_dir = tempfile::tempdir().unwrap();

    let config = Config {
        zfs_bin: fake_zfs_bin(bin_dir.path(), "echo should-not-run"),
        ..Config::defaults()
    };
    let policy = load_policy(policy_root.path(), "alice");
    let caller = Caller {
        username: "alice",
        uid: 1000,
    };

    let (action_name, action) =
        parse_request(br#"{"action":"mount","dataset":"tank//home"}"#).unwrap();
    let reply = dispatch(&config, &policy, &caller, &action_name, action);

    assert_eq!(reply.status, "INVALID_DATASET");
}

#[test]
fn setprop_without_value_rules_uses_builtin_validator() {
    let policy_root = tempfile::tempdir().unwrap();
    let bin_dir = tempfile::tempdir().unwrap();
    write_policy(
        policy_root.path(),
        "alice",
        "setprop.list",
        "alice tank/home/alice\n",
    );

    let config = Config {
        zfs_bin: fake_zfs_bin(bin_dir.path(), "echo ok"),
        ..Config::defaults()
    };
    let policy = load_policy(policy_root.path(), "alice");
    let caller = Caller {
        username: "alice",
        uid: 1000,
    };

    let (action_name, action) = parse_request(
        br#"{"action":"setprop","dataset":"tank/home/alice","key":"canmount","value":"noauto"}"#,
    )
    .unwrap();
    let reply = dispatch(&config, &policy, &caller, &action_name, action);
    assert_eq!(reply.status, "OK");

    let (action_name, action) = parse_request(
        br#"{"action":"setprop","dataset":"tank/home/alice","key":"canmount","value":"yes"}"#,
    )
    .unwrap();
    let reply = dispatch(&config, &policy, &caller, &action_name, action);
    assert_eq!(reply.status, "DENY_PROP_VALUE");
}

#[test]
fn rename_reports_distinct_src_and_dst_deny_codes() {
    let policy_root = tempfile::tempdir().unwrap();
    let bin_dir = tempfile::tempdir().unwrap();
    write_policy(
        policy_root.path(),
        "alice",
        "rename.to.list",
        "alice tank/home/alice/**\n",
    );

    let config = Config {
        zfs_bin: fake_zfs_bin(bin_dir.path(), "echo ok"),
        ..Config::defaults()
    };
    let policy = load_policy(policy_root.path(), "alice");
    let caller = Caller {
        username: "alice",
        uid: 1000,
    };

    let (action_name, action) = parse_request(
        br#"{"action":"rename","src":"tank/home/alice/a","dst":"tank/other/x"}"#,
    )
    .unwrap();
    let reply = dispatch(&config, &policy, &caller, &action_name, action);
    assert_eq!(reply.status, "DENY_POLICY_DST");

    let (action_name, action) = parse_request(
        br#"{"action":"rename","src":"tank/other/x","dst":"tank/home/alice/a"}"#,
    )
    .unwrap();
    let reply = dispatch(&config, &policy, &caller, &action_name, action);
    assert_eq!(reply.status, "DENY_POLICY_SRC");
}
