//! Action dispatcher (§4.7): one handler per action, each composing
//! syntactic validation, policy check, tool invocation, and (where called
//! for) ownership fixup.

use crate::config::Config;
use crate::dataset::{is_valid_dataset, is_valid_snapshot, split_snapshot};
use crate::ownership;
use crate::policy::{Policy, PROP_KEY_ALLOW};
use crate::request::{Action, Reply, Status};
use crate::tool::{self, ToolResult};

/// Everything a handler needs about the caller, beyond the policy itself.
pub struct Caller<'a> {
    pub username: &'a str,
    pub uid: u32,
}

fn tool_reply(result: ToolResult) -> Reply {
    if result.success {
        Reply::new(Status::Ok, result.info)
    } else {
        Reply::new(Status::Error, result.info)
    }
}

/// Dispatch one parsed action. `action_name` is only used for the
/// `BAD_ACTION` case (the name didn't map to a recognised `Action`
/// variant).
pub fn dispatch(
    config: &Config,
    policy: &Policy,
    caller: &Caller,
    action_name: &str,
    action: Action,
) -> Reply {
    match action {
        Action::Mount { dataset } => handle_mount(config, policy, caller, &dataset),
        Action::Unmount { dataset } => handle_unmount(config, policy, caller, &dataset),
        Action::Snapshot { target, recursive } => {
            handle_snapshot(config, policy, caller, &target, recursive)
        }
        Action::Rollback {
            snapshot,
            recursive,
            force,
        } => handle_rollback(config, policy, caller, &snapshot, recursive, force),
        Action::Create { dataset, props } => handle_create(config, policy, caller, &dataset, &props),
        Action::Destroy {
            target,
            recursive,
            force,
        } => handle_destroy(config, policy, caller, &target, recursive, force),
        Action::Rename { src, dst } => handle_rename(config, policy, caller, &src, &dst),
        Action::Setprop { dataset, key, value } => {
            handle_setprop(config, policy, caller, &dataset, &key, &value)
        }
        Action::Share { dataset } => handle_share(config, policy, caller, &dataset),
        Action::Unknown => {
            let _ = action_name;
            Reply::new(Status::BadAction, format!("unknown action: {action_name}"))
        }
    }
}

fn handle_mount(config: &Config, policy: &Policy, caller: &Caller, dataset: &str) -> Reply {
    if !is_valid_dataset(dataset) {
        return Reply::new(Status::InvalidDataset, dataset.to_string());
    }
    if !policy.dataset_allowed("mount", caller.username, dataset) {
        return Reply::new(Status::DenyPolicy, dataset.to_string());
    }
    tool_reply(tool::run(&config.zfs_bin, "mount", &[dataset]))
}

fn handle_unmount(config: &Config, policy: &Policy, caller: &Caller, dataset: &str) -> Reply {
    if !is_valid_dataset(dataset) {
        return Reply::new(Status::InvalidDataset, dataset.to_string());
    }
    let allowed = if !policy.rules_for("unmount").is_empty() {
        policy.dataset_allowed("unmount", caller.username, dataset)
    } else {
        policy.dataset_allowed("mount", caller.username, dataset)
    };
    if !allowed {
        return Reply::new(Status::DenyPolicy, dataset.to_string());
    }
    tool_reply(tool::run(&config.zfs_bin, "umount", &[dataset]))
}

fn handle_snapshot(
    config: &Config,
    policy: &Policy,
    caller: &Caller,
    target: &str,
    recursive: bool,
) -> Reply {
    if !is_valid_snapshot(target) {
        return Reply::new(Status::InvalidSnapshot, target.to_string());
    }
    let (dataset, snap_name) = split_snapshot(target).expect("validated above");
    if !policy.dataset_allowed("snapshot", caller.username, dataset) {
        return Reply::new(Status::DenyPolicy, target.to_string());
    }
    let args: Vec<&str> = if recursive {
        vec!["-r", target]
    } else {
        vec![target]
    };
    let result = tool::run(&config.zfs_bin, "snapshot", &args);
    if result.success {
        ownership::reconcile_snapshot(&config.zfs_bin, dataset, snap_name, recursive, caller.uid);
    }
    tool_reply(result)
}

fn handle_rollback(
    config: &Config,
    policy: &Policy,
    caller: &Caller,
    snapshot: &str,
    recursive: bool,
    force: bool,
) -> Reply {
    if !is_valid_snapshot(snapshot) {
        return Reply::new(Status::InvalidSnapshot, snapshot.to_string());
    }
    let (dataset, _) = split_snapshot(snapshot).expect("validated above");
    if !policy.dataset_allowed("rollback", caller.username, dataset) {
        return Reply::new(Status::DenyPolicy, snapshot.to_string());
    }
    let mut args = Vec::new();
    if force {
        args.push("-f");
    }
    if recursive {
        args.push("-r");
    }
    args.push(snapshot);
    tool_reply(tool::run(&config.zfs_bin, "rollback", &args))
}

fn handle_create(
    config: &Config,
    policy: &Policy,
    caller: &Caller,
    dataset: &str,
    props: &[(String, String)],
) -> Reply {
    if !is_valid_dataset(dataset) {
        return Reply::new(Status::InvalidDataset, dataset.to_string());
    }
    if !policy.dataset_allowed("create", caller.username, dataset) {
        return Reply::new(Status::DenyPolicy, dataset.to_string());
    }
    let mut prop_args = Vec::new();
    let mut owned = Vec::new();
    for (key, value) in props {
        owned.push(format!("{key}={value}"));
    }
    for entry in &owned {
        prop_args.push("-o");
        prop_args.push(entry.as_str());
    }
    prop_args.push(dataset);
    let result = tool::run(&config.zfs_bin, "create", &prop_args);
    if result.success {
        ownership::reconcile_dataset(&config.zfs_bin, dataset, caller.uid);
    }
    tool_reply(result)
}

fn handle_destroy(
    config: &Config,
    policy: &Policy,
    caller: &Caller,
    target: &str,
    recursive: bool,
    force: bool,
) -> Reply {
    let base = if let Some((dataset, _)) = split_snapshot(target) {
        if !is_valid_snapshot(target) {
            return Reply::new(Status::InvalidTarget, target.to_string());
        }
        dataset
    } else if is_valid_dataset(target) {
        target
    } else {
        return Reply::new(Status::InvalidTarget, target.to_string());
    };
    if !policy.dataset_allowed("destroy", caller.username, base) {
        return Reply::new(Status::DenyPolicy, target.to_string());
    }
    let mut args = Vec::new();
    if force {
        args.push("-f");
    }
    if recursive {
        args.push("-r");
    }
    args.push(target);
    tool_reply(tool::run(&config.zfs_bin, "destroy", &args))
}

fn handle_rename(config: &Config, policy: &Policy, caller: &Caller, src: &str, dst: &str) -> Reply {
    if !is_valid_dataset(src) {
        return Reply::new(Status::InvalidDataset, src.to_string());
    }
    if !is_valid_dataset(dst) {
        return Reply::new(Status::InvalidDataset, dst.to_string());
    }
    if !policy.dataset_allowed("rename_from", caller.username, src) {
        return Reply::new(Status::DenyPolicySrc, src.to_string());
    }
    if !policy.dataset_allowed("rename_to", caller.username, dst) {
        return Reply::new(Status::DenyPolicyDst, dst.to_string());
    }
    let result = tool::run(&config.zfs_bin, "rename", &[src, dst]);
    if result.success {
        ownership::reconcile_tree(&config.zfs_bin, dst, caller.uid);
    }
    tool_reply(result)
}

fn handle_setprop(
    config: &Config,
    policy: &Policy,
    caller: &Caller,
    dataset: &str,
    key: &str,
    value: &str,
) -> Reply {
    if !is_valid_dataset(dataset) {
        return Reply::new(Status::InvalidDataset, dataset.to_string());
    }
    if !PROP_KEY_ALLOW.contains(&key) {
        return Reply::new(Status::DenyPropKey, key.to_string());
    }
    if !policy.dataset_allowed("setprop", caller.username, dataset) {
        return Reply::new(Status::DenyPolicy, dataset.to_string());
    }
    let admitted = if !policy.setprop_values.is_empty() {
        policy.prop_value_allowed_by_rules(key, value)
    } else {
        builtin_value_allowed(key, value)
    };
    if !admitted {
        return Reply::new(Status::DenyPropValue, format!("{key}={value}"));
    }
    let assignment = format!("{key}={value}");
    tool_reply(tool::run(&config.zfs_bin, "set", &[&assignment, dataset]))
}

fn builtin_value_allowed(key: &str, value: &str) -> bool {
    match key {
        "canmount" => matches!(value, "on" | "off" | "noauto"),
        "mountpoint" => value.starts_with('/') && !value.contains(' '),
        "sharenfs" => matches!(value, "on" | "off"),
        _ => false,
    }
}

fn handle_share(config: &Config, policy: &Policy, caller: &Caller, dataset: &str) -> Reply {
    if !is_valid_dataset(dataset) {
        return Reply::new(Status::InvalidDataset, dataset.to_string());
    }
    if !policy.dataset_allowed("share", caller.username, dataset) {
        return Reply::new(Status::DenyPolicy, dataset.to_string());
    }
    tool_reply(tool::run(&config.zfs_bin, "share", &[dataset]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::DatasetRule;
    use std::collections::HashMap;

    fn caller() -> Caller<'static> {
        Caller {
            username: "alice",
            uid: 1000,
        }
    }

    fn config() -> Config {
        Config {
            zfs_bin: "/bin/true".to_string(),
            ..Config::defaults()
        }
    }

    fn policy_allowing(action: &str, pattern: &str) -> Policy {
        let mut rules = HashMap::new();
        rules.insert(
            action.to_string(),
            vec![DatasetRule {
                actor: "alice".to_string(),
                pattern: pattern.to_string(),
            }],
        );
        Policy {
            units: vec!["*.service".to_string()],
            rules,
            setprop_values: Vec::new(),
        }
    }

    #[test]
    fn mount_rejects_invalid_dataset_before_policy() {
        let policy = Policy::default();
        let reply = handle_mount(&config(), &policy, &caller(), "/bad//name");
        assert_eq!(reply.status, "INVALID_DATASET");
    }

    #[test]
    fn mount_denies_without_matching_rule() {
        let policy = Policy::default();
        let reply = handle_mount(&config(), &policy, &caller(), "tank/home/bob");
        assert_eq!(reply.status, "DENY_POLICY");
    }

    #[test]
    fn mount_allows_with_matching_glob() {
        let policy = policy_allowing("mount", "tank/home/alice/**");
        let reply = handle_mount(&config(), &policy, &caller(), "tank/home/alice/docs");
        assert_eq!(reply.status, "OK");
    }

    #[test]
    fn unmount_falls_back_to_mount_rules_when_unmount_empty() {
        let policy = policy_allowing("mount", "tank/home/alice/**");
        let reply = handle_unmount(&config(), &policy, &caller(), "tank/home/alice/docs");
        assert_eq!(reply.status, "OK");
    }

    #[test]
    fn rename_reports_distinct_deny_codes() {
        let mut rules = HashMap::new();
        rules.insert(
            "rename_to".to_string(),
            vec![DatasetRule {
                actor: "alice".to_string(),
                pattern: "tank/home/alice/**".to_string(),
            }],
        );
        let policy = Policy {
            units: vec![],
            rules,
            setprop_values: vec![],
        };
        let reply = handle_rename(
            &config(),
            &policy,
            &caller(),
            "tank/home/alice/a",
            "tank/other/x",
        );
        assert_eq!(reply.status, "DENY_POLICY_SRC");
    }

    #[test]
    fn setprop_builtin_validator_rejects_bad_canmount_value() {
        let policy = policy_allowing("setprop", "tank/home/alice");
        let reply = handle_setprop(
            &config(),
            &policy,
            &caller(),
            "tank/home/alice",
            "canmount",
            "yes",
        );
        assert_eq!(reply.status, "DENY_PROP_VALUE");
    }

    #[test]
    fn setprop_rejects_unrecognised_key() {
        let policy = policy_allowing("setprop", "tank/home/alice");
        let reply = handle_setprop(
            &config(),
            &policy,
            &caller(),
            "tank/home/alice",
            "quota",
            "10G",
        );
        assert_eq!(reply.status, "DENY_PROP_KEY");
    }

    #[test]
    fn destroy_accepts_snapshot_or_dataset_form() {
        let policy = policy_allowing("destroy", "tank/home/alice/**");
        let snap = handle_destroy(
            &config(),
            &policy,
            &caller(),
            "tank/home/alice/x@daily",
            false,
            false,
        );
        assert_eq!(snap.status, "OK");
        let ds = handle_destroy(&config(), &policy, &caller(), "tank/home/alice/x", false, false);
        assert_eq!(ds.status, "OK");
    }

    #[test]
    fn unknown_action_yields_bad_action() {
        let policy = Policy::default();
        let reply = dispatch(&config(), &policy, &caller(), "frobnicate", Action::Unknown);
        assert_eq!(reply.status, "BAD_ACTION");
    }
}
