//! Delegation reconciler (§4.9): projects the same policy files the daemon
//! reads into native `zfs allow`/`unallow` delegations, and diffs them
//! against live state so a second run with unchanged inputs is a no-op.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use crate::glob::dataset_glob_match;
use crate::policy::{self, Policy, PROP_KEY_ALLOW};
use crate::tool;

/// `(dataset, user) -> permissions` desired state.
pub type DesiredState = BTreeMap<String, BTreeMap<String, BTreeSet<String>>>;

/// Action keys and the single permission each grants directly on its own
/// dataset (§4.9 step 3, first bullet).
const DIRECT_ACTION_PERMS: &[(&str, &str)] = &[
    ("mount", "mount"),
    ("unmount", "mount"),
    ("snapshot", "snapshot"),
    ("rollback", "rollback"),
    ("destroy", "destroy"),
    ("rename_from", "rename"),
];

/// Parent-expanding actions and the permission they grant on the
/// longest-existing-prefix dataset (§4.9 step 3, third bullet).
const PARENT_ACTION_PERMS: &[(&str, &str)] = &[
    ("create", "create"),
    ("rename_to", "rename"),
    ("share", "share"),
];

/// Every permission name this reconciler manages; anything else found on a
/// live dataset is left untouched (§4.9 step 5).
fn managed_permissions() -> BTreeSet<String> {
    let mut set: BTreeSet<String> = ["mount", "snapshot", "rollback", "create", "destroy", "rename", "share"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    for key in PROP_KEY_ALLOW {
        set.insert(format!("property={key}"));
    }
    set
}

/// List all filesystems and volumes (not snapshots), name-only.
pub fn list_datasets(zfs_bin: &str) -> Result<Vec<String>, String> {
    let result = tool::run(
        zfs_bin,
        "list",
        &["-H", "-o", "name", "-t", "filesystem,volume"],
    );
    if !result.success {
        return Err(format!("zfs list failed: {}", result.info));
    }
    Ok(result
        .info
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect())
}

/// The names of every user directory under the policy root, sorted.
fn list_policy_users(policy_root: &Path) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(policy_root) else {
        return Vec::new();
    };
    let mut users: Vec<String> = entries
        .flatten()
        .filter(|e| e.path().is_dir())
        .filter_map(|e| e.file_name().into_string().ok())
        .collect();
    users.sort();
    users
}

/// Walk `pattern`'s segments left-to-right until a wildcard segment, then
/// shorten that literal prefix until it names an existing dataset
/// (§4.9 step 3, "parent expansion").
fn literal_prefix_dataset(pattern: &str, existing: &BTreeSet<String>) -> Option<String> {
    let mut prefix: Vec<&str> = Vec::new();
    for part in pattern.split('/') {
        if part == "**" || part.contains(['*', '?', '[', ']']) {
            break;
        }
        prefix.push(part);
    }
    while !prefix.is_empty() {
        let candidate = prefix.join("/");
        if existing.contains(&candidate) {
            return Some(candidate);
        }
        prefix.pop();
    }
    None
}

fn expand_pattern_targets(
    pattern: &str,
    datasets: &[String],
    existing: &BTreeSet<String>,
) -> BTreeSet<String> {
    let mut targets: BTreeSet<String> = datasets
        .iter()
        .filter(|ds| dataset_glob_match(pattern, ds))
        .cloned()
        .collect();
    if let Some(prefix) = literal_prefix_dataset(pattern, existing) {
        targets.insert(prefix);
    }
    targets
}

/// Build the full desired `(dataset, user) -> permissions` map from every
/// user's policy (§4.9 step 3).
pub fn build_desired_state(policy_root: &Path, datasets: &[String]) -> DesiredState {
    let dataset_set: BTreeSet<String> = datasets.iter().cloned().collect();
    let mut desired: DesiredState = BTreeMap::new();

    for user in list_policy_users(policy_root) {
        let policy = policy::load_policy(policy_root, &user);

        for &(action, perm) in DIRECT_ACTION_PERMS {
            for dataset in datasets {
                if policy.dataset_allowed(action, &user, dataset) {
                    desired
                        .entry(dataset.clone())
                        .or_default()
                        .entry(user.clone())
                        .or_default()
                        .insert(perm.to_string());
                }
            }
        }

        add_setprop_permissions(&policy, &user, datasets, &mut desired);

        for &(action, perm) in PARENT_ACTION_PERMS {
            for rule in policy.rules_for(action) {
                if rule.actor != user && rule.actor != "*" {
                    continue;
                }
                for target in expand_pattern_targets(&rule.pattern, datasets, &dataset_set) {
                    desired
                        .entry(target)
                        .or_default()
                        .entry(user.clone())
                        .or_default()
                        .insert(perm.to_string());
                }
            }
        }
    }
    desired
}

fn add_setprop_permissions(policy: &Policy, user: &str, datasets: &[String], desired: &mut DesiredState) {
    if policy.rules_for("setprop").is_empty() {
        return;
    }
    let prop_keys: BTreeSet<&str> = if !policy.setprop_values.is_empty() {
        let rule_keys: BTreeSet<&str> = policy
            .setprop_values
            .iter()
            .map(|r| match r {
                crate::policy::PropValueRule::ValueGlob { key, .. } => key.as_str(),
                crate::policy::PropValueRule::PathGlob { key, .. } => key.as_str(),
            })
            .collect();
        let allowed: BTreeSet<&str> = PROP_KEY_ALLOW.iter().copied().collect();
        let intersection: BTreeSet<&str> = rule_keys.intersection(&allowed).copied().collect();
        if intersection.is_empty() {
            allowed
        } else {
            intersection
        }
    } else {
        PROP_KEY_ALLOW.iter().copied().collect()
    };

    for dataset in datasets {
        if policy.dataset_allowed("setprop", user, dataset) {
            for key in &prop_keys {
                desired
                    .entry(dataset.clone())
                    .or_default()
                    .entry(user.to_string())
                    .or_default()
                    .insert(format!("property={key}"));
            }
        }
    }
}

/// Parse `zfs allow -l <dataset>` output into `user -> permissions`
/// (§4.9 step 4): lines beginning with `user `, split into principal and a
/// comma-or-space separated permission list.
pub fn parse_allow_output(output: &str) -> BTreeMap<String, BTreeSet<String>> {
    let mut grants: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for raw in output.lines() {
        let line = raw.trim();
        let Some(rest) = line.strip_prefix("user ") else {
            continue;
        };
        let mut parts = rest.trim_start().splitn(2, char::is_whitespace);
        let Some(principal) = parts.next() else {
            continue;
        };
        let Some(perms_str) = parts.next() else {
            continue;
        };
        let entry = grants.entry(principal.to_string()).or_default();
        for perm in perms_str.replace(',', " ").split_whitespace() {
            if !perm.is_empty() {
                entry.insert(perm.to_string());
            }
        }
    }
    grants
}

fn current_permissions(zfs_bin: &str, dataset: &str) -> BTreeMap<String, BTreeSet<String>> {
    let result = tool::run(zfs_bin, "allow", &["-l", dataset]);
    if !result.success {
        return BTreeMap::new();
    }
    parse_allow_output(&result.info)
}

/// One planned change, for both dry-run printing and execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlannedChange {
    Grant {
        dataset: String,
        user: String,
        perms: Vec<String>,
    },
    Revoke {
        dataset: String,
        user: String,
        perms: Vec<String>,
    },
}

/// Split a permission set into `(regular, property-keys)`, each call site's
/// distinction between a single comma-joined `allow` and one call per
/// `property=<k>` (§4.9's closing paragraph).
fn split_regular_and_properties(perms: &BTreeSet<String>) -> (Vec<String>, Vec<String>) {
    let mut regular: Vec<String> = perms
        .iter()
        .filter(|p| !p.starts_with("property="))
        .cloned()
        .collect();
    let mut properties: Vec<String> = perms
        .iter()
        .filter_map(|p| p.strip_prefix("property=").map(str::to_string))
        .collect();
    regular.sort();
    properties.sort();
    (regular, properties)
}

/// Diff `desired` against live `zfs allow -l` output for every dataset it
/// mentions, returning the add/revoke commands to run (§4.9 step 5).
pub fn plan_changes(zfs_bin: &str, desired: &DesiredState) -> Vec<PlannedChange> {
    let managed = managed_permissions();
    let mut changes = Vec::new();

    for (dataset, users) in desired {
        let mut current = current_permissions(zfs_bin, dataset);

        for (user, perms) in users {
            let current_perms = current.entry(user.clone()).or_default();
            let to_add: BTreeSet<String> = perms.difference(current_perms).cloned().collect();
            let to_remove: BTreeSet<String> = current_perms
                .intersection(&managed)
                .filter(|p| !perms.contains(*p))
                .cloned()
                .collect();

            if !to_add.is_empty() {
                changes.push(PlannedChange::Grant {
                    dataset: dataset.clone(),
                    user: user.clone(),
                    perms: to_add.iter().cloned().collect(),
                });
                current_perms.extend(to_add);
            }
            if !to_remove.is_empty() {
                changes.push(PlannedChange::Revoke {
                    dataset: dataset.clone(),
                    user: user.clone(),
                    perms: to_remove.iter().cloned().collect(),
                });
                for p in &to_remove {
                    current_perms.remove(p);
                }
            }
        }

        for (user, current_perms) in &current {
            if users.contains_key(user) {
                continue;
            }
            let to_remove: BTreeSet<String> = current_perms.intersection(&managed).cloned().collect();
            if !to_remove.is_empty() {
                changes.push(PlannedChange::Revoke {
                    dataset: dataset.clone(),
                    user: user.clone(),
                    perms: to_remove.into_iter().collect(),
                });
            }
        }
    }
    changes
}

/// Execute (or, under `dry_run`, just print) one planned change, issuing
/// the single comma-joined `allow`/`unallow` call for regular permissions
/// and one call per `property=<k>` permission.
pub fn apply_change(zfs_bin: &str, change: &PlannedChange, dry_run: bool) {
    match change {
        PlannedChange::Grant { dataset, user, perms } => {
            let set: BTreeSet<String> = perms.iter().cloned().collect();
            let (regular, properties) = split_regular_and_properties(&set);
            if !regular.is_empty() {
                run_or_print(zfs_bin, "allow", dataset, user, &regular.join(","), dry_run, "grant");
            }
            for prop in properties {
                run_or_print(
                    zfs_bin,
                    "allow",
                    dataset,
                    user,
                    &format!("property={prop}"),
                    dry_run,
                    "grant",
                );
            }
        }
        PlannedChange::Revoke { dataset, user, perms } => {
            let set: BTreeSet<String> = perms.iter().cloned().collect();
            let (regular, properties) = split_regular_and_properties(&set);
            if !regular.is_empty() {
                run_or_print(zfs_bin, "unallow", dataset, user, &regular.join(","), dry_run, "revoke");
            }
            for prop in properties {
                run_or_print(
                    zfs_bin,
                    "unallow",
                    dataset,
                    user,
                    &format!("property={prop}"),
                    dry_run,
                    "revoke",
                );
            }
        }
    }
}

fn run_or_print(
    zfs_bin: &str,
    subcommand: &str,
    dataset: &str,
    user: &str,
    perm_arg: &str,
    dry_run: bool,
    label: &str,
) {
    println!("[{label}] {zfs_bin} {subcommand} -u {user} {perm_arg} {dataset}");
    if dry_run {
        return;
    }
    let result = tool::run(zfs_bin, subcommand, &["-u", user, perm_arg, dataset]);
    if !result.success {
        eprintln!("  ! failed: {}", result.info);
    }
}
