//! Per-user policy: on-disk schema (§6), in-memory record, and the
//! line-oriented loader (§4.2). Nothing here is cached — `load_policy` is
//! meant to be called fresh on every request (§9 "Policy re-load semantics").

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::glob::{dataset_glob_match, shell_glob_match};

/// Action keys a dataset-rule list is stored under (§3).
pub const ACTION_KEYS: &[&str] = &[
    "mount",
    "unmount",
    "snapshot",
    "rollback",
    "create",
    "destroy",
    "rename_from",
    "rename_to",
    "setprop",
    "share",
];

/// Recognised `setprop` keys — the closed set from §3.
pub const PROP_KEY_ALLOW: &[&str] = &["mountpoint", "canmount", "sharenfs"];

/// One `(actor, pattern)` line from a dataset-rule list file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetRule {
    pub actor: String,
    pub pattern: String,
}

impl DatasetRule {
    fn allows(&self, user: &str, target: &str) -> bool {
        (self.actor == user || self.actor == "*") && dataset_glob_match(&self.pattern, target)
    }
}

/// A parsed `key=value-glob` or `key:mountpoint-glob` line from
/// `setprop.values.list`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropValueRule {
    /// `key=value-glob`
    ValueGlob { key: String, value_glob: String },
    /// `key:mountpoint-glob` — only meaningful for `key == "mountpoint"`.
    PathGlob { key: String, path_glob: String },
}

impl PropValueRule {
    fn key(&self) -> &str {
        match self {
            PropValueRule::ValueGlob { key, .. } => key,
            PropValueRule::PathGlob { key, .. } => key,
        }
    }

    fn admits(&self, key: &str, value: &str) -> bool {
        if self.key() != key {
            return false;
        }
        match self {
            PropValueRule::ValueGlob { value_glob, .. } => shell_glob_match(value_glob, value),
            PropValueRule::PathGlob { path_glob, .. } => {
                key == "mountpoint" && shell_glob_match(path_glob, value)
            }
        }
    }
}

/// One user's full policy record (§3).
#[derive(Debug, Clone, Default)]
pub struct Policy {
    pub units: Vec<String>,
    pub rules: HashMap<String, Vec<DatasetRule>>,
    pub setprop_values: Vec<PropValueRule>,
}

impl Policy {
    /// Rules registered under `action`, or an empty slice if none.
    pub fn rules_for(&self, action: &str) -> &[DatasetRule] {
        self.rules.get(action).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Whether any rule under `action` admits `(user, target)`.
    pub fn dataset_allowed(&self, action: &str, user: &str, target: &str) -> bool {
        self.rules_for(action)
            .iter()
            .any(|rule| rule.allows(user, target))
    }

    /// Whether `unit` matches at least one shell-glob entry in `units`.
    pub fn unit_allowed(&self, unit: &str) -> bool {
        !self.units.is_empty()
            && self
                .units
                .iter()
                .any(|pat| shell_glob_match(pat, unit))
    }

    /// Whether any `setprop.values` rule admits `(key, value)`.
    pub fn prop_value_allowed_by_rules(&self, key: &str, value: &str) -> bool {
        self.setprop_values.iter().any(|r| r.admits(key, value))
    }
}

/// Load newline-delimited name-only entries (`units.list` and friends),
/// skipping blanks and `#` comments. A missing file is an empty list.
fn load_lines(path: &Path) -> Vec<String> {
    let Ok(contents) = fs::read_to_string(path) else {
        return Vec::new();
    };
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

/// Load `(actor, pattern)` pairs from a dataset-rule list file. Invalid
/// lines are warned about and skipped rather than aborting the load.
fn load_dataset_rules(path: &Path) -> Vec<DatasetRule> {
    let Ok(contents) = fs::read_to_string(path) else {
        return Vec::new();
    };
    let mut entries = Vec::new();
    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match line.split_once(char::is_whitespace) {
            Some((actor, rest)) if !actor.is_empty() && !rest.trim().is_empty() => {
                entries.push(DatasetRule {
                    actor: actor.to_string(),
                    pattern: rest.trim().to_string(),
                });
            }
            _ => {
                log::warn!(
                    "invalid dataset policy entry path={} entry={}",
                    path.display(),
                    line
                );
            }
        }
    }
    entries
}

/// Parse `setprop.values.list` lines into property-value rules. A line with
/// `:` and no `=` is a mountpoint path-glob rule; a line with `=` is a
/// value-glob rule. Lines matching neither are silently ignored (they
/// cannot express a recognised rule shape).
pub fn parse_setprop_values(lines: &[String]) -> Vec<PropValueRule> {
    let mut rules = Vec::new();
    for line in lines {
        if let Some((key, glob)) = line.split_once(':') {
            if !line.contains('=') {
                rules.push(PropValueRule::PathGlob {
                    key: key.trim().to_string(),
                    path_glob: glob.trim().to_string(),
                });
                continue;
            }
        }
        if let Some((key, value)) = line.split_once('=') {
            rules.push(PropValueRule::ValueGlob {
                key: key.trim().to_string(),
                value_glob: value.trim().to_string(),
            });
        }
    }
    rules
}

/// Load the full policy for `user` from `<policy_root>/<user>/...`.
pub fn load_policy(policy_root: &Path, user: &str) -> Policy {
    let base = policy_root.join(user);
    let mut rules = HashMap::new();
    for &key in ACTION_KEYS {
        let file = match key {
            "rename_from" => "rename.from.list".to_string(),
            "rename_to" => "rename.to.list".to_string(),
            other => format!("{other}.list"),
        };
        rules.insert(key.to_string(), load_dataset_rules(&base.join(file)));
    }
    let setprop_value_lines = load_lines(&base.join("setprop.values.list"));
    Policy {
        units: load_lines(&base.join("units.list")),
        rules,
        setprop_values: parse_setprop_values(&setprop_value_lines),
    }
}

/// The directory holding one user's policy files, for callers (e.g. the
/// delegation reconciler) that need to enumerate users on disk.
pub fn user_policy_dir(policy_root: &Path, user: &str) -> PathBuf {
    policy_root.join(user)
}
