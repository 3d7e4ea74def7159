//! Runtime configuration (SPEC_FULL §C): the hardcoded values this system
//! uses by default, overridable via environment variables so the daemon
//! and `apply-delegation` can be exercised against a scratch policy root
//! and a fake `zfs` binary in tests without touching the real paths.

use std::path::PathBuf;

pub const DEFAULT_SOCKET_PATH: &str = "/run/zfs-helper.sock";
pub const DEFAULT_POLICY_ROOT: &str = "/etc/zfs-helper/policy.d";
pub const DEFAULT_ZFS_BIN: &str = "/usr/sbin/zfs";
pub const DEFAULT_ADMIN_GROUP: &str = "zfshelper";

/// Broker-wide configuration, threaded explicitly rather than read from
/// global state — nothing here survives past one daemon invocation.
#[derive(Debug, Clone)]
pub struct Config {
    pub socket_path: PathBuf,
    pub policy_root: PathBuf,
    pub zfs_bin: String,
    pub admin_group: String,
}

impl Config {
    /// The hardcoded defaults from §6, before environment overrides.
    pub fn defaults() -> Self {
        Config {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            policy_root: PathBuf::from(DEFAULT_POLICY_ROOT),
            zfs_bin: DEFAULT_ZFS_BIN.to_string(),
            admin_group: DEFAULT_ADMIN_GROUP.to_string(),
        }
    }

    /// Apply `ZFS_HELPER_SOCKET`, `ZFS_HELPER_POLICY_ROOT`,
    /// `ZFS_HELPER_ZFS_BIN`, and `ZFS_HELPER_GROUP` overrides on top of the
    /// defaults.
    pub fn from_env() -> Self {
        let mut config = Self::defaults();
        if let Ok(v) = std::env::var("ZFS_HELPER_SOCKET") {
            config.socket_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("ZFS_HELPER_POLICY_ROOT") {
            config.policy_root = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("ZFS_HELPER_ZFS_BIN") {
            config.zfs_bin = v;
        }
        if let Ok(v) = std::env::var("ZFS_HELPER_GROUP") {
            config.admin_group = v;
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_hardcoded_values() {
        let config = Config::defaults();
        assert_eq!(config.socket_path, PathBuf::from("/run/zfs-helper.sock"));
        assert_eq!(config.admin_group, "zfshelper");
    }
}
