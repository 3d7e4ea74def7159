//! Delegation reconciler CLI (§4.9, §6): diffs the policy-implied set of
//! native ZFS delegated permissions against live state and applies (or, in
//! `--dry-run`, just prints) the difference.

use clap::Parser;

use zfs_helper::config::{Config, DEFAULT_POLICY_ROOT, DEFAULT_ZFS_BIN};
use zfs_helper::delegation;
use zfs_helper::logging;

/// Synchronize ZFS delegated permissions with zfs-helper policy.
#[derive(Parser, Debug)]
#[command(name = "apply-delegation")]
struct Args {
    /// Path to zfs binary.
    #[arg(long, default_value = DEFAULT_ZFS_BIN)]
    zfs_bin: String,

    /// Preview changes without executing zfs allow/unallow.
    #[arg(long)]
    dry_run: bool,

    /// Root directory of the per-user policy tree.
    #[arg(long, default_value = DEFAULT_POLICY_ROOT)]
    policy_root: String,
}

fn main() {
    logging::init();
    let args = Args::parse();
    let config = Config {
        zfs_bin: args.zfs_bin,
        policy_root: args.policy_root.into(),
        ..Config::defaults()
    };

    let datasets = match delegation::list_datasets(&config.zfs_bin) {
        Ok(d) => d,
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(1);
        }
    };

    let desired = delegation::build_desired_state(&config.policy_root, &datasets);
    let changes = delegation::plan_changes(&config.zfs_bin, &desired);
    for change in &changes {
        delegation::apply_change(&config.zfs_bin, change, args.dry_run);
    }
}
