//! `zfs-helper`: a privileged broker that lets per-user services invoke a
//! constrained set of ZFS operations over a local socket (see the binaries
//! in `src/main.rs` and `src/bin/apply-delegation.rs`).

pub mod config;
pub mod dataset;
pub mod delegation;
pub mod dispatch;
pub mod glob;
pub mod logging;
pub mod ownership;
pub mod peer;
pub mod platform;
pub mod policy;
pub mod request;
pub mod server;
pub mod tool;
