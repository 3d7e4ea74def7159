//! Thin, pluggable wrappers around OS facilities the broker core needs:
//! the user/group database (§3 "user/group database", out of scope as a
//! component but needed as a collaborator) and Linux cgroup-v2 inspection
//! (§4.3, explicitly called out in §9 as "pluggable... a single
//! implementation today").

pub mod cgroup;
pub mod users;
