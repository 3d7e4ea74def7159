//! Peer credential retrieval (§4.3): read the kernel-supplied `(pid, uid,
//! gid)` for a connected `AF_UNIX` peer. Cgroup-unit resolution and group
//! membership checks live in `server::handle_connection`, since ordering
//! them against the policy load is a dispatch-time decision (see
//! `DESIGN.md`'s "check ordering" note).

use std::os::unix::net::UnixStream;

use nix::sys::socket::{getsockopt, sockopt::PeerCredentials};

/// Credentials the kernel hands us for a connected `AF_UNIX` peer.
#[derive(Debug, Clone, Copy)]
pub struct PeerCreds {
    pub pid: i32,
    pub uid: u32,
    pub gid: u32,
}

/// Read `SO_PEERCRED` for `stream`.
pub fn peer_credentials(stream: &UnixStream) -> std::io::Result<PeerCreds> {
    let cred = getsockopt(stream, PeerCredentials).map_err(std::io::Error::from)?;
    Ok(PeerCreds {
        pid: cred.pid(),
        uid: cred.uid(),
        gid: cred.gid(),
    })
}

