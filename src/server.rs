//! Connection handler and accept loop (§4.8): socket-activation detection,
//! binding, and the per-connection identify/read/dispatch/reply/log cycle.
//!
//! Grounded in this corpus's daemons for the "adopt an activation fd or
//! bind fresh" shape and the single-threaded blocking accept loop with a
//! logged-and-backoff error path (§5).

use std::io::Write;
use std::os::fd::FromRawFd;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::net::{UnixListener, UnixStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::config::Config;
use crate::dispatch::{self, Caller};
use crate::logging;
use crate::peer::{peer_credentials, PeerCreds};
use crate::platform::{cgroup, users};
use crate::policy;
use crate::request::{parse_request, read_bounded, Reply, Status};

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

/// Flip the shutdown flag; installed as the `SIGINT` handler by `main`.
pub extern "C" fn request_shutdown(_signum: libc::c_int) {
    SHUTDOWN.store(true, Ordering::SeqCst);
}

fn shutdown_requested() -> bool {
    SHUTDOWN.load(Ordering::SeqCst)
}

/// Bind the listening socket: adopt fd 3 under `LISTEN_FDS=1`
/// socket-activation, otherwise bind fresh at `config.socket_path` with
/// mode 0660 and the admin group (§4.8, §9 "tautological" open question —
/// implemented as exactly `LISTEN_FDS == 1`).
fn bind_listener(config: &Config) -> std::io::Result<UnixListener> {
    let listen_fds: i32 = std::env::var("LISTEN_FDS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);

    if listen_fds == 1 {
        // SAFETY: fd 3 is the documented socket-activation listening fd
        // handed to us by the supervisor under LISTEN_FDS=1.
        let listener = unsafe { UnixListener::from_raw_fd(3) };
        return Ok(listener);
    }

    if config.socket_path.exists() {
        std::fs::remove_file(&config.socket_path)?;
    }
    let listener = UnixListener::bind(&config.socket_path)?;
    std::fs::set_permissions(&config.socket_path, std::fs::Permissions::from_mode(0o660))?;
    if let Some(group) = users::lookup_group_by_name(&config.admin_group) {
        let path = std::ffi::CString::new(config.socket_path.as_os_str().as_bytes())
            .map_err(|_| std::io::Error::from(std::io::ErrorKind::InvalidInput))?;
        let rc = unsafe { libc::chown(path.as_ptr(), 0, group.gid) };
        if rc != 0 {
            log::warn!(
                "zfs-helper [WARN] failed to adjust socket ownership err={}",
                std::io::Error::last_os_error()
            );
        }
    } else {
        log::warn!("zfs-helper [WARN] admin group not found group={}", config.admin_group);
    }
    Ok(listener)
}

/// Run the accept loop until `SIGINT` flips the shutdown flag.
pub fn run(config: &Config) -> std::io::Result<()> {
    let listener = bind_listener(config)?;
    listener.set_nonblocking(false)?;

    while !shutdown_requested() {
        match listener.accept() {
            Ok((stream, _addr)) => {
                if let Err(err) = handle_connection(config, stream) {
                    log::error!("zfs-helper [ERROR] connection handling failed err={err}");
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(err) => {
                log::error!("zfs-helper [ERROR] accept loop exception err={err}");
                std::thread::sleep(Duration::from_millis(50));
            }
        }
    }
    Ok(())
}

fn send_reply(stream: &mut UnixStream, reply: &Reply) -> std::io::Result<()> {
    stream.write_all(&reply.to_wire())
}

/// Service exactly one connection: identify, (maybe) reject, read+parse,
/// dispatch, reply, log. Mirrors the predecessor's step order precisely,
/// including checking the root uid before reading any request bytes
/// (SPEC_FULL §E.4 — an explicit deviation from the traced original, which
/// read the request first).
fn handle_connection(config: &Config, mut stream: UnixStream) -> std::io::Result<()> {
    let creds: PeerCreds = peer_credentials(&stream)?;
    let username = users::username_for_uid(creds.uid);

    if creds.uid == 0 {
        send_reply(&mut stream, &Reply::new(Status::DenyRoot, ""))?;
        logging::log_outcome(
            "DENY",
            "root caller not allowed",
            &[
                ("peer_pid", creds.pid.to_string().as_str()),
                ("peer_uid", creds.uid.to_string().as_str()),
                ("peer_user", username.as_str()),
            ],
        );
        return Ok(());
    }

    let body = read_bounded(&mut stream)?;
    let parsed = parse_request(&body);
    let Some((action_name, action)) = parsed else {
        send_reply(
            &mut stream,
            &Reply::new(Status::BadRequest, "expect JSON with 'action'"),
        )?;
        logging::log_outcome(
            "DENY",
            "bad request",
            &[
                ("peer_pid", creds.pid.to_string().as_str()),
                ("peer_uid", creds.uid.to_string().as_str()),
                ("peer_user", username.as_str()),
            ],
        );
        return Ok(());
    };

    let Some(unit) = cgroup::user_service_unit(creds.pid, creds.uid) else {
        send_reply(&mut stream, &Reply::new(Status::DenyNotUserService, ""))?;
        logging::log_outcome(
            "DENY",
            "not a user service",
            &[
                ("peer_pid", creds.pid.to_string().as_str()),
                ("peer_uid", creds.uid.to_string().as_str()),
                ("peer_user", username.as_str()),
            ],
        );
        return Ok(());
    };

    let caller_policy = policy::load_policy(&config.policy_root, username.as_str());

    if !caller_policy.unit_allowed(unit.as_str()) {
        send_reply(&mut stream, &Reply::new(Status::DenyUnit, unit.clone()))?;
        logging::log_outcome(
            "DENY",
            "unit not allowed",
            &[
                ("unit", unit.as_str()),
                ("peer_uid", creds.uid.to_string().as_str()),
                ("peer_user", username.as_str()),
            ],
        );
        return Ok(());
    }

    if !users::user_in_group(creds.uid, &config.admin_group) {
        send_reply(&mut stream, &Reply::new(Status::DenyGroup, ""))?;
        logging::log_outcome(
            "DENY",
            "user not in zfshelper group",
            &[
                ("peer_uid", creds.uid.to_string().as_str()),
                ("peer_user", username.as_str()),
                ("unit", unit.as_str()),
            ],
        );
        return Ok(());
    }

    let caller = Caller {
        username: username.as_str(),
        uid: creds.uid,
    };
    let reply = dispatch::dispatch(config, &caller_policy, &caller, &action_name, action);
    send_reply(&mut stream, &reply)?;

    let level = reply_log_level(reply.status.as_str());
    let sanitized_info = logging::sanitize_value(&reply.info);
    logging::log_outcome(
        level,
        &action_name,
        &[
            ("unit", unit.as_str()),
            ("peer_uid", creds.uid.to_string().as_str()),
            ("peer_user", username.as_str()),
            ("status", reply.status.as_str()),
            ("info", sanitized_info.as_str()),
        ],
    );
    Ok(())
}

fn reply_log_level(status: &str) -> &'static str {
    if status == "OK" {
        "ALLOW"
    } else if status.starts_with("DENY") {
        "DENY"
    } else {
        "ERROR"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_log_level_maps_taxonomy_to_tags() {
        assert_eq!(reply_log_level("OK"), "ALLOW");
        assert_eq!(reply_log_level("DENY_POLICY"), "DENY");
        assert_eq!(reply_log_level("ERROR"), "ERROR");
        assert_eq!(reply_log_level("BAD_REQUEST"), "ERROR");
    }
}
