//! User/group database lookups via the reentrant libc calls, grown-buffer
//! style (`getpwuid_r`/`getgrnam_r`), the way this corpus's `sysusers`
//! daemon looks up passwd/group entries rather than going through the
//! legacy non-reentrant `getpwnam`/`getgrnam`.

use std::ffi::{CStr, CString};

/// A resolved passwd(5) entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserEntry {
    pub name: String,
    pub uid: u32,
    pub gid: u32,
}

/// A resolved group(5) entry, including its member list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupEntry {
    pub name: String,
    pub gid: u32,
    pub members: Vec<String>,
}

/// Resolve a uid to its passwd entry, or `None` if there is no such user.
pub fn lookup_user_by_uid(uid: u32) -> Option<UserEntry> {
    let mut buf_size: usize = 1024;
    loop {
        let mut pwd: libc::passwd = unsafe { std::mem::zeroed() };
        let mut buf = vec![0i8; buf_size];
        let mut result: *mut libc::passwd = std::ptr::null_mut();

        let rc =
            unsafe { libc::getpwuid_r(uid, &mut pwd, buf.as_mut_ptr(), buf.len(), &mut result) };

        if result.is_null() {
            if rc == libc::ERANGE {
                buf_size *= 2;
                continue;
            }
            return None;
        }

        let name = unsafe { CStr::from_ptr(pwd.pw_name) }
            .to_string_lossy()
            .into_owned();
        return Some(UserEntry {
            name,
            uid: pwd.pw_uid,
            gid: pwd.pw_gid,
        });
    }
}

/// Resolve a group name to its entry, including supplementary members.
pub fn lookup_group_by_name(name: &str) -> Option<GroupEntry> {
    let c_name = CString::new(name).ok()?;
    let mut buf_size: usize = 1024;
    loop {
        let mut grp: libc::group = unsafe { std::mem::zeroed() };
        let mut buf = vec![0i8; buf_size];
        let mut result: *mut libc::group = std::ptr::null_mut();

        let rc = unsafe {
            libc::getgrnam_r(
                c_name.as_ptr(),
                &mut grp,
                buf.as_mut_ptr(),
                buf.len(),
                &mut result,
            )
        };

        if result.is_null() {
            if rc == libc::ERANGE {
                buf_size *= 2;
                continue;
            }
            return None;
        }

        let gid = grp.gr_gid;
        let mut members = Vec::new();
        if !grp.gr_mem.is_null() {
            let mut i = 0isize;
            loop {
                let entry = unsafe { *grp.gr_mem.offset(i) };
                if entry.is_null() {
                    break;
                }
                members.push(unsafe { CStr::from_ptr(entry) }.to_string_lossy().into_owned());
                i += 1;
            }
        }
        return Some(GroupEntry {
            name: name.to_string(),
            gid,
            members,
        });
    }
}

/// Whether `uid` belongs to `group_name`, as a primary or supplementary
/// member (§4.3).
pub fn user_in_group(uid: u32, group_name: &str) -> bool {
    let Some(user) = lookup_user_by_uid(uid) else {
        return false;
    };
    let Some(group) = lookup_group_by_name(group_name) else {
        return false;
    };
    user.gid == group.gid || group.members.iter().any(|m| m == &user.name)
}

/// Username for a uid, falling back to `uid<N>` when there is no passwd
/// entry — preserved from `original_source` (§E.1 of `SPEC_FULL.md`).
pub fn username_for_uid(uid: u32) -> String {
    lookup_user_by_uid(uid)
        .map(|u| u.name)
        .unwrap_or_else(|| format!("uid{uid}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_resolves_to_uid_zero() {
        let root = lookup_user_by_uid(0).expect("root must exist in passwd db");
        assert_eq!(root.uid, 0);
    }

    #[test]
    fn missing_uid_falls_back_to_uid_prefixed_name() {
        // 4294967294 (u32::MAX - 1) is exceedingly unlikely to be assigned.
        assert_eq!(username_for_uid(4_294_967_294), "uid4294967294");
    }

    #[test]
    fn missing_group_is_not_a_member() {
        assert!(!user_in_group(0, "no-such-group-zfs-helper-test"));
    }
}
