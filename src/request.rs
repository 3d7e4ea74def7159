//! Wire protocol (§6): a single JSON request object in, a single-line JSON
//! reply out. Parsing here only decodes syntax and required-field
//! presence; dataset/snapshot syntax validation lives in `dataset.rs` and
//! is applied per-action by `dispatch.rs`.

use std::io::Read;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Hard ceiling on how many request bytes the server will read (§4.4, §9).
pub const MAX_REQUEST_BYTES: usize = 8192;

/// Read up to `MAX_REQUEST_BYTES` from `reader`, stopping at EOF or the cap,
/// whichever comes first. The cap is a safety feature, not a bug: if it is
/// hit the partial payload is handed to the JSON parser as-is (usually
/// failing to parse, which surfaces as `BAD_REQUEST`).
pub fn read_bounded(reader: &mut impl Read) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        if buf.len() >= MAX_REQUEST_BYTES {
            break;
        }
        let n = reader.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    buf.truncate(MAX_REQUEST_BYTES);
    Ok(buf)
}

/// The per-action request shapes from §6's field table. Unknown/missing
/// `action` values are represented outside this enum by the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Mount {
        dataset: String,
    },
    Unmount {
        dataset: String,
    },
    Snapshot {
        target: String,
        recursive: bool,
    },
    Rollback {
        snapshot: String,
        recursive: bool,
        force: bool,
    },
    Create {
        dataset: String,
        props: Vec<(String, String)>,
    },
    Destroy {
        target: String,
        recursive: bool,
        force: bool,
    },
    Rename {
        src: String,
        dst: String,
    },
    Setprop {
        dataset: String,
        key: String,
        value: String,
    },
    Share {
        dataset: String,
    },
    /// Syntactically present `action` field but not one of the recognised
    /// names — dispatched to `BAD_ACTION`.
    Unknown,
}

fn str_field(obj: &Value, field: &str) -> String {
    obj.get(field)
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string()
}

fn bool_field(obj: &Value, field: &str) -> bool {
    obj.get(field).and_then(Value::as_bool).unwrap_or(false)
}

fn props_field(obj: &Value) -> Vec<(String, String)> {
    let Some(map) = obj.get("props").and_then(Value::as_object) else {
        return Vec::new();
    };
    map.iter()
        .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
        .collect()
}

/// Decode a raw request body into `(action_name, Action)`, or `None` if the
/// payload is not valid JSON, not an object, or has no `action` field.
pub fn parse_request(bytes: &[u8]) -> Option<(String, Action)> {
    let text = String::from_utf8_lossy(bytes);
    let value: Value = serde_json::from_str(text.trim()).ok()?;
    let obj = value.as_object()?;
    let action_name = obj.get("action")?.as_str()?.to_string();

    let action = match action_name.as_str() {
        "mount" => Action::Mount {
            dataset: str_field(&value, "dataset"),
        },
        "unmount" => Action::Unmount {
            dataset: str_field(&value, "dataset"),
        },
        "snapshot" => Action::Snapshot {
            target: str_field(&value, "target"),
            recursive: bool_field(&value, "recursive"),
        },
        "rollback" => Action::Rollback {
            snapshot: str_field(&value, "snapshot"),
            recursive: bool_field(&value, "recursive"),
            force: bool_field(&value, "force"),
        },
        "create" => Action::Create {
            dataset: str_field(&value, "dataset"),
            props: props_field(&value),
        },
        "destroy" => Action::Destroy {
            target: str_field(&value, "target"),
            recursive: bool_field(&value, "recursive"),
            force: bool_field(&value, "force"),
        },
        "rename" => Action::Rename {
            src: str_field(&value, "src"),
            dst: str_field(&value, "dst"),
        },
        "setprop" => Action::Setprop {
            dataset: str_field(&value, "dataset"),
            key: str_field(&value, "key"),
            value: str_field(&value, "value"),
        },
        "share" => Action::Share {
            dataset: str_field(&value, "dataset"),
        },
        _ => Action::Unknown,
    };
    Some((action_name, action))
}

/// The closed reply-status taxonomy (§7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    Error,
    BadRequest,
    BadAction,
    InvalidDataset,
    InvalidSnapshot,
    InvalidTarget,
    DenyRoot,
    DenyNotUserService,
    DenyUnit,
    DenyGroup,
    DenyPolicy,
    DenyPolicySrc,
    DenyPolicyDst,
    DenyPropKey,
    DenyPropValue,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Ok => "OK",
            Status::Error => "ERROR",
            Status::BadRequest => "BAD_REQUEST",
            Status::BadAction => "BAD_ACTION",
            Status::InvalidDataset => "INVALID_DATASET",
            Status::InvalidSnapshot => "INVALID_SNAPSHOT",
            Status::InvalidTarget => "INVALID_TARGET",
            Status::DenyRoot => "DENY_ROOT",
            Status::DenyNotUserService => "DENY_NOT_USER_SERVICE",
            Status::DenyUnit => "DENY_UNIT",
            Status::DenyGroup => "DENY_GROUP",
            Status::DenyPolicy => "DENY_POLICY",
            Status::DenyPolicySrc => "DENY_POLICY_SRC",
            Status::DenyPolicyDst => "DENY_POLICY_DST",
            Status::DenyPropKey => "DENY_PROP_KEY",
            Status::DenyPropValue => "DENY_PROP_VALUE",
        }
    }

    /// The log-line level a status maps to (§4.8, §7).
    pub fn log_level(self) -> &'static str {
        match self {
            Status::Ok => "ALLOW",
            s if s.as_str().starts_with("DENY") => "DENY",
            _ => "ERROR",
        }
    }
}

/// `{"status": "...", "info": "..."}` wire reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reply {
    pub status: String,
    pub info: String,
}

impl Reply {
    pub fn new(status: Status, info: impl Into<String>) -> Self {
        Reply {
            status: status.as_str().to_string(),
            info: info.into(),
        }
    }

    /// Serialize as the single-line JSON reply, newline-terminated, per §6.
    pub fn to_wire(&self) -> Vec<u8> {
        let mut line = serde_json::to_string(self).unwrap_or_else(|_| {
            "{\"status\":\"ERROR\",\"info\":\"reply serialization failed\"}".to_string()
        });
        line.push('\n');
        line.into_bytes()
    }
}
