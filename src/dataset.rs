//! Dataset and snapshot name syntax (§3): validation without a regex crate,
//! matching the two anchored patterns `spec.md` defines byte-for-byte.

/// A single dataset-name segment: `[A-Za-z0-9:_\-.]+`.
fn is_segment_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, ':' | '_' | '-' | '.')
}

fn is_valid_segment(segment: &str) -> bool {
    !segment.is_empty() && segment.chars().all(is_segment_char)
}

/// `^[A-Za-z0-9:_\-.]+(?:/[A-Za-z0-9:_\-.]+)*$` — no leading/trailing slash,
/// no empty segment.
pub fn is_valid_dataset(name: &str) -> bool {
    if name.is_empty() {
        return false;
    }
    name.split('/').all(is_valid_segment)
}

/// `<dataset>@<segment>` where the tag is a single dataset-style segment.
pub fn is_valid_snapshot(name: &str) -> bool {
    let Some((ds, tag)) = name.split_once('@') else {
        return false;
    };
    is_valid_dataset(ds) && is_valid_segment(tag)
}

/// Split `dataset@tag` into `(dataset, tag)`. Caller must have validated the
/// snapshot name first.
pub fn split_snapshot(name: &str) -> Option<(&str, &str)> {
    name.split_once('@')
}
