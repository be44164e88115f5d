//! Id allow-lists used by trigger filters.
//!
//! An empty allow-list means everything is allowed. Platform ids are
//! compared exactly.

/// Check whether `id` passes `allowlist`.
pub fn is_allowed(id: &str, allowlist: &[String]) -> bool {
    allowlist.is_empty() || allowlist.iter().any(|allowed| allowed == id)
}

/// Like [`is_allowed`], for values that may be absent. An absent value only
/// passes an empty allow-list.
pub fn is_allowed_opt(id: Option<&str>, allowlist: &[String]) -> bool {
    match id {
        Some(id) => is_allowed(id, allowlist),
        None => allowlist.is_empty(),
    }
}

/// True if at least one of `ids` is allowed.
pub fn any_allowed<'a>(mut ids: impl Iterator<Item = &'a str>, allowlist: &[String]) -> bool {
    allowlist.is_empty() || ids.any(|id| allowlist.iter().any(|allowed| allowed == id))
}
