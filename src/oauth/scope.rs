//! Scope matching
//!
//! | Granted     | Matches                               |
//! |-------------|---------------------------------------|
//! | `*`         | everything                            |
//! | `files:*`   | any scope starting with `files:`      |
//! | `files:write` | exactly `files:write`               |

/// Whether a single granted scope covers a required scope
#[must_use]
pub fn scope_matches(granted: &str, required: &str) -> bool {
    if granted == "*" || granted == required {
        return true;
    }
    match granted.strip_suffix(":*") {
        Some(prefix) => required
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with(':')),
        None => false,
    }
}

/// Whether every required scope is matched by at least one granted scope
#[must_use]
pub fn scopes_satisfied<G, R>(granted: &[G], required: &[R]) -> bool
where
    G: AsRef<str>,
    R: AsRef<str>,
{
    required
        .iter()
        .all(|r| granted.iter().any(|g| scope_matches(g.as_ref(), r.as_ref())))
}
