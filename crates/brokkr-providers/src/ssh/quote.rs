//! Quoting for values interpolated into remote shell commands
//!
//! Remote hosts run a POSIX shell regardless of the local platform, so the
//! unix rules apply unconditionally.

use std::borrow::Cow;

/// Quote `value` as a single shell word
///
/// Safe values pass through unchanged; anything else is single-quoted with
/// embedded quotes escaped.
pub fn shell_quote(value: &str) -> String {
    shell_escape::unix::escape(Cow::Borrowed(value)).into_owned()
}

/// Directory part of a remote path, for `mkdir -p`
pub fn remote_parent(path: &str) -> Option<&str> {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) => Some("/"),
        Some(index) => Some(&trimmed[..index]),
        None => None,
    }
}
