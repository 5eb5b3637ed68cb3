//! Home directory expansion for user supplied paths.

use std::env;

/// Replaces a leading `~` or `~/` with `$HOME`.
///
/// Paths naming another user's home (`~alice/...`) and paths without a tilde
/// come back unchanged, as does everything when `HOME` is unset.
///
/// # Examples
///
/// ```
/// # use blimp::exec::expand_tilde;
/// let home = std::env::var("HOME").expect("HOME should be set");
/// assert_eq!(expand_tilde("~/.ssh/id_rsa.pub"), format!("{home}/.ssh/id_rsa.pub"));
/// assert_eq!(expand_tilde("~"), home);
/// assert_eq!(expand_tilde("/absolute/path"), "/absolute/path");
/// ```
#[must_use]
pub fn expand_tilde(path: &str) -> String {
    let rest = match path.strip_prefix('~') {
        Some("") => "",
        Some(tail) if tail.starts_with('/') => tail,
        _ => return path.to_owned(),
    };
    env::var_os("HOME").map_or_else(
        || path.to_owned(),
        |home| format!("{}{rest}", home.to_string_lossy()),
    )
}
