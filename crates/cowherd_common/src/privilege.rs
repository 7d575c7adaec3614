//! Effective-privilege checks.

use nix::unistd::Uid;

use crate::error::Error;

/// Check whether the process runs with an effective UID of root.
pub fn is_root() -> bool {
    Uid::effective().is_root()
}

/// Fail with a privilege error unless we are running as root.
///
/// Most maintenance actions mutate filesystem state and must not be
/// attempted by unprivileged users.
pub fn ensure_root(task: &str) -> Result<(), Error> {
    if is_root() {
        Ok(())
    } else {
        Err(Error::Privilege(format!(
            "{} requires superuser privileges.",
            task
        )))
    }
}
