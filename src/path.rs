// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Path resolution utilities.
//!
//! Resolve user supplied paths like private key files and destination
//! directories that may be written relative to the user's home directory.

use std::path::{Path, PathBuf};

/// Determine absolute path to user's home directory.
///
/// Does not check if the path returned actually exists.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
pub fn home_dir() -> Result<PathBuf> {
    dirs::home_dir().ok_or(NoWayHome)
}

/// Expand a leading `~/` into the user's home directory.
///
/// Only the exact `~/` prefix is recognized. Paths like `~user/` or a bare
/// `~` are returned untouched.
///
/// # Errors
///
/// - Return [`NoWayHome`] if path needs expansion, but home directory path
///   cannot be determined.
pub fn expand_home(path: impl AsRef<Path>) -> Result<PathBuf> {
    let path = path.as_ref();
    match path.to_str().and_then(|raw| raw.strip_prefix("~/")) {
        Some(rest) => Ok(home_dir()?.join(rest)),
        None => Ok(path.to_path_buf()),
    }
}

/// Make path absolute against the current directory, without touching the
/// filesystem.
///
/// Two spellings of the same directory, like `./out/a` and `out/a`, come out
/// equal. Symbolic links are not resolved. Falls back to the path as given
/// if the current directory is unknown.
pub fn absolute(path: impl AsRef<Path>) -> PathBuf {
    let path = path.as_ref();
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

/// No way to determine user's home directory.
///
/// # See Also
///
/// - [`dirs::home_dir`](https://docs.rs/dirs/latest/dirs/fn.home_dir.html)
#[derive(Clone, Debug, thiserror::Error)]
#[error("cannot determine absolute path to user's home directory")]
pub struct NoWayHome;

/// Friendly result alias :3
pub type Result<T, E = NoWayHome> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn expand_home_replaces_tilde_prefix() -> anyhow::Result<()> {
        let home = home_dir()?;
        assert_eq!(expand_home("~/.ssh/id_rsa")?, home.join(".ssh/id_rsa"));
        Ok(())
    }

    #[test]
    fn expand_home_leaves_other_paths_alone() -> anyhow::Result<()> {
        assert_eq!(expand_home("/etc/ssh/key")?, PathBuf::from("/etc/ssh/key"));
        assert_eq!(expand_home("relative/~/key")?, PathBuf::from("relative/~/key"));
        assert_eq!(expand_home("~other/key")?, PathBuf::from("~other/key"));
        Ok(())
    }

    #[test]
    fn absolute_unifies_relative_spellings() -> anyhow::Result<()> {
        let cwd = std::env::current_dir()?;
        assert_eq!(absolute("./out/a"), cwd.join("out/a"));
        assert_eq!(absolute("out/./a"), absolute("out/a"));
        assert_eq!(absolute("/srv/mirror"), PathBuf::from("/srv/mirror"));
        Ok(())
    }
}
