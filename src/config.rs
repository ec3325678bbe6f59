// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Configuration layout.
//!
//! Specify the layout of the configuration file listing every repository to
//! mirror, and validate it into [`RepoDescriptor`]s.
//!
//! # General Layout
//!
//! The configuration file is a TOML document holding an array of `repos`
//! tables. Each table names a remote, the branch to follow, where to put the
//! mirror, and when to refresh it. An optional `auth` table carries the
//! credentials for the remote:
//!
//! ```toml
//! [[repos]]
//! url = "https://github.com/blah/foo.git"
//! branch = "main"
//! depth = 1
//! subPath = "docs"
//! destDir = "~/mirrors/foo"
//! schedule = "*/5 * * * *"
//!
//! [repos.auth]
//! user = "blah"
//! accessToken = "${FOO_TOKEN}"
//! ```
//!
//! Environment variables are substituted into the raw text before it is
//! parsed, so they may appear in any value.

use crate::{
    auth::Credentials,
    mirror::{sparse::SubPath, Depth, RepoDescriptor},
    path::{absolute, expand_home, NoWayHome},
    schedule::{CronSchedule, ScheduleError},
};

use serde::{Deserialize, Serialize};
use std::{
    collections::HashSet,
    fs::read_to_string,
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::warn;

/// Mirror configuration layout.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct MirrorConfig {
    /// Repositories to mirror.
    #[serde(default)]
    pub repos: Vec<RepoEntry>,
}

impl MirrorConfig {
    /// Load configuration file from path.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::Io`] if file cannot be read.
    /// - Return [`ConfigError`] if contents cannot be expanded or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = read_to_string(path).map_err(|err| ConfigError::Io {
            source: err,
            path: path.to_path_buf(),
        })?;

        data.parse()
    }

    /// Validate every entry into an immutable repository descriptor.
    ///
    /// Entries sharing a destination directory are allowed, but reported,
    /// since their syncs will never overlap and simply take turns.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError`] for the first invalid entry.
    pub fn descriptors(&self) -> Result<Vec<RepoDescriptor>> {
        let mut seen = HashSet::new();
        let mut descriptors = Vec::with_capacity(self.repos.len());
        for (index, entry) in self.repos.iter().enumerate() {
            let descriptor = entry.to_descriptor(index)?;
            if !seen.insert(absolute(&descriptor.dest_dir)) {
                warn!(
                    "repository {} shares destination {} with another repository",
                    descriptor.url,
                    descriptor.dest_dir.display()
                );
            }
            descriptors.push(descriptor);
        }

        Ok(descriptors)
    }
}

impl FromStr for MirrorConfig {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        // INVARIANT: Substitute environment variables before parsing.
        let data = shellexpand::env(data).map_err(ConfigError::ShellExpansion)?;
        toml::de::from_str(&data).map_err(ConfigError::Deserialize)
    }
}

/// Repository entry layout.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoEntry {
    /// Remote URL to mirror from.
    #[serde(default)]
    pub url: String,

    /// Branch of remote to follow.
    #[serde(default)]
    pub branch: String,

    /// History depth, zero meaning full history.
    #[serde(default)]
    pub depth: u32,

    /// Portion of repository tree to materialize.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_path: Option<String>,

    /// Directory holding the mirror.
    #[serde(default)]
    pub dest_dir: PathBuf,

    /// Cron expression to refresh mirror on.
    #[serde(default)]
    pub schedule: String,

    /// Credentials for the remote.
    #[serde(default)]
    pub auth: AuthEntry,
}

impl RepoEntry {
    /// Validate entry into repository descriptor.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::Invalid`] if a required field is empty, or
    ///   sub-path leaves the repository.
    /// - Return [`ConfigError::Schedule`] if schedule cannot be parsed.
    /// - Return [`ConfigError::NoHome`] if `~/` cannot be expanded.
    pub fn to_descriptor(&self, index: usize) -> Result<RepoDescriptor> {
        let invalid = |reason: &str| ConfigError::Invalid {
            index,
            url: self.url.clone(),
            reason: reason.into(),
        };

        if self.url.trim().is_empty() {
            return Err(invalid("url must not be empty"));
        }
        if self.branch.trim().is_empty() {
            return Err(invalid("branch must not be empty"));
        }
        if self.dest_dir.as_os_str().is_empty() {
            return Err(invalid("destDir must not be empty"));
        }

        let sub_path = match self.sub_path.as_deref() {
            Some(raw) => SubPath::new(raw).map_err(|err| invalid(&err.to_string()))?,
            None => None,
        };
        let schedule: CronSchedule =
            self.schedule
                .parse()
                .map_err(|err| ConfigError::Schedule {
                    index,
                    url: self.url.clone(),
                    source: err,
                })?;

        Ok(RepoDescriptor {
            url: self.url.trim().to_string(),
            branch: self.branch.trim().to_string(),
            depth: Depth::new(self.depth),
            sub_path,
            dest_dir: expand_home(&self.dest_dir)?,
            credentials: self.auth.to_credentials(),
            schedule,
        })
    }
}

/// Credential block layout.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AuthEntry {
    /// Username for both token and key authentication.
    pub user: String,

    /// Access token for HTTP(S) remotes.
    pub access_token: String,

    /// Private key file for SSH remotes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private_key_file: Option<PathBuf>,

    /// Passphrase protecting the private key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private_key_passphrase: Option<String>,
}

impl AuthEntry {
    fn to_credentials(&self) -> Credentials {
        Credentials {
            user: self.user.clone(),
            access_token: self.access_token.clone(),
            private_key_file: self
                .private_key_file
                .clone()
                .filter(|path| !path.as_os_str().is_empty()),
            private_key_passphrase: self.private_key_passphrase.clone(),
        }
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read configuration file at {:?}", path.display())]
    Io {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Failed to deserialize configuration.
    #[error(transparent)]
    Deserialize(#[from] toml::de::Error),

    /// Failed to perform shell expansion on configuration.
    #[error(transparent)]
    ShellExpansion(#[from] shellexpand::LookupError<std::env::VarError>),

    /// Repository entry is malformed.
    #[error("repository #{index} ({url:?}): {reason}")]
    Invalid {
        index: usize,
        url: String,
        reason: String,
    },

    /// Repository entry has unusable schedule.
    #[error("repository #{index} ({url:?}): {source}")]
    Schedule {
        index: usize,
        url: String,
        #[source]
        source: ScheduleError,
    },

    /// Home directory needed for `~/` expansion is unknown.
    #[error(transparent)]
    NoHome(#[from] NoWayHome),
}

/// Friendly result alias :3
type Result<T, E = ConfigError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use sealed_test::prelude::*;
    use simple_test_case::test_case;

    #[sealed_test(env = [("FOO_TOKEN", "hunter2"), ("MIRRORS", "/srv/mirrors")])]
    fn deserialize_mirror_config() -> anyhow::Result<()> {
        let result: MirrorConfig = indoc! {r#"
            [[repos]]
            url = "https://blah.org/foo.git"
            branch = "main"
            depth = 1
            subPath = "docs"
            destDir = "$MIRRORS/foo"
            schedule = "*/5 * * * *"

            [repos.auth]
            user = "blah"
            accessToken = "${FOO_TOKEN}"

            [[repos]]
            url = "git@blah.org:bar.git"
            branch = "${BAR_BRANCH:-trunk}"
            destDir = "/srv/mirrors/bar"
            schedule = "0 3 * * 0"

            [repos.auth]
            user = "git"
            privateKeyFile = "~/.ssh/id_ed25519"
            privateKeyPassphrase = ""
        "#}
        .parse()?;

        let expect = MirrorConfig {
            repos: vec![
                RepoEntry {
                    url: "https://blah.org/foo.git".into(),
                    branch: "main".into(),
                    depth: 1,
                    sub_path: Some("docs".into()),
                    dest_dir: "/srv/mirrors/foo".into(),
                    schedule: "*/5 * * * *".into(),
                    auth: AuthEntry {
                        user: "blah".into(),
                        access_token: "hunter2".into(),
                        ..Default::default()
                    },
                },
                RepoEntry {
                    url: "git@blah.org:bar.git".into(),
                    branch: "trunk".into(),
                    depth: 0,
                    sub_path: None,
                    dest_dir: "/srv/mirrors/bar".into(),
                    schedule: "0 3 * * 0".into(),
                    auth: AuthEntry {
                        user: "git".into(),
                        access_token: String::new(),
                        private_key_file: Some("~/.ssh/id_ed25519".into()),
                        private_key_passphrase: Some(String::new()),
                    },
                },
            ],
        };
        assert_eq!(result, expect);

        Ok(())
    }

    #[sealed_test]
    fn unset_variable_is_error() {
        std::env::remove_var("DOES_NOT_EXIST");
        let result = indoc! {r#"
            [[repos]]
            url = "https://blah.org/foo.git"
            branch = "main"
            destDir = "/srv/mirrors/foo"
            schedule = "*/5 * * * *"

            [repos.auth]
            accessToken = "$DOES_NOT_EXIST"
        "#}
        .parse::<MirrorConfig>();
        assert!(matches!(result, Err(ConfigError::ShellExpansion(_))));
    }

    #[sealed_test(env = [("HOME", "/home/blah")])]
    fn descriptors_from_valid_config() -> anyhow::Result<()> {
        let config: MirrorConfig = indoc! {r#"
            [[repos]]
            url = "https://blah.org/foo.git"
            branch = "main"
            depth = 2
            subPath = "/docs/"
            destDir = "~/mirrors/foo"
            schedule = "*/5 * * * *"

            [repos.auth]
            user = "blah"
            accessToken = "secret"
        "#}
        .parse()?;

        let descriptors = config.descriptors()?;
        assert_eq!(descriptors.len(), 1);

        let descriptor = &descriptors[0];
        assert_eq!(descriptor.url, "https://blah.org/foo.git");
        assert_eq!(descriptor.branch, "main");
        assert_eq!(descriptor.depth, Depth::new(2));
        assert_eq!(descriptor.sub_path, SubPath::new("docs")?);
        assert_eq!(descriptor.dest_dir, PathBuf::from("/home/blah/mirrors/foo"));
        assert_eq!(descriptor.schedule.expression(), "*/5 * * * *");
        assert_eq!(descriptor.credentials.access_token, "secret");

        Ok(())
    }

    #[test]
    fn shared_destination_is_allowed() -> anyhow::Result<()> {
        let config: MirrorConfig = indoc! {r#"
            [[repos]]
            url = "https://blah.org/foo.git"
            branch = "main"
            destDir = "/srv/mirrors/shared"
            schedule = "*/5 * * * *"

            [[repos]]
            url = "https://blah.org/bar.git"
            branch = "main"
            destDir = "/srv/mirrors/shared"
            schedule = "*/5 * * * *"
        "#}
        .parse()?;

        assert_eq!(config.descriptors()?.len(), 2);

        Ok(())
    }

    #[test_case("", "main", "/srv/foo", "*/5 * * * *", None; "empty url")]
    #[test_case("https://blah.org/foo.git", "", "/srv/foo", "*/5 * * * *", None; "empty branch")]
    #[test_case("https://blah.org/foo.git", "main", "", "*/5 * * * *", None; "empty dest dir")]
    #[test_case("https://blah.org/foo.git", "main", "/srv/foo", "*/5 * * * *", Some("../etc"); "escaping sub path")]
    #[test]
    fn invalid_entry_rejected(
        url: &str,
        branch: &str,
        dest_dir: &str,
        schedule: &str,
        sub_path: Option<&str>,
    ) {
        let entry = RepoEntry {
            url: url.into(),
            branch: branch.into(),
            dest_dir: dest_dir.into(),
            schedule: schedule.into(),
            sub_path: sub_path.map(String::from),
            ..Default::default()
        };
        let result = entry.to_descriptor(3);
        assert!(matches!(result, Err(ConfigError::Invalid { index: 3, .. })));
    }

    #[test]
    fn bad_schedule_rejected() {
        let entry = RepoEntry {
            url: "https://blah.org/foo.git".into(),
            branch: "main".into(),
            dest_dir: "/srv/foo".into(),
            schedule: "whenever".into(),
            ..Default::default()
        };
        let result = entry.to_descriptor(0);
        assert!(matches!(result, Err(ConfigError::Schedule { index: 0, .. })));
    }

    #[test]
    fn load_missing_file() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let result = MirrorConfig::load(dir.path().join("nope.toml"));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
        Ok(())
    }

    #[test]
    fn load_config_file() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            indoc! {r#"
                [[repos]]
                url = "file:///srv/git/foo.git"
                branch = "main"
                destDir = "/srv/mirrors/foo"
                schedule = "@hourly"
            "#},
        )?;

        let config = MirrorConfig::load(&path)?;
        assert_eq!(config.repos.len(), 1);
        assert_eq!(config.repos[0].auth, AuthEntry::default());

        Ok(())
    }
}
