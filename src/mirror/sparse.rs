// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Sparse restriction of mirrored working trees.
//!
//! A mirror may declare a __sub-path__ such that only that portion of the
//! repository tree is ever materialized in the destination directory. Every
//! working tree update the mirror performs (initial checkout, pull, and hard
//! reset) is limited to the pathspecs derived from that sub-path. Anything
//! outside of it is never created, and never touched if it already exists.
//!
//! # Sparse Checkout Configuration File
//!
//! libgit2 has no notion of Git's sparse checkout feature. It only knows how
//! to limit a checkout to a set of pathspecs. To keep the git CLI in agreement
//! with the mirror, the sub-path is also recorded as a non-cone sparsity rule
//! in `$gitdir/info/sparse-checkout`, and `core.sparseCheckout` is switched
//! on. Running `git status` or `git checkout` by hand inside a mirror will
//! then respect the same restriction.
//!
//! # See Also
//!
//! - [Man page sparse checkout](https://git-scm.com/docs/git-sparse-checkout)

use git2::Repository;
use std::{
    collections::HashSet,
    fmt::{Display, Formatter, Result as FmtResult},
    fs::{create_dir_all, read_to_string, write, OpenOptions},
    path::{Component, Path, PathBuf},
};
use tracing::{debug, instrument};

/// Portion of repository tree to materialize.
///
/// # Invariant
///
/// - Never empty.
/// - No leading or trailing slashes.
/// - No `.` or `..` components.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubPath(String);

impl SubPath {
    /// Normalize raw sub-path.
    ///
    /// Returns `None` if the raw sub-path selects the whole tree, i.e., it is
    /// empty or only made of slashes.
    ///
    /// # Errors
    ///
    /// - Return [`SparseError::InvalidSubPath`] if sub-path tries to step
    ///   outside of the repository tree.
    pub fn new(raw: impl AsRef<str>) -> Result<Option<Self>> {
        let trimmed = raw.as_ref().trim().trim_matches('/');
        if trimmed.is_empty() {
            return Ok(None);
        }

        let escapes = Path::new(trimmed)
            .components()
            .any(|component| !matches!(component, Component::Normal(_)));
        if escapes {
            return Err(SparseError::InvalidSubPath {
                sub_path: raw.as_ref().to_string(),
            });
        }

        Ok(Some(Self(trimmed.to_string())))
    }

    /// Treat sub-path as string slice.
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Pathspecs that limit a libgit2 checkout to this sub-path.
    pub fn pathspecs(&self) -> [String; 2] {
        [self.0.clone(), format!("{}/*", self.0)]
    }

    /// Non-cone sparsity rule matching this sub-path.
    pub fn sparsity_rule(&self) -> String {
        format!("/{}/", self.0)
    }
}

impl Display for SubPath {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(self.as_str())
    }
}

/// Record sub-path as the only sparsity rule of target repository.
///
/// Switches on `core.sparseCheckout` in the repository configuration, and
/// replaces the contents of the sparse checkout configuration file with the
/// rule of the given sub-path.
///
/// # Errors
///
/// - Return [`SparseError::Config`] if repository configuration cannot be
///   updated.
/// - Return [`SparseError::CreateSparseFile`], [`SparseError::ReadSparseFile`],
///   or [`SparseError::WriteSparseFile`] if sparse checkout configuration file
///   cannot be managed.
#[instrument(skip(repository), level = "debug")]
pub fn persist(repository: &Repository, sub_path: &SubPath) -> Result<()> {
    repository
        .config()
        .and_then(|mut config| config.set_bool("core.sparseCheckout", true))
        .map_err(SparseError::Config)?;

    let drafter = SparsityDrafter::new(repository.path())?;
    drafter.edit(|rules| {
        rules.clear_rules();
        rules.insert_rule(sub_path.sparsity_rule());
    })?;
    debug!("sparsity rules now {:?}", drafter.current_rules()?);

    Ok(())
}

/// Manage sparsity rules in sparse checkout file.
#[derive(Clone, Debug)]
pub struct SparsityDrafter {
    sparse_path: PathBuf,
}

impl SparsityDrafter {
    /// Construct new sparsity rule drafter.
    ///
    /// Creates the sparse checkout configuration file if it does not already
    /// exist yet.
    ///
    /// # Errors
    ///
    /// - Return [`SparseError::CreateSparseFile`] if sparse checkout
    ///   configuration file cannot be created if missing.
    pub fn new(gitdir: impl Into<PathBuf>) -> Result<Self> {
        let info = gitdir.into().join("info");
        let sparse_path = info.join("sparse-checkout");

        // INVARIANT: Create sparse checkout file if needed.
        create_dir_all(&info)
            .and_then(|_| {
                OpenOptions::new()
                    .create(true)
                    .write(true)
                    .truncate(false)
                    .open(&sparse_path)
            })
            .map_err(|err| SparseError::CreateSparseFile {
                source: err,
                sparse_path: sparse_path.clone(),
            })?;

        Ok(Self { sparse_path })
    }

    /// Edit sparsity rules.
    ///
    /// Read current rule set into [`SparsityEdit`] instance, and directly
    /// edit each rule before writing the results back into the sparse checkout
    /// configuration file. Nothing is written if the editor changed nothing.
    ///
    /// # Errors
    ///
    /// - Return [`SparseError::ReadSparseFile`] if sparse checkout
    ///   configuration file cannot be read.
    /// - Return [`SparseError::WriteSparseFile`] if rules cannot be written to
    ///   sparse checkout configuration file.
    pub fn edit<E>(&self, editor: E) -> Result<()>
    where
        E: FnOnce(&mut SparsityEdit),
    {
        let content =
            read_to_string(&self.sparse_path).map_err(|err| SparseError::ReadSparseFile {
                source: err,
                sparse_path: self.sparse_path.clone(),
            })?;

        let mut rules = SparsityEdit::from(content);
        editor(&mut rules);

        if !rules.changed {
            return Ok(());
        }

        write(&self.sparse_path, rules.to_string().as_bytes()).map_err(|err| {
            SparseError::WriteSparseFile {
                source: err,
                sparse_path: self.sparse_path.clone(),
            }
        })?;

        Ok(())
    }

    /// List current sparsity rule set.
    ///
    /// # Errors
    ///
    /// - Return [`SparseError::ReadSparseFile`] if sparse checkout
    ///   configuration file cannot be read.
    pub fn current_rules(&self) -> Result<Vec<String>> {
        read_to_string(&self.sparse_path)
            .map_err(|err| SparseError::ReadSparseFile {
                source: err,
                sparse_path: self.sparse_path.clone(),
            })
            .map(|content| content.lines().map(str::to_owned).collect::<Vec<_>>())
    }
}

/// Sparsity rule editor.
///
/// # Invariant
///
/// - No duplicate sparsity rules.
/// - Rule insertion does not overwrite existing rules.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SparsityEdit {
    rules: HashSet<String>,
    changed: bool,
}

impl SparsityEdit {
    /// Construct new sparsity rule editor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a sparsity rule.
    pub fn insert_rule(&mut self, rule: impl Into<String>) {
        if self.rules.insert(rule.into()) {
            self.changed = true;
        }
    }

    /// Clear all sparsity rules.
    pub fn clear_rules(&mut self) {
        if !self.rules.is_empty() {
            self.rules.clear();
            self.changed = true;
        }
    }
}

impl Display for SparsityEdit {
    fn fmt(&self, fmt: &mut Formatter) -> FmtResult {
        let mut rules: Vec<_> = self.rules.iter().collect();
        rules.sort();

        for rule in rules {
            writeln!(fmt, "{rule}")?;
        }

        Ok(())
    }
}

impl From<String> for SparsityEdit {
    fn from(content: String) -> Self {
        Self::from(content.as_str())
    }
}

impl From<&str> for SparsityEdit {
    fn from(content: &str) -> Self {
        let rules = content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(str::to_owned)
            .collect::<HashSet<_>>();

        Self {
            rules,
            changed: false,
        }
    }
}

/// Sparse restriction error types.
#[derive(Debug, thiserror::Error)]
pub enum SparseError {
    /// Sub-path is not a plain relative path inside the repository tree.
    #[error("sub-path {sub_path:?} must be a relative path inside the repository")]
    InvalidSubPath { sub_path: String },

    /// Repository configuration cannot be updated.
    #[error("failed to enable sparse checkout in repository configuration")]
    Config(#[source] git2::Error),

    /// Sparse configuration file cannot be created when missing.
    #[error("failed to create sparse file at {:?}", sparse_path.display())]
    CreateSparseFile {
        #[source]
        source: std::io::Error,
        sparse_path: PathBuf,
    },

    /// Sparse configuration file cannot be read from.
    #[error("failed to read from sparse file at {:?}", sparse_path.display())]
    ReadSparseFile {
        #[source]
        source: std::io::Error,
        sparse_path: PathBuf,
    },

    /// Sparse configuration file cannot be written to.
    #[error("failed to write to sparse file at {:?}", sparse_path.display())]
    WriteSparseFile {
        #[source]
        source: std::io::Error,
        sparse_path: PathBuf,
    },
}

/// Friendly result alias :3
pub type Result<T, E = SparseError> = std::result::Result<T, E>;
