// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Repository mirroring.
//!
//! A __mirror__ is a destination directory that is kept identical to the tip
//! of one branch of a remote repository. It is a one-way street. The mirror
//! never produces outgoing changes, and any local modification is discarded
//! whenever the remote moves on.
//!
//! # Mirror Components
//!
//! Each mirror is described by a [`RepoDescriptor`]: the remote URL, the
//! branch to follow, an optional history depth, an optional sub-path, the
//! destination directory, the credentials for the remote, and the schedule
//! to refresh the mirror on.
//!
//! # Sync Strategies
//!
//! Every refresh starts by probing the destination directory. The result of
//! that probe, together with the declared depth, selects exactly one
//! [`Strategy`]:
//!
//! 1. __Checkout__: no repository at destination yet. Clone without checkout,
//!    then check out the branch, limited to the sub-path if declared.
//! 2. __Pull__: repository present, full history. Fetch the current branch,
//!    and force the working tree to the fetched tip.
//! 3. __Shallow refresh__: repository present, limited depth. Fetch only the
//!    requested depth, then hard reset to the fetched tip, limited to the
//!    sub-path if declared.
//!
//! Depth and sub-path are independent of each other. All four combinations
//! are valid.
//!
//! # See Also
//!
//! 1. [`engine`]
//! 2. [`backend`]
//! 3. [`sparse`]

pub mod backend;
pub mod engine;
pub mod progress;
pub mod sparse;

use crate::{
    auth::{AuthError, Credentials},
    mirror::{backend::BackendError, sparse::SubPath},
    schedule::CronSchedule,
};

use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    num::NonZeroU32,
    path::PathBuf,
};

/// Immutable description of one mirrored repository.
#[derive(Debug, Clone)]
pub struct RepoDescriptor {
    /// Remote URL to mirror from.
    pub url: String,

    /// Branch of remote to follow.
    pub branch: String,

    /// History depth to fetch.
    pub depth: Depth,

    /// Portion of repository tree to materialize.
    pub sub_path: Option<SubPath>,

    /// Directory holding the mirror.
    pub dest_dir: PathBuf,

    /// Credentials for the remote.
    pub credentials: Credentials,

    /// When to refresh the mirror.
    pub schedule: CronSchedule,
}

impl Display for RepoDescriptor {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        write!(
            fmt,
            "URL:{}, Branch:{}, SubPath:{}, DestDir:{}",
            self.url,
            self.branch,
            self.sub_path.as_ref().map(SubPath::as_str).unwrap_or_default(),
            self.dest_dir.display()
        )
    }
}

/// History depth limit.
///
/// Zero and absent both mean full history.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Depth(Option<NonZeroU32>);

impl Depth {
    /// Full history.
    pub const FULL: Self = Self(None);

    /// Construct new depth limit, zero meaning full history.
    pub fn new(depth: u32) -> Self {
        Self(NonZeroU32::new(depth))
    }

    /// Check if depth limits history.
    pub fn is_shallow(&self) -> bool {
        self.0.is_some()
    }

    /// Number of commits to fetch, if limited.
    pub fn limit(&self) -> Option<NonZeroU32> {
        self.0
    }
}

impl Display for Depth {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self.0 {
            Some(depth) => write!(fmt, "{depth}"),
            None => fmt.write_str("full"),
        }
    }
}

/// Observed state of destination directory.
#[derive(Debug)]
pub enum DestinationState<R> {
    /// No repository at destination.
    Absent,

    /// Existing repository at destination.
    Present(R),
}

impl<R> DestinationState<R> {
    /// Check if destination holds a repository.
    pub fn is_present(&self) -> bool {
        matches!(self, Self::Present(_))
    }
}

/// Sequence of repository operations used to refresh a mirror.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    /// Clone without checkout, then check out branch.
    Checkout,

    /// Fetch and force current branch to remote tip.
    Pull,

    /// Depth limited fetch, then hard reset to remote tip.
    ShallowRefresh,
}

impl Strategy {
    /// Select strategy from destination state and declared depth.
    pub fn select(present: bool, depth: Depth) -> Self {
        match (present, depth.is_shallow()) {
            (false, _) => Self::Checkout,
            (true, false) => Self::Pull,
            (true, true) => Self::ShallowRefresh,
        }
    }
}

impl Display for Strategy {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(match self {
            Self::Checkout => "checkout",
            Self::Pull => "pull",
            Self::ShallowRefresh => "shallow-refresh",
        })
    }
}

/// Whether a refresh moved the mirror.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateStatus {
    /// Mirror now points at a different commit.
    Updated,

    /// Mirror already matched the remote.
    AlreadyCurrent,
}

impl Display for UpdateStatus {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(match self {
            Self::Updated => "updated",
            Self::AlreadyCurrent => "already up-to-date",
        })
    }
}

/// Hex identifier of a commit.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CommitHash(String);

impl CommitHash {
    /// Construct new commit hash.
    pub fn new(hash: impl Into<String>) -> Self {
        Self(hash.into())
    }

    /// Treat commit hash as string slice.
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl Display for CommitHash {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(self.as_str())
    }
}

/// Successful refresh of a mirror.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    /// Strategy that was used.
    pub strategy: Strategy,

    /// Whether the mirror moved.
    pub status: UpdateStatus,

    /// Commit HEAD points at afterwards.
    pub head: CommitHash,
}

/// Result of refreshing a mirror.
pub type SyncOutcome = Result<SyncReport, SyncError>;

/// Reasons a single refresh can fail.
///
/// None of these are fatal to the process. The next scheduled tick simply
/// tries again.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Credentials cannot be resolved.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Remote cannot be reached, or rejected the request.
    #[error(transparent)]
    Transport(BackendError),

    /// Local repository or working tree cannot be updated.
    #[error(transparent)]
    WorkingTree(BackendError),
}

impl SyncError {
    /// Short name of failure class for structured logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Auth(_) => "auth",
            Self::Transport(_) => "transport",
            Self::WorkingTree(_) => "working-tree",
        }
    }
}

impl From<BackendError> for SyncError {
    fn from(error: BackendError) -> Self {
        if error.is_transport() {
            Self::Transport(error)
        } else {
            Self::WorkingTree(error)
        }
    }
}
