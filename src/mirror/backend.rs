// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Repository backend.
//!
//! The sync engine never talks to Git directly. Everything it needs from a
//! version control system is expressed through the [`Backend`] trait, which
//! is implemented on top of libgit2 by [`Git2Backend`].
//!
//! Network operations (clone, fetch, pull) fail with
//! [`BackendError::Transport`], while purely local operations (open,
//! checkout, reset) fail with [`BackendError::WorkingTree`]. A fetch or pull
//! that finds nothing new is not an error. It reports
//! [`UpdateStatus::AlreadyCurrent`] instead.

use crate::{
    auth::AuthCapability,
    mirror::{
        progress::ProgressSink,
        sparse::{self, SparseError, SubPath},
        CommitHash, Depth, UpdateStatus,
    },
};

use auth_git2::GitAuthenticator;
use git2::{
    build::{CheckoutBuilder, RepoBuilder},
    Config, ErrorClass, ErrorCode, FetchOptions, ObjectType, Oid, RemoteCallbacks, Repository,
    ResetType,
};
use std::{
    num::NonZeroU32,
    path::{Path, PathBuf},
    time::{Duration, Instant},
};
use tracing::{debug, info, instrument};

/// Name of the remote every mirror is cloned with.
pub const DEFAULT_REMOTE: &str = "origin";

/// Options for cloning a remote.
pub struct CloneRequest<'a> {
    pub url: &'a str,
    pub dest: &'a Path,
    pub branch: &'a str,
    pub depth: Depth,
    pub no_checkout: bool,
    pub auth: &'a AuthCapability,
    pub progress: &'a dyn ProgressSink,
}

/// Options for fetching one branch from a named remote.
pub struct FetchRequest<'a> {
    pub remote: &'a str,
    pub branch: &'a str,
    pub depth: Depth,
    pub auth: &'a AuthCapability,
    pub progress: &'a dyn ProgressSink,
}

/// Options for pulling the current branch.
///
/// Branch is only used when HEAD is detached.
pub struct PullRequest<'a> {
    pub remote: &'a str,
    pub branch: &'a str,
    pub force: bool,
    pub single_branch: bool,
    pub sparse: Option<&'a SubPath>,
    pub auth: &'a AuthCapability,
    pub progress: &'a dyn ProgressSink,
}

/// Version control operations needed to keep a mirror current.
pub trait Backend: Send + Sync + 'static {
    /// Handle to an opened repository.
    type Repo;

    /// Open existing repository at path, or `None` if there is none.
    fn open(&self, path: &Path) -> Result<Option<Self::Repo>>;

    /// Clone remote into path.
    fn clone_repo(&self, request: CloneRequest<'_>) -> Result<Self::Repo>;

    /// Check out branch into working tree, optionally limited to sub-path.
    fn checkout_branch(
        &self,
        repo: &Self::Repo,
        branch: &str,
        sparse: Option<&SubPath>,
    ) -> Result<()>;

    /// Fetch one branch from named remote.
    fn fetch(&self, repo: &Self::Repo, request: FetchRequest<'_>) -> Result<UpdateStatus>;

    /// Resolve tip of remote tracking branch.
    fn remote_branch_tip(&self, repo: &Self::Repo, remote: &str, branch: &str)
        -> Result<CommitHash>;

    /// Hard reset working tree to commit, optionally limited to sub-path.
    fn reset_hard(
        &self,
        repo: &Self::Repo,
        commit: &CommitHash,
        sparse: Option<&SubPath>,
    ) -> Result<()>;

    /// Fetch and integrate current branch from named remote.
    fn pull(&self, repo: &Self::Repo, request: PullRequest<'_>) -> Result<UpdateStatus>;

    /// Read commit HEAD points at.
    fn head(&self, repo: &Self::Repo) -> Result<CommitHash>;
}

/// Repository backend through libgit2.
#[derive(Debug, Default, Clone, Copy)]
pub struct Git2Backend;

impl Git2Backend {
    /// Construct new libgit2 backend.
    pub fn new() -> Self {
        Self
    }

    fn fetch_refspecs(
        &self,
        repository: &Repository,
        remote: &str,
        refspecs: &[String],
        depth: Depth,
        auth: &AuthCapability,
        progress: &dyn ProgressSink,
    ) -> Result<()> {
        let authenticator = auth.authenticator();
        let config = git_config()?;
        let mut remote = repository
            .find_remote(remote)
            .map_err(working_tree("find remote"))?;
        let depth = effective_depth(remote.url().unwrap_or_default(), depth);
        let mut fo = fetch_options(&authenticator, &config, progress, depth);

        remote
            .fetch(refspecs, Some(&mut fo), None)
            .map_err(network("fetch"))?;
        progress.finish();

        Ok(())
    }
}

impl Backend for Git2Backend {
    type Repo = Repository;

    fn open(&self, path: &Path) -> Result<Option<Repository>> {
        match Repository::open(path) {
            Ok(repository) => Ok(Some(repository)),
            Err(err) if err.code() == ErrorCode::NotFound => Ok(None),
            Err(err) => Err(BackendError::WorkingTree {
                op: "open repository",
                source: err,
            }),
        }
    }

    #[instrument(skip(self, request), fields(url = request.url), level = "debug")]
    fn clone_repo(&self, request: CloneRequest<'_>) -> Result<Repository> {
        info!(
            "git clone --no-checkout {} -b {} {}",
            request.url,
            request.branch,
            request.dest.display()
        );
        let authenticator = request.auth.authenticator();
        let config = git_config()?;
        let depth = effective_depth(request.url, request.depth);
        let fo = fetch_options(&authenticator, &config, request.progress, depth);

        let mut builder = RepoBuilder::new();
        builder.branch(request.branch).fetch_options(fo);
        if request.no_checkout {
            let mut co = CheckoutBuilder::new();
            co.dry_run();
            builder.with_checkout(co);
        }

        let repository = builder
            .clone(request.url, request.dest)
            .map_err(network("clone"))?;
        request.progress.finish();

        Ok(repository)
    }

    #[instrument(skip(self, repository), level = "debug")]
    fn checkout_branch(
        &self,
        repository: &Repository,
        branch: &str,
        sparse: Option<&SubPath>,
    ) -> Result<()> {
        let refname = format!("refs/heads/{branch}");

        // INVARIANT: Local branch must exist before HEAD can point at it.
        let commit = match repository.find_reference(&refname) {
            Ok(reference) => reference
                .peel_to_commit()
                .map_err(working_tree("find commit"))?,
            Err(_) => {
                let tip = self.remote_branch_tip(repository, DEFAULT_REMOTE, branch)?;
                let oid = parse_oid(&tip)?;
                let commit = repository
                    .find_commit(oid)
                    .map_err(working_tree("find commit"))?;
                repository
                    .branch(branch, &commit, false)
                    .map_err(working_tree("create branch"))?;
                commit
            }
        };

        if let Some(sub_path) = sparse {
            sparse::persist(repository, sub_path)?;
        }

        // INVARIANT: HEAD only moves once the working tree matches the branch.
        repository
            .checkout_tree(commit.as_object(), Some(&mut checkout_builder(true, sparse)))
            .map_err(working_tree("checkout"))?;
        repository
            .set_head(&refname)
            .map_err(working_tree("set HEAD"))?;

        Ok(())
    }

    #[instrument(skip(self, repository, request), fields(remote = request.remote, branch = request.branch), level = "debug")]
    fn fetch(&self, repository: &Repository, request: FetchRequest<'_>) -> Result<UpdateStatus> {
        let tracking = tracking_ref(request.remote, request.branch);
        let before = repository.refname_to_id(&tracking).ok();

        let refspec = format!("+refs/heads/{}:{tracking}", request.branch);
        self.fetch_refspecs(
            repository,
            request.remote,
            &[refspec],
            request.depth,
            request.auth,
            request.progress,
        )?;

        let after = repository
            .refname_to_id(&tracking)
            .map_err(|_| BackendError::MissingReference { name: tracking })?;
        if before == Some(after) {
            debug!("nothing new to fetch");
            Ok(UpdateStatus::AlreadyCurrent)
        } else {
            Ok(UpdateStatus::Updated)
        }
    }

    fn remote_branch_tip(
        &self,
        repository: &Repository,
        remote: &str,
        branch: &str,
    ) -> Result<CommitHash> {
        let tracking = tracking_ref(remote, branch);
        repository
            .refname_to_id(&tracking)
            .map(|oid| CommitHash::new(oid.to_string()))
            .map_err(|_| BackendError::MissingReference { name: tracking })
    }

    #[instrument(skip(self, repository), level = "debug")]
    fn reset_hard(
        &self,
        repository: &Repository,
        commit: &CommitHash,
        sparse: Option<&SubPath>,
    ) -> Result<()> {
        let object = repository
            .find_object(parse_oid(commit)?, Some(ObjectType::Commit))
            .map_err(working_tree("find commit"))?;
        repository
            .reset(
                &object,
                ResetType::Hard,
                Some(&mut checkout_builder(true, sparse)),
            )
            .map_err(working_tree("hard reset"))?;

        Ok(())
    }

    #[instrument(skip(self, repository, request), fields(remote = request.remote), level = "debug")]
    fn pull(&self, repository: &Repository, request: PullRequest<'_>) -> Result<UpdateStatus> {
        let head = repository.head().map_err(working_tree("read HEAD"))?;
        let branch = match head.shorthand() {
            Some(name) if head.is_branch() => name.to_string(),
            _ => request.branch.to_string(),
        };
        let current = head.target();

        let tracking = tracking_ref(request.remote, &branch);
        let refspecs = if request.single_branch {
            vec![format!("+refs/heads/{branch}:{tracking}")]
        } else {
            Vec::new()
        };
        self.fetch_refspecs(
            repository,
            request.remote,
            &refspecs,
            Depth::FULL,
            request.auth,
            request.progress,
        )?;

        let target = repository
            .refname_to_id(&tracking)
            .map_err(|_| BackendError::MissingReference {
                name: tracking.clone(),
            })?;
        if current == Some(target) {
            debug!("{branch} already at {target}");
            return Ok(UpdateStatus::AlreadyCurrent);
        }

        if let (false, Some(current)) = (request.force, current) {
            let fast_forward = repository
                .graph_descendant_of(target, current)
                .map_err(working_tree("compare history"))?;
            if !fast_forward {
                return Err(BackendError::NotFastForward { branch });
            }
        }

        let commit = repository
            .find_commit(target)
            .map_err(working_tree("find commit"))?;
        repository
            .checkout_tree(
                commit.as_object(),
                Some(&mut checkout_builder(request.force, request.sparse)),
            )
            .map_err(working_tree("checkout"))?;

        let refname = format!("refs/heads/{branch}");
        repository
            .reference(&refname, target, true, &format!("pull: move to {target}"))
            .map_err(working_tree("update branch"))?;
        repository
            .set_head(&refname)
            .map_err(working_tree("set HEAD"))?;

        Ok(UpdateStatus::Updated)
    }

    fn head(&self, repository: &Repository) -> Result<CommitHash> {
        repository
            .head()
            .map_err(working_tree("read HEAD"))?
            .target()
            .map(|oid| CommitHash::new(oid.to_string()))
            .ok_or_else(|| BackendError::MissingReference {
                name: "HEAD".into(),
            })
    }
}

fn tracking_ref(remote: &str, branch: &str) -> String {
    format!("refs/remotes/{remote}/{branch}")
}

fn parse_oid(commit: &CommitHash) -> Result<Oid> {
    Oid::from_str(commit.as_str()).map_err(working_tree("parse commit id"))
}

fn git_config() -> Result<Config> {
    Config::open_default()
        .or_else(|_| Config::new())
        .map_err(working_tree("open git configuration"))
}

fn checkout_builder(force: bool, sparse: Option<&SubPath>) -> CheckoutBuilder<'static> {
    let mut co = CheckoutBuilder::new();
    if force {
        co.force();
    } else {
        co.safe();
    }

    if let Some(sub_path) = sparse {
        for pathspec in sub_path.pathspecs() {
            co.path(pathspec);
        }
    }

    co
}

fn fetch_options<'a>(
    authenticator: &'a GitAuthenticator,
    config: &'a Config,
    progress: &'a dyn ProgressSink,
    depth: Option<NonZeroU32>,
) -> FetchOptions<'a> {
    let mut throttle = Instant::now();
    let mut rc = RemoteCallbacks::new();
    rc.credentials(authenticator.credentials(config));
    rc.transfer_progress(move |stats| {
        let done = stats.received_objects() == stats.total_objects();
        if done || throttle.elapsed() > Duration::from_millis(10) {
            throttle = Instant::now();
            progress.update(stats.received_objects(), stats.total_objects());
        }
        true
    });

    let mut fo = FetchOptions::new();
    fo.remote_callbacks(rc);
    if let Some(depth) = depth {
        fo.depth(i32::try_from(depth.get()).unwrap_or(i32::MAX));
    }

    fo
}

/// Depth to actually request from the remote.
///
/// libgit2's local transport cannot negotiate shallow history, so local
/// remotes always hand over everything, just like `git clone --depth` does
/// for plain local paths.
fn effective_depth(url: &str, depth: Depth) -> Option<NonZeroU32> {
    let limit = depth.limit()?;
    if is_local(url) {
        debug!("local remote {url} cannot be fetched shallow, fetching full history");
        return None;
    }

    Some(limit)
}

fn is_local(url: &str) -> bool {
    url.starts_with("file://") || url.starts_with('/') || url.starts_with('.')
}

fn working_tree(op: &'static str) -> impl FnOnce(git2::Error) -> BackendError {
    move |source| BackendError::WorkingTree { op, source }
}

fn network(op: &'static str) -> impl FnOnce(git2::Error) -> BackendError {
    move |source| match source.class() {
        ErrorClass::Os | ErrorClass::Filesystem => BackendError::WorkingTree { op, source },
        _ => BackendError::Transport { op, source },
    }
}

/// Repository backend error types.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// Remote cannot be reached, or rejected request.
    #[error("{op} failed: {source}")]
    Transport {
        op: &'static str,
        #[source]
        source: git2::Error,
    },

    /// Local repository or working tree cannot be updated.
    #[error("{op} failed: {source}")]
    WorkingTree {
        op: &'static str,
        #[source]
        source: git2::Error,
    },

    /// Sparse checkout configuration cannot be recorded.
    #[error(transparent)]
    Sparse(#[from] SparseError),

    /// Expected reference is missing.
    #[error("reference {name:?} does not exist")]
    MissingReference { name: String },

    /// Branch diverged from remote, and pull was not forced.
    #[error("branch {branch:?} cannot be fast-forwarded to remote")]
    NotFastForward { branch: String },

    /// Destination holds no repository.
    #[error("no repository at {:?}", path.display())]
    NotARepository { path: PathBuf },
}

impl BackendError {
    /// Check if error came from talking to the remote.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }
}

/// Friendly result alias :3
pub type Result<T, E = BackendError> = std::result::Result<T, E>;
