// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Mirror sync engine.
//!
//! Drives one refresh of one mirror: resolve credentials, probe the
//! destination, select a [`Strategy`], and run the matching sequence of
//! backend operations. Every refresh ends by reading HEAD, so callers always
//! learn which commit the mirror sits on.

use crate::{
    auth::{self, AuthCapability},
    mirror::{
        backend::{
            Backend, BackendError, CloneRequest, FetchRequest, Git2Backend, PullRequest,
            DEFAULT_REMOTE,
        },
        progress::{LogProgress, ProgressSink},
        CommitHash, DestinationState, RepoDescriptor, Strategy, SyncOutcome, SyncReport,
        UpdateStatus,
    },
};

use std::{
    fs::{read_dir, remove_dir_all, remove_file},
    path::Path,
};
use tracing::{debug, info, instrument, warn};

/// Refresh mirrors through a repository backend.
#[derive(Debug, Default)]
pub struct SyncEngine<B = Git2Backend> {
    backend: B,
}

impl<B: Backend> SyncEngine<B> {
    /// Construct new sync engine over backend.
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    /// Refresh mirror, reporting transfer progress as log events.
    ///
    /// # Errors
    ///
    /// - Return [`crate::mirror::SyncError`] classified by what went wrong.
    pub fn sync(&self, descriptor: &RepoDescriptor) -> SyncOutcome {
        self.sync_with_progress(descriptor, &LogProgress::new())
    }

    /// Refresh mirror, reporting transfer progress to target sink.
    ///
    /// # Errors
    ///
    /// - Return [`crate::mirror::SyncError::Auth`] if credentials cannot be
    ///   resolved.
    /// - Return [`crate::mirror::SyncError::Transport`] if remote cannot be
    ///   reached or rejected the request.
    /// - Return [`crate::mirror::SyncError::WorkingTree`] if destination
    ///   cannot be updated.
    #[instrument(
        skip_all,
        fields(
            url = %descriptor.url,
            branch = %descriptor.branch,
            dest = %descriptor.dest_dir.display(),
        )
    )]
    pub fn sync_with_progress(
        &self,
        descriptor: &RepoDescriptor,
        progress: &dyn ProgressSink,
    ) -> SyncOutcome {
        let auth = auth::resolve(&descriptor.credentials, &descriptor.url)?;
        let state = self.probe(&descriptor.dest_dir)?;
        let strategy = Strategy::select(state.is_present(), descriptor.depth);
        info!("sync {descriptor} through {strategy}");

        let (repo, status) = match (strategy, state) {
            (Strategy::Pull, DestinationState::Present(repo)) => {
                let status = self.pull(&repo, descriptor, &auth, progress)?;
                (repo, status)
            }
            (Strategy::ShallowRefresh, DestinationState::Present(repo)) => {
                let status = self.shallow_refresh(&repo, descriptor, &auth, progress)?;
                (repo, status)
            }
            (Strategy::Checkout, _) | (_, DestinationState::Absent) => {
                let repo = self.checkout(descriptor, &auth, progress)?;
                (repo, UpdateStatus::Updated)
            }
        };

        let head = self.backend.head(&repo)?;
        info!("{status}, HEAD at {head}");

        Ok(SyncReport {
            strategy,
            status,
            head,
        })
    }

    /// Read commit HEAD of mirror at path points at.
    ///
    /// # Errors
    ///
    /// - Return [`BackendError::NotARepository`] if path holds no repository.
    /// - Return [`BackendError`] if HEAD cannot be read.
    pub fn probe_head(&self, path: &Path) -> Result<CommitHash, BackendError> {
        let repo = self
            .backend
            .open(path)?
            .ok_or_else(|| BackendError::NotARepository {
                path: path.to_path_buf(),
            })?;
        self.backend.head(&repo)
    }

    fn probe(&self, path: &Path) -> Result<DestinationState<B::Repo>, BackendError> {
        match self.backend.open(path)? {
            Some(repo) => Ok(DestinationState::Present(repo)),
            None if is_occupied(path) => Err(BackendError::NotARepository {
                path: path.to_path_buf(),
            }),
            None => Ok(DestinationState::Absent),
        }
    }

    fn checkout(
        &self,
        descriptor: &RepoDescriptor,
        auth: &AuthCapability,
        progress: &dyn ProgressSink,
    ) -> Result<B::Repo, BackendError> {
        let existed = descriptor.dest_dir.exists();
        let repo = self.backend.clone_repo(CloneRequest {
            url: &descriptor.url,
            dest: &descriptor.dest_dir,
            branch: &descriptor.branch,
            depth: descriptor.depth,
            no_checkout: true,
            auth,
            progress,
        })?;

        // INVARIANT: Clone already points HEAD at the branch, so a clone left
        //   behind by a failed checkout would look current on the next refresh.
        match self
            .backend
            .checkout_branch(&repo, &descriptor.branch, descriptor.sub_path.as_ref())
        {
            Ok(()) => Ok(repo),
            Err(err) => {
                drop(repo);
                discard_partial_clone(&descriptor.dest_dir, existed);
                Err(err)
            }
        }
    }

    fn pull(
        &self,
        repo: &B::Repo,
        descriptor: &RepoDescriptor,
        auth: &AuthCapability,
        progress: &dyn ProgressSink,
    ) -> Result<UpdateStatus, BackendError> {
        self.backend.pull(
            repo,
            PullRequest {
                remote: DEFAULT_REMOTE,
                branch: &descriptor.branch,
                force: true,
                single_branch: true,
                sparse: descriptor.sub_path.as_ref(),
                auth,
                progress,
            },
        )
    }

    fn shallow_refresh(
        &self,
        repo: &B::Repo,
        descriptor: &RepoDescriptor,
        auth: &AuthCapability,
        progress: &dyn ProgressSink,
    ) -> Result<UpdateStatus, BackendError> {
        let fetched = self.backend.fetch(
            repo,
            FetchRequest {
                remote: DEFAULT_REMOTE,
                branch: &descriptor.branch,
                depth: descriptor.depth,
                auth,
                progress,
            },
        )?;
        debug!("fetch {fetched}");

        let tip = self
            .backend
            .remote_branch_tip(repo, DEFAULT_REMOTE, &descriptor.branch)?;
        let before = self.backend.head(repo).ok();

        // INVARIANT: Reset even when nothing was fetched, so local edits to
        //   the mirror never survive a refresh.
        self.backend
            .reset_hard(repo, &tip, descriptor.sub_path.as_ref())?;

        if before.as_ref() == Some(&tip) {
            Ok(UpdateStatus::AlreadyCurrent)
        } else {
            Ok(UpdateStatus::Updated)
        }
    }
}

fn discard_partial_clone(path: &Path, keep_root: bool) {
    let result = if keep_root {
        read_dir(path).and_then(|mut entries| {
            entries.try_for_each(|entry| {
                let entry = entry?;
                if entry.file_type()?.is_dir() {
                    remove_dir_all(entry.path())
                } else {
                    remove_file(entry.path())
                }
            })
        })
    } else {
        remove_dir_all(path)
    };

    match result {
        Ok(()) => debug!("discard partial clone at {}", path.display()),
        Err(err) => warn!("cannot discard partial clone at {}: {err}", path.display()),
    }
}

fn is_occupied(path: &Path) -> bool {
    read_dir(path)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}
