// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Scheduled mirror refresh jobs.
//!
//! A [`RepositoryJob`] binds one [`RepoDescriptor`] to a shared
//! [`SyncEngine`]. Every run refreshes the mirror on a blocking worker
//! thread, and logs how it went. Failures and panics stay inside the run
//! that caused them.
//!
//! Jobs writing into the same destination directory share a lock from
//! [`DestinationLocks`]. A tick that finds the lock taken is skipped instead
//! of queued.

use crate::{
    mirror::{
        backend::{Backend, Git2Backend},
        engine::SyncEngine,
        RepoDescriptor, SyncError, SyncReport,
    },
    path::absolute,
    scheduler::Job,
};

use futures::{future::BoxFuture, FutureExt};
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::{sync::Mutex, task::spawn_blocking};
use tracing::{debug, error, info, info_span, warn};

/// How a single run of a job ended.
#[derive(Debug)]
pub enum JobOutcome {
    /// Mirror was refreshed.
    Synced(SyncReport),

    /// Refresh failed, and will be retried on the next tick.
    Failed(SyncError),

    /// Previous refresh of the same destination was still running.
    Skipped,

    /// Refresh panicked.
    Panicked,
}

/// Refresh one mirror on every tick.
pub struct RepositoryJob<B = Git2Backend> {
    descriptor: Arc<RepoDescriptor>,
    engine: Arc<SyncEngine<B>>,
    guard: Arc<Mutex<()>>,
}

impl<B: Backend> RepositoryJob<B> {
    /// Construct new job guarded by destination lock.
    pub fn new(
        descriptor: Arc<RepoDescriptor>,
        engine: Arc<SyncEngine<B>>,
        guard: Arc<Mutex<()>>,
    ) -> Self {
        Self {
            descriptor,
            engine,
            guard,
        }
    }

    /// Mirror this job refreshes.
    pub fn descriptor(&self) -> &RepoDescriptor {
        &self.descriptor
    }

    /// Perform one refresh, and log its outcome.
    pub async fn execute(&self) -> JobOutcome {
        let span = info_span!(
            "job",
            url = %self.descriptor.url,
            dest = %self.descriptor.dest_dir.display(),
        );

        let Ok(permit) = self.guard.clone().try_lock_owned() else {
            span.in_scope(|| warn!("destination still busy with previous sync, skip tick"));
            return JobOutcome::Skipped;
        };

        let descriptor = self.descriptor.clone();
        let engine = self.engine.clone();
        let worker_span = span.clone();
        let result = spawn_blocking(move || {
            let _enter = worker_span.enter();
            let _permit = permit;
            let outcome = engine.sync(&descriptor);

            // Best-effort read back of HEAD, never changes outcome.
            if outcome.is_ok() {
                match engine.probe_head(&descriptor.dest_dir) {
                    Ok(head) => debug!("working copy HEAD at {head}"),
                    Err(err) => debug!("cannot read back HEAD: {err}"),
                }
            }

            outcome
        })
        .await;

        span.in_scope(|| match result {
            Ok(Ok(report)) => {
                info!(strategy = %report.strategy, head = %report.head, "{}", report.status);
                JobOutcome::Synced(report)
            }
            Ok(Err(err)) => {
                error!(kind = err.kind(), "sync failed: {err}");
                JobOutcome::Failed(err)
            }
            Err(err) => {
                error!("sync panicked: {err}");
                JobOutcome::Panicked
            }
        })
    }
}

impl<B: Backend> Job for RepositoryJob<B> {
    fn name(&self) -> String {
        self.descriptor.url.clone()
    }

    fn run(self: Arc<Self>) -> BoxFuture<'static, ()> {
        async move {
            let _ = self.execute().await;
        }
        .boxed()
    }
}

/// Locks shared by everything writing into the same destination directory.
///
/// Destinations are compared as absolute paths.
#[derive(Debug, Default)]
pub struct DestinationLocks {
    locks: HashMap<PathBuf, Arc<Mutex<()>>>,
}

impl DestinationLocks {
    /// Construct new empty lock table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock guarding target destination directory.
    pub fn lock_for(&mut self, dest: &Path) -> Arc<Mutex<()>> {
        self.locks.entry(absolute(dest)).or_default().clone()
    }
}

/// Build one job per descriptor over shared engine.
///
/// Descriptors with the same destination directory share one lock.
pub fn jobs_for<B: Backend>(
    descriptors: impl IntoIterator<Item = RepoDescriptor>,
    engine: Arc<SyncEngine<B>>,
) -> Vec<Arc<RepositoryJob<B>>> {
    let mut locks = DestinationLocks::new();
    descriptors
        .into_iter()
        .map(|descriptor| {
            let guard = locks.lock_for(&descriptor.dest_dir);
            Arc::new(RepositoryJob::new(
                Arc::new(descriptor),
                engine.clone(),
                guard,
            ))
        })
        .collect()
}
