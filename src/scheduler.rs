// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Cron driven job scheduler.
//!
//! Each registered job gets its own timer task. A timer sleeps until the
//! next fire time of its schedule, then hands a fresh run of the job to a
//! shared task tracker and goes back to sleep. Runs are never awaited by the
//! timer, so a slow or failing job can neither delay nor stop other jobs, or
//! later ticks of itself.
//!
//! Shutdown cancels every timer, then waits for runs already in flight to
//! drain. No new run starts once shutdown has begun.

use crate::schedule::CronSchedule;

use chrono::Local;
use futures::future::BoxFuture;
use std::{sync::Arc, time::Duration};
use tokio::{select, task::JoinHandle, time::sleep};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, info, warn};

/// Unit of work run on every tick of a schedule.
pub trait Job: Send + Sync + 'static {
    /// Human readable name for log events.
    fn name(&self) -> String;

    /// Perform one run of the job.
    fn run(self: Arc<Self>) -> BoxFuture<'static, ()>;
}

/// Run jobs on their cron schedules until shut down.
#[derive(Default)]
pub struct Scheduler {
    pending: Vec<(CronSchedule, Arc<dyn Job>)>,
    timers: Vec<JoinHandle<()>>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl Scheduler {
    /// Construct new empty scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register job to run on schedule.
    ///
    /// Only takes effect on the next call to [`Scheduler::start`].
    pub fn add(&mut self, schedule: CronSchedule, job: Arc<dyn Job>) {
        debug!("register {} on {schedule}", job.name());
        self.pending.push((schedule, job));
    }

    /// Number of jobs with a running timer.
    pub fn len(&self) -> usize {
        self.timers.len()
    }

    /// Check if no timer is running.
    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    /// Start timers for all registered jobs.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&mut self) {
        for (schedule, job) in self.pending.drain(..) {
            let timer = tick(
                schedule,
                job,
                self.shutdown.clone(),
                self.tracker.clone(),
            );
            self.timers.push(tokio::spawn(timer));
        }
        info!("scheduler started with {} jobs", self.timers.len());
    }

    /// Token that stops the scheduler once cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Stop all timers, and wait for in-flight runs to finish.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        for timer in self.timers {
            if let Err(err) = timer.await {
                warn!("timer task ended abnormally: {err}");
            }
        }

        self.tracker.close();
        self.tracker.wait().await;
        info!("scheduler stopped");
    }

    /// Start scheduler, and run until interrupt or termination signal.
    ///
    /// # Errors
    ///
    /// - Return [`std::io::Error`] if signal handlers cannot be installed.
    pub async fn run_until_signal(mut self) -> std::io::Result<()> {
        self.start();

        let shutdown = self.shutdown_token();
        select! {
            result = wait_for_signal() => {
                result?;
                info!("received shutdown signal");
            }
            _ = shutdown.cancelled() => {}
        }

        self.shutdown().await;
        Ok(())
    }
}

async fn tick(
    schedule: CronSchedule,
    job: Arc<dyn Job>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
) {
    let mut last = Local::now();
    loop {
        // INVARIANT: Never fire twice for the same instant, even if the
        //   timer woke up a little early.
        let from = Local::now().max(last);
        let Some(next) = schedule.next_after(&from) else {
            warn!("{} has no future fire times", job.name());
            break;
        };
        let delay = (next - Local::now()).to_std().unwrap_or(Duration::ZERO);
        debug!("next run of {} at {next}", job.name());

        select! {
            _ = shutdown.cancelled() => break,
            _ = sleep(delay) => {}
        }

        if shutdown.is_cancelled() {
            break;
        }

        last = next;
        tracker.spawn(job.clone().run());
    }
}

#[cfg(unix)]
async fn wait_for_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    select! {
        result = tokio::signal::ctrl_c() => result,
        _ = terminate.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
