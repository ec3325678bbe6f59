// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use multi_git_sync::{
    config::MirrorConfig,
    job::{jobs_for, DestinationLocks},
    mirror::{
        backend::Git2Backend, engine::SyncEngine, progress::BarProgress, RepoDescriptor,
    },
    scheduler::Scheduler,
};

use anyhow::{bail, Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use indicatif::{MultiProgress, ProgressBar};
use std::{path::PathBuf, process::exit, sync::Arc};
use tokio::task::JoinSet;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "multi-git-sync <command> [options]",
    subcommand_help_heading = "Commands",
    version
)]
struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    async fn run(self) -> Result<()> {
        match self.command {
            Command::Run(opts) => run_daemon(opts).await,
            Command::Sync(opts) => run_sync(opts).await,
            Command::Check(opts) => run_check(opts),
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Keep all repositories mirrored on their schedules until interrupted.
    #[command(override_usage = "multi-git-sync run [options]")]
    Run(ConfigOptions),

    /// Sync all repositories once, then exit.
    #[command(override_usage = "multi-git-sync sync [options]")]
    Sync(ConfigOptions),

    /// Validate configuration, and show when each repository syncs next.
    #[command(override_usage = "multi-git-sync check [options]")]
    Check(ConfigOptions),
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct ConfigOptions {
    /// Path to configuration file.
    #[arg(short, long, value_name = "path", default_value = "config.toml")]
    pub config: PathBuf,
}

impl ConfigOptions {
    fn descriptors(&self) -> Result<Vec<RepoDescriptor>> {
        let config = MirrorConfig::load(&self.config)
            .with_context(|| format!("cannot load {}", self.config.display()))?;
        Ok(config.descriptors()?)
    }
}

#[tokio::main]
async fn main() {
    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .with_timer(fmt::time::ChronoLocal::rfc_3339());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    if let Err(error) = run().await {
        error!("{error:?}");
        exit(1);
    }

    exit(0)
}

async fn run() -> Result<()> {
    Cli::parse().run().await
}

async fn run_daemon(opts: ConfigOptions) -> Result<()> {
    let descriptors = opts.descriptors()?;
    info!("mirror {} repositories", descriptors.len());

    let engine = Arc::new(SyncEngine::new(Git2Backend::new()));
    let mut scheduler = Scheduler::new();
    for job in jobs_for(descriptors, engine) {
        let schedule = job.descriptor().schedule.clone();
        scheduler.add(schedule, job);
    }

    scheduler.run_until_signal().await?;

    Ok(())
}

async fn run_sync(opts: ConfigOptions) -> Result<()> {
    let descriptors = opts.descriptors()?;
    let engine = Arc::new(SyncEngine::new(Git2Backend::new()));
    let bars = MultiProgress::new();
    let mut locks = DestinationLocks::new();

    // INVARIANT: Repositories sharing a destination take turns.
    let mut tasks = JoinSet::new();
    for descriptor in descriptors {
        let engine = engine.clone();
        let lock = locks.lock_for(&descriptor.dest_dir);
        let progress = BarProgress::new(bars.add(ProgressBar::no_length()), &descriptor.url)?;
        tasks.spawn_blocking(move || {
            let _permit = lock.blocking_lock();
            let outcome = engine.sync_with_progress(&descriptor, &progress);
            (descriptor, outcome)
        });
    }

    let mut failures = 0;
    while let Some(joined) = tasks.join_next().await {
        let (descriptor, outcome) = joined?;
        match outcome {
            Ok(report) => info!(
                "{}: {} through {}, HEAD at {}",
                descriptor.url, report.status, report.strategy, report.head
            ),
            Err(err) => {
                error!(kind = err.kind(), "{}: {err}", descriptor.url);
                failures += 1;
            }
        }
    }

    if failures > 0 {
        bail!("{failures} repositories failed to sync");
    }

    Ok(())
}

fn run_check(opts: ConfigOptions) -> Result<()> {
    let descriptors = opts.descriptors()?;
    let engine = SyncEngine::new(Git2Backend::new());
    let now = Local::now();

    for descriptor in descriptors {
        let next = descriptor
            .schedule
            .next_after(&now)
            .map_or_else(|| "never".to_string(), |next| next.to_rfc3339());
        let head = engine
            .probe_head(&descriptor.dest_dir)
            .map_or_else(|_| "not synced yet".to_string(), |head| head.to_string());
        println!("{descriptor}");
        println!("    schedule: {} (next {next})", descriptor.schedule);
        println!("    depth:    {}", descriptor.depth);
        println!("    HEAD:     {head}");
    }

    Ok(())
}
