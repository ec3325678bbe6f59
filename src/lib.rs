// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Keep local directory trees mirrored against remote Git repositories.
//!
//! Every mirrored repository is described by a remote URL, a branch, an
//! optional history depth, an optional sub-path, a destination directory,
//! credentials, and a cron schedule. On each tick of its schedule the mirror
//! is refreshed by the [`mirror::engine::SyncEngine`], which picks the
//! cheapest correct way to bring the destination up to date with the remote.
//!
//! Mirrors are one-way. Local changes in a destination are discarded the
//! next time the remote moves on.
//!
//! # See Also
//!
//! 1. [`config`]
//! 2. [`mirror`]
//! 3. [`scheduler`]

pub mod auth;
pub mod config;
pub mod job;
pub mod mirror;
pub mod path;
pub mod schedule;
pub mod scheduler;
