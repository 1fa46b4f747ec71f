//! # git-history-rewrite
//!
//! A CLI tool to rewrite commit authorship over part or all of a Git
//! history, safely.
//!
//! A run goes through a fixed pipeline; each stage gates the next:
//! - Validate the repository (clean tree, on a branch, nothing in progress)
//! - Resolve the commits in scope and pick out merges
//! - Take a backup (a branch, or a full copy for whole-history rewrites)
//! - Rewrite, either by replaying commits one by one or in a single
//!   `git-filter-repo` pass
//! - Compare identities before and after
//! - Publish with `--force-with-lease`, or hand the commands to the user
//!
//! ## Usage
//!
//! ```bash
//! # One commit, optionally with a new message
//! git-history-rewrite rewrite-commit 1a2b3c4 "Fix typo"
//!
//! # Everything after a base on the current branch
//! git-history-rewrite rewrite-range v1.0
//!
//! # Every branch and tag, using git-filter-repo when available
//! git-history-rewrite rewrite-all --fast
//! ```
//!
//! ## Modules
//!
//! - [`cli`] - Command-line interface and the rewrite pipeline
//! - [`validate`] - Precondition checks
//! - [`range`] - Scope resolution
//! - [`backup`] - Backup creation and restore
//! - [`backend`] - Sequential and bulk rewrite strategies
//! - [`verify`] - Before/after identity report
//! - [`finalize`] - Push policies and recovery instructions
//! - [`config`] - Layered configuration
//! - [`git`] - External `git` / `git-filter-repo` invocations
//! - [`prompt`] - User input abstractions
//! - [`banner`] - Decorative CLI banner

pub mod backend;
pub mod backup;
pub mod banner;
pub mod cli;
pub mod config;
pub mod error;
pub mod finalize;
pub mod git;
pub mod model;
pub mod prompt;
pub mod range;
pub mod repo;
pub mod validate;
pub mod verify;
