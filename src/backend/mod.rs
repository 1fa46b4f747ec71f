//! Rewrite strategies.
//!
//! Both strategies take the same [`RewritePlan`] and must leave the same
//! observable result: target identities on every non-merge commit in scope,
//! trees and messages untouched, merge parents preserved.

pub mod bulk;
pub mod journal;
pub mod sequential;

use crate::error::Result;
use crate::git;
use crate::model::{RewriteResult, ScopeMode, TargetIdentity};
use crate::range::RewritePlan;
use crate::repo::Repo;

pub use bulk::BulkBackend;
pub use sequential::{Replay, ReplayState, SequentialBackend};

pub trait RewriteBackend {
    fn name(&self) -> &'static str;

    /// Whether a lightweight backup ref is enough, or the whole repository
    /// must be copied first.
    fn needs_full_copy(&self) -> bool;

    /// Rewrites the commits described by `plan`.
    ///
    /// A failure while rewriting is reported through the result's status
    /// after the backend has cleaned up after itself. `Err` is reserved for
    /// failures that left cleanup incomplete.
    fn rewrite(&mut self, repo: &Repo, plan: &RewritePlan) -> Result<RewriteResult>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Sequential,
    Bulk,
}

/// Outcome of backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    pub kind: BackendKind,
    /// `--fast` was requested but the bulk tool is not installed.
    pub fell_back: bool,
}

/// Picks a backend from the user's flag and whether the bulk tool exists.
/// Bulk runs only over the whole history.
pub fn select(scope: &ScopeMode, fast: bool, bulk_available: bool) -> Selection {
    match (scope.is_whole_history(), fast, bulk_available) {
        (true, true, true) => Selection {
            kind: BackendKind::Bulk,
            fell_back: false,
        },
        (_, true, false) => Selection {
            kind: BackendKind::Sequential,
            fell_back: true,
        },
        _ => Selection {
            kind: BackendKind::Sequential,
            fell_back: false,
        },
    }
}

/// [`select`] with the capability check done against `PATH`.
pub fn detect(scope: &ScopeMode, fast: bool) -> Selection {
    let available = fast && git::tool_available(git::FILTER_REPO);
    select(scope, fast, available)
}

pub fn build(kind: BackendKind, target: TargetIdentity, scope: &ScopeMode) -> Box<dyn RewriteBackend> {
    match kind {
        BackendKind::Sequential => Box::new(SequentialBackend::new(target, scope.to_string())),
        BackendKind::Bulk => Box::new(BulkBackend::new(target)),
    }
}
