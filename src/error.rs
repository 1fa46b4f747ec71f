use std::path::PathBuf;

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, RewriteError>;

/// Broad failure classes, used by the CLI to decide what to tell the user
/// and whether a backup exists to fall back on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Refused before any mutation; no backup was created.
    Precondition,
    /// Failed while history was being rewritten.
    MidRewrite,
    /// The rewrite succeeded but publishing it did not.
    Push,
    /// Configuration could not be loaded or is incomplete.
    Config,
    /// Broken invariant or unexpected repository failure.
    Internal,
}

#[derive(Error, Debug)]
pub enum RewriteError {
    #[error("not a git repository: {path}")]
    NotARepository { path: String },

    #[error("repository at {path} has no working tree")]
    BareRepository { path: String },

    #[error("repository has no commits yet")]
    EmptyRepository,

    #[error("{count} uncommitted change(s); stash or commit them first")]
    DirtyWorkingTree { count: usize },

    #[error("HEAD is detached; check out the branch you want to rewrite first")]
    DetachedHead,

    #[error("another operation is in progress ({operation}); finish or abort it first")]
    OperationInProgress { operation: String },

    #[error("cannot resolve '{spec}' to a commit")]
    UnresolvedRevision { spec: String },

    #[error("'{base}' is not a strict ancestor of {branch}")]
    NotAnAncestor { base: String, branch: String },

    #[error("'{base}' is not on the first-parent line of {branch}")]
    NotOnFirstParentLine { base: String, branch: String },

    #[error("commit {commit} is a merge commit; merges are never rewritten directly")]
    MergeTarget { commit: String },

    #[error("replay failed at {commit}: {reason}")]
    ReplayFailed { commit: String, reason: String },

    #[error("ref {name} moved during the rewrite (expected {expected})")]
    RefMoved { name: String, expected: String },

    #[error("no replay in progress")]
    NoReplayInProgress,

    #[error("`{tool}` not found in PATH")]
    ToolMissing { tool: String },

    #[error("`{command}` failed: {reason}")]
    CommandFailed { command: String, reason: String },

    #[error("push to {remote} rejected: {reason}")]
    PushRejected { remote: String, reason: String },

    #[error("no remote configured to publish {branch}")]
    NoRemote { branch: String },

    #[error("backup '{name}' not found")]
    BackupNotFound { name: String },

    #[error("malformed identity: {detail}")]
    MalformedIdentity { detail: String },

    #[error("configuration error: {message}")]
    Config { message: String },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("git error: {0}")]
    Git(#[from] git2::Error),
}

impl RewriteError {
    /// Which stage the error belongs to, for the exit message.
    pub fn class(&self) -> ErrorClass {
        match self {
            RewriteError::NotARepository { .. }
            | RewriteError::BareRepository { .. }
            | RewriteError::EmptyRepository
            | RewriteError::DirtyWorkingTree { .. }
            | RewriteError::DetachedHead
            | RewriteError::OperationInProgress { .. }
            | RewriteError::UnresolvedRevision { .. }
            | RewriteError::NotAnAncestor { .. }
            | RewriteError::NotOnFirstParentLine { .. }
            | RewriteError::MergeTarget { .. } => ErrorClass::Precondition,
            RewriteError::ReplayFailed { .. }
            | RewriteError::RefMoved { .. }
            | RewriteError::ToolMissing { .. }
            | RewriteError::CommandFailed { .. } => ErrorClass::MidRewrite,
            RewriteError::PushRejected { .. } | RewriteError::NoRemote { .. } => ErrorClass::Push,
            RewriteError::Config { .. } => ErrorClass::Config,
            RewriteError::NoReplayInProgress
            | RewriteError::BackupNotFound { .. }
            | RewriteError::MalformedIdentity { .. }
            | RewriteError::Io { .. }
            | RewriteError::Git(_) => ErrorClass::Internal,
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        RewriteError::Io {
            path: path.into(),
            source,
        }
    }
}
