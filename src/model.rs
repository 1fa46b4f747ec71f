//! Plain data carried between the pipeline stages.

use std::fmt;

use git2::{Oid, Signature};

use crate::error::{Result, RewriteError};

/// A (name, email) pair as it appears on a commit.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Identity {
    pub name: String,
    pub email: String,
}

impl Identity {
    /// Builds an identity, rejecting values that cannot be written into a
    /// commit header.
    pub fn new(name: &str, email: &str) -> Result<Self> {
        let name = name.trim();
        let email = email.trim();
        if name.is_empty() {
            return Err(RewriteError::MalformedIdentity {
                detail: format!("empty name for <{}>", email),
            });
        }
        if email.is_empty() {
            return Err(RewriteError::MalformedIdentity {
                detail: format!("empty email for {}", name),
            });
        }
        for value in [name, email] {
            if value.contains(['<', '>', '\n', '\r', '\0']) {
                return Err(RewriteError::MalformedIdentity {
                    detail: format!("{:?} contains a forbidden character", value),
                });
            }
        }
        Ok(Self {
            name: name.to_string(),
            email: email.to_string(),
        })
    }

    /// Reads the identity out of a commit signature.
    pub fn from_signature(sig: &Signature<'_>) -> Result<Self> {
        let name = sig.name().ok_or_else(|| RewriteError::MalformedIdentity {
            detail: "signature name is not valid UTF-8".to_string(),
        })?;
        let email = sig.email().ok_or_else(|| RewriteError::MalformedIdentity {
            detail: "signature email is not valid UTF-8".to_string(),
        })?;
        Ok(Self {
            name: name.to_string(),
            email: email.to_string(),
        })
    }

    /// Returns a signature with this identity and the timestamp of `original`.
    pub fn resign(&self, original: &Signature<'_>) -> Result<Signature<'static>> {
        Ok(Signature::new(&self.name, &self.email, &original.when())?)
    }

    /// Whether `sig` carries exactly this name and email.
    pub fn matches(&self, sig: &Signature<'_>) -> bool {
        sig.name() == Some(self.name.as_str()) && sig.email() == Some(self.email.as_str())
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <{}>", self.name, self.email)
    }
}

/// The identities written onto every mutated commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetIdentity {
    pub author: Identity,
    pub committer: Identity,
}

impl TargetIdentity {
    /// Same identity for author and committer.
    pub fn uniform(identity: Identity) -> Self {
        Self {
            committer: identity.clone(),
            author: identity,
        }
    }
}

/// Which part of history a run targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeMode {
    /// One commit, with descendants carried along by hash propagation.
    SingleCommit {
        target: String,
        message: Option<String>,
    },
    /// Every first-parent commit after `base` up to the tip.
    Range { base: String },
    /// Every commit reachable from any branch or tag.
    WholeHistory,
}

impl ScopeMode {
    /// Every branch and tag, not just the current line.
    pub fn is_whole_history(&self) -> bool {
        matches!(self, ScopeMode::WholeHistory)
    }

    /// The revision the validator must check as the lower bound, if any.
    pub fn lower_bound(&self) -> Option<&str> {
        match self {
            ScopeMode::SingleCommit { target, .. } => Some(target),
            ScopeMode::Range { base } => Some(base),
            ScopeMode::WholeHistory => None,
        }
    }
}

impl fmt::Display for ScopeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScopeMode::SingleCommit { target, .. } => write!(f, "commit {} and descendants", target),
            ScopeMode::Range { base } => write!(f, "commits after {}", base),
            ScopeMode::WholeHistory => write!(f, "entire history"),
        }
    }
}

/// One commit whose identity changed, before and after.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorChange {
    pub old_id: Oid,
    pub new_id: Oid,
    pub before: Identity,
    pub after: Identity,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RewriteStatus {
    Succeeded,
    Failed(String),
}

/// Outcome of a rewrite backend run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewriteResult {
    pub touched: usize,
    pub merges_skipped: usize,
    pub changes: Vec<AuthorChange>,
    pub status: RewriteStatus,
    /// Every commit in scope after the rewrite, parents before children.
    pub rewritten: Vec<Oid>,
    /// The rewritten ids of the commits that were meant to get the target
    /// identity. Descendants carried along by a single-commit run are not here.
    pub mutated: Vec<Oid>,
    /// `git remote add` lines to reconnect remotes a bulk rewrite dropped.
    pub dropped_remotes: Vec<(String, String)>,
}

impl RewriteResult {
    pub fn succeeded(&self) -> bool {
        self.status == RewriteStatus::Succeeded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_trims_and_displays() {
        let id = Identity::new("  Jane Doe ", " jane@example.com").unwrap();
        assert_eq!(id.to_string(), "Jane Doe <jane@example.com>");
    }

    #[test]
    fn identity_rejects_angle_brackets() {
        assert!(Identity::new("Jane <x>", "jane@example.com").is_err());
        assert!(Identity::new("Jane", "<jane@example.com>").is_err());
    }

    #[test]
    fn identity_rejects_empty_parts() {
        assert!(Identity::new("", "jane@example.com").is_err());
        assert!(Identity::new("Jane", "  ").is_err());
    }

    #[test]
    fn resign_keeps_timestamp() {
        let time = git2::Time::new(1_600_000_000, 120);
        let original = Signature::new("Old", "old@example.com", &time).unwrap();
        let id = Identity::new("New", "new@example.com").unwrap();
        let sig = id.resign(&original).unwrap();
        assert_eq!(sig.when().seconds(), 1_600_000_000);
        assert_eq!(sig.when().offset_minutes(), 120);
        assert!(id.matches(&sig));
    }

    #[test]
    fn lower_bound_per_scope() {
        let single = ScopeMode::SingleCommit {
            target: "abc".to_string(),
            message: None,
        };
        assert_eq!(single.lower_bound(), Some("abc"));
        assert_eq!(ScopeMode::WholeHistory.lower_bound(), None);
        assert!(ScopeMode::WholeHistory.is_whole_history());
    }
}
