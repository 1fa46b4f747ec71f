//! Publishing the rewritten branch and deciding what happens to the backup.

use std::fmt;
use std::path::Path;

use git2::Oid;
use serde::{Deserialize, Serialize};

use crate::backup::{self, BackupHandle};
use crate::error::{Result, RewriteError};
use crate::git;
use crate::model::RewriteResult;
use crate::repo::Repo;

/// What to do once history has been rewritten.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum FinalizePolicy {
    /// Push with a lease, then delete the backup.
    PushAndClean,
    /// Push with a lease and keep the backup.
    #[default]
    PushAndKeepBackup,
    /// Push nothing; print the commands instead.
    Manual,
}

impl FinalizePolicy {
    pub const ALL: [FinalizePolicy; 3] = [
        FinalizePolicy::PushAndKeepBackup,
        FinalizePolicy::PushAndClean,
        FinalizePolicy::Manual,
    ];

    pub fn description(&self) -> &'static str {
        match self {
            FinalizePolicy::PushAndClean => "Push (with lease) and delete the backup",
            FinalizePolicy::PushAndKeepBackup => "Push (with lease) and keep the backup",
            FinalizePolicy::Manual => "Do nothing now; show me the commands",
        }
    }

    pub fn pushes(&self) -> bool {
        !matches!(self, FinalizePolicy::Manual)
    }
}

impl fmt::Display for FinalizePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FinalizePolicy::PushAndClean => "push-and-clean",
            FinalizePolicy::PushAndKeepBackup => "push-and-keep-backup",
            FinalizePolicy::Manual => "manual",
        };
        f.write_str(s)
    }
}

/// Where and how the rewritten branch is published. Captured before the
/// rewrite, while the remote-tracking ref still reflects what we last saw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishTarget {
    pub remote: String,
    pub branch: String,
    /// Remote branch tip the lease expects; `None` means it must not exist.
    pub expected: Option<Oid>,
}

impl PublishTarget {
    /// The branch's upstream remote, else `default_remote`, if configured.
    pub fn for_branch(repo: &Repo, branch: &str, default_remote: &str) -> Option<Self> {
        let remote = repo
            .upstream_remote(branch)
            .unwrap_or_else(|| default_remote.to_string());
        if repo.raw().find_remote(&remote).is_err() {
            log::info!("remote {} not configured; nothing to publish to", remote);
            return None;
        }
        let expected = repo.remote_tracking_tip(&remote, branch);
        Some(Self {
            remote,
            branch: branch.to_string(),
            expected,
        })
    }

    /// The equivalent `git push` invocation, for recovery output.
    pub fn command_line(&self) -> String {
        git::push_command_line(&self.remote, &self.branch, self.expected)
    }
}

/// Seam over the actual push so policies can be exercised without a remote.
pub trait Publisher {
    fn publish(&mut self, root: &Path, target: &PublishTarget) -> Result<()>;
}

/// Publishes through `git push --force-with-lease`.
pub struct GitPublisher;

impl Publisher for GitPublisher {
    fn publish(&mut self, root: &Path, target: &PublishTarget) -> Result<()> {
        git::push_with_lease(root, &target.remote, &target.branch, target.expected)
    }
}

#[derive(Debug)]
pub enum Outcome {
    Published { backup_deleted: bool },
    /// Nothing pushed by choice; backup kept.
    Manual,
    /// Push not attempted; backup kept.
    NotPublished { reason: String },
    /// Push attempted and refused; backup kept.
    PushFailed(RewriteError),
}

impl Outcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::PushFailed(_))
    }
}

/// Applies `policy` to a rewrite result. The backup is deleted only after a
/// successful push under [`FinalizePolicy::PushAndClean`].
pub fn finalize<P: Publisher>(
    publisher: &mut P,
    repo: &Repo,
    result: &RewriteResult,
    policy: FinalizePolicy,
    backup: &BackupHandle,
    target: Option<&PublishTarget>,
) -> Outcome {
    if !result.succeeded() {
        return Outcome::NotPublished {
            reason: "the rewrite did not succeed".to_string(),
        };
    }
    if !policy.pushes() {
        return Outcome::Manual;
    }
    if !result.dropped_remotes.is_empty() {
        return Outcome::NotPublished {
            reason: "remotes were removed by the bulk rewrite; reconnect them first".to_string(),
        };
    }

    let Some(target) = target else {
        let branch = repo
            .current_branch()
            .map(|b| b.name)
            .unwrap_or_else(|_| "HEAD".to_string());
        return Outcome::PushFailed(RewriteError::NoRemote { branch });
    };

    if let Err(e) = publisher.publish(repo.root(), target) {
        log::warn!("push failed: {}", e);
        return Outcome::PushFailed(e);
    }

    let backup_deleted = match policy {
        FinalizePolicy::PushAndClean => match backup::delete(repo, backup) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("could not delete backup {}: {}", backup.label(), e);
                false
            }
        },
        _ => false,
    };

    Outcome::Published { backup_deleted }
}

/// Exact commands for finishing or undoing the run by hand.
pub fn recovery_steps(
    backup: &BackupHandle,
    target: Option<&PublishTarget>,
    dropped_remotes: &[(String, String)],
) -> Vec<String> {
    let mut steps = Vec::new();
    for (name, url) in dropped_remotes {
        steps.push(format!("Reconnect remote:  git remote add {} {}", name, url));
    }
    if let Some(target) = target {
        steps.push(format!("Retry the push:    {}", target.command_line()));
    }
    steps.push(format!(
        "Undo the rewrite:  git-history-rewrite restore {}",
        backup.label()
    ));
    steps.push(format!("  (or by hand:     {})", backup.manual_restore()));
    steps.push(format!("Drop the backup:   {}", backup.manual_delete()));
    steps
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackupConfig;
    use crate::model::RewriteStatus;
    use git2::{Repository, Signature};

    struct MockPublisher {
        response: Result<()>,
        calls: usize,
    }

    impl MockPublisher {
        fn ok() -> Self {
            Self {
                response: Ok(()),
                calls: 0,
            }
        }

        fn rejecting() -> Self {
            Self {
                response: Err(RewriteError::PushRejected {
                    remote: "origin".to_string(),
                    reason: "stale info".to_string(),
                }),
                calls: 0,
            }
        }
    }

    impl Publisher for MockPublisher {
        fn publish(&mut self, _root: &Path, _target: &PublishTarget) -> Result<()> {
            self.calls += 1;
            match &self.response {
                Ok(()) => Ok(()),
                Err(e) => Err(RewriteError::PushRejected {
                    remote: "origin".to_string(),
                    reason: e.to_string(),
                }),
            }
        }
    }

    fn setup() -> (tempfile::TempDir, Repo, BackupHandle) {
        let dir = tempfile::tempdir().unwrap();
        let raw = Repository::init(dir.path()).unwrap();
        let tree = raw
            .find_tree(raw.index().unwrap().write_tree().unwrap())
            .unwrap();
        let sig = Signature::now("Alice", "alice@example.com").unwrap();
        raw.commit(Some("HEAD"), &sig, &sig, "init", &tree, &[])
            .unwrap();
        let repo = Repo::open(dir.path()).unwrap();
        let branch = repo.current_branch().unwrap();
        let config = BackupConfig::default();
        let handle = crate::backup::BackupManager::new(&config)
            .create(&repo, &branch, false)
            .unwrap();
        (dir, repo, handle)
    }

    fn succeeded() -> RewriteResult {
        RewriteResult {
            touched: 0,
            merges_skipped: 0,
            changes: Vec::new(),
            status: RewriteStatus::Succeeded,
            rewritten: Vec::new(),
            mutated: Vec::new(),
            dropped_remotes: Vec::new(),
        }
    }

    fn target() -> PublishTarget {
        PublishTarget {
            remote: "origin".to_string(),
            branch: "main".to_string(),
            expected: None,
        }
    }

    fn backup_exists(repo: &Repo, handle: &BackupHandle) -> bool {
        let BackupHandle::Ref { name, .. } = handle else {
            return false;
        };
        repo.raw().find_reference(name).is_ok()
    }

    #[test]
    fn push_and_clean_deletes_backup() {
        let (_dir, repo, handle) = setup();
        let mut publisher = MockPublisher::ok();
        let outcome = finalize(
            &mut publisher,
            &repo,
            &succeeded(),
            FinalizePolicy::PushAndClean,
            &handle,
            Some(&target()),
        );
        assert!(matches!(outcome, Outcome::Published { backup_deleted: true }));
        assert_eq!(publisher.calls, 1);
        assert!(!backup_exists(&repo, &handle));
    }

    #[test]
    fn push_and_keep_leaves_backup() {
        let (_dir, repo, handle) = setup();
        let outcome = finalize(
            &mut MockPublisher::ok(),
            &repo,
            &succeeded(),
            FinalizePolicy::PushAndKeepBackup,
            &handle,
            Some(&target()),
        );
        assert!(matches!(outcome, Outcome::Published { backup_deleted: false }));
        assert!(backup_exists(&repo, &handle));
    }

    #[test]
    fn rejected_push_always_keeps_backup() {
        let (_dir, repo, handle) = setup();
        let outcome = finalize(
            &mut MockPublisher::rejecting(),
            &repo,
            &succeeded(),
            FinalizePolicy::PushAndClean,
            &handle,
            Some(&target()),
        );
        assert!(outcome.is_failure());
        assert!(backup_exists(&repo, &handle));
    }

    #[test]
    fn manual_never_pushes() {
        let (_dir, repo, handle) = setup();
        let mut publisher = MockPublisher::ok();
        let outcome = finalize(
            &mut publisher,
            &repo,
            &succeeded(),
            FinalizePolicy::Manual,
            &handle,
            Some(&target()),
        );
        assert!(matches!(outcome, Outcome::Manual));
        assert_eq!(publisher.calls, 0);
    }

    #[test]
    fn missing_remote_is_a_push_failure() {
        let (_dir, repo, handle) = setup();
        let outcome = finalize(
            &mut MockPublisher::ok(),
            &repo,
            &succeeded(),
            FinalizePolicy::PushAndKeepBackup,
            &handle,
            None,
        );
        assert!(matches!(outcome, Outcome::PushFailed(RewriteError::NoRemote { .. })));
    }

    #[test]
    fn dropped_remotes_block_the_push() {
        let (_dir, repo, handle) = setup();
        let mut result = succeeded();
        result.dropped_remotes = vec![("origin".to_string(), "git@host:repo.git".to_string())];
        let mut publisher = MockPublisher::ok();
        let outcome = finalize(
            &mut publisher,
            &repo,
            &result,
            FinalizePolicy::PushAndClean,
            &handle,
            Some(&target()),
        );
        assert!(matches!(outcome, Outcome::NotPublished { .. }));
        assert_eq!(publisher.calls, 0);
    }

    #[test]
    fn recovery_steps_name_exact_commands() {
        let (_dir, _repo, handle) = setup();
        let steps = recovery_steps(
            &handle,
            Some(&target()),
            &[("origin".to_string(), "https://example.com/r.git".to_string())],
        );
        assert!(steps[0].contains("git remote add origin https://example.com/r.git"));
        assert!(steps.iter().any(|s| s.contains("--force-with-lease=refs/heads/main:")));
        assert!(steps
            .iter()
            .any(|s| s.contains(&format!("git-history-rewrite restore {}", handle.label()))));
    }

    #[test]
    fn policy_names_round_trip_through_serde() {
        let parsed: FinalizePolicy = toml::from_str::<toml::Value>("p = \"push-and-clean\"")
            .unwrap()
            .get("p")
            .unwrap()
            .clone()
            .try_into()
            .unwrap();
        assert_eq!(parsed, FinalizePolicy::PushAndClean);
        assert_eq!(FinalizePolicy::Manual.to_string(), "manual");
    }
}
