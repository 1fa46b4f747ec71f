//! Checks that a repository can be rewritten before anything is touched.

use std::path::Path;

use git2::Oid;

use crate::backend::journal::Journal;
use crate::error::{Result, RewriteError};
use crate::model::ScopeMode;
use crate::repo::{Branch, Repo};

/// A repository that passed every precondition.
#[derive(Debug, Clone)]
pub struct Ready {
    pub branch: Branch,
    /// Resolved lower bound: the range base, or the single target commit.
    pub bound: Option<Oid>,
}

/// Opens the repository at `path` and validates it for `scope`.
///
/// Checks, in order: the path is a repository with a working tree and no
/// half-finished operation, the tracked files are unmodified, HEAD is on a
/// named branch, and the lower bound is a real commit behind the tip.
pub fn check(path: &Path, scope: &ScopeMode) -> Result<(Repo, Ready)> {
    let repo = Repo::open(path)?;
    let ready = check_repo(&repo, scope)?;
    Ok((repo, ready))
}

/// [`check`] on an already opened repository.
pub fn check_repo(repo: &Repo, scope: &ScopeMode) -> Result<Ready> {
    if let Some(operation) = repo.operation_in_progress() {
        return Err(RewriteError::OperationInProgress { operation });
    }
    if Journal::exists(repo.git_dir()) {
        return Err(RewriteError::OperationInProgress {
            operation: "history rewrite; run `git-history-rewrite abort`".to_string(),
        });
    }

    let changes = repo.uncommitted_changes()?;
    if changes > 0 {
        return Err(RewriteError::DirtyWorkingTree { count: changes });
    }

    let branch = repo.current_branch()?;

    let bound = match scope {
        ScopeMode::Range { base } => {
            let base_id = repo.resolve_commit(base)?;
            if !repo.is_strict_ancestor(base_id, branch.tip)? {
                return Err(RewriteError::NotAnAncestor {
                    base: base.clone(),
                    branch: branch.name.clone(),
                });
            }
            Some(base_id)
        }
        ScopeMode::SingleCommit { target, .. } => {
            let target_id = repo.resolve_commit(target)?;
            if target_id != branch.tip && !repo.is_strict_ancestor(target_id, branch.tip)? {
                return Err(RewriteError::NotAnAncestor {
                    base: target.clone(),
                    branch: branch.name.clone(),
                });
            }
            if repo.parent_count(target_id)? > 1 {
                return Err(RewriteError::MergeTarget {
                    commit: target.clone(),
                });
            }
            Some(target_id)
        }
        ScopeMode::WholeHistory => None,
    };

    log::info!("preconditions passed on {} ({})", branch.name, branch.tip);
    Ok(Ready { branch, bound })
}

#[cfg(test)]
mod tests {
    use super::*;
    use git2::{Repository, Signature};
    use std::fs;

    fn commit_file(repo: &Repository, name: &str, body: &str) -> Oid {
        let root = repo.workdir().unwrap();
        fs::write(root.join(name), body).unwrap();
        let mut index = repo.index().unwrap();
        index.add_path(Path::new(name)).unwrap();
        index.write().unwrap();
        let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
        let sig = Signature::now("Alice", "alice@example.com").unwrap();
        let parents = match repo.head() {
            Ok(head) => vec![head.peel_to_commit().unwrap()],
            Err(_) => Vec::new(),
        };
        let refs: Vec<&git2::Commit> = parents.iter().collect();
        repo.commit(Some("HEAD"), &sig, &sig, name, &tree, &refs).unwrap()
    }

    fn range(base: &str) -> ScopeMode {
        ScopeMode::Range {
            base: base.to_string(),
        }
    }

    #[test]
    fn clean_repository_with_ancestor_base_is_ready() {
        let dir = tempfile::tempdir().unwrap();
        let raw = Repository::init(dir.path()).unwrap();
        let a = commit_file(&raw, "a.txt", "a");
        commit_file(&raw, "b.txt", "b");

        let (_, ready) = check(dir.path(), &range(&a.to_string())).unwrap();
        assert_eq!(ready.bound, Some(a));
    }

    #[test]
    fn dirty_tree_is_refused_with_count() {
        let dir = tempfile::tempdir().unwrap();
        let raw = Repository::init(dir.path()).unwrap();
        let a = commit_file(&raw, "a.txt", "a");
        commit_file(&raw, "b.txt", "b");
        fs::write(dir.path().join("a.txt"), "changed").unwrap();

        match check(dir.path(), &range(&a.to_string())) {
            Err(RewriteError::DirtyWorkingTree { count }) => assert_eq!(count, 1),
            other => panic!("unexpected {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn untracked_files_do_not_block() {
        let dir = tempfile::tempdir().unwrap();
        let raw = Repository::init(dir.path()).unwrap();
        commit_file(&raw, "a.txt", "a");
        fs::write(dir.path().join("scratch.txt"), "notes").unwrap();
        assert!(check(dir.path(), &ScopeMode::WholeHistory).is_ok());
    }

    #[test]
    fn detached_head_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let raw = Repository::init(dir.path()).unwrap();
        let a = commit_file(&raw, "a.txt", "a");
        raw.set_head_detached(a).unwrap();
        assert!(matches!(
            check(dir.path(), &ScopeMode::WholeHistory),
            Err(RewriteError::DetachedHead)
        ));
    }

    #[test]
    fn tip_as_base_is_not_a_strict_ancestor() {
        let dir = tempfile::tempdir().unwrap();
        let raw = Repository::init(dir.path()).unwrap();
        let a = commit_file(&raw, "a.txt", "a");
        assert!(matches!(
            check(dir.path(), &range(&a.to_string())),
            Err(RewriteError::NotAnAncestor { .. })
        ));
    }

    #[test]
    fn unrelated_commit_is_not_an_ancestor() {
        let dir = tempfile::tempdir().unwrap();
        let raw = Repository::init(dir.path()).unwrap();
        commit_file(&raw, "a.txt", "a");
        let tree = raw
            .find_tree(raw.index().unwrap().write_tree().unwrap())
            .unwrap();
        let sig = Signature::now("Eve", "eve@example.com").unwrap();
        let orphan = raw.commit(None, &sig, &sig, "orphan", &tree, &[]).unwrap();

        assert!(matches!(
            check(dir.path(), &range(&orphan.to_string())),
            Err(RewriteError::NotAnAncestor { .. })
        ));
    }

    #[test]
    fn bad_revision_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let raw = Repository::init(dir.path()).unwrap();
        commit_file(&raw, "a.txt", "a");
        assert!(matches!(
            check(dir.path(), &range("no-such-ref")),
            Err(RewriteError::UnresolvedRevision { .. })
        ));
    }

    #[test]
    fn single_commit_may_be_the_tip() {
        let dir = tempfile::tempdir().unwrap();
        let raw = Repository::init(dir.path()).unwrap();
        commit_file(&raw, "a.txt", "a");
        let b = commit_file(&raw, "b.txt", "b");
        let scope = ScopeMode::SingleCommit {
            target: b.to_string(),
            message: None,
        };
        let (_, ready) = check(dir.path(), &scope).unwrap();
        assert_eq!(ready.bound, Some(b));
    }

    #[test]
    fn pending_journal_blocks_new_runs() {
        let dir = tempfile::tempdir().unwrap();
        let raw = Repository::init(dir.path()).unwrap();
        commit_file(&raw, "a.txt", "a");
        fs::create_dir_all(raw.path().join(crate::backend::journal::JOURNAL_DIR)).unwrap();
        assert!(matches!(
            check(dir.path(), &ScopeMode::WholeHistory),
            Err(RewriteError::OperationInProgress { .. })
        ));
    }
}
