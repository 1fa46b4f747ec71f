//! Library-level access to the repository being rewritten.

use std::path::{Path, PathBuf};

use git2::{BranchType, ErrorCode, Oid, Repository, RepositoryState, StatusOptions};

use crate::error::{Result, RewriteError};
use crate::model::Identity;

/// An opened, non-bare repository.
pub struct Repo {
    inner: Repository,
    root: PathBuf,
}

/// The branch HEAD points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Branch {
    /// Full ref name, e.g. `refs/heads/main`
    pub refname: String,
    /// Short name, e.g. `main`
    pub name: String,
    pub tip: Oid,
}

impl Repo {
    /// Opens the repository containing `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let inner = Repository::discover(path).map_err(|e| {
            if e.code() == ErrorCode::NotFound {
                RewriteError::NotARepository {
                    path: path.display().to_string(),
                }
            } else {
                RewriteError::Git(e)
            }
        })?;

        let root = match inner.workdir() {
            Some(dir) => dir.to_path_buf(),
            None => {
                return Err(RewriteError::BareRepository {
                    path: inner.path().display().to_string(),
                });
            }
        };

        Ok(Self { inner, root })
    }

    pub fn raw(&self) -> &Repository {
        &self.inner
    }

    /// Working tree root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The `.git` directory.
    pub fn git_dir(&self) -> &Path {
        self.inner.path()
    }

    /// The checked-out branch. Fails on an unborn or detached HEAD.
    pub fn current_branch(&self) -> Result<Branch> {
        let head = match self.inner.head() {
            Ok(head) => head,
            Err(e) if e.code() == ErrorCode::UnbornBranch => {
                return Err(RewriteError::EmptyRepository);
            }
            Err(e) => return Err(e.into()),
        };

        if !head.is_branch() {
            return Err(RewriteError::DetachedHead);
        }

        let refname = head.name().unwrap_or_default().to_string();
        let name = head.shorthand().unwrap_or_default().to_string();
        let tip = head.peel_to_commit()?.id();
        Ok(Branch { refname, name, tip })
    }

    /// Counts index and working-tree modifications to tracked files,
    /// submodule pointers included.
    pub fn uncommitted_changes(&self) -> Result<usize> {
        let mut opts = StatusOptions::new();
        opts.include_untracked(false).include_ignored(false);
        let statuses = self.inner.statuses(Some(&mut opts))?;
        Ok(statuses.len())
    }

    /// Names a merge, rebase, cherry-pick or similar the repository is in the
    /// middle of, if any.
    pub fn operation_in_progress(&self) -> Option<String> {
        let label = match self.inner.state() {
            RepositoryState::Clean => return None,
            RepositoryState::Merge => "merge",
            RepositoryState::Revert | RepositoryState::RevertSequence => "revert",
            RepositoryState::CherryPick | RepositoryState::CherryPickSequence => "cherry-pick",
            RepositoryState::Bisect => "bisect",
            RepositoryState::Rebase
            | RepositoryState::RebaseInteractive
            | RepositoryState::RebaseMerge => "rebase",
            RepositoryState::ApplyMailbox | RepositoryState::ApplyMailboxOrRebase => "am",
        };
        Some(label.to_string())
    }

    /// Resolves a ref, hash or revision expression to the commit it names.
    pub fn resolve_commit(&self, spec: &str) -> Result<Oid> {
        let unresolved = || RewriteError::UnresolvedRevision {
            spec: spec.to_string(),
        };
        let object = self.inner.revparse_single(spec).map_err(|_| unresolved())?;
        let commit = object.peel_to_commit().map_err(|_| unresolved())?;
        Ok(commit.id())
    }

    /// True when `ancestor` is reachable from `tip` and is not `tip` itself.
    pub fn is_strict_ancestor(&self, ancestor: Oid, tip: Oid) -> Result<bool> {
        if ancestor == tip {
            return Ok(false);
        }
        Ok(self.inner.graph_descendant_of(tip, ancestor)?)
    }

    pub fn parent_count(&self, id: Oid) -> Result<usize> {
        Ok(self.inner.find_commit(id)?.parent_count())
    }

    /// `user.name` / `user.email` from git config, when both are set.
    pub fn user_identity(&self) -> Option<Identity> {
        let config = self.inner.config().ok()?;
        let name = config.get_string("user.name").ok()?;
        let email = config.get_string("user.email").ok()?;
        Identity::new(&name, &email).ok()
    }

    /// The remote configured as upstream for `branch` (short name).
    pub fn upstream_remote(&self, branch: &str) -> Option<String> {
        let config = self.inner.config().ok()?;
        config.get_string(&format!("branch.{}.remote", branch)).ok()
    }

    /// Where the local remote-tracking ref for `remote/branch` points.
    pub fn remote_tracking_tip(&self, remote: &str, branch: &str) -> Option<Oid> {
        self.inner
            .find_branch(&format!("{}/{}", remote, branch), BranchType::Remote)
            .ok()
            .and_then(|b| b.get().target())
    }

    /// Configured remotes as (name, url).
    pub fn remotes(&self) -> Result<Vec<(String, String)>> {
        let names = self.inner.remotes()?;
        let mut out = Vec::new();
        for name in names.iter().flatten() {
            let remote = self.inner.find_remote(name)?;
            out.push((name.to_string(), remote.url().unwrap_or_default().to_string()));
        }
        Ok(out)
    }

    /// Every local branch and tag ref with the object it points at.
    pub fn branch_and_tag_refs(&self) -> Result<Vec<(String, Oid)>> {
        let mut out = Vec::new();
        for glob in ["refs/heads/*", "refs/tags/*"] {
            for reference in self.inner.references_glob(glob)? {
                let reference = reference?;
                if let (Some(name), Some(target)) = (reference.name(), reference.target()) {
                    out.push((name.to_string(), target));
                }
            }
        }
        Ok(out)
    }
}
