//! Restorable snapshots taken before any history is touched.
//!
//! Range and single-commit runs keep a branch ref on the old tip; it shares
//! storage with the live history. Whole-history runs copy the entire
//! repository directory, since the bulk strategy discards the old objects.

use std::fs;
use std::path::{Path, PathBuf};

use git2::{BranchType, ObjectType, Oid, Repository, ResetType};
use walkdir::WalkDir;

use crate::backend::journal::Journal;
use crate::config::BackupConfig;
use crate::error::{Result, RewriteError};
use crate::repo::{Branch, Repo};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupHandle {
    /// A branch ref on the pre-rewrite tip.
    Ref {
        /// Full ref name of the backup
        name: String,
        /// Full ref name of the branch it protects
        branch: String,
        tip: Oid,
    },
    /// A full copy of the repository directory.
    Copy {
        path: PathBuf,
        repo_root: PathBuf,
        tip: Oid,
    },
}

impl BackupHandle {
    /// Short name the user can pass back to `restore`.
    pub fn label(&self) -> String {
        match self {
            BackupHandle::Ref { name, .. } => name.trim_start_matches("refs/heads/").to_string(),
            BackupHandle::Copy { path, .. } => path.display().to_string(),
        }
    }

    pub fn tip(&self) -> Oid {
        match self {
            BackupHandle::Ref { tip, .. } | BackupHandle::Copy { tip, .. } => *tip,
        }
    }

    /// Shell commands that restore this backup without this tool.
    pub fn manual_restore(&self) -> String {
        match self {
            BackupHandle::Ref { name, tip, .. } => format!(
                "git reset --hard {}   # backup branch {}",
                tip,
                name.trim_start_matches("refs/heads/")
            ),
            BackupHandle::Copy { path, repo_root, .. } => format!(
                "rm -rf {0} && cp -a {1} {0}",
                repo_root.display(),
                path.display()
            ),
        }
    }

    /// Shell command that deletes this backup.
    pub fn manual_delete(&self) -> String {
        match self {
            BackupHandle::Ref { name, .. } => {
                format!("git branch -D {}", name.trim_start_matches("refs/heads/"))
            }
            BackupHandle::Copy { path, .. } => format!("rm -rf {}", path.display()),
        }
    }
}

pub struct BackupManager<'a> {
    config: &'a BackupConfig,
}

impl<'a> BackupManager<'a> {
    pub fn new(config: &'a BackupConfig) -> Self {
        Self { config }
    }

    fn stamp() -> String {
        chrono::Local::now().format("%Y%m%d-%H%M%S").to_string()
    }

    /// Creates a new, uniquely named backup. Never overwrites an existing one.
    pub fn create(&self, repo: &Repo, branch: &Branch, full_copy: bool) -> Result<BackupHandle> {
        let handle = if full_copy {
            self.create_copy(repo, branch)?
        } else {
            self.create_ref(repo, branch)?
        };
        log::info!("backup created: {}", handle.label());
        Ok(handle)
    }

    fn create_ref(&self, repo: &Repo, branch: &Branch) -> Result<BackupHandle> {
        let base = format!(
            "refs/heads/{}/{}-{}",
            self.config.prefix.trim_matches('/'),
            branch.name,
            Self::stamp()
        );

        let mut name = base.clone();
        let mut n = 1;
        while repo.raw().find_reference(&name).is_ok() {
            n += 1;
            name = format!("{}-{}", base, n);
        }

        repo.raw()
            .reference(&name, branch.tip, false, "history-rewrite: backup")?;

        Ok(BackupHandle::Ref {
            name,
            branch: branch.refname.clone(),
            tip: branch.tip,
        })
    }

    fn create_copy(&self, repo: &Repo, branch: &Branch) -> Result<BackupHandle> {
        let root = repo.root().to_path_buf();
        let root = root.canonicalize().map_err(|e| RewriteError::io(&root, e))?;
        let parent = root.parent().ok_or_else(|| RewriteError::Config {
            message: format!("cannot place a backup next to {}", root.display()),
        })?;
        let dir_name = root
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("repository");

        let base = format!("{}{}-{}", dir_name, self.config.copy_suffix, Self::stamp());
        let mut path = parent.join(&base);
        let mut n = 1;
        while path.exists() {
            n += 1;
            path = parent.join(format!("{}-{}", base, n));
        }

        copy_tree(&root, &path)?;

        Ok(BackupHandle::Copy {
            path,
            repo_root: root,
            tip: branch.tip,
        })
    }

    /// Branch backups under the configured prefix.
    pub fn list(&self, repo: &Repo) -> Result<Vec<(String, Oid)>> {
        let glob = format!("refs/heads/{}/*", self.config.prefix.trim_matches('/'));
        let mut out = Vec::new();
        for reference in repo.raw().references_glob(&glob)? {
            let reference = reference?;
            if let (Some(name), Some(target)) = (reference.name(), reference.target()) {
                out.push((name.trim_start_matches("refs/heads/").to_string(), target));
            }
        }
        out.sort();
        Ok(out)
    }

    /// Finds a backup by branch name or directory path, for `restore`.
    /// A ref backup is restored onto the branch named inside it.
    pub fn find(&self, repo: &Repo, name: &str) -> Result<BackupHandle> {
        let not_found = || RewriteError::BackupNotFound {
            name: name.to_string(),
        };

        let path = Path::new(name);
        if path.is_dir() {
            let copy = Repository::open(path).map_err(|_| not_found())?;
            let tip = copy.head()?.peel_to_commit()?.id();
            return Ok(BackupHandle::Copy {
                path: path.to_path_buf(),
                repo_root: repo.root().to_path_buf(),
                tip,
            });
        }

        let short = name.trim_start_matches("refs/heads/");
        let prefix = format!("{}/", self.config.prefix.trim_matches('/'));
        let branch = short
            .strip_prefix(&prefix)
            .and_then(backed_up_branch)
            .ok_or_else(not_found)?;
        let found = repo
            .raw()
            .find_branch(short, BranchType::Local)
            .map_err(|_| not_found())?;
        let tip = found.get().peel_to_commit()?.id();
        Ok(BackupHandle::Ref {
            name: format!("refs/heads/{}", short),
            branch: format!("refs/heads/{}", branch),
            tip,
        })
    }
}

/// Branch name inside `<branch>-<YYYYmmdd>-<HHMMSS>[-n]`.
fn backed_up_branch(rest: &str) -> Option<&str> {
    fn digits(s: &str, len: usize) -> bool {
        s.len() == len && s.bytes().all(|b| b.is_ascii_digit())
    }
    fn without_stamp(s: &str) -> Option<&str> {
        let (s, time) = s.rsplit_once('-')?;
        let (branch, date) = s.rsplit_once('-')?;
        (digits(time, 6) && digits(date, 8) && !branch.is_empty()).then_some(branch)
    }

    without_stamp(rest).or_else(|| {
        let (s, n) = rest.rsplit_once('-')?;
        if n.is_empty() || !n.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        without_stamp(s)
    })
}

fn ensure_clean(repo: &Repo) -> Result<()> {
    match repo.uncommitted_changes()? {
        0 => Ok(()),
        count => Err(RewriteError::DirtyWorkingTree { count }),
    }
}

/// Puts the repository back to the state captured in `handle`. Works
/// whether or not a replay was interrupted halfway. Refuses while tracked
/// files carry uncommitted changes. After a full-copy restore `repo` is
/// stale and must be reopened.
pub fn restore(repo: &Repo, handle: &BackupHandle) -> Result<()> {
    if let BackupHandle::Copy { .. } = handle {
        ensure_clean(repo)?;
    }
    rollback(repo, handle)
}

/// Undoes a rewrite that just failed. A full copy replaces whatever the
/// failed run left behind in the working tree.
pub fn rollback(repo: &Repo, handle: &BackupHandle) -> Result<()> {
    match handle {
        BackupHandle::Ref { branch, tip, .. } => restore_ref(repo, branch, *tip),
        BackupHandle::Copy {
            path, repo_root, ..
        } => restore_copy(path, repo_root),
    }
}

/// Resets `branch` to `tip`, updating the working tree if it is checked out.
/// A checked-out branch with uncommitted changes is left alone.
pub fn restore_ref(repo: &Repo, branch: &str, tip: Oid) -> Result<()> {
    let raw = repo.raw();
    let head_is_branch = raw
        .head()
        .ok()
        .and_then(|h| h.name().map(|n| n == branch))
        .unwrap_or(false);
    if head_is_branch {
        ensure_clean(repo)?;
    }
    Journal::discard(repo.git_dir())?;

    if head_is_branch {
        let object = raw.find_object(tip, Some(ObjectType::Commit))?;
        raw.reset(&object, ResetType::Hard, None)?;
    } else {
        raw.reference(branch, tip, true, "history-rewrite: restore backup")?;
    }
    log::info!("restored {} to {}", branch, tip);
    Ok(())
}

/// Replaces the contents of `repo_root` with the full copy at `backup`.
pub fn restore_copy(backup: &Path, repo_root: &Path) -> Result<()> {
    if !backup.join(".git").exists() {
        return Err(RewriteError::BackupNotFound {
            name: backup.display().to_string(),
        });
    }

    let entries = fs::read_dir(repo_root).map_err(|e| RewriteError::io(repo_root, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| RewriteError::io(repo_root, e))?;
        let path = entry.path();
        let is_dir = entry
            .file_type()
            .map(|t| t.is_dir())
            .map_err(|e| RewriteError::io(&path, e))?;
        let removed = if is_dir {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        removed.map_err(|e| RewriteError::io(&path, e))?;
    }

    copy_tree(backup, repo_root)?;
    log::info!("restored {} from {}", repo_root.display(), backup.display());
    Ok(())
}

/// Deletes a backup once the user has accepted the rewrite.
pub fn delete(repo: &Repo, handle: &BackupHandle) -> Result<()> {
    match handle {
        BackupHandle::Ref { name, .. } => {
            repo.raw().find_reference(name)?.delete()?;
        }
        BackupHandle::Copy { path, .. } => {
            fs::remove_dir_all(path).map_err(|e| RewriteError::io(path, e))?;
        }
    }
    log::info!("backup deleted: {}", handle.label());
    Ok(())
}

/// Recursively copies `src` into `dest`, preserving symlinks on Unix.
fn copy_tree(src: &Path, dest: &Path) -> Result<()> {
    for entry in WalkDir::new(src).follow_links(false) {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(src).to_path_buf();
            RewriteError::io(path, e.into())
        })?;
        let rel = entry.path().strip_prefix(src).unwrap_or(entry.path());
        let target = dest.join(rel);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&target).map_err(|e| RewriteError::io(&target, e))?;
        } else if file_type.is_symlink() {
            #[cfg(unix)]
            {
                let link =
                    fs::read_link(entry.path()).map_err(|e| RewriteError::io(entry.path(), e))?;
                std::os::unix::fs::symlink(&link, &target)
                    .map_err(|e| RewriteError::io(&target, e))?;
            }
            #[cfg(not(unix))]
            fs::copy(entry.path(), &target).map_err(|e| RewriteError::io(&target, e))?;
        } else {
            fs::copy(entry.path(), &target).map_err(|e| RewriteError::io(&target, e))?;
        }
    }
    Ok(())
}
