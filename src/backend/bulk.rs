//! Whole-history rewrite in one pass through `git filter-repo`.
//!
//! filter-repo rewrites the object store in place. The old commits do not
//! survive, so a full copy of the repository must exist before this runs.
//! Remotes are removed afterwards so nothing is pushed to a stale remote by
//! accident.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use git2::{Oid, Repository, Sort};

use super::RewriteBackend;
use crate::error::Result;
use crate::git;
use crate::model::{AuthorChange, Identity, RewriteResult, RewriteStatus, TargetIdentity};
use crate::range::RewritePlan;
use crate::repo::Repo;

/// Where filter-repo writes its old → new commit map, relative to the git dir.
const COMMIT_MAP: &str = "filter-repo/commit-map";

/// Rewrites every branch and tag in one filter-repo run.
pub struct BulkBackend {
    target: TargetIdentity,
    /// Explicit filter-repo executable; looked up on `PATH` when unset.
    tool: Option<PathBuf>,
}

impl BulkBackend {
    pub fn new(target: TargetIdentity) -> Self {
        Self { target, tool: None }
    }

    /// Uses the filter-repo executable at `tool` instead of searching `PATH`.
    pub fn with_tool(target: TargetIdentity, tool: PathBuf) -> Self {
        Self {
            target,
            tool: Some(tool),
        }
    }
}

/// Encodes `value` as a Python bytes literal.
pub(crate) fn python_bytes(value: &str) -> String {
    let mut out = String::from("b'");
    for byte in value.bytes() {
        match byte {
            b'\\' => out.push_str("\\\\"),
            b'\'' => out.push_str("\\'"),
            0x20..=0x7e => out.push(byte as char),
            _ => out.push_str(&format!("\\x{:02x}", byte)),
        }
    }
    out.push('\'');
    out
}

/// Body of the `--commit-callback` that stamps the target identity onto
/// every commit with fewer than two parents.
pub(crate) fn commit_callback(target: &TargetIdentity) -> String {
    format!(
        "if len(commit.parents) < 2:\n    \
         commit.author_name = {}\n    \
         commit.author_email = {}\n    \
         commit.committer_name = {}\n    \
         commit.committer_email = {}\n",
        python_bytes(&target.author.name),
        python_bytes(&target.author.email),
        python_bytes(&target.committer.name),
        python_bytes(&target.committer.email),
    )
}

/// Parses filter-repo's commit map: a header line followed by
/// `<old> <new>` pairs.
pub(crate) fn parse_commit_map(body: &str) -> HashMap<Oid, Oid> {
    body.lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let old = Oid::from_str(parts.next()?).ok()?;
            let new = Oid::from_str(parts.next()?).ok()?;
            Some((old, new))
        })
        .collect()
}

impl RewriteBackend for BulkBackend {
    fn name(&self) -> &'static str {
        "bulk"
    }

    fn needs_full_copy(&self) -> bool {
        true
    }

    fn rewrite(&mut self, repo: &Repo, plan: &RewritePlan) -> Result<RewriteResult> {
        // The originals are gone once filter-repo finishes, so read the
        // "before" side now.
        let mut before = Vec::new();
        for id in plan.mutation_list() {
            let commit = repo.raw().find_commit(id)?;
            let author = commit.author();
            if !(self.target.author.matches(&author)
                && self.target.committer.matches(&commit.committer()))
            {
                before.push((id, Identity::from_signature(&author)?));
            }
        }

        let remotes = repo.remotes()?;
        let refs: Vec<String> = plan.refs.iter().map(|(name, _)| name.clone()).collect();

        let run = match &self.tool {
            Some(tool) => Ok(tool.clone()),
            None => git::ensure_tool(git::FILTER_REPO),
        }
        .and_then(|tool| {
            log::info!("running git filter-repo over {} commit(s)", plan.commits.len());
            git::filter_repo(&tool, repo.root(), &commit_callback(&self.target), &refs)
        });
        if let Err(e) = run {
            log::warn!("bulk rewrite failed: {}", e);
            return Ok(RewriteResult {
                touched: 0,
                merges_skipped: plan.merges.len(),
                changes: Vec::new(),
                status: RewriteStatus::Failed(e.to_string()),
                rewritten: Vec::new(),
                mutated: Vec::new(),
                dropped_remotes: Vec::new(),
            });
        }

        // Reopen: the object store was replaced underneath the old handle.
        let fresh = Repository::open(repo.git_dir())?;
        for name in fresh.remotes()?.iter().flatten() {
            log::info!("removing remote {}", name);
            fresh.remote_delete(name)?;
        }

        let map_path = repo.git_dir().join(COMMIT_MAP);
        let commit_map = match fs::read_to_string(&map_path) {
            Ok(body) => parse_commit_map(&body),
            Err(e) => {
                log::warn!("cannot read {}: {}", map_path.display(), e);
                HashMap::new()
            }
        };

        let changes = before
            .into_iter()
            .map(|(old_id, identity)| AuthorChange {
                old_id,
                new_id: commit_map.get(&old_id).copied().unwrap_or_else(Oid::zero),
                before: identity,
                after: self.target.author.clone(),
            })
            .collect();

        let map_ids = |ids: &[Oid]| -> Vec<Oid> {
            ids.iter()
                .filter_map(|id| commit_map.get(id).copied())
                .filter(|id| !id.is_zero())
                .collect()
        };
        let (rewritten, mutated) = if commit_map.is_empty() {
            let mut walk = fresh.revwalk()?;
            walk.set_sorting(Sort::TOPOLOGICAL | Sort::REVERSE)?;
            for name in &refs {
                walk.push_ref(name)?;
            }
            let all = walk.collect::<std::result::Result<Vec<_>, _>>()?;
            let mut non_merges = Vec::new();
            for id in &all {
                if fresh.find_commit(*id)?.parent_count() < 2 {
                    non_merges.push(*id);
                }
            }
            (all, non_merges)
        } else {
            (map_ids(&plan.commits), map_ids(&plan.mutation_list()))
        };

        Ok(RewriteResult {
            touched: plan.marked.len(),
            merges_skipped: plan.merges.len(),
            changes,
            status: RewriteStatus::Succeeded,
            rewritten,
            mutated,
            dropped_remotes: remotes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> TargetIdentity {
        TargetIdentity {
            author: Identity::new("Jane O'Neil", "jane@example.com").unwrap(),
            committer: Identity::new("Build Bot", "bot@example.com").unwrap(),
        }
    }

    #[test]
    fn python_bytes_escapes_quotes_and_backslashes() {
        assert_eq!(python_bytes("O'Neil"), "b'O\\'Neil'");
        assert_eq!(python_bytes("a\\b"), "b'a\\\\b'");
    }

    #[test]
    fn python_bytes_hex_encodes_non_ascii() {
        assert_eq!(python_bytes("Jos\u{e9}"), "b'Jos\\xc3\\xa9'");
    }

    #[test]
    fn callback_leaves_merges_alone() {
        let cb = commit_callback(&target());
        assert!(cb.starts_with("if len(commit.parents) < 2:\n"));
        assert!(cb.contains("    commit.author_name = b'Jane O\\'Neil'\n"));
        assert!(cb.contains("    commit.committer_email = b'bot@example.com'\n"));
    }

    #[test]
    fn commit_map_skips_header() {
        let body = "old                                      new\n\
                    1111111111111111111111111111111111111111 2222222222222222222222222222222222222222\n";
        let map = parse_commit_map(body);
        assert_eq!(map.len(), 1);
        let old = Oid::from_str("1111111111111111111111111111111111111111").unwrap();
        let new = Oid::from_str("2222222222222222222222222222222222222222").unwrap();
        assert_eq!(map.get(&old), Some(&new));
    }

    #[cfg(unix)]
    mod with_fake_tool {
        use super::*;
        use crate::model::ScopeMode;
        use crate::validate::check;
        use git2::Signature;
        use std::os::unix::fs::PermissionsExt;
        use std::path::Path;

        fn commit(repo: &Repository, who: &str, file: &str, parents: &[Oid]) -> Oid {
            let root = repo.workdir().unwrap();
            fs::write(root.join(file), who).unwrap();
            let mut index = repo.index().unwrap();
            index.add_path(Path::new(file)).unwrap();
            index.write().unwrap();
            let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
            let sig = Signature::now(who, &format!("{}@example.com", who)).unwrap();
            let parents: Vec<_> = parents.iter().map(|p| repo.find_commit(*p).unwrap()).collect();
            let refs: Vec<&git2::Commit> = parents.iter().collect();
            repo.commit(Some("HEAD"), &sig, &sig, file, &tree, &refs).unwrap()
        }

        /// Writes an executable shell script standing in for filter-repo.
        fn script(dir: &Path, body: &str) -> PathBuf {
            let path = dir.join("git-filter-repo");
            fs::write(&path, format!("#!/bin/sh\n{}", body)).unwrap();
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
            path
        }

        struct Fixture {
            dir: tempfile::TempDir,
            tools: tempfile::TempDir,
            ids: Vec<Oid>,
        }

        fn fixture() -> Fixture {
            let dir = tempfile::tempdir().unwrap();
            let raw = Repository::init(dir.path()).unwrap();
            let a = commit(&raw, "alice", "a.txt", &[]);
            let b = commit(&raw, "bob", "b.txt", &[a]);
            raw.branch("backup/rewrite/old-20240101-000000", &raw.find_commit(a).unwrap(), false)
                .unwrap();
            raw.remote("origin", "https://example.invalid/repo.git")
                .unwrap();
            Fixture {
                dir,
                tools: tempfile::tempdir().unwrap(),
                ids: vec![a, b],
            }
        }

        fn plan(repo: &Repo) -> RewritePlan {
            let (_, ready) = check(repo.root(), &ScopeMode::WholeHistory).unwrap();
            crate::range::resolve_excluding(
                repo,
                &ScopeMode::WholeHistory,
                &ready,
                Some("backup/rewrite"),
            )
            .unwrap()
        }

        #[test]
        fn rewrite_reads_commit_map_and_drops_remotes() {
            let f = fixture();
            let map: String = f.ids.iter().map(|id| format!("{} {}\n", id, id)).collect();
            let tool = script(
                f.tools.path(),
                &format!(
                    "printf '%s\\n' \"$@\" > .git/fake-args\n\
                     mkdir -p .git/filter-repo\n\
                     cat > .git/filter-repo/commit-map <<'MAP'\n\
                     old new\n{}MAP\n",
                    map
                ),
            );

            let repo = Repo::open(f.dir.path()).unwrap();
            let plan = plan(&repo);
            let mut backend = BulkBackend::with_tool(target(), tool);
            let result = backend.rewrite(&repo, &plan).unwrap();

            assert!(result.succeeded());
            assert_eq!(result.touched, 2);
            assert_eq!(result.changes.len(), 2);
            assert_eq!(result.changes[0].new_id, f.ids[0]);
            assert_eq!(result.rewritten, f.ids);
            assert_eq!(result.mutated, f.ids);
            assert_eq!(result.dropped_remotes.len(), 1);
            assert_eq!(result.dropped_remotes[0].0, "origin");
            assert!(Repository::open(f.dir.path()).unwrap().remotes().unwrap().is_empty());

            let args = fs::read_to_string(f.dir.path().join(".git/fake-args")).unwrap();
            let args: Vec<&str> = args.lines().collect();
            assert_eq!(&args[..2], ["--force", "--commit-callback"]);
            let refs = &args[args.iter().position(|a| *a == "--refs").unwrap() + 1..];
            assert_eq!(refs.len(), 1);
            assert!(refs[0].starts_with("refs/heads/"));
            assert!(!refs[0].contains("backup/"));
        }

        #[test]
        fn failing_tool_reports_failure_and_keeps_remotes() {
            let f = fixture();
            let tool = script(f.tools.path(), "echo boom >&2\nexit 3\n");

            let repo = Repo::open(f.dir.path()).unwrap();
            let plan = plan(&repo);
            let result = BulkBackend::with_tool(target(), tool)
                .rewrite(&repo, &plan)
                .unwrap();

            assert!(matches!(result.status, RewriteStatus::Failed(ref r) if r.contains("exited")));
            assert!(result.rewritten.is_empty());
            assert_eq!(repo.remotes().unwrap().len(), 1);
        }
    }
}
