#![allow(dead_code)]

use std::path::Path;

use git2::{Commit, Oid, Repository, Signature, build::CheckoutBuilder};
use git_history_rewrite::cli::RunOptions;
use git_history_rewrite::config::Config;
use git_history_rewrite::error::Result;
use git_history_rewrite::finalize::{FinalizePolicy, PublishTarget, Publisher};
use git_history_rewrite::model::ScopeMode;
use git_history_rewrite::prompt::{ConfirmPrompter, SelectPrompter};

pub const TARGET_NAME: &str = "Jane Doe";
pub const TARGET_EMAIL: &str = "jane@example.com";

/// Commits `file` (content names its author) on top of `parents` without
/// touching HEAD.
pub fn commit_file(repo: &Repository, who: &str, file: &str, parents: &[Oid]) -> Oid {
    let blob = repo.blob(format!("{} by {}\n", file, who).as_bytes()).unwrap();
    let base = parents
        .first()
        .map(|p| repo.find_commit(*p).unwrap().tree().unwrap());
    let mut builder = repo.treebuilder(base.as_ref()).unwrap();
    builder.insert(file, blob, 0o100644).unwrap();
    let tree = repo.find_tree(builder.write().unwrap()).unwrap();

    let sig = Signature::now(who, &format!("{}@example.com", who.to_lowercase())).unwrap();
    let parents: Vec<Commit<'_>> = parents.iter().map(|p| repo.find_commit(*p).unwrap()).collect();
    let refs: Vec<&Commit<'_>> = parents.iter().collect();
    repo.commit(None, &sig, &sig, &format!("add {}", file), &tree, &refs)
        .unwrap()
}

/// Full name of the branch HEAD points at, even while it is unborn.
pub fn head_branch(repo: &Repository) -> String {
    repo.find_reference("HEAD")
        .unwrap()
        .symbolic_target()
        .unwrap()
        .to_string()
}

/// Moves the checked-out branch to `tip` and syncs index and working tree.
pub fn checkout(repo: &Repository, tip: Oid) {
    let branch = head_branch(repo);
    repo.reference(&branch, tip, true, "test").unwrap();
    repo.checkout_head(Some(CheckoutBuilder::new().force()))
        .unwrap();
}

pub fn tip(repo: &Repository) -> Oid {
    repo.head().unwrap().target().unwrap()
}

/// The history used throughout:
///
/// ```text
/// A - B - C - D   (current branch; D merges C and E)
///  \         /
///   E -------
/// ```
pub struct Scenario {
    pub dir: tempfile::TempDir,
    pub a: Oid,
    pub b: Oid,
    pub c: Oid,
    pub d: Oid,
    pub e: Oid,
}

impl Scenario {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        let a = commit_file(&repo, "Alice", "a.txt", &[]);
        let b = commit_file(&repo, "Alice", "b.txt", &[a]);
        let c = commit_file(&repo, "Bob", "c.txt", &[b]);
        let e = commit_file(&repo, "Eve", "e.txt", &[a]);
        let d = commit_file(&repo, "Alice", "d.txt", &[c, e]);
        checkout(&repo, d);
        Self { dir, a, b, c, d, e }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn repo(&self) -> Repository {
        Repository::open(self.path()).unwrap()
    }

    pub fn options(&self, scope: ScopeMode) -> RunOptions {
        RunOptions {
            repo: self.path().to_path_buf(),
            scope,
            fast: false,
            assume_yes: true,
            policy: Some(FinalizePolicy::Manual),
            config: target_config(),
        }
    }
}

pub fn target_config() -> Config {
    let mut config = Config::default();
    config.identity.author_name = Some(TARGET_NAME.to_string());
    config.identity.author_email = Some(TARGET_EMAIL.to_string());
    config
}

pub fn is_target(commit: &Commit<'_>) -> bool {
    commit.author().name() == Some(TARGET_NAME)
        && commit.author().email() == Some(TARGET_EMAIL)
        && commit.committer().name() == Some(TARGET_NAME)
        && commit.committer().email() == Some(TARGET_EMAIL)
}

pub struct Answer(pub bool);

impl ConfirmPrompter for Answer {
    fn confirm(&mut self, _prompt: &str, _default: bool) -> std::result::Result<bool, String> {
        Ok(self.0)
    }
}

/// Picks the item at a fixed index.
pub struct Pick(pub usize);

impl SelectPrompter for Pick {
    fn select(
        &mut self,
        _prompt: &str,
        _items: &[String],
        _default: usize,
    ) -> std::result::Result<usize, String> {
        Ok(self.0)
    }
}

/// Fails the test if asked anything.
pub struct NoPrompt;

impl ConfirmPrompter for NoPrompt {
    fn confirm(&mut self, prompt: &str, _default: bool) -> std::result::Result<bool, String> {
        panic!("unexpected confirmation: {}", prompt)
    }
}

impl SelectPrompter for NoPrompt {
    fn select(
        &mut self,
        prompt: &str,
        _items: &[String],
        _default: usize,
    ) -> std::result::Result<usize, String> {
        panic!("unexpected selection: {}", prompt)
    }
}

#[derive(Default)]
pub struct RecordingPublisher {
    pub pushed: Vec<PublishTarget>,
}

impl Publisher for RecordingPublisher {
    fn publish(&mut self, _root: &Path, target: &PublishTarget) -> Result<()> {
        self.pushed.push(target.clone());
        Ok(())
    }
}
