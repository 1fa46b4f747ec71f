//! Commit-by-commit replay.
//!
//! Each commit in the plan is re-created on top of the previously replayed
//! one with its tree untouched, so new hashes propagate forward. Refs only
//! move once every commit has been replayed; until then the live history is
//! exactly what it was.

use std::collections::HashMap;

use git2::{Commit, ObjectType, Oid};

use super::RewriteBackend;
use super::journal::{Journal, JournalEntry, JournalRef};
use crate::error::{Result, RewriteError};
use crate::model::{AuthorChange, Identity, RewriteResult, RewriteStatus, TargetIdentity};
use crate::range::RewritePlan;
use crate::repo::Repo;

const REFLOG_MESSAGE: &str = "history-rewrite: replace commit identities";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplayState {
    Idle,
    Replaying,
    /// Re-creating the given original commit.
    Amending(Oid),
    Continuing,
    Complete,
    Failed(String),
}

impl ReplayState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ReplayState::Complete | ReplayState::Failed(_))
    }
}

/// A single replay over a plan, advanced one transition at a time.
pub struct Replay<'r> {
    repo: &'r Repo,
    plan: &'r RewritePlan,
    target: &'r TargetIdentity,
    scope: String,
    state: ReplayState,
    cursor: usize,
    rewritten: HashMap<Oid, Oid>,
    changes: Vec<AuthorChange>,
    touched: usize,
    journal: Option<Journal>,
    owns_journal: bool,
    /// Refs this replay has already moved, with their original targets.
    moved: Vec<(String, Oid)>,
}

impl<'r> Replay<'r> {
    pub fn new(repo: &'r Repo, plan: &'r RewritePlan, target: &'r TargetIdentity, scope: &str) -> Self {
        Self {
            repo,
            plan,
            target,
            scope: scope.to_string(),
            state: ReplayState::Idle,
            cursor: 0,
            rewritten: HashMap::new(),
            changes: Vec::new(),
            touched: 0,
            journal: None,
            owns_journal: false,
            moved: Vec::new(),
        }
    }

    pub fn state(&self) -> &ReplayState {
        &self.state
    }

    /// The rewritten id of an original commit, once replayed.
    pub fn rewritten(&self, original: Oid) -> Option<Oid> {
        self.rewritten.get(&original).copied()
    }

    /// Performs one state transition.
    pub fn step(&mut self) -> &ReplayState {
        let next = match self.transition() {
            Ok(next) => next,
            Err(e) => {
                log::warn!("replay failed: {}", e);
                ReplayState::Failed(e.to_string())
            }
        };
        log::debug!("replay: {:?} -> {:?}", self.state, next);
        self.state = next;
        &self.state
    }

    /// Steps until the replay completes or fails.
    pub fn run(&mut self) -> &ReplayState {
        while !self.state.is_terminal() {
            self.step();
        }
        &self.state
    }

    fn transition(&mut self) -> Result<ReplayState> {
        match self.state.clone() {
            ReplayState::Idle => {
                self.journal = Some(Journal::begin(self.repo.git_dir(), self.journal_entry())?);
                self.owns_journal = true;
                Ok(ReplayState::Replaying)
            }
            ReplayState::Replaying => self.next_or_complete(),
            ReplayState::Amending(id) => {
                self.replay_commit(id).map_err(|e| RewriteError::ReplayFailed {
                    commit: id.to_string(),
                    reason: e.to_string(),
                })?;
                Ok(ReplayState::Continuing)
            }
            ReplayState::Continuing => {
                self.cursor += 1;
                if let Some(journal) = self.journal.as_mut() {
                    journal.record_progress(self.cursor)?;
                }
                self.next_or_complete()
            }
            terminal => Ok(terminal),
        }
    }

    fn next_or_complete(&mut self) -> Result<ReplayState> {
        match self.plan.commits.get(self.cursor) {
            Some(id) => Ok(ReplayState::Amending(*id)),
            None => {
                self.move_refs()?;
                if let Some(journal) = self.journal.take() {
                    journal.finish()?;
                    self.owns_journal = false;
                }
                Ok(ReplayState::Complete)
            }
        }
    }

    fn journal_entry(&self) -> JournalEntry {
        JournalEntry {
            started_at: chrono::Utc::now().to_rfc3339(),
            scope: self.scope.clone(),
            total: self.plan.commits.len(),
            completed: 0,
            refs: self
                .plan
                .refs
                .iter()
                .map(|(name, id)| JournalRef {
                    name: name.clone(),
                    original: id.to_string(),
                })
                .collect(),
        }
    }

    fn replay_commit(&mut self, id: Oid) -> Result<()> {
        let handle: &'r Repo = self.repo;
        let repo = handle.raw();
        let original = repo.find_commit(id)?;

        let original_parents: Vec<Oid> = original.parent_ids().collect();
        let parent_ids: Vec<Oid> = original_parents
            .iter()
            .map(|p| self.rewritten.get(p).copied().unwrap_or(*p))
            .collect();
        let parents_changed = parent_ids != original_parents;

        let marked = self.plan.marked.contains(&id);
        let new_message = match &self.plan.message {
            Some((target, message)) if *target == id => Some(message.as_str()),
            _ => None,
        };

        let identity_changed = marked
            && !(self.target.author.matches(&original.author())
                && self.target.committer.matches(&original.committer()));
        let message_changed = new_message.is_some_and(|m| original.message_raw() != Some(m));

        if marked {
            self.touched += 1;
        }

        if !parents_changed && !identity_changed && !message_changed {
            log::debug!("{} unchanged", id);
            self.rewritten.insert(id, id);
            return Ok(());
        }

        let (author, committer) = if marked {
            (
                self.target.author.resign(&original.author())?,
                self.target.committer.resign(&original.committer())?,
            )
        } else {
            (original.author().to_owned(), original.committer().to_owned())
        };

        let message = match new_message {
            Some(m) => m.to_string(),
            None => message_of(&original),
        };

        let tree = original.tree()?;
        let parents = parent_ids
            .iter()
            .map(|p| repo.find_commit(*p))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let parent_refs: Vec<&Commit<'_>> = parents.iter().collect();

        let new_id = repo.commit(None, &author, &committer, &message, &tree, &parent_refs)?;
        log::debug!("{} -> {}", id, new_id);

        if identity_changed {
            self.changes.push(AuthorChange {
                old_id: id,
                new_id,
                before: Identity::from_signature(&original.author())?,
                after: self.target.author.clone(),
            });
        }
        self.rewritten.insert(id, new_id);
        Ok(())
    }

    /// Points every planned ref at its rewritten commit. All refs are checked
    /// before any is moved.
    fn move_refs(&mut self) -> Result<()> {
        let handle: &'r Repo = self.repo;
        let plan: &'r RewritePlan = self.plan;
        let repo = handle.raw();

        for (name, expected) in &plan.refs {
            let current = repo.find_reference(name)?.target();
            if current != Some(*expected) {
                return Err(RewriteError::RefMoved {
                    name: name.clone(),
                    expected: expected.to_string(),
                });
            }
        }

        for (name, expected) in &plan.refs {
            let object = repo.find_object(*expected, None)?;
            match object.kind() {
                Some(ObjectType::Commit) => {
                    let Some(new_id) = self.rewritten(*expected) else {
                        continue;
                    };
                    if new_id == *expected {
                        continue;
                    }
                    repo.reference_matching(name, new_id, true, *expected, REFLOG_MESSAGE)
                        .map_err(|_| RewriteError::RefMoved {
                            name: name.clone(),
                            expected: expected.to_string(),
                        })?;
                    self.moved.push((name.clone(), *expected));
                }
                Some(ObjectType::Tag) => {
                    self.retag(name, *expected)?;
                }
                _ => log::warn!("leaving {} alone: not a commit or tag", name),
            }
        }
        Ok(())
    }

    /// Re-creates an annotated tag on the rewritten commit it pointed at.
    fn retag(&mut self, name: &str, tag_id: Oid) -> Result<()> {
        let handle: &'r Repo = self.repo;
        let repo = handle.raw();
        let tag = repo.find_tag(tag_id)?;
        let Some(new_id) = self.rewritten(tag.target_id()) else {
            return Ok(());
        };
        if new_id == tag.target_id() {
            return Ok(());
        }

        let short = name.strip_prefix("refs/tags/").unwrap_or(name);
        let target = repo.find_object(new_id, Some(ObjectType::Commit))?;
        let message = tag.message().unwrap_or_default();
        match tag.tagger() {
            Some(tagger) => {
                repo.tag(short, &target, &tagger, message, true)?;
            }
            None => {
                let sig = repo.signature()?;
                repo.tag(short, &target, &sig, message, true)?;
            }
        }
        self.moved.push((name.to_string(), tag_id));
        Ok(())
    }

    /// Puts back any ref this replay moved and discards the journal.
    /// Original commits are never deleted, so this always returns the
    /// repository to its pre-replay state.
    pub fn abort(&mut self) -> Result<()> {
        let handle: &'r Repo = self.repo;
        for (name, original) in self.moved.drain(..).rev() {
            handle.raw().reference(&name, original, true, "history-rewrite: abort")?;
            log::info!("restored {} to {}", name, original);
        }
        self.journal = None;
        if self.owns_journal {
            Journal::discard(handle.git_dir())?;
            self.owns_journal = false;
        }
        Ok(())
    }

    /// Summarises the replay. Id lists are empty unless it succeeded.
    pub fn into_result(self) -> RewriteResult {
        let status = match &self.state {
            ReplayState::Complete => RewriteStatus::Succeeded,
            ReplayState::Failed(reason) => RewriteStatus::Failed(reason.clone()),
            _ => RewriteStatus::Failed("replay did not finish".to_string()),
        };
        let succeeded = status == RewriteStatus::Succeeded;
        let mapped = |ids: &[Oid]| -> Vec<Oid> {
            if !succeeded {
                return Vec::new();
            }
            ids.iter()
                .filter_map(|id| self.rewritten.get(id).copied())
                .collect()
        };
        let rewritten = mapped(&self.plan.commits);
        let mutated = mapped(&self.plan.mutation_list());

        RewriteResult {
            touched: self.touched,
            merges_skipped: self.plan.merges.len(),
            changes: self.changes,
            status,
            rewritten,
            mutated,
            dropped_remotes: Vec::new(),
        }
    }
}

fn message_of(commit: &Commit<'_>) -> String {
    match commit.message_raw() {
        Some(m) => m.to_string(),
        None => {
            log::warn!("{} has a non-UTF-8 message; replaying it lossily", commit.id());
            String::from_utf8_lossy(commit.message_raw_bytes()).into_owned()
        }
    }
}

/// Restores refs recorded in the journal of an interrupted replay and removes
/// the journal. Returns the refs that were put back.
pub fn abort_interrupted(repo: &Repo) -> Result<Vec<String>> {
    let entry = Journal::load(repo.git_dir())?.ok_or(RewriteError::NoReplayInProgress)?;
    let raw = repo.raw();
    let mut restored = Vec::new();

    for journal_ref in &entry.refs {
        let original = Oid::from_str(&journal_ref.original)?;
        let current = raw.find_reference(&journal_ref.name).ok().and_then(|r| r.target());
        if current != Some(original) {
            raw.reference(&journal_ref.name, original, true, "history-rewrite: abort")?;
            restored.push(journal_ref.name.clone());
        }
    }

    Journal::discard(repo.git_dir())?;
    log::info!(
        "aborted replay started {} ({} of {} commits done)",
        entry.started_at,
        entry.completed,
        entry.total
    );
    Ok(restored)
}

/// The default backend: replays commits one at a time through git2.
pub struct SequentialBackend {
    target: TargetIdentity,
    scope: String,
}

impl SequentialBackend {
    pub fn new(target: TargetIdentity, scope: String) -> Self {
        Self { target, scope }
    }
}

impl RewriteBackend for SequentialBackend {
    fn name(&self) -> &'static str {
        "sequential"
    }

    fn needs_full_copy(&self) -> bool {
        false
    }

    fn rewrite(&mut self, repo: &Repo, plan: &RewritePlan) -> Result<RewriteResult> {
        let mut replay = Replay::new(repo, plan, &self.target, &self.scope);
        if let ReplayState::Failed(reason) = replay.run().clone() {
            log::warn!("aborting replay: {}", reason);
            replay.abort()?;
        }
        Ok(replay.into_result())
    }
}
