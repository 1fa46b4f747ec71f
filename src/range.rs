//! Works out exactly which commits a run will replay and which of those get
//! a new identity.

use std::collections::HashSet;

use git2::{Oid, Sort};

use crate::error::{Result, RewriteError};
use crate::model::ScopeMode;
use crate::repo::Repo;
use crate::validate::Ready;

/// Ordered replay plan produced for a validated scope.
#[derive(Debug, Clone, Default)]
pub struct RewritePlan {
    /// Every commit to replay, parents before children.
    pub commits: Vec<Oid>,
    /// Commits whose author and committer are replaced.
    pub marked: HashSet<Oid>,
    /// Merge commits in the span; replayed with new parents but never mutated.
    pub merges: Vec<Oid>,
    /// Refs moved to the rewritten history at the end, with their current targets.
    pub refs: Vec<(String, Oid)>,
    /// Replacement message for a single commit.
    pub message: Option<(Oid, String)>,
}

impl RewritePlan {
    /// Commits to mutate, oldest first.
    pub fn mutation_list(&self) -> Vec<Oid> {
        self.commits
            .iter()
            .copied()
            .filter(|id| self.marked.contains(id))
            .collect()
    }
}

/// [`resolve_excluding`] with nothing left out.
pub fn resolve(repo: &Repo, scope: &ScopeMode, ready: &Ready) -> Result<RewritePlan> {
    resolve_excluding(repo, scope, ready, None)
}

/// [`resolve`], leaving refs under `refs/heads/<excluded>/` out of a
/// whole-history scope so earlier backups survive it.
pub fn resolve_excluding(
    repo: &Repo,
    scope: &ScopeMode,
    ready: &Ready,
    excluded: Option<&str>,
) -> Result<RewritePlan> {
    let plan = match (scope, ready.bound) {
        (ScopeMode::Range { base }, Some(base_id)) => {
            let chain = first_parent_chain(repo, ready.branch.tip, base_id, false)
                .ok_or_else(|| RewriteError::NotOnFirstParentLine {
                    base: base.clone(),
                    branch: ready.branch.name.clone(),
                })?;
            let mut plan = classify(repo, chain, |_| true)?;
            plan.refs.push((ready.branch.refname.clone(), ready.branch.tip));
            plan
        }
        (ScopeMode::SingleCommit { target, message }, Some(target_id)) => {
            let chain = first_parent_chain(repo, ready.branch.tip, target_id, true)
                .ok_or_else(|| RewriteError::NotOnFirstParentLine {
                    base: target.clone(),
                    branch: ready.branch.name.clone(),
                })?;
            let mut plan = classify(repo, chain, |id| id == target_id)?;
            plan.refs.push((ready.branch.refname.clone(), ready.branch.tip));
            plan.message = message.clone().map(|m| (target_id, m));
            plan
        }
        (ScopeMode::WholeHistory, _) => {
            let hidden = excluded.map(|p| format!("refs/heads/{}/", p.trim_matches('/')));
            let refs: Vec<(String, Oid)> = repo
                .branch_and_tag_refs()?
                .into_iter()
                .filter(|(name, _)| hidden.as_ref().is_none_or(|h| !name.starts_with(h.as_str())))
                .collect();

            let mut walk = repo.raw().revwalk()?;
            walk.set_sorting(Sort::TOPOLOGICAL | Sort::REVERSE)?;
            for (name, _) in &refs {
                walk.push_ref(name)?;
            }
            let commits = walk.collect::<std::result::Result<Vec<_>, _>>()?;
            let mut plan = classify(repo, commits, |_| true)?;
            plan.refs = refs;
            plan
        }
        (_, None) => {
            return Err(RewriteError::UnresolvedRevision {
                spec: scope.lower_bound().unwrap_or_default().to_string(),
            });
        }
    };

    log::info!(
        "scope {}: {} commit(s) to replay, {} to mutate, {} merge(s) skipped",
        scope,
        plan.commits.len(),
        plan.marked.len(),
        plan.merges.len()
    );
    Ok(plan)
}

/// Follows first parents from `tip` down to `stop`, returning the commits
/// oldest first. `stop` itself is included only when `inclusive`. Returns
/// `None` if the root is reached without meeting `stop`.
fn first_parent_chain(repo: &Repo, tip: Oid, stop: Oid, inclusive: bool) -> Option<Vec<Oid>> {
    let mut chain = Vec::new();
    let mut current = repo.raw().find_commit(tip).ok()?;
    loop {
        if current.id() == stop {
            if inclusive {
                chain.push(stop);
            }
            break;
        }
        chain.push(current.id());
        current = current.parent(0).ok()?;
    }
    chain.reverse();
    Some(chain)
}

/// Splits `commits` into mutated commits and merges. Only non-merge commits
/// accepted by `eligible` are marked.
fn classify<F>(repo: &Repo, commits: Vec<Oid>, eligible: F) -> Result<RewritePlan>
where
    F: Fn(Oid) -> bool,
{
    let mut plan = RewritePlan::default();
    for id in &commits {
        if repo.parent_count(*id)? > 1 {
            plan.merges.push(*id);
        } else if eligible(*id) {
            plan.marked.insert(*id);
        }
    }
    plan.commits = commits;
    Ok(plan)
}
