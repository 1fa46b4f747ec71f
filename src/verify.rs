//! Before/after comparison of the identities present in scope.

use std::collections::BTreeSet;

use git2::{Oid, Repository};

use crate::error::Result;
use crate::model::{Identity, TargetIdentity};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    /// Distinct identities before the rewrite, sorted.
    pub before: Vec<Identity>,
    /// Distinct identities after the rewrite, sorted.
    pub after: Vec<Identity>,
    /// Non-merge commits in scope that still do not carry the target.
    pub mismatched: usize,
}

impl Report {
    /// Identities that disappeared.
    pub fn removed(&self) -> Vec<&Identity> {
        self.before.iter().filter(|i| !self.after.contains(i)).collect()
    }

    /// Identities that appeared.
    pub fn added(&self) -> Vec<&Identity> {
        self.after.iter().filter(|i| !self.before.contains(i)).collect()
    }

    pub fn is_unchanged(&self) -> bool {
        self.before == self.after
    }

    /// Human-readable before/after listing.
    pub fn render(&self) -> Vec<String> {
        let mut lines = vec!["Identities before:".to_string()];
        lines.extend(self.before.iter().map(|i| format!("  {}", i)));
        lines.push("Identities after:".to_string());
        lines.extend(self.after.iter().map(|i| {
            let marker = if self.before.contains(i) { " " } else { "+" };
            format!("{} {}", marker, i)
        }));
        if self.is_unchanged() {
            lines.push("No identity changes.".to_string());
        }
        lines
    }
}

/// Compares two identity collections. Pure; fails only if an identity could
/// never have been written to a commit.
pub fn diff(pre: &[Identity], post: &[Identity]) -> Result<Report> {
    let before = distinct(pre)?;
    let after = distinct(post)?;
    Ok(Report {
        before,
        after,
        mismatched: 0,
    })
}

fn distinct(identities: &[Identity]) -> Result<Vec<Identity>> {
    let mut set = BTreeSet::new();
    for identity in identities {
        Identity::new(&identity.name, &identity.email)?;
        set.insert(identity.clone());
    }
    Ok(set.into_iter().collect())
}

/// Author and committer identities of `commits`.
pub fn collect_identities<I>(repo: &Repository, commits: I) -> Result<Vec<Identity>>
where
    I: IntoIterator<Item = Oid>,
{
    let mut out = Vec::new();
    for id in commits {
        let commit = repo.find_commit(id)?;
        out.push(Identity::from_signature(&commit.author())?);
        out.push(Identity::from_signature(&commit.committer())?);
    }
    Ok(out)
}

/// Counts non-merge commits whose author or committer differs from `target`.
pub fn count_mismatched<I>(repo: &Repository, commits: I, target: &TargetIdentity) -> Result<usize>
where
    I: IntoIterator<Item = Oid>,
{
    let mut count = 0;
    for id in commits {
        let commit = repo.find_commit(id)?;
        if commit.parent_count() > 1 {
            continue;
        }
        if !(target.author.matches(&commit.author()) && target.committer.matches(&commit.committer())) {
            count += 1;
        }
    }
    Ok(count)
}
