use std::path::{Path, PathBuf};

use git2::Oid;

use clap::{Parser, Subcommand};
use console::style;

use crate::backend::{self, BackendKind, RewriteBackend, sequential};
use crate::backup::{self, BackupHandle, BackupManager};
use crate::banner::{BannerInfo, print_banner};
use crate::config::Config;
use crate::error::{ErrorClass, Result, RewriteError};
use crate::finalize::{self, FinalizePolicy, GitPublisher, Outcome, PublishTarget, Publisher};
use crate::model::{RewriteResult, ScopeMode, TargetIdentity};
use crate::prompt::{self, ConfirmPrompter, DialoguerConfirmPrompter, DialoguerSelectPrompter, SelectPrompter};
use crate::range;
use crate::repo::Repo;
use crate::validate;
use crate::verify::{self, Report};

/// Rewrite commit authorship over a commit, a range, or a whole history.
#[derive(Parser, Debug)]
#[command(name = "git-history-rewrite", version, about)]
pub struct Cli {
    /// Repository to operate on
    #[arg(short = 'C', long = "repo", global = true, default_value = ".")]
    pub repo: PathBuf,

    /// Extra configuration file layered over the user and repository files
    #[arg(long, global = true, env = "GIT_HISTORY_REWRITE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Do not ask for confirmation before rewriting
    #[arg(short = 'y', long, global = true)]
    pub yes: bool,

    /// How to finish after a successful rewrite (skips the prompt)
    #[arg(long, global = true, value_enum)]
    pub policy: Option<FinalizePolicy>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Rewrite one commit (and carry its descendants along)
    RewriteCommit {
        /// Commit to rewrite
        hash: String,
        /// Replacement commit message
        message: Option<String>,
    },
    /// Rewrite every commit after BASE on the current branch
    RewriteRange {
        /// Exclusive lower bound (ref or hash)
        base: String,
    },
    /// Rewrite every commit reachable from any branch or tag
    RewriteAll {
        /// Use git-filter-repo for a single-pass rewrite
        #[arg(long)]
        fast: bool,
    },
    /// Restore a backup branch or full-copy directory
    Restore {
        /// Backup branch name or directory path
        backup: String,
    },
    /// Abort an interrupted rewrite and put refs back
    Abort,
    /// List backup branches
    Backups,
}

/// Everything a rewrite run needs, resolved up front.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub repo: PathBuf,
    pub scope: ScopeMode,
    pub fast: bool,
    pub assume_yes: bool,
    pub policy: Option<FinalizePolicy>,
    pub config: Config,
}

/// How a rewrite run ended.
#[derive(Debug)]
pub enum RunOutcome {
    /// The user declined before anything changed.
    Cancelled,
    /// The scope contained nothing to rewrite.
    NothingToDo,
    /// History was rewritten; `outcome` says what happened after.
    Completed {
        result: RewriteResult,
        report: Report,
        /// The checked-out branch and where it points after the rewrite.
        branch: String,
        new_tip: Oid,
        backup: BackupHandle,
        target: Option<PublishTarget>,
        outcome: Outcome,
    },
    /// The rewrite failed and the pre-rewrite state was restored.
    RolledBack {
        reason: String,
        backup: BackupHandle,
    },
    /// Something failed after the backup existed and could not be cleaned up.
    Interrupted {
        error: RewriteError,
        backup: BackupHandle,
    },
}

impl RunOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            RunOutcome::NothingToDo => 0,
            RunOutcome::Completed { outcome, .. } if !outcome.is_failure() => 0,
            _ => 1,
        }
    }
}

/// Runs Validator → Range Resolver → Backup → Rewrite → Verifier →
/// Finalizer. Each stage gates the next; nothing destructive runs before
/// the backup exists.
///
/// # Errors
///
/// Returns `Err` only for failures before the backup was taken, in which
/// case the repository is untouched.
pub fn run_pipeline<C, S, P>(
    opts: &RunOptions,
    confirm: &mut C,
    select: &mut S,
    publisher: &mut P,
) -> Result<RunOutcome>
where
    C: ConfirmPrompter,
    S: SelectPrompter,
    P: Publisher,
{
    run_pipeline_with(opts, confirm, select, publisher, backend::build)
}

/// [`run_pipeline`] with the rewrite backend supplied by `build`.
pub fn run_pipeline_with<C, S, P, B>(
    opts: &RunOptions,
    confirm: &mut C,
    select: &mut S,
    publisher: &mut P,
    build: B,
) -> Result<RunOutcome>
where
    C: ConfirmPrompter,
    S: SelectPrompter,
    P: Publisher,
    B: FnOnce(BackendKind, TargetIdentity, &ScopeMode) -> Box<dyn RewriteBackend>,
{
    let (repo, ready) = validate::check(&opts.repo, &opts.scope)?;
    let target = opts.config.target_identity(repo.user_identity())?;
    let plan = range::resolve_excluding(
        &repo,
        &opts.scope,
        &ready,
        Some(&opts.config.backup.prefix),
    )?;

    if plan.marked.is_empty() {
        println!("{}", style("Nothing to rewrite in this scope.").yellow().bold());
        return Ok(RunOutcome::NothingToDo);
    }

    let selection = backend::detect(&opts.scope, opts.fast);
    if selection.fell_back {
        log::warn!("{} not found; using the sequential backend", crate::git::FILTER_REPO);
        eprintln!(
            "{}",
            style("`git-filter-repo` not found in PATH; falling back to the sequential rewrite.")
                .yellow()
                .bold()
        );
    }
    if opts.scope.is_whole_history()
        && selection.kind == BackendKind::Sequential
        && plan.commits.len() > opts.config.bulk.size_hint
    {
        println!(
            "{}",
            style(format!(
                "{} commits: consider --fast (needs git-filter-repo).",
                plan.commits.len()
            ))
            .cyan()
        );
    }

    let mut rewriter = build(selection.kind, target.clone(), &opts.scope);
    let full_copy = opts.scope.is_whole_history() || rewriter.needs_full_copy();

    print_banner(&BannerInfo {
        target: &target,
        scope: opts.scope.to_string(),
        backend: rewriter.name(),
        mutate: plan.marked.len(),
        merges: plan.merges.len(),
        full_copy,
    });

    let interactive_scope = !matches!(opts.scope, ScopeMode::SingleCommit { .. });
    if interactive_scope && !opts.assume_yes {
        match prompt::confirm_start(confirm, plan.marked.len()) {
            Ok(true) => {}
            Ok(false) => return Ok(RunOutcome::Cancelled),
            Err(e) => {
                return Err(RewriteError::Config {
                    message: format!("prompt error: {}", e),
                });
            }
        }
    }

    let publish_target =
        PublishTarget::for_branch(&repo, &ready.branch.name, &opts.config.push.remote);
    let pre = verify::collect_identities(repo.raw(), plan.commits.iter().copied())?;

    let manager = BackupManager::new(&opts.config.backup);
    let backup = manager.create(&repo, &ready.branch, full_copy)?;
    println!(
        "{}",
        style(format!("Backup created: {}", backup.label())).green()
    );

    let result = match rewriter.rewrite(&repo, &plan) {
        Ok(result) => result,
        Err(error) => return Ok(RunOutcome::Interrupted { error, backup }),
    };

    if let crate::model::RewriteStatus::Failed(reason) = &result.status {
        if let Err(error) = backup::rollback(&repo, &backup) {
            return Ok(RunOutcome::Interrupted { error, backup });
        }
        return Ok(RunOutcome::RolledBack {
            reason: reason.clone(),
            backup,
        });
    }

    // The bulk backend replaces the object store; read the result fresh.
    let root = repo.root().to_path_buf();
    drop(repo);
    let repo = match Repo::open(&root) {
        Ok(repo) => repo,
        Err(error) => return Ok(RunOutcome::Interrupted { error, backup }),
    };

    let (report, new_tip) = match verify_result(&repo, &pre, &result, &target)
        .and_then(|report| Ok((report, repo.current_branch()?.tip)))
    {
        Ok(verified) => verified,
        Err(error) => return Ok(RunOutcome::Interrupted { error, backup }),
    };

    let policy = match opts.policy {
        Some(policy) => policy,
        None if !interactive_scope => FinalizePolicy::Manual,
        None if opts.assume_yes => opts.config.finalize.default_policy,
        None => match prompt::choose_policy(select, opts.config.finalize.default_policy) {
            Ok(policy) => policy,
            Err(e) => {
                log::warn!("policy prompt failed ({}); keeping everything for manual follow-up", e);
                FinalizePolicy::Manual
            }
        },
    };
    log::info!("finalizing with policy {}", policy);

    let outcome = finalize::finalize(
        publisher,
        &repo,
        &result,
        policy,
        &backup,
        publish_target.as_ref(),
    );

    Ok(RunOutcome::Completed {
        result,
        report,
        branch: ready.branch.name,
        new_tip,
        backup,
        target: publish_target,
        outcome,
    })
}

fn verify_result(
    repo: &Repo,
    pre: &[crate::model::Identity],
    result: &RewriteResult,
    target: &TargetIdentity,
) -> Result<Report> {
    let post = verify::collect_identities(repo.raw(), result.rewritten.iter().copied())?;
    let mut report = verify::diff(pre, &post)?;
    report.mismatched = verify::count_mismatched(repo.raw(), result.mutated.iter().copied(), target)?;
    Ok(report)
}

fn print_error(e: &RewriteError) {
    let prefix = match e.class() {
        ErrorClass::Precondition => "Refusing to rewrite",
        ErrorClass::Config => "Configuration error",
        ErrorClass::MidRewrite => "Rewrite failed",
        ErrorClass::Push => "Push failed",
        ErrorClass::Internal => "Error",
    };
    eprintln!("{}", style(format!("❌ {}: {}", prefix, e)).red().bold());
    if e.class() == ErrorClass::Precondition {
        eprintln!("{}", style("Nothing was changed.").yellow());
    }
}

fn print_steps(steps: &[String]) {
    for step in steps {
        println!("  {}", step);
    }
}

fn report_outcome(outcome: &RunOutcome) {
    match outcome {
        RunOutcome::Cancelled => {
            println!("{}", style("Canceled by user. No changes made.").yellow().bold());
        }
        RunOutcome::NothingToDo => {}
        RunOutcome::Completed {
            result,
            report,
            branch,
            new_tip,
            backup,
            target,
            outcome,
        } => {
            println!(
                "{}",
                style(format!(
                    "✅ Rewrote {} commit(s); {} merge(s) skipped; {} identity change(s).",
                    result.touched,
                    result.merges_skipped,
                    result.changes.len()
                ))
                .green()
                .bold()
            );
            println!("  {} is now at {}", branch, new_tip);
            for line in report.render() {
                println!("  {}", line);
            }
            if report.mismatched > 0 {
                eprintln!(
                    "{}",
                    style(format!(
                        "Warning: {} commit(s) in scope still carry another identity.",
                        report.mismatched
                    ))
                    .yellow()
                    .bold()
                );
            }

            let steps = finalize::recovery_steps(backup, target.as_ref(), &result.dropped_remotes);
            match outcome {
                Outcome::Published { backup_deleted } => {
                    println!("{}", style("✅ Pushed with lease.").green().bold());
                    if *backup_deleted {
                        println!("{}", style("Backup deleted.").green());
                    } else {
                        println!("Backup kept: {}", backup.label());
                        println!("  Drop it later with: {}", backup.manual_delete());
                    }
                }
                Outcome::Manual => {
                    println!("{}", style("Nothing pushed. Next steps:").cyan().bold());
                    print_steps(&steps);
                }
                Outcome::NotPublished { reason } => {
                    println!("{}", style(format!("Not pushed: {}", reason)).yellow().bold());
                    print_steps(&steps);
                }
                Outcome::PushFailed(e) => {
                    print_error(e);
                    eprintln!(
                        "{}",
                        style("The rewritten history is kept locally and the backup is preserved.")
                            .yellow()
                    );
                    print_steps(&steps);
                }
            }
        }
        RunOutcome::RolledBack { reason, backup } => {
            eprintln!("{}", style(format!("❌ Rewrite failed: {}", reason)).red().bold());
            eprintln!(
                "{}",
                style("The repository was restored to its pre-rewrite state.").yellow()
            );
            println!("Backup kept: {}", backup.label());
        }
        RunOutcome::Interrupted { error, backup } => {
            print_error(error);
            eprintln!(
                "{}",
                style("The repository may be partially rewritten. To undo:")
                    .yellow()
                    .bold()
            );
            print_steps(&finalize::recovery_steps(backup, None, &[]));
        }
    }
}

fn load_config(cli: &Cli) -> Result<Config> {
    let root = Repo::open(&cli.repo).ok().map(|r| r.root().to_path_buf());
    Config::load(root.as_deref(), cli.config.as_deref())
}

fn run_rewrite(cli: &Cli, scope: ScopeMode, fast: bool) -> Result<i32> {
    let opts = RunOptions {
        repo: cli.repo.clone(),
        scope,
        fast,
        assume_yes: cli.yes,
        policy: cli.policy,
        config: load_config(cli)?,
    };

    let outcome = run_pipeline(
        &opts,
        &mut DialoguerConfirmPrompter,
        &mut DialoguerSelectPrompter,
        &mut GitPublisher,
    )?;
    report_outcome(&outcome);
    Ok(outcome.exit_code())
}

fn run_restore(cli: &Cli, name: &str) -> Result<i32> {
    let config = load_config(cli)?;
    let repo = Repo::open(&cli.repo)?;
    let handle = BackupManager::new(&config.backup).find(&repo, name)?;
    backup::restore(&repo, &handle)?;
    let what = match &handle {
        BackupHandle::Ref { branch, .. } => branch.trim_start_matches("refs/heads/").to_string(),
        BackupHandle::Copy { repo_root, .. } => repo_root.display().to_string(),
    };
    println!(
        "{}",
        style(format!("✅ Restored {} to {}", what, handle.tip()))
            .green()
            .bold()
    );
    Ok(0)
}

fn run_abort(path: &Path) -> Result<i32> {
    let repo = Repo::open(path)?;
    let restored = sequential::abort_interrupted(&repo)?;
    if restored.is_empty() {
        println!("{}", style("Replay aborted; no refs had moved.").green().bold());
    } else {
        println!("{}", style("Replay aborted; restored:").green().bold());
        for name in restored {
            println!("  {}", name);
        }
    }
    Ok(0)
}

fn run_backups(cli: &Cli) -> Result<i32> {
    let config = load_config(cli)?;
    let repo = Repo::open(&cli.repo)?;
    let backups = BackupManager::new(&config.backup).list(&repo)?;
    if backups.is_empty() {
        println!("No backups under {}.", config.backup.prefix);
    }
    for (name, tip) in backups {
        println!("{}  {}", tip, name);
    }
    Ok(0)
}

/// Main CLI entry point for `git-history-rewrite`.
///
/// Returns `Ok(exit_code)`; `Err(())` after an error has already been
/// reported to the user.
///
/// # Exit Codes
///
/// * `0` – Success.
/// * `1` – Any failure, or cancellation by the user.
pub fn entry() -> std::result::Result<i32, ()> {
    let cli = Cli::parse();

    let result = match &cli.command {
        Command::RewriteCommit { hash, message } => run_rewrite(
            &cli,
            ScopeMode::SingleCommit {
                target: hash.clone(),
                message: message.clone(),
            },
            false,
        ),
        Command::RewriteRange { base } => {
            run_rewrite(&cli, ScopeMode::Range { base: base.clone() }, false)
        }
        Command::RewriteAll { fast } => run_rewrite(&cli, ScopeMode::WholeHistory, *fast),
        Command::Restore { backup } => run_restore(&cli, backup),
        Command::Abort => run_abort(&cli.repo),
        Command::Backups => run_backups(&cli),
    };

    match result {
        Ok(code) => Ok(code),
        Err(e) => {
            print_error(&e);
            Err(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_range_with_global_flags() {
        let cli = Cli::try_parse_from([
            "git-history-rewrite",
            "rewrite-range",
            "v1.0",
            "--yes",
            "--policy",
            "manual",
        ])
        .unwrap();
        assert!(cli.yes);
        assert_eq!(cli.policy, Some(FinalizePolicy::Manual));
        assert!(matches!(cli.command, Command::RewriteRange { ref base } if base == "v1.0"));
    }

    #[test]
    fn parses_single_commit_with_message() {
        let cli =
            Cli::try_parse_from(["git-history-rewrite", "rewrite-commit", "abc123", "New message"])
                .unwrap();
        match cli.command {
            Command::RewriteCommit { hash, message } => {
                assert_eq!(hash, "abc123");
                assert_eq!(message.as_deref(), Some("New message"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn parses_fast_flag() {
        let cli = Cli::try_parse_from(["git-history-rewrite", "rewrite-all", "--fast"]).unwrap();
        assert!(matches!(cli.command, Command::RewriteAll { fast: true }));
    }

    #[test]
    fn rejects_unknown_policy() {
        assert!(
            Cli::try_parse_from(["git-history-rewrite", "--policy", "yolo", "abort"]).is_err()
        );
    }

    #[test]
    fn exit_codes_follow_outcome() {
        assert_eq!(RunOutcome::Cancelled.exit_code(), 1);
        assert_eq!(RunOutcome::NothingToDo.exit_code(), 0);
    }
}
