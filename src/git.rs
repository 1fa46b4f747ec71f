//! Wrappers around the `git` binary for the steps that need it: publishing
//! with a lease and driving `git filter-repo`.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use git2::Oid;

use crate::error::{Result, RewriteError};

/// Name of the bulk rewrite tool as it appears on `PATH`.
pub const FILTER_REPO: &str = "git-filter-repo";

/// Locates `tool` on `PATH`.
///
/// # Errors
///
/// Returns [`RewriteError::ToolMissing`] if it cannot be found.
pub fn ensure_tool(tool: &str) -> Result<PathBuf> {
    which::which(tool).map_err(|_| RewriteError::ToolMissing {
        tool: tool.to_string(),
    })
}

/// Whether `tool` is on `PATH`.
pub fn tool_available(tool: &str) -> bool {
    which::which(tool).is_ok()
}

/// Runs a command and returns its trimmed standard output on success,
/// or its standard error on failure.
///
/// `label` names the command in the error, e.g. `git push`.
fn run_output(mut cmd: Command, label: &str) -> Result<String> {
    let out = cmd.output().map_err(|e| RewriteError::CommandFailed {
        command: label.to_string(),
        reason: e.to_string(),
    })?;

    if out.status.success() {
        Ok(String::from_utf8_lossy(&out.stdout).trim().to_string())
    } else {
        let stderr = String::from_utf8_lossy(&out.stderr).trim().to_string();
        let reason = if stderr.is_empty() {
            format!("exited with {}", out.status)
        } else {
            stderr
        };
        Err(RewriteError::CommandFailed {
            command: label.to_string(),
            reason,
        })
    }
}

fn git_in(root: &Path) -> Command {
    let mut cmd = Command::new("git");
    cmd.arg("-C").arg(root);
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    cmd
}

/// Builds the `--force-with-lease` argument for `branch`.
///
/// With no `expected` value the lease requires the remote branch to be
/// absent, so an unknown remote state is never overwritten.
pub(crate) fn lease_arg(branch: &str, expected: Option<Oid>) -> String {
    match expected {
        Some(oid) => format!("--force-with-lease=refs/heads/{}:{}", branch, oid),
        None => format!("--force-with-lease=refs/heads/{}:", branch),
    }
}

/// The push command as the user would type it, for manual recovery notes.
pub fn push_command_line(remote: &str, branch: &str, expected: Option<Oid>) -> String {
    format!(
        "git push {} {} refs/heads/{}:refs/heads/{}",
        lease_arg(branch, expected),
        remote,
        branch,
        branch
    )
}

/// Publishes `branch` to `remote`, refusing if the remote branch is not at
/// `expected`.
///
/// This runs:
///
/// ```text
/// git push --force-with-lease=refs/heads/<branch>:<expected> <remote> refs/heads/<branch>:refs/heads/<branch>
/// ```
///
/// # Errors
///
/// * [`RewriteError::ToolMissing`] if `git` is not on `PATH`.
/// * [`RewriteError::PushRejected`] with git's stderr if the lease fails or
///   the push is otherwise refused.
pub fn push_with_lease(
    root: &Path,
    remote: &str,
    branch: &str,
    expected: Option<Oid>,
) -> Result<()> {
    ensure_tool("git")?;

    let mut cmd = git_in(root);
    cmd.arg("push")
        .arg(lease_arg(branch, expected))
        .arg(remote)
        .arg(format!("refs/heads/{0}:refs/heads/{0}", branch));

    log::info!("pushing {} to {} (lease {:?})", branch, remote, expected);
    match run_output(cmd, "git push") {
        Ok(_) => Ok(()),
        Err(RewriteError::CommandFailed { reason, .. }) => Err(RewriteError::PushRejected {
            remote: remote.to_string(),
            reason,
        }),
        Err(e) => Err(e),
    }
}

/// Arguments for a filter-repo run that rewrites only `refs`.
///
/// Without `--refs` filter-repo rewrites every ref in the repository,
/// backup branches included.
pub(crate) fn filter_repo_args(callback: &str, refs: &[String]) -> Vec<String> {
    let mut args = vec![
        "--force".to_string(),
        "--commit-callback".to_string(),
        callback.to_string(),
    ];
    if !refs.is_empty() {
        args.push("--refs".to_string());
        args.extend(refs.iter().cloned());
    }
    args
}

/// Runs the filter-repo executable at `tool` inside `root`, limited to
/// `refs`.
///
/// Output is inherited so the tool's own progress is visible.
pub fn filter_repo(tool: &Path, root: &Path, callback: &str, refs: &[String]) -> Result<()> {
    let mut cmd = Command::new(tool);
    cmd.current_dir(root).args(filter_repo_args(callback, refs));
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::inherit());
    cmd.stderr(Stdio::inherit());

    log::debug!("running {} in {}", tool.display(), root.display());
    let status = cmd.status().map_err(|e| RewriteError::CommandFailed {
        command: "git filter-repo".to_string(),
        reason: e.to_string(),
    })?;

    if status.success() {
        Ok(())
    } else {
        Err(RewriteError::CommandFailed {
            command: "git filter-repo".to_string(),
            reason: format!("exited with {}", status),
        })
    }
}
