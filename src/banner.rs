use console::{measure_text_width, style};
use std::iter;

use crate::model::TargetIdentity;

/// What the banner summarises about the pending run.
pub struct BannerInfo<'a> {
    pub target: &'a TargetIdentity,
    pub scope: String,
    pub backend: &'a str,
    pub mutate: usize,
    pub merges: usize,
    pub full_copy: bool,
}

/// Prints a boxed, colorized summary of the rewrite about to happen.
///
/// The box is sized to the widest **visible** line, using
/// [`console::measure_text_width`] so embedded ANSI codes do not skew the
/// padding. Borders are styled separately from the content.
///
/// # Examples
///
/// ```no_run
/// use git_history_rewrite::banner::{BannerInfo, print_banner};
/// use git_history_rewrite::model::{Identity, TargetIdentity};
///
/// let target = TargetIdentity::uniform(Identity::new("Jane", "jane@example.com").unwrap());
/// print_banner(&BannerInfo {
///     target: &target,
///     scope: "commits after v1.0".to_string(),
///     backend: "sequential",
///     mutate: 12,
///     merges: 1,
///     full_copy: false,
/// });
/// ```
pub fn print_banner(info: &BannerInfo<'_>) {
    let lines = banner_lines(info);

    let max_width = lines
        .iter()
        .map(|l| measure_text_width(l)) // ignore ANSI in content
        .max()
        .unwrap_or(0)
        + 2;

    let border = "═".repeat(max_width);
    let top = style(format!("╔{}╗", border)).blue().bold();
    let bottom = style(format!("╚{}╝", border)).blue().bold();
    let left = style("║ ").blue().bold().to_string();
    let right = style("║").blue().bold().to_string();

    println!();
    println!("{top}");
    for line in lines {
        let visible = measure_text_width(&line);
        let pad = max_width - visible; // includes the one space after left border
        println!("{}{}{}{}", left, line, " ".repeat(pad - 1), right);
    }
    println!("{bottom}");
    println!();
}

/// Constructs the banner text: title, scope, identities, then safety notes.
///
/// Some lines carry ANSI styling; measure visible width, not `str::len()`.
fn banner_lines(info: &BannerInfo<'_>) -> Vec<String> {
    let top = ["Rewrite commit identities", ""]
        .into_iter()
        .map(|s| s.to_string());

    let scope = vec![
        format!("Scope:     {}", info.scope),
        format!("Strategy:  {}", info.backend),
        format!(
            "Commits:   {} to rewrite, {} merge(s) left as-is",
            info.mutate, info.merges
        ),
    ]
    .into_iter();

    let identity = iter::once(String::new())
        .chain(iter::once(
            style(format!("Author:    {}", info.target.author))
                .cyan()
                .bold()
                .to_string(),
        ))
        .chain(iter::once(
            style(format!("Committer: {}", info.target.committer))
                .cyan()
                .to_string(),
        ));

    let backup = if info.full_copy {
        "A full copy of the repository is made before anything changes."
    } else {
        "A backup branch on the current tip is created before anything changes."
    };
    let notes = iter::once(String::new()).chain(iter::once(
        style(backup).yellow().bold().to_string(),
    ));

    top.chain(scope).chain(identity).chain(notes).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Identity;

    fn target() -> TargetIdentity {
        TargetIdentity::uniform(Identity::new("John Doe", "john@doe.org").unwrap())
    }

    #[test]
    fn banner_names_scope_and_identity() {
        let target = target();
        let lines = banner_lines(&BannerInfo {
            target: &target,
            scope: "commits after main~3".to_string(),
            backend: "sequential",
            mutate: 3,
            merges: 1,
            full_copy: false,
        });
        let s = lines.join("\n");

        assert!(s.contains("Rewrite commit identities"));
        assert!(s.contains("Scope:     commits after main~3"));
        assert!(s.contains("3 to rewrite, 1 merge(s) left as-is"));
        assert!(s.contains("Author:    John Doe <john@doe.org>"));
        assert!(s.contains("backup branch"));
    }

    #[test]
    fn banner_mentions_full_copy_for_whole_history() {
        let target = target();
        let lines = banner_lines(&BannerInfo {
            target: &target,
            scope: "entire history".to_string(),
            backend: "bulk",
            mutate: 100,
            merges: 0,
            full_copy: true,
        });
        let s = lines.join("\n");

        assert!(s.contains("Strategy:  bulk"));
        assert!(s.contains("full copy of the repository"));
        let widest = lines.iter().map(|l| measure_text_width(l)).max().unwrap_or(0);
        assert!(widest >= "Rewrite commit identities".len());
    }
}
