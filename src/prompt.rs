use dialoguer::{Confirm, Select, theme::ColorfulTheme};

use crate::finalize::FinalizePolicy;

/// A yes/no prompt that can be swapped for a mock.
pub trait ConfirmPrompter {
    /// `Ok(true)` if confirmed, `Ok(false)` if declined.
    fn confirm(&mut self, prompt: &str, default: bool) -> Result<bool, String>;
}

/// Abstraction over a pick-one-of-many prompt.
pub trait SelectPrompter {
    /// Prompt the user to pick one of `items`.
    ///
    /// Returns the index of the chosen item, or `Err(String)` on input failure.
    fn select(&mut self, prompt: &str, items: &[String], default: usize) -> Result<usize, String>;
}

/// `ConfirmPrompter` on `dialoguer::Confirm`.
pub struct DialoguerConfirmPrompter;

impl ConfirmPrompter for DialoguerConfirmPrompter {
    fn confirm(&mut self, prompt: &str, default: bool) -> Result<bool, String> {
        let theme = ColorfulTheme::default();
        let confirm = Confirm::with_theme(&theme)
            .with_prompt(prompt)
            .default(default);
        match confirm.interact() {
            Ok(v) => Ok(v),
            Err(e) => Err(e.to_string()),
        }
    }
}

/// Default implementation of `SelectPrompter` using `dialoguer::Select`.
pub struct DialoguerSelectPrompter;

impl SelectPrompter for DialoguerSelectPrompter {
    fn select(&mut self, prompt: &str, items: &[String], default: usize) -> Result<usize, String> {
        let theme = ColorfulTheme::default();
        let select = Select::with_theme(&theme)
            .with_prompt(prompt)
            .items(items)
            .default(default);
        match select.interact() {
            Ok(v) => Ok(v),
            Err(e) => Err(e.to_string()),
        }
    }
}

/// Ask the user to confirm rewriting `count` commits.
///
/// Defaults to proceeding. Declining is a no-op abort.
pub fn confirm_start<P: ConfirmPrompter>(prompter: &mut P, count: usize) -> Result<bool, String> {
    let prompt = format!("Rewrite {} commit(s) now? A backup is taken first.", count);
    prompter.confirm(&prompt, true)
}

/// Ask the user how to finish a successful rewrite, starting on `default`.
pub fn choose_policy<P: SelectPrompter>(
    prompter: &mut P,
    default: FinalizePolicy,
) -> Result<FinalizePolicy, String> {
    let items: Vec<String> = FinalizePolicy::ALL
        .iter()
        .map(|p| p.description().to_string())
        .collect();
    let default_index = FinalizePolicy::ALL
        .iter()
        .position(|p| *p == default)
        .unwrap_or(0);

    let index = prompter.select("How do you want to finish?", &items, default_index)?;
    match FinalizePolicy::ALL.get(index) {
        Some(policy) => Ok(*policy),
        None => Err(format!("invalid selection {}", index)),
    }
}
