//! Supervised-mode prompts.

use anyhow::Result;
use dialoguer::{Confirm, Select, theme::ColorfulTheme};
use tracing::warn;

/// The human in the loop.
pub trait Operator: Send + Sync {
    fn confirm(&self, prompt: &str, default: bool) -> Result<bool>;

    /// Index of the chosen option.
    fn choose(&self, prompt: &str, options: &[&str], default: usize) -> Result<usize>;
}

/// Prompts on the controlling terminal; falls back to defaults without one.
pub struct TerminalOperator;

impl TerminalOperator {
    fn interactive() -> bool {
        console::Term::stderr().is_term()
    }
}

impl Operator for TerminalOperator {
    fn confirm(&self, prompt: &str, default: bool) -> Result<bool> {
        if !Self::interactive() {
            warn!(prompt, default, "No terminal; using default answer");
            return Ok(default);
        }
        Ok(Confirm::with_theme(&ColorfulTheme::default())
            .with_prompt(prompt)
            .default(default)
            .interact()?)
    }

    fn choose(&self, prompt: &str, options: &[&str], default: usize) -> Result<usize> {
        if !Self::interactive() {
            warn!(prompt, choice = options.get(default).copied().unwrap_or_default(), "No terminal; using default choice");
            return Ok(default);
        }
        Ok(Select::with_theme(&ColorfulTheme::default())
            .with_prompt(prompt)
            .items(options)
            .default(default)
            .interact()?)
    }
}
