//! Operator dialog abstraction.
//!
//! Every interactive decision in the join flow goes through [`Dialog`],
//! so the pipeline itself never touches a terminal. The production
//! implementation renders prompts with `dialoguer`; non-interactive runs
//! use [`Answers`], which serves pre-seeded values and defaults.

use dialoguer::theme::ColorfulTheme;
use dialoguer::{Confirm, Input, Password, Select};
use thiserror::Error;
use tracing::info;

/// Errors surfaced by operator prompts.
#[derive(Error, Debug)]
pub enum DialogError {
    /// The operator aborted the prompt (Ctrl-C / EOF).
    #[error("prompt '{0}' aborted by operator")]
    Aborted(String),

    /// A non-interactive run hit a prompt with no pre-seeded answer.
    #[error("no answer available for prompt '{0}' in non-interactive mode")]
    NoAnswer(String),
}

/// A single string prompt.
#[derive(Debug, Clone)]
pub struct Query<'a> {
    /// Stable prompt identifier (used for answer lookup and logs).
    pub name: &'a str,
    /// Text shown to the operator.
    pub prompt: &'a str,
    /// Accepted values; empty means free-form.
    pub valid_values: &'a [&'a str],
    /// Default answer, if any.
    pub default: Option<&'a str>,
    /// Hide the operator's input (passwords).
    pub hidden: bool,
}

/// Operator dialog capability.
///
/// Prompts block indefinitely pending operator input; callers must keep
/// cancellation checks outside these calls.
pub trait Dialog: Send + Sync {
    /// Whether an operator is actually present.
    fn interactive(&self) -> bool;

    /// Ask for a string value.
    ///
    /// # Errors
    /// Returns an error if the prompt is aborted or unanswerable.
    fn query_string(&self, query: &Query<'_>) -> Result<String, DialogError>;

    /// Ask a yes/no question.
    ///
    /// # Errors
    /// Returns an error if the prompt is aborted or unanswerable.
    fn confirm(&self, name: &str, prompt: &str, default: bool) -> Result<bool, DialogError>;

    /// Show a non-blocking informational message.
    fn note(&self, text: &str);
}

/// Terminal-backed dialog.
pub struct TerminalDialog {
    theme: ColorfulTheme,
}

impl TerminalDialog {
    /// Create a terminal dialog with the default theme.
    #[must_use]
    pub fn new() -> Self {
        Self {
            theme: ColorfulTheme::default(),
        }
    }
}

impl Default for TerminalDialog {
    fn default() -> Self {
        Self::new()
    }
}

impl Dialog for TerminalDialog {
    fn interactive(&self) -> bool {
        true
    }

    fn query_string(&self, query: &Query<'_>) -> Result<String, DialogError> {
        let aborted = |_| DialogError::Aborted(query.name.to_string());

        if query.hidden {
            return Password::with_theme(&self.theme)
                .with_prompt(query.prompt)
                .interact()
                .map_err(aborted);
        }

        if !query.valid_values.is_empty() {
            let default_idx = query
                .default
                .and_then(|d| query.valid_values.iter().position(|v| *v == d))
                .unwrap_or(0);
            let idx = Select::with_theme(&self.theme)
                .with_prompt(query.prompt)
                .items(query.valid_values)
                .default(default_idx)
                .interact()
                .map_err(aborted)?;
            return Ok(query.valid_values[idx].to_string());
        }

        let mut input = Input::<String>::with_theme(&self.theme).with_prompt(query.prompt);
        if let Some(default) = query.default {
            input = input.default(default.to_string());
        }
        input.allow_empty(true).interact_text().map_err(aborted)
    }

    fn confirm(&self, name: &str, prompt: &str, default: bool) -> Result<bool, DialogError> {
        Confirm::with_theme(&self.theme)
            .with_prompt(prompt)
            .default(default)
            .interact()
            .map_err(|_| DialogError::Aborted(name.to_string()))
    }

    fn note(&self, text: &str) {
        println!("{text}");
    }
}

/// Non-interactive dialog serving pre-seeded answers, then defaults.
///
/// A prompt with neither an answer nor a default fails the run instead
/// of hanging.
#[derive(Default)]
pub struct Answers {
    values: std::collections::HashMap<String, String>,
}

impl Answers {
    /// Create an empty answer set (defaults only).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an answer for a named prompt.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }
}

impl Dialog for Answers {
    fn interactive(&self) -> bool {
        false
    }

    fn query_string(&self, query: &Query<'_>) -> Result<String, DialogError> {
        if let Some(value) = self.values.get(query.name) {
            return Ok(value.clone());
        }
        query
            .default
            .map(ToString::to_string)
            .ok_or_else(|| DialogError::NoAnswer(query.name.to_string()))
    }

    fn confirm(&self, name: &str, _prompt: &str, default: bool) -> Result<bool, DialogError> {
        match self.values.get(name).map(String::as_str) {
            Some("yes" | "true") => Ok(true),
            Some("no" | "false") => Ok(false),
            _ => Ok(default),
        }
    }

    fn note(&self, text: &str) {
        info!("{text}");
    }
}
