//! Line-oriented operator interaction.
//!
//! Operations talk to the operator only through [`Prompter`], so the decision layer can be
//! driven by a script in tests. [`TerminalPrompter`] is the dialoguer-backed implementation.

use std::io::ErrorKind;

use dialoguer::{Confirm, Input, Password};

use crate::error::PromptError;

/// Read a line, write a line.
pub trait Prompter: Send {
    /// Read one line of free text. Blank input is returned as an empty string.
    fn read_line(&mut self, prompt: &str) -> Result<String, PromptError>;

    /// Read a secret without echoing it.
    fn read_secret(&mut self, prompt: &str) -> Result<String, PromptError>;

    /// Yes/no question, defaulting to no.
    fn confirm(&mut self, prompt: &str) -> Result<bool, PromptError>;

    /// Write one line of output.
    fn say(&mut self, line: &str);
}

/// Prompter over the controlling terminal.
#[derive(Debug, Default)]
pub struct TerminalPrompter;

impl Prompter for TerminalPrompter {
    fn read_line(&mut self, prompt: &str) -> Result<String, PromptError> {
        let input: String = Input::new()
            .with_prompt(prompt)
            .allow_empty(true)
            .interact_text()
            .map_err(prompt_error)?;
        Ok(input.trim().to_string())
    }

    fn read_secret(&mut self, prompt: &str) -> Result<String, PromptError> {
        Password::new()
            .with_prompt(prompt)
            .allow_empty_password(true)
            .interact()
            .map_err(prompt_error)
    }

    fn confirm(&mut self, prompt: &str) -> Result<bool, PromptError> {
        Confirm::new()
            .with_prompt(prompt)
            .default(false)
            .interact()
            .map_err(prompt_error)
    }

    fn say(&mut self, line: &str) {
        println!("{}", line);
    }
}

/// End of input and Ctrl-C/Ctrl-D close the prompt; anything else is a terminal failure.
fn prompt_error(e: dialoguer::Error) -> PromptError {
    #[allow(unreachable_patterns)]
    match e {
        dialoguer::Error::IO(io)
            if matches!(
                io.kind(),
                ErrorKind::UnexpectedEof | ErrorKind::Interrupted
            ) =>
        {
            PromptError::Closed
        }
        dialoguer::Error::IO(io) => PromptError::Io(io.to_string()),
        other => PromptError::Io(other.to_string()),
    }
}

/// Print a 1-indexed numbered list.
pub fn print_numbered<P, T, F>(prompter: &mut P, items: &[T], render: F)
where
    P: Prompter + ?Sized,
    F: Fn(&T) -> String,
{
    for (index, item) in items.iter().enumerate() {
        prompter.say(&format!("  {}. {}", index + 1, render(item)));
    }
}

/// Parse a 1-indexed selection into a 0-based index.
///
/// Returns `None` for blank, non-numeric, zero or out-of-range input.
pub fn parse_selection(input: &str, len: usize) -> Option<usize> {
    let number: usize = input.trim().parse().ok()?;
    if number == 0 || number > len {
        return None;
    }
    Some(number - 1)
}
