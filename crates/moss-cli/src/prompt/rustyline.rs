use anyhow::Result;
use ::rustyline::error::ReadlineError;
use ::rustyline::DefaultEditor;
use console::style;

use super::{Input, InputType};

const PROMPT: &str = "\x1b[1m\x1b[38;5;30mmoss> \x1b[0m";

/// Line editor prompt. The editor only lives for one `get_input` call, so the
/// prompt can be held across awaits by the session task.
#[derive(Default)]
pub struct RustylinePrompt {
    history: Vec<String>,
}

impl RustylinePrompt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ready(&self) {
        println!();
        println!(
            "moss is running! {}",
            style("Type /help for commands, /exit to leave.").dim()
        );
        println!();
    }

    /// Read one line. Blocks the current thread until the user hits enter.
    pub fn get_input(&mut self) -> Result<Input> {
        let mut editor = DefaultEditor::new()?;
        for entry in &self.history {
            let _ = editor.add_history_entry(entry.as_str());
        }

        match editor.readline(PROMPT) {
            Ok(line) => {
                if !line.trim().is_empty() {
                    self.history.push(line.clone());
                }
                Ok(Input::parse(&line))
            }
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => Ok(Input {
                input_type: InputType::Exit,
                content: None,
            }),
            Err(e) => Err(e.into()),
        }
    }
}
