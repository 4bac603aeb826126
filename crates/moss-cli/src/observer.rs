use std::io::{self, Write};

use console::style;
use moss::agent::{AgentObserver, RunOutcome, RunStatus, StepResult};
use serde_json::Value;

const MAX_STRING_LENGTH: usize = 60;

/// Argument shown next to a tool name, in order of preference.
const KEY_ARGUMENTS: [&str; 4] = ["command", "file_path", "directory_path", "query"];

/// Prints streamed text to stdout and tool activity as one line per call.
#[derive(Default)]
pub struct ConsoleObserver {
    // Streamed text did not end with a newline yet
    open_line: bool,
}

impl ConsoleObserver {
    pub fn new() -> Self {
        Self::default()
    }

    fn close_line(&mut self) {
        if self.open_line {
            println!();
            self.open_line = false;
        }
    }
}

impl AgentObserver for ConsoleObserver {
    fn on_stream_text_reset(&mut self) {
        self.close_line();
    }

    fn on_stream_text(&mut self, text: &str) {
        print!("{text}");
        let _ = io::stdout().flush();
        self.open_line = !text.ends_with('\n');
    }

    fn on_tool_execute(&mut self, name: &str, arguments: &Value) {
        self.close_line();
        match summarize(arguments) {
            Some(summary) => println!("🔧 {} {}", style(name).cyan(), style(summary).dim()),
            None => println!("🔧 {}", style(name).cyan()),
        }
    }

    fn on_tool_result(&mut self, name: &str, _arguments: &Value, result: &Value) {
        if let Some(error) = result.get("error") {
            let error = error.as_str().map(str::to_string).unwrap_or_else(|| error.to_string());
            println!("   {} {}", style(format!("{name} failed:")).red(), style(error).red());
        }
    }

    fn on_step_finish(&mut self, _step: &StepResult) {
        self.close_line();
    }

    fn on_finish(&mut self, outcome: &RunOutcome) {
        self.close_line();
        match &outcome.status {
            RunStatus::Completed(_) => {}
            RunStatus::Failed(message) => {
                eprintln!("{} {}", style("Request failed:").red().bold(), message)
            }
            RunStatus::Cancelled => eprintln!("{}", style("Cancelled").yellow()),
        }
    }
}

/// The most telling argument of a tool call, shortened for display.
fn summarize(arguments: &Value) -> Option<String> {
    let value = KEY_ARGUMENTS
        .iter()
        .find_map(|key| arguments.get(*key).and_then(Value::as_str))?;
    let line = value.lines().next().unwrap_or_default();
    if line.chars().count() > MAX_STRING_LENGTH || line.len() < value.len() {
        let short: String = line.chars().take(MAX_STRING_LENGTH).collect();
        Some(format!("{short}…"))
    } else {
        Some(line.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_summarize_prefers_key_arguments() {
        assert_eq!(
            summarize(&json!({"command": "ls -la", "file_path": "x"})).as_deref(),
            Some("ls -la")
        );
        assert_eq!(
            summarize(&json!({"file_path": "src/main.rs", "content": "..."})).as_deref(),
            Some("src/main.rs")
        );
        assert_eq!(summarize(&json!({"question": "why?"})), None);
        assert_eq!(summarize(&json!({"command": 3})), None);
    }

    #[test]
    fn test_summarize_shortens_long_values() {
        let summary = summarize(&json!({"command": "echo one\necho two"})).unwrap();
        assert_eq!(summary, "echo one…");

        let long = "x".repeat(100);
        let summary = summarize(&json!({"query": long})).unwrap();
        assert_eq!(summary.chars().count(), MAX_STRING_LENGTH + 1);
    }
}
