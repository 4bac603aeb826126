pub mod rustyline;

pub struct Input {
    pub input_type: InputType,
    pub content: Option<String>, // Only set for messages
}

#[derive(Debug, PartialEq, Eq)]
pub enum InputType {
    AskAgain, // Nothing to send, ask again
    Message,  // User sent a message
    Clear,    // User wants to forget the conversation
    Exit,     // User wants to exit the session
}

impl Input {
    fn of(input_type: InputType) -> Self {
        Self {
            input_type,
            content: None,
        }
    }

    /// Interpret one line typed at the prompt.
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return Self::of(InputType::AskAgain);
        }

        match line.to_ascii_lowercase().as_str() {
            "/exit" | "/quit" => Self::of(InputType::Exit),
            "/clear" => Self::of(InputType::Clear),
            "/help" | "/?" => {
                print_help();
                Self::of(InputType::AskAgain)
            }
            _ => Self {
                input_type: InputType::Message,
                content: Some(line.to_string()),
            },
        }
    }
}

fn print_help() {
    println!("Commands:");
    println!("/exit - Exit the session");
    println!("/clear - Forget the conversation so far");
    println!("/? | /help - Display this help message");
    println!("Ctrl+C - Stop moss and exit");
}
