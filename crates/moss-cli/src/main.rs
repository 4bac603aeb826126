use clap::{Parser, Subcommand};
use console::style;

mod commands;
mod logging;
mod observer;
mod prompt;
mod session;

use crate::session::{Mode, Overrides};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log debug output from moss to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Answer a single prompt and exit
    Run {
        /// The prompt to send
        #[arg(short, long)]
        prompt: String,

        /// Model to use instead of the configured one
        #[arg(short, long)]
        model: Option<String>,

        /// Sampling temperature
        #[arg(short, long)]
        temperature: Option<f32>,
    },

    /// Start an interactive session
    Session {
        /// Model to use instead of the configured one
        #[arg(short, long)]
        model: Option<String>,

        /// Sampling temperature
        #[arg(short, long)]
        temperature: Option<f32>,
    },

    /// Show which process holds the config lock
    LockInfo,

    /// Remove a stale config lock
    ClearLock {
        /// Remove the lock even if its holder is still running
        #[arg(long)]
        force: bool,
    },

    /// Delete the saved conversation
    ClearHistory,
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let code = match dispatch(cli.command).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {:#}", style("error:").red().bold(), e);
            1
        }
    };
    std::process::exit(code);
}

async fn dispatch(command: Command) -> anyhow::Result<i32> {
    match command {
        Command::Run {
            prompt,
            model,
            temperature,
        } => session::launch(Overrides { model, temperature }, Mode::Headless(prompt)).await,
        Command::Session { model, temperature } => {
            session::launch(Overrides { model, temperature }, Mode::Interactive).await
        }
        Command::LockInfo => commands::lock::info().await.map(|()| 0),
        Command::ClearLock { force } => commands::lock::clear(force).await.map(|()| 0),
        Command::ClearHistory => commands::history::clear().await.map(|()| 0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run() {
        let cli = Cli::parse_from(["moss", "run", "-p", "hello", "-t", "0.2", "--verbose"]);
        assert!(cli.verbose);
        match cli.command {
            Command::Run {
                prompt,
                model,
                temperature,
            } => {
                assert_eq!(prompt, "hello");
                assert_eq!(model, None);
                assert_eq!(temperature, Some(0.2));
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_parse_clear_lock() {
        let cli = Cli::parse_from(["moss", "clear-lock", "--force"]);
        assert!(matches!(cli.command, Command::ClearLock { force: true }));
        let cli = Cli::parse_from(["moss", "clear-lock"]);
        assert!(matches!(cli.command, Command::ClearLock { force: false }));
    }
}
