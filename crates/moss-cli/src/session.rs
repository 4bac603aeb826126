use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use console::style;
use moss::agent::{Agent, AgentConfig, RunStatus};
use moss::config::MossConfig;
use moss::config_lock::ConfigLock;
use moss::mcp::McpManager;
use moss::memory::MessageLog;
use moss::providers::configs::ProviderConfig;
use moss::providers::factory;
use moss::shutdown::Shutdown;
use moss::tools::builtin::register_builtin_tools;
use moss::tools::ToolRegistry;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::observer::ConsoleObserver;
use crate::prompt::rustyline::RustylinePrompt;
use crate::prompt::InputType;

/// Exit code after an interrupt-triggered shutdown.
const INTERRUPTED: i32 = 130;

/// Command line settings that win over the configuration files.
#[derive(Debug, Default)]
pub struct Overrides {
    pub model: Option<String>,
    pub temperature: Option<f32>,
}

impl Overrides {
    fn apply(self, config: &mut MossConfig) {
        if let Some(model) = self.model {
            config.model = model;
        }
        if let Some(temperature) = self.temperature {
            config.temperature = temperature;
        }
    }
}

pub enum Mode {
    Headless(String),
    Interactive,
}

/// Run a session to completion and return the process exit code.
///
/// The session runs in its own task so that Ctrl-C, SIGTERM or a panic still lead
/// to the same teardown: close the MCP servers, then release the config lock.
pub async fn launch(overrides: Overrides, mode: Mode) -> Result<i32> {
    let mut config = MossConfig::load().context("Failed to load configuration")?;
    overrides.apply(&mut config);

    let shutdown = Arc::new(Shutdown::new(config.close_timeout()));
    let cancel = CancellationToken::new();
    let task = tokio::spawn(run_session(
        config,
        mode,
        Arc::clone(&shutdown),
        cancel.clone(),
    ));
    let abort = task.abort_handle();

    tokio::select! {
        joined = task => {
            let result = match joined {
                Ok(result) => result,
                Err(e) if e.is_panic() => Err(anyhow!("session crashed: {e}")),
                Err(e) => Err(anyhow!(e)),
            };
            shutdown.run().await;
            result
        }
        signal = interrupted() => {
            warn!(signal, "Interrupted, shutting down");
            cancel.cancel();
            shutdown.run().await;
            abort.abort();
            Ok(INTERRUPTED)
        }
    }
}

async fn run_session(
    config: MossConfig,
    mode: Mode,
    shutdown: Arc<Shutdown>,
    cancel: CancellationToken,
) -> Result<i32> {
    let mut lock = ConfigLock::new(&config.config_dir);
    lock.acquire(config.lock_timeout()).await?;
    shutdown.set_lock(lock).await;

    let registry = Arc::new(ToolRegistry::new());
    register_builtin_tools(&registry);

    if let Some(manifest) = config.mcp_manifest() {
        let mut manager = McpManager::new(Arc::clone(&registry));
        let started = manager.initialize(&manifest).await;
        // Hand the manager over before checking so shutdown still closes it.
        shutdown.set_manager(manager).await;
        started?;
    }

    let provider = factory::get_provider(ProviderConfig::from_settings(&config)?)?;
    let mut agent = Agent::resume(
        provider,
        registry,
        MessageLog::in_dir(&config.config_dir),
        AgentConfig::from(&config),
    )
    .await?;
    info!(
        model = %config.model,
        tools = agent.registry().len(),
        "Session ready"
    );

    let mut observer = ConsoleObserver::new();
    match mode {
        Mode::Headless(prompt) => {
            let outcome = agent
                .run_with_cancel(&prompt, &mut observer, cancel)
                .await?;
            match outcome.status {
                RunStatus::Failed(_) => Ok(1),
                _ => Ok(0),
            }
        }
        Mode::Interactive => {
            interactive(&mut agent, &mut observer, cancel).await?;
            Ok(0)
        }
    }
}

async fn interactive(
    agent: &mut Agent,
    observer: &mut ConsoleObserver,
    cancel: CancellationToken,
) -> Result<()> {
    let mut prompt = RustylinePrompt::new();
    if !agent.transcript().is_empty() {
        println!(
            "{}",
            style(format!(
                "Resuming conversation with {} messages",
                agent.transcript().len()
            ))
            .dim()
        );
    }
    prompt.ready();

    loop {
        let input = tokio::task::block_in_place(|| prompt.get_input())?;
        match input.input_type {
            InputType::Exit => break,
            InputType::AskAgain => continue,
            InputType::Clear => {
                agent.clear_history().await?;
                println!("{}", style("Conversation cleared").dim());
            }
            InputType::Message => {
                if let Some(content) = input.content {
                    agent
                        .run_with_cancel(&content, observer, cancel.clone())
                        .await?;
                    println!();
                }
            }
        }
    }
    Ok(())
}

#[cfg(unix)]
async fn interrupted() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => tokio::select! {
            _ = tokio::signal::ctrl_c() => "SIGINT",
            _ = terminate.recv() => "SIGTERM",
        },
        Err(e) => {
            warn!(error = %e, "Cannot listen for SIGTERM");
            let _ = tokio::signal::ctrl_c().await;
            "SIGINT"
        }
    }
}

#[cfg(not(unix))]
async fn interrupted() -> &'static str {
    let _ = tokio::signal::ctrl_c().await;
    "Ctrl-C"
}
