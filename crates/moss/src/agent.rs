use std::sync::Arc;

use futures::StreamExt;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::MossConfig;
use crate::errors::{LogError, ProviderError, ToolError};
use crate::memory::MessageLog;
use crate::models::message::{Message, ToolRequest};
use crate::providers::base::{CompletionRequest, FinishReason, Provider, StreamEvent, Usage};
use crate::tools::ToolRegistry;

pub const DEFAULT_MAX_TOKENS: u32 = 32_000;

/// Fixed settings sent with every step.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub system: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            system: String::new(),
            temperature: 0.5,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }
}

impl From<&MossConfig> for AgentConfig {
    fn from(config: &MossConfig) -> Self {
        Self {
            system: config.system_prompt.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }
}

/// Passive side channel for everything the agent does during a run.
///
/// Only streamed text is required; the remaining hooks default to doing nothing.
pub trait AgentObserver: Send {
    /// Called once before the first text fragment of each step
    fn on_stream_text_reset(&mut self) {}

    fn on_stream_text(&mut self, text: &str);

    fn on_tool_execute(&mut self, _name: &str, _arguments: &Value) {}

    fn on_tool_result(&mut self, _name: &str, _arguments: &Value, _result: &Value) {}

    fn on_step_finish(&mut self, _step: &StepResult) {}

    fn on_finish(&mut self, _outcome: &RunOutcome) {}
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocation {
    pub id: String,
    pub name: String,
    pub arguments: Value,
    pub result: Value,
}

#[derive(Debug, Clone)]
pub struct StepResult {
    pub index: usize,
    pub text: String,
    pub tool_invocations: Vec<ToolInvocation>,
    pub finish_reason: FinishReason,
    pub usage: Usage,
    /// Messages this step appended to the transcript and the log
    pub messages: Vec<Message>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunStatus {
    Completed(FinishReason),
    /// The backend refused the request or the stream broke
    Failed(String),
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub steps: Vec<StepResult>,
    pub status: RunStatus,
}

impl RunOutcome {
    /// Text of the final completed step
    pub fn text(&self) -> &str {
        self.steps.last().map(|step| step.text.as_str()).unwrap_or("")
    }
}

struct StreamedStep {
    text: String,
    tool_calls: Vec<ToolRequest>,
    finish_reason: FinishReason,
    usage: Usage,
}

enum StepEnd {
    Streamed(StreamedStep),
    Cancelled,
}

/// Agent drives the step loop between the model and the tools in the registry
pub struct Agent {
    provider: Box<dyn Provider>,
    registry: Arc<ToolRegistry>,
    log: MessageLog,
    transcript: Vec<Message>,
    config: AgentConfig,
}

impl Agent {
    /// Create an agent whose transcript is whatever the log already holds
    pub async fn resume(
        provider: Box<dyn Provider>,
        registry: Arc<ToolRegistry>,
        log: MessageLog,
        config: AgentConfig,
    ) -> Result<Self, LogError> {
        let transcript = log.replay().await?;
        info!(
            messages = transcript.len(),
            log = %log.path().display(),
            "Restored conversation"
        );
        Ok(Self {
            provider,
            registry,
            log,
            transcript,
            config,
        })
    }

    pub fn transcript(&self) -> &[Message] {
        &self.transcript
    }

    pub fn message(&self, id: &str) -> Option<&Message> {
        self.transcript.iter().find(|message| message.id == id)
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Forget the conversation, on disk and in memory
    pub async fn clear_history(&mut self) -> Result<(), LogError> {
        self.log.clear().await?;
        self.transcript.clear();
        Ok(())
    }

    pub async fn run(
        &mut self,
        prompt: &str,
        observer: &mut dyn AgentObserver,
    ) -> Result<RunOutcome, LogError> {
        self.run_with_cancel(prompt, observer, CancellationToken::new())
            .await
    }

    /// Answer `prompt`, executing tool calls until the model stops asking for them.
    ///
    /// Backend failures and cancellation end the run with the matching
    /// [`RunStatus`]; only message log failures are returned as errors.
    pub async fn run_with_cancel(
        &mut self,
        prompt: &str,
        observer: &mut dyn AgentObserver,
        cancel: CancellationToken,
    ) -> Result<RunOutcome, LogError> {
        let user = Message::user().with_text(prompt);
        self.log.append(&user).await?;
        self.transcript.push(user);

        let mut steps: Vec<StepResult> = Vec::new();
        let status = loop {
            let index = steps.len();
            let tools = self.registry.snapshot();
            let request = CompletionRequest {
                system: self.config.system.clone(),
                messages: self.transcript.clone(),
                tools: tools.specs(),
                temperature: self.config.temperature,
                max_tokens: self.config.max_tokens,
            };
            debug!(step = index, tools = tools.len(), "Requesting completion");

            let streamed = match self.stream_step(&request, observer, &cancel).await {
                Ok(StepEnd::Streamed(streamed)) => streamed,
                Ok(StepEnd::Cancelled) => {
                    info!(step = index, "Run cancelled, discarding partial step");
                    break RunStatus::Cancelled;
                }
                Err(e) => {
                    let payload = serde_json::to_string(&request)
                        .unwrap_or_else(|se| format!("<unserializable request: {se}>"));
                    error!(step = index, error = %e, request = %payload, "Completion step failed");
                    break RunStatus::Failed(e.to_string());
                }
            };

            // Tools run one at a time, in the order the model asked for them
            let mut invocations = Vec::with_capacity(streamed.tool_calls.len());
            for call in &streamed.tool_calls {
                let name = &call.tool_call.name;
                let arguments = &call.tool_call.arguments;
                observer.on_tool_execute(name, arguments);
                let result = match tools.get(name) {
                    Some(tool) => tool.invoke(arguments.clone()).await,
                    None => {
                        warn!(step = index, tool = %name, "Model requested an unknown tool");
                        json!({ "error": ToolError::NotFound(name.clone()).to_string() })
                    }
                };
                observer.on_tool_result(name, arguments, &result);
                invocations.push(ToolInvocation {
                    id: call.id.clone(),
                    name: name.clone(),
                    arguments: arguments.clone(),
                    result,
                });
            }

            let messages = step_messages(&streamed, &invocations);
            self.log.append_all(&messages).await?;
            self.transcript.extend(messages.iter().cloned());

            let step = StepResult {
                index,
                text: streamed.text,
                tool_invocations: invocations,
                finish_reason: streamed.finish_reason,
                usage: streamed.usage,
                messages,
            };
            debug!(
                step = index,
                finish_reason = %step.finish_reason,
                tool_calls = step.tool_invocations.len(),
                "Step finished"
            );
            observer.on_step_finish(&step);

            let finish_reason = step.finish_reason;
            // A tool-calls finish with no calls would resend the same request forever
            let wants_tools =
                finish_reason == FinishReason::ToolCalls && !step.tool_invocations.is_empty();
            steps.push(step);
            if !wants_tools {
                break RunStatus::Completed(finish_reason);
            }
        };

        let outcome = RunOutcome { steps, status };
        observer.on_finish(&outcome);
        Ok(outcome)
    }

    async fn stream_step(
        &self,
        request: &CompletionRequest,
        observer: &mut dyn AgentObserver,
        cancel: &CancellationToken,
    ) -> Result<StepEnd, ProviderError> {
        let mut stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(StepEnd::Cancelled),
            stream = self.provider.stream(request) => stream?,
        };

        let mut text = String::new();
        let mut tool_calls = Vec::new();
        let mut finish = None;
        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(StepEnd::Cancelled),
                event = stream.next() => event,
            };
            match event {
                None => break,
                Some(Err(e)) => return Err(e),
                Some(Ok(StreamEvent::TextDelta(delta))) => {
                    if delta.is_empty() {
                        continue;
                    }
                    if text.is_empty() {
                        observer.on_stream_text_reset();
                    }
                    observer.on_stream_text(&delta);
                    text.push_str(&delta);
                }
                Some(Ok(StreamEvent::ToolCall(call))) => tool_calls.push(call),
                Some(Ok(StreamEvent::Finish { reason, usage })) => finish = Some((reason, usage)),
            }
        }

        let (finish_reason, usage) = finish.unwrap_or_else(|| {
            debug!("Stream ended without a finish event");
            (FinishReason::Other, Usage::default())
        });
        Ok(StepEnd::Streamed(StreamedStep {
            text,
            tool_calls,
            finish_reason,
            usage,
        }))
    }
}

fn step_messages(streamed: &StreamedStep, invocations: &[ToolInvocation]) -> Vec<Message> {
    let mut messages = Vec::with_capacity(2);

    let mut assistant = Message::assistant();
    if !streamed.text.is_empty() {
        assistant = assistant.with_text(streamed.text.clone());
    }
    for call in &streamed.tool_calls {
        assistant = assistant.with_tool_request(call.id.clone(), call.tool_call.clone());
    }
    if !assistant.is_empty() {
        messages.push(assistant);
    }

    if !invocations.is_empty() {
        let response = invocations
            .iter()
            .fold(Message::tool(), |message, invocation| {
                message.with_tool_response(
                    invocation.id.clone(),
                    invocation.name.clone(),
                    invocation.result.clone(),
                )
            });
        messages.push(response);
    }
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::role::Role;
    use crate::providers::mock::{MockProvider, MockStep};
    use crate::tools::ToolDescriptor;
    use anyhow::anyhow;
    use std::time::Duration;
    use tempfile::TempDir;

    #[derive(Default)]
    struct Recorder {
        events: Vec<String>,
        steps: Vec<StepResult>,
        finished: Option<RunStatus>,
    }

    impl AgentObserver for Recorder {
        fn on_stream_text_reset(&mut self) {
            self.events.push("reset".to_string());
        }

        fn on_stream_text(&mut self, text: &str) {
            self.events.push(format!("text:{text}"));
        }

        fn on_tool_execute(&mut self, name: &str, arguments: &Value) {
            self.events.push(format!("execute:{name}:{arguments}"));
        }

        fn on_tool_result(&mut self, name: &str, _arguments: &Value, result: &Value) {
            self.events.push(format!("result:{name}:{result}"));
        }

        fn on_step_finish(&mut self, step: &StepResult) {
            self.events.push(format!("step:{}", step.index));
            self.steps.push(step.clone());
        }

        fn on_finish(&mut self, outcome: &RunOutcome) {
            self.finished = Some(outcome.status.clone());
        }
    }

    fn registry() -> Arc<ToolRegistry> {
        let registry = Arc::new(ToolRegistry::new());
        registry.register(
            "echo",
            ToolDescriptor::from_fn(
                "echo",
                "Echo the text back",
                json!({
                    "type": "object",
                    "required": ["text"],
                    "properties": {"text": {"type": "string"}}
                }),
                |input| async move { Ok(json!({ "echo": input["text"] })) },
            ),
        );
        registry.register(
            "broken",
            ToolDescriptor::from_fn("broken", "Always fails", json!({}), |_| async {
                Err::<Value, _>(anyhow!("tool exploded"))
            }),
        );
        registry
    }

    async fn agent(steps: Vec<MockStep>) -> (TempDir, Agent, MockHandle) {
        let dir = tempfile::tempdir().unwrap();
        let provider = MockProvider::new(steps);
        let requests = provider.requests();
        let agent = Agent::resume(
            Box::new(provider),
            registry(),
            MessageLog::in_dir(dir.path()),
            AgentConfig {
                system: "You are a test".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        (dir, agent, requests)
    }

    type MockHandle = Arc<std::sync::Mutex<Vec<CompletionRequest>>>;

    fn roles(messages: &[Message]) -> Vec<Role> {
        messages.iter().map(|message| message.role).collect()
    }

    #[tokio::test]
    async fn test_tool_step_then_final_answer() {
        let (dir, mut agent, requests) = agent(vec![
            MockStep::tool_call("call_1", "echo", json!({"text": "hello"})),
            MockStep::text("done"),
        ])
        .await;
        let mut recorder = Recorder::default();

        let outcome = agent.run("say hello", &mut recorder).await.unwrap();

        assert_eq!(outcome.status, RunStatus::Completed(FinishReason::Stop));
        assert_eq!(outcome.text(), "done");
        assert_eq!(
            recorder.events,
            vec![
                r#"execute:echo:{"text":"hello"}"#,
                r#"result:echo:{"echo":"hello"}"#,
                "step:0",
                "reset",
                "text:done",
                "step:1",
            ]
        );
        assert_eq!(
            recorder.finished,
            Some(RunStatus::Completed(FinishReason::Stop))
        );

        let first = &recorder.steps[0];
        assert_eq!(first.finish_reason, FinishReason::ToolCalls);
        assert_eq!(first.tool_invocations[0].result, json!({"echo": "hello"}));
        assert_eq!(roles(&first.messages), vec![Role::Assistant, Role::Tool]);

        let logged = MessageLog::in_dir(dir.path()).replay().await.unwrap();
        assert_eq!(
            roles(&logged),
            vec![Role::User, Role::Assistant, Role::Tool, Role::Assistant]
        );
        assert_eq!(logged, agent.transcript());
        let response = logged[2].tool_responses().next().unwrap();
        assert_eq!(response.id, "call_1");
        assert_eq!(response.tool_name, "echo");

        let requests = requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].system, "You are a test");
        assert_eq!(requests[0].max_tokens, DEFAULT_MAX_TOKENS);
        assert_eq!(requests[0].messages.len(), 1);
        assert_eq!(requests[1].messages.len(), 3);
        assert!(requests[0].tools.iter().any(|tool| tool.name == "echo"));
    }

    #[tokio::test]
    async fn test_failing_and_unknown_tools_become_error_results() {
        let (_dir, mut agent, _requests) = agent(vec![
            MockStep::Events(vec![
                StreamEvent::ToolCall(ToolRequest {
                    id: "a".to_string(),
                    tool_call: crate::models::tool::ToolCall::new("broken", json!({})),
                }),
                StreamEvent::ToolCall(ToolRequest {
                    id: "b".to_string(),
                    tool_call: crate::models::tool::ToolCall::new("missing", json!({})),
                }),
                StreamEvent::Finish {
                    reason: FinishReason::ToolCalls,
                    usage: Usage::default(),
                },
            ]),
            MockStep::text("sorry"),
        ])
        .await;
        let mut recorder = Recorder::default();

        let outcome = agent.run("try it", &mut recorder).await.unwrap();

        assert_eq!(outcome.status, RunStatus::Completed(FinishReason::Stop));
        let results: Vec<&Value> = outcome.steps[0]
            .tool_invocations
            .iter()
            .map(|invocation| &invocation.result)
            .collect();
        assert_eq!(
            results[0]["error"],
            "Tool execution failed: tool exploded"
        );
        assert_eq!(results[1]["error"], "Tool not found: missing");
        assert!(agent.transcript()[2]
            .tool_responses()
            .all(|response| response.is_error()));
    }

    #[tokio::test]
    async fn test_refused_request_ends_run_without_raising() {
        let (dir, mut agent, _requests) =
            agent(vec![MockStep::Refuse("quota exceeded".to_string())]).await;
        let mut recorder = Recorder::default();

        let outcome = agent.run("hello", &mut recorder).await.unwrap();

        match &outcome.status {
            RunStatus::Failed(message) => assert!(message.contains("quota exceeded")),
            other => panic!("unexpected status {other:?}"),
        }
        assert!(outcome.steps.is_empty());
        let logged = MessageLog::in_dir(dir.path()).replay().await.unwrap();
        assert_eq!(roles(&logged), vec![Role::User]);
    }

    #[tokio::test]
    async fn test_broken_stream_discards_partial_step() {
        let (dir, mut agent, _requests) = agent(vec![MockStep::Break(
            vec![StreamEvent::TextDelta("half an ans".to_string())],
            "connection reset".to_string(),
        )])
        .await;
        let mut recorder = Recorder::default();

        let outcome = agent.run("hello", &mut recorder).await.unwrap();

        assert!(matches!(outcome.status, RunStatus::Failed(_)));
        assert_eq!(recorder.events, vec!["reset", "text:half an ans"]);
        let logged = MessageLog::in_dir(dir.path()).replay().await.unwrap();
        assert_eq!(logged.len(), 1);
    }

    #[tokio::test]
    async fn test_tool_calls_reason_without_any_call_stops_instead_of_looping() {
        let (_dir, mut agent, requests) = agent(vec![MockStep::Events(vec![
            StreamEvent::TextDelta("thinking".to_string()),
            StreamEvent::Finish {
                reason: FinishReason::ToolCalls,
                usage: Usage::new(Some(10), Some(2), Some(12)),
            },
        ])])
        .await;

        let outcome = agent.run("hi", &mut Recorder::default()).await.unwrap();

        assert_eq!(outcome.status, RunStatus::Completed(FinishReason::ToolCalls));
        assert_eq!(outcome.steps[0].usage.total_tokens, Some(12));
        assert_eq!(requests.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cancellation_while_streaming() {
        let (dir, mut agent, _requests) = agent(vec![MockStep::Hang(vec![StreamEvent::TextDelta(
            "still going".to_string(),
        )])])
        .await;
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let mut recorder = Recorder::default();
        let outcome = agent
            .run_with_cancel("hi", &mut recorder, cancel)
            .await
            .unwrap();

        assert_eq!(outcome.status, RunStatus::Cancelled);
        assert!(recorder.steps.is_empty());
        assert_eq!(recorder.finished, Some(RunStatus::Cancelled));
        let logged = MessageLog::in_dir(dir.path()).replay().await.unwrap();
        assert_eq!(roles(&logged), vec![Role::User]);
    }

    #[tokio::test]
    async fn test_resume_and_clear_history() {
        let (dir, mut agent, _requests) = agent(vec![MockStep::text("first answer")]).await;
        agent.run("first", &mut Recorder::default()).await.unwrap();
        let answer_id = agent.transcript()[1].id.clone();

        let provider = MockProvider::new(vec![MockStep::text("second answer")]);
        let requests = provider.requests();
        let mut resumed = Agent::resume(
            Box::new(provider),
            registry(),
            MessageLog::in_dir(dir.path()),
            AgentConfig::default(),
        )
        .await
        .unwrap();
        assert_eq!(resumed.transcript().len(), 2);
        assert_eq!(resumed.message(&answer_id).unwrap().text(), "first answer");

        resumed.run("second", &mut Recorder::default()).await.unwrap();
        assert_eq!(requests.lock().unwrap()[0].messages.len(), 3);

        resumed.clear_history().await.unwrap();
        assert!(resumed.transcript().is_empty());
        assert!(MessageLog::in_dir(dir.path())
            .replay()
            .await
            .unwrap()
            .is_empty());
    }
}
