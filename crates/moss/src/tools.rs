//! The tool registry and the wrapper every tool invocation goes through.
pub mod builtin;
pub mod schema;

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use async_trait::async_trait;
use futures::FutureExt;
use serde_json::{json, Value};
use tracing::debug;

use crate::errors::ToolError;
use crate::models::tool::Tool;
use schema::InputSchema;

/// Executes a tool with input that already passed schema validation.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, input: Value) -> anyhow::Result<Value>;
}

struct FnExecutor<F>(F);

#[async_trait]
impl<F, Fut> ToolExecutor for FnExecutor<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Value>> + Send,
{
    async fn execute(&self, input: Value) -> anyhow::Result<Value> {
        (self.0)(input).await
    }
}

#[derive(Clone)]
pub struct ToolDescriptor {
    name: String,
    description: String,
    input_schema: Value,
    validator: InputSchema,
    executor: Arc<dyn ToolExecutor>,
}

impl ToolDescriptor {
    pub fn new<N, D, E>(name: N, description: D, input_schema: Value, executor: E) -> Self
    where
        N: Into<String>,
        D: Into<String>,
        E: ToolExecutor + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            validator: InputSchema::from_json_schema(&input_schema),
            input_schema,
            executor: Arc::new(executor),
        }
    }

    pub fn from_fn<N, D, F, Fut>(name: N, description: D, input_schema: Value, f: F) -> Self
    where
        N: Into<String>,
        D: Into<String>,
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        Self::new(name, description, input_schema, FnExecutor(f))
    }

    pub fn with_name<N: Into<String>>(mut self, name: N) -> Self {
        self.name = name.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn input_schema(&self) -> &Value {
        &self.input_schema
    }

    pub fn validator(&self) -> &InputSchema {
        &self.validator
    }

    /// The tool as presented to the model
    pub fn spec(&self) -> Tool {
        Tool::new(&self.name, &self.description, self.input_schema.clone())
    }

    /// Run the tool, turning every failure into an `{"error": message}` result.
    pub async fn invoke(&self, input: Value) -> Value {
        match self.try_invoke(input).await {
            Ok(result) => result,
            Err(e) => {
                debug!(tool = %self.name, error = %e, "Tool invocation failed");
                json!({ "error": e.to_string() })
            }
        }
    }

    /// Validate `input` and run the executor, catching panics raised while it runs.
    pub async fn try_invoke(&self, input: Value) -> Result<Value, ToolError> {
        let input = match (&self.validator, input) {
            (InputSchema::Object(_), Value::Null) => json!({}),
            (_, input) => input,
        };
        self.validator
            .validate(&input)
            .map_err(|e| ToolError::InvalidParameters(e.to_string()))?;

        let executor = Arc::clone(&self.executor);
        match AssertUnwindSafe(executor.execute(input)).catch_unwind().await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(e)) => Err(ToolError::ExecutionFailed(format!("{e:#}"))),
            Err(panic) => Err(ToolError::ExecutionFailed(panic_message(panic))),
        }
    }
}

impl fmt::Debug for ToolDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolDescriptor")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("input_schema", &self.input_schema)
            .finish_non_exhaustive()
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("tool panicked: {message}")
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("tool panicked: {message}")
    } else {
        "tool panicked".to_string()
    }
}

/// Immutable view of the registry at one point in time.
#[derive(Debug, Clone, Default)]
pub struct ToolSet(Arc<BTreeMap<String, Arc<ToolDescriptor>>>);

impl ToolSet {
    pub fn get(&self, name: &str) -> Option<&Arc<ToolDescriptor>> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn specs(&self) -> Vec<Tool> {
        self.0.values().map(|descriptor| descriptor.spec()).collect()
    }
}

/// Catalog of every tool the agent may call, shared between the agent and the MCP manager.
#[derive(Default)]
pub struct ToolRegistry {
    entries: RwLock<BTreeMap<String, Arc<ToolDescriptor>>>,
    // Lock order: `entries` before `snapshot`.
    snapshot: Mutex<Option<ToolSet>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the tool stored under `name`.
    pub fn register<N: Into<String>>(&self, name: N, descriptor: ToolDescriptor) {
        let name = name.into();
        let descriptor = Arc::new(descriptor.with_name(name.clone()));
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.insert(name, descriptor);
        self.invalidate();
    }

    /// Register a descriptor under its own name.
    pub fn register_tool(&self, descriptor: ToolDescriptor) {
        let name = descriptor.name().to_string();
        self.register(name, descriptor);
    }

    /// Remove a tool; returns whether it was registered.
    pub fn remove(&self, name: &str) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let removed = entries.remove(name).is_some();
        if removed {
            self.invalidate();
        }
        removed
    }

    pub fn get(&self, name: &str) -> Option<Arc<ToolDescriptor>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The current tools, rebuilt only after the registry changed.
    pub fn snapshot(&self) -> ToolSet {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let mut cached = self.snapshot.lock().unwrap_or_else(PoisonError::into_inner);
        cached
            .get_or_insert_with(|| ToolSet(Arc::new(entries.clone())))
            .clone()
    }

    fn invalidate(&self) {
        *self.snapshot.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}
