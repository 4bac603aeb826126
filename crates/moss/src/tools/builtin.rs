//! Tools that are always available, registered before any MCP server is started.
use anyhow::{anyhow, bail, Context, Result};
use serde_json::{json, Value};
use tokio::process::Command;

use super::{ToolDescriptor, ToolRegistry};

pub fn register_builtin_tools(registry: &ToolRegistry) {
    for descriptor in builtin_tools() {
        registry.register_tool(descriptor);
    }
}

pub fn builtin_tools() -> Vec<ToolDescriptor> {
    vec![
        ToolDescriptor::from_fn(
            "think",
            "Think about the current situation and the best course of action.",
            object_schema(&[("question", "The question to think about")]),
            think,
        ),
        ToolDescriptor::from_fn(
            "fs_read",
            "Read a UTF-8 text file.",
            object_schema(&[("file_path", "The path to the file to read from")]),
            fs_read,
        ),
        ToolDescriptor::from_fn(
            "fs_write",
            "Write content to a file, replacing anything already there.",
            object_schema(&[
                ("file_path", "The path to the file to write to"),
                ("content", "The content to write to the file"),
            ]),
            fs_write,
        ),
        ToolDescriptor::from_fn(
            "fs_exists",
            "Check if a file or directory exists.",
            object_schema(&[("file_path", "The path to check")]),
            fs_exists,
        ),
        ToolDescriptor::from_fn(
            "fs_listdir",
            "List the entries of a directory.",
            object_schema(&[("directory_path", "The path to the directory to list")]),
            fs_listdir,
        ),
        ToolDescriptor::from_fn(
            "os_shell_exec",
            "Execute a shell command and return its output. Fails when the command exits with a non-zero status.",
            object_schema(&[("command", "The command to execute")]),
            os_shell_exec,
        ),
    ]
}

/// An object schema whose properties are all required strings.
fn object_schema(properties: &[(&str, &str)]) -> Value {
    let required: Vec<&str> = properties.iter().map(|(name, _)| *name).collect();
    let properties: serde_json::Map<String, Value> = properties
        .iter()
        .map(|(name, description)| {
            (
                name.to_string(),
                json!({"type": "string", "description": description}),
            )
        })
        .collect();
    json!({
        "type": "object",
        "required": required,
        "properties": properties,
    })
}

fn string_arg<'a>(input: &'a Value, name: &str) -> Result<&'a str> {
    input
        .get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("Missing string argument '{name}'"))
}

async fn think(input: Value) -> Result<Value> {
    string_arg(&input, "question")?;
    Ok(json!({ "answer": "That's a good idea." }))
}

async fn fs_read(input: Value) -> Result<Value> {
    let file_path = string_arg(&input, "file_path")?;
    let content = tokio::fs::read_to_string(file_path)
        .await
        .with_context(|| format!("Failed to read {file_path}"))?;
    Ok(json!({ "file_path": file_path, "content": content }))
}

async fn fs_write(input: Value) -> Result<Value> {
    let file_path = string_arg(&input, "file_path")?;
    let content = string_arg(&input, "content")?;
    tokio::fs::write(file_path, content)
        .await
        .with_context(|| format!("Failed to write {file_path}"))?;
    Ok(json!({ "file_path": file_path, "bytes_written": content.len() }))
}

async fn fs_exists(input: Value) -> Result<Value> {
    let file_path = string_arg(&input, "file_path")?;
    let exists = tokio::fs::try_exists(file_path).await.unwrap_or(false);
    Ok(json!({ "file_path": file_path, "exists": exists }))
}

async fn fs_listdir(input: Value) -> Result<Value> {
    let directory_path = string_arg(&input, "directory_path")?;
    let mut entries = tokio::fs::read_dir(directory_path)
        .await
        .with_context(|| format!("Failed to list {directory_path}"))?;

    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let mut name = entry.file_name().to_string_lossy().into_owned();
        if entry.file_type().await.map(|kind| kind.is_dir()).unwrap_or(false) {
            name.push('/');
        }
        files.push(name);
    }
    files.sort();

    Ok(json!({ "directory_path": directory_path, "files": files }))
}

async fn os_shell_exec(input: Value) -> Result<Value> {
    let command = string_arg(&input, "command")?;
    let output = shell(command)
        .output()
        .await
        .with_context(|| format!("Failed to start `{command}`"))?;

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
    if !output.status.success() {
        bail!(
            "Command `{command}` exited with {}:\n{}{}",
            output.status,
            stdout,
            stderr
        );
    }

    Ok(json!({ "command": command, "output": stdout, "stderr": stderr }))
}

#[cfg(not(windows))]
fn shell(command: &str) -> Command {
    let mut shell = Command::new("sh");
    shell.arg("-c").arg(command);
    shell
}

#[cfg(windows)]
fn shell(command: &str) -> Command {
    let mut shell = Command::new("cmd");
    shell.arg("/C").arg(command);
    shell
}
