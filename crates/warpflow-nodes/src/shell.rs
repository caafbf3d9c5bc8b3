//! Execute a shell command.
//!
//! Semantic non-success convention: a command that runs and exits non-zero
//! is a valid result, not an exception. The node records stdout, stderr and
//! the exit code, then emits the `"error"` action so routing decides what a
//! failure means. Only spawn problems and safety rejections raise.

use crate::safety::{analyze_command, CommandVerdict};
use crate::util::{optional_bool, optional_str, required_str};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use warpflow::binary;
use warpflow::ir::NodeSpec;
use warpflow::node::{Action, ExecContext, FnNodeFactory, Node, NodeContext};
use warpflow::{EngineError, ErrorCategory, Namespace, NodeRegistry, Result, StoreView};

const INTERFACE: &str = "\
Run a command through `sh -c`, capturing stdout, stderr and the exit code.
Stdout that is not valid UTF-8 is base64-encoded with the binary flag set;
stdin accepts binary input the same way. Exit code 0 routes to default,
anything else routes to error.

Interface:
- Writes: shared[\"stdout\"]: string | bytes
- Writes: shared[\"stdout_is_binary\"]: bool
- Writes: shared[\"stderr\"]: string
- Writes: shared[\"exit_code\"]: int
- Params: command: string   # stdin if piped
- Params: stdin: string   # default \"\"
- Params: stdin_is_binary: bool   # default false
- Params: cwd: string   # default \".\"
- Actions: default (exit code 0), error (non-zero exit)
";

/// Shell command node.
pub struct ShellNode {
    strict: bool,
}

impl ShellNode {
    pub fn new(strict: bool) -> Self {
        Self { strict }
    }
}

#[async_trait]
impl Node for ShellNode {
    async fn prep(&self, _view: &StoreView<'_>, params: &Value) -> Result<Value> {
        let command = required_str(params, "command", ErrorCategory::Shell)?;
        if self.strict {
            if let CommandVerdict::Rejected { token, reason } = analyze_command(&command) {
                return Err(EngineError::shell(format!(
                    "command rejected by strict mode: {reason}"
                ))
                .with_shell(command.clone(), None)
                .with_suggestion(format!("remove or rewrite the unsafe construct '{token}'")));
            }
        }
        Ok(json!({
            "command": command,
            "stdin": optional_str(params, "stdin", ""),
            "stdin_is_binary": optional_bool(params, "stdin_is_binary", false),
            "cwd": optional_str(params, "cwd", "."),
        }))
    }

    async fn exec(&self, prep: Value, _ctx: &ExecContext) -> Result<Value> {
        let command = prep["command"].as_str().unwrap_or_default().to_string();
        let cwd = prep["cwd"].as_str().unwrap_or(".").to_string();
        let stdin_text = prep["stdin"].as_str().unwrap_or_default();
        let stdin_bytes = if prep["stdin_is_binary"].as_bool().unwrap_or(false) {
            binary::decode(stdin_text)?
        } else {
            stdin_text.as_bytes().to_vec()
        };

        let mut child = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&command)
            .current_dir(&cwd)
            .stdin(if stdin_bytes.is_empty() {
                Stdio::null()
            } else {
                Stdio::piped()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                EngineError::shell(format!("cannot spawn '{command}': {e}"))
                    .with_shell(command.clone(), None)
                    .with_suggestion("check that `sh` is available and cwd exists".to_string())
            })?;

        if !stdin_bytes.is_empty() {
            if let Some(mut stdin) = child.stdin.take() {
                stdin.write_all(&stdin_bytes).await.map_err(|e| {
                    EngineError::shell(format!("failed to write stdin to '{command}': {e}"))
                        .with_shell(command.clone(), None)
                })?;
                drop(stdin); // close so the child sees EOF
            }
        }

        let output = child.wait_with_output().await.map_err(|e| {
            EngineError::shell(format!("failed waiting for '{command}': {e}"))
                .with_shell(command.clone(), None)
        })?;

        let exit_code = output.status.code().unwrap_or(-1);
        let (stdout, stdout_is_binary) = match String::from_utf8(output.stdout) {
            Ok(text) => (Value::String(text), false),
            Err(err) => (Value::String(binary::encode(err.as_bytes())), true),
        };
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        tracing::debug!(command = %command, exit_code, "shell command finished");
        Ok(json!({
            "command": command,
            "stdout": stdout,
            "stdout_is_binary": stdout_is_binary,
            "stderr": stderr,
            "exit_code": exit_code,
        }))
    }

    async fn post(&self, ns: &mut Namespace<'_>, _prep: &Value, exec: Value) -> Result<Action> {
        let exit_code = exec["exit_code"].as_i64().unwrap_or(-1);
        let stderr = exec["stderr"].as_str().unwrap_or_default().to_string();
        let stdout_is_binary = exec["stdout_is_binary"].as_bool().unwrap_or(false);

        ns.set("stdout", exec["stdout"].clone());
        ns.set("stdout_is_binary", Value::Bool(stdout_is_binary));
        ns.set("stderr", exec["stderr"].clone());
        ns.set("exit_code", exec["exit_code"].clone());

        if stdout_is_binary {
            ns.push_warning(format!(
                "shell node '{}' produced non-UTF-8 stdout (stored base64)",
                ns.node_id()
            ));
        }
        if exit_code == 0 {
            if !stderr.is_empty() {
                ns.push_warning(format!(
                    "shell node '{}' exited 0 with non-empty stderr",
                    ns.node_id()
                ));
            }
            Ok(Action::default_action())
        } else {
            Ok(Action::error_action())
        }
    }
}

pub fn register(registry: &NodeRegistry) -> Result<()> {
    registry.register(
        "shell",
        "1.0.0",
        INTERFACE,
        Arc::new(FnNodeFactory(|_spec: &NodeSpec, ctx: &NodeContext| {
            Ok(Arc::new(ShellNode::new(ctx.config.shell_strict)) as Arc<dyn Node>)
        })),
    )
}
