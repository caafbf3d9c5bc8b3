//! Scripted stdio tool server for integration tests
//!
//! Speaks the JSON-Lines tool protocol with a canned tool table:
//!
//! - `echo` returns its arguments verbatim
//! - `flaky` fails with a retryable error on its first call, then succeeds
//! - `warn` succeeds with a non-empty warnings list
//! - `missing` always reports a semantic (non-retryable) error

use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

static FLAKY_CALLS: AtomicU64 = AtomicU64::new(0);

fn tool_table() -> Value {
    json!({
        "tools": [
            {
                "name": "echo",
                "description": "Return the arguments verbatim",
                "input_schema": {
                    "type": "object",
                    "properties": {"text": {"type": "string"}},
                    "required": ["text"]
                }
            },
            {
                "name": "flaky",
                "description": "Fail once, then succeed",
                "input_schema": {"type": "object", "properties": {}}
            },
            {
                "name": "warn",
                "description": "Succeed with warnings",
                "input_schema": {"type": "object", "properties": {}}
            },
            {
                "name": "missing",
                "description": "Always report a semantic error",
                "input_schema": {"type": "object", "properties": {}}
            }
        ]
    })
}

fn handle_call(id: u64, params: &Value) -> Value {
    let name = params.get("name").and_then(Value::as_str).unwrap_or("");
    let arguments = params.get("arguments").cloned().unwrap_or(Value::Null);
    match name {
        "echo" => json!({
            "id": id,
            "result": {"result": {"echoed": arguments}, "warnings": []}
        }),
        "flaky" => {
            if FLAKY_CALLS.fetch_add(1, Ordering::SeqCst) == 0 {
                json!({"id": id, "error": {"message": "transient glitch", "retryable": true}})
            } else {
                json!({"id": id, "result": {"result": {"ok": true}, "warnings": []}})
            }
        }
        "warn" => json!({
            "id": id,
            "result": {"result": {"ok": true}, "warnings": ["partial data returned"]}
        }),
        "missing" => json!({
            "id": id,
            "result": {"result": null, "warnings": [], "error": {"message": "no such entry"}}
        }),
        other => json!({
            "id": id,
            "error": {"message": format!("unknown tool '{other}'"), "retryable": false}
        }),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let stdin = BufReader::new(tokio::io::stdin());
    let mut stdout = tokio::io::stdout();
    let mut lines = stdin.lines();

    while let Ok(Some(line)) = lines.next_line().await {
        let Ok(request) = serde_json::from_str::<Value>(&line) else {
            continue;
        };
        let id = request.get("id").and_then(Value::as_u64).unwrap_or(0);
        let method = request.get("method").and_then(Value::as_str).unwrap_or("");
        let empty = Value::Null;
        let params = request.get("params").unwrap_or(&empty);

        let response = match method {
            "tools/list" => json!({"id": id, "result": tool_table()}),
            "tools/call" => handle_call(id, params),
            other => json!({
                "id": id,
                "error": {"message": format!("unknown method '{other}'"), "retryable": false}
            }),
        };

        let mut out = response.to_string();
        out.push('\n');
        if stdout.write_all(out.as_bytes()).await.is_err() {
            break;
        }
        let _ = stdout.flush().await;
    }
}
