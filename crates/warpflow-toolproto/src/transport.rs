//! Framed transports for tool-protocol servers
//!
//! Both transports carry the same envelope:
//!
//! ```text
//! → {"id": 7, "method": "tools/call", "params": {"name": "grep", "arguments": {...}}}
//! ← {"id": 7, "result": {...}}
//! ← {"id": 7, "error": {"message": "...", "retryable": true}}
//! ```
//!
//! Stdio servers speak JSON-Lines over stdin/stdout of a child process; a
//! reader task routes responses to pending oneshot slots by request id.
//! HTTP servers receive the envelope via POST. Request ids come from a
//! mutex-guarded counter, and a semaphore bounds in-flight requests:
//! exceeding the window is a `capacity` error retried under node policy.

use crate::config::ServerConfig;
use parking_lot::Mutex as SyncMutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{oneshot, Mutex, Semaphore};
use warpflow::{EngineError, Result};

/// Max concurrently in-flight requests per server.
pub const MAX_IN_FLIGHT: usize = 8;

/// A transport-level error with a retryability hint from the server.
#[derive(Debug, Clone)]
pub struct WireError {
    pub message: String,
    pub retryable: bool,
}

type PendingMap = Arc<SyncMutex<HashMap<u64, oneshot::Sender<std::result::Result<Value, WireError>>>>>;

/// One connected server.
pub struct Transport {
    server_name: String,
    next_id: Mutex<u64>,
    in_flight: Semaphore,
    inner: TransportInner,
}

enum TransportInner {
    Stdio {
        stdin: Mutex<tokio::process::ChildStdin>,
        pending: PendingMap,
        // Held so the child dies with the transport.
        _child: tokio::process::Child,
    },
    Http {
        client: reqwest::Client,
        url: String,
        headers: Vec<(String, String)>,
    },
}

impl Transport {
    /// Connect to a configured server, spawning the child for stdio ones.
    pub async fn connect(server_name: &str, config: &ServerConfig) -> Result<Self> {
        let inner = match config {
            ServerConfig::Stdio { command, args, env, .. } => {
                let mut child = tokio::process::Command::new(command)
                    .args(args)
                    .envs(env)
                    .stdin(Stdio::piped())
                    .stdout(Stdio::piped())
                    .stderr(Stdio::inherit())
                    .kill_on_drop(true)
                    .spawn()
                    .map_err(|e| {
                        EngineError::tool_protocol(format!(
                            "cannot spawn tool server '{server_name}' ({command}): {e}"
                        ))
                        .with_suggestion(format!("check that '{command}' is installed"))
                    })?;
                let stdin = child.stdin.take().ok_or_else(|| {
                    EngineError::tool_protocol(format!(
                        "tool server '{server_name}' has no stdin pipe"
                    ))
                })?;
                let stdout = child.stdout.take().ok_or_else(|| {
                    EngineError::tool_protocol(format!(
                        "tool server '{server_name}' has no stdout pipe"
                    ))
                })?;

                let pending: PendingMap = Arc::new(SyncMutex::new(HashMap::new()));
                spawn_reader(server_name.to_string(), stdout, Arc::clone(&pending));

                TransportInner::Stdio {
                    stdin: Mutex::new(stdin),
                    pending,
                    _child: child,
                }
            }
            ServerConfig::Http { url, headers, .. } => TransportInner::Http {
                client: reqwest::Client::new(),
                url: url.clone(),
                headers: headers
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            },
        };
        tracing::debug!(server = %server_name, "tool-protocol transport connected");
        Ok(Self {
            server_name: server_name.to_string(),
            next_id: Mutex::new(0),
            in_flight: Semaphore::new(MAX_IN_FLIGHT),
            inner,
        })
    }

    /// Issue one request and await its response under `timeout`.
    pub async fn request(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<std::result::Result<Value, WireError>> {
        let _permit = self.in_flight.try_acquire().map_err(|_| {
            EngineError::tool_protocol(format!(
                "tool server '{}' is at capacity ({MAX_IN_FLIGHT} requests in flight)",
                self.server_name
            ))
        })?;

        let id = {
            let mut guard = self.next_id.lock().await;
            *guard += 1;
            *guard
        };
        let envelope = json!({ "id": id, "method": method, "params": params });

        match &self.inner {
            TransportInner::Stdio { stdin, pending, .. } => {
                let (tx, rx) = oneshot::channel();
                pending.lock().insert(id, tx);

                let mut line = envelope.to_string();
                line.push('\n');
                {
                    let mut stdin = stdin.lock().await;
                    stdin.write_all(line.as_bytes()).await.map_err(|e| {
                        pending.lock().remove(&id);
                        EngineError::tool_protocol(format!(
                            "writing to tool server '{}' failed: {e}",
                            self.server_name
                        ))
                    })?;
                    stdin.flush().await.map_err(|e| {
                        pending.lock().remove(&id);
                        EngineError::tool_protocol(format!(
                            "flushing tool server '{}' failed: {e}",
                            self.server_name
                        ))
                    })?;
                }

                match tokio::time::timeout(timeout, rx).await {
                    Ok(Ok(outcome)) => Ok(outcome),
                    Ok(Err(_)) => Err(EngineError::tool_protocol(format!(
                        "tool server '{}' closed before answering request {id}",
                        self.server_name
                    ))),
                    Err(_) => {
                        pending.lock().remove(&id);
                        Err(EngineError::timeout(format!(
                            "tool server '{}' did not answer request {id} within {}ms",
                            self.server_name,
                            timeout.as_millis()
                        )))
                    }
                }
            }
            TransportInner::Http {
                client,
                url,
                headers,
            } => {
                let mut request = client.post(url).json(&envelope).timeout(timeout);
                for (name, value) in headers {
                    request = request.header(name, value);
                }
                let response = request.send().await.map_err(|e| {
                    if e.is_timeout() {
                        EngineError::timeout(format!(
                            "tool server '{}' did not answer within {}ms",
                            self.server_name,
                            timeout.as_millis()
                        ))
                    } else {
                        EngineError::tool_protocol(format!(
                            "request to tool server '{}' failed: {e}",
                            self.server_name
                        ))
                    }
                })?;
                let body: Value = response.json().await.map_err(|e| {
                    EngineError::tool_protocol(format!(
                        "tool server '{}' returned a non-JSON envelope: {e}",
                        self.server_name
                    ))
                })?;
                Ok(parse_envelope(&body))
            }
        }
    }
}

fn parse_envelope(body: &Value) -> std::result::Result<Value, WireError> {
    if let Some(error) = body.get("error") {
        return Err(WireError {
            message: error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unspecified server error")
                .to_string(),
            retryable: error
                .get("retryable")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        });
    }
    Ok(body.get("result").cloned().unwrap_or(Value::Null))
}

fn spawn_reader(server_name: String, stdout: tokio::process::ChildStdout, pending: PendingMap) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stdout).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let Ok(body) = serde_json::from_str::<Value>(&line) else {
                        tracing::warn!(server = %server_name, "tool server emitted non-JSON line");
                        continue;
                    };
                    let Some(id) = body.get("id").and_then(Value::as_u64) else {
                        tracing::warn!(server = %server_name, "tool server response has no id");
                        continue;
                    };
                    if let Some(tx) = pending.lock().remove(&id) {
                        let _ = tx.send(parse_envelope(&body));
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    tracing::warn!(server = %server_name, error = %err, "tool server read failed");
                    break;
                }
            }
        }
        // Wake every waiter; the server is gone.
        let mut map = pending.lock();
        for (_, tx) in map.drain() {
            let _ = tx.send(Err(WireError {
                message: format!("tool server '{server_name}' disconnected"),
                retryable: true,
            }));
        }
        tracing::debug!(server = %server_name, "tool server reader finished");
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_result_envelope() {
        let body = json!({"id": 1, "result": {"tools": []}});
        assert_eq!(parse_envelope(&body).unwrap(), json!({"tools": []}));
    }

    #[test]
    fn test_parse_error_envelope() {
        let body = json!({"id": 1, "error": {"message": "boom", "retryable": true}});
        let err = parse_envelope(&body).unwrap_err();
        assert_eq!(err.message, "boom");
        assert!(err.retryable);
    }

    #[test]
    fn test_error_defaults_not_retryable() {
        let body = json!({"id": 1, "error": {"message": "nope"}});
        assert!(!parse_envelope(&body).unwrap_err().retryable);
    }

    #[tokio::test]
    async fn test_http_transport_round_trip() {
        use wiremock::matchers::method;
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": 1, "result": {"ok": true}
            })))
            .mount(&server)
            .await;

        let config = ServerConfig::Http {
            url: server.uri(),
            headers: Default::default(),
            result_alias: None,
        };
        let transport = Transport::connect("t", &config).await.unwrap();
        let outcome = transport
            .request("tools/list", json!({}), Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(outcome.unwrap(), json!({"ok": true}));
    }
}
