//! Issue an HTTP request.
//!
//! Transport failures (DNS, connect, TLS) raise and are retried under the
//! node's policy. Any response, including 4xx/5xx, is a valid result: the
//! node stores status, headers and body and routes non-2xx/3xx to the
//! `"error"` action. Binary bodies follow the binary data contract.

use crate::util::{optional_str, required_str};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use warpflow::binary;
use warpflow::ir::NodeSpec;
use warpflow::node::{Action, ExecContext, FnNodeFactory, Node, NodeContext};
use warpflow::{EngineError, ErrorCategory, Namespace, NodeRegistry, Result, StoreView};

const INTERFACE: &str = "\
Issue an HTTP request and store the response. Bodies that are not valid
UTF-8 text are base64-encoded with the binary flag set. Status >= 400
routes to the error action; the node never raises on a completed response.

Interface:
- Writes: shared[\"status\"]: int
- Writes: shared[\"headers\"]: dict
- Writes: shared[\"response\"]: string | bytes
- Writes: shared[\"response_is_binary\"]: bool
- Params: url: string
- Params: method: string   # default GET
- Params: headers: dict   # default {}
- Params: body: string   # default \"\", stdin if piped
- Actions: default (status < 400), error (4xx/5xx)
";

/// Content-type prefixes treated as text regardless of byte content.
const TEXT_CONTENT_TYPES: &[&str] = &["text/", "application/json", "application/xml"];

/// HTTP request node.
pub struct HttpNode {
    client: reqwest::Client,
}

impl HttpNode {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpNode {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Node for HttpNode {
    async fn prep(&self, _view: &StoreView<'_>, params: &Value) -> Result<Value> {
        let url = required_str(params, "url", ErrorCategory::Http)?;
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(EngineError::http(format!("invalid url '{url}'"))
                .with_fixable(true)
                .with_suggestion("urls must start with http:// or https://".to_string()));
        }
        let method = optional_str(params, "method", "GET").to_uppercase();
        let headers = params
            .get("headers")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        let body = optional_str(params, "body", "");
        Ok(json!({
            "url": url,
            "method": method,
            "headers": headers,
            "body": body,
        }))
    }

    async fn exec(&self, prep: Value, _ctx: &ExecContext) -> Result<Value> {
        let url = prep["url"].as_str().unwrap_or_default();
        let method_text = prep["method"].as_str().unwrap_or("GET");
        let method = reqwest::Method::from_bytes(method_text.as_bytes()).map_err(|_| {
            EngineError::http(format!("invalid HTTP method '{method_text}'")).with_fixable(true)
        })?;

        let mut request = self.client.request(method, url);
        if let Some(headers) = prep["headers"].as_object() {
            for (name, value) in headers {
                if let Some(value) = value.as_str() {
                    request = request.header(name, value);
                }
            }
        }
        let body = prep["body"].as_str().unwrap_or_default();
        if !body.is_empty() {
            request = request.body(body.to_string());
        }

        // Transport errors raise (and retry under node policy); a completed
        // response of any status is a result, not an error.
        let response = request.send().await.map_err(|e| {
            EngineError::http(format!("request to '{url}' failed: {e}"))
                .with_suggestion(format!("check that '{url}' is reachable"))
        })?;

        let status = response.status().as_u16();
        let mut headers = Map::new();
        for (name, value) in response.headers() {
            headers.insert(
                name.to_string(),
                Value::String(value.to_str().unwrap_or_default().to_string()),
            );
        }
        let content_type = headers
            .get("content-type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let bytes = response.bytes().await.map_err(|e| {
            EngineError::http(format!("failed reading response body from '{url}': {e}"))
        })?;

        let force_text = TEXT_CONTENT_TYPES
            .iter()
            .any(|prefix| content_type.starts_with(prefix));
        let (body_value, is_binary) = if force_text {
            (
                Value::String(String::from_utf8_lossy(&bytes).to_string()),
                false,
            )
        } else {
            match std::str::from_utf8(&bytes) {
                Ok(text) => (Value::String(text.to_string()), false),
                Err(_) => (Value::String(binary::encode(&bytes)), true),
            }
        };

        tracing::debug!(url = %url, status, bytes = bytes.len(), is_binary, "http request finished");
        Ok(json!({
            "status": status,
            "headers": headers,
            "response": body_value,
            "is_binary": is_binary,
        }))
    }

    async fn post(&self, ns: &mut Namespace<'_>, _prep: &Value, exec: Value) -> Result<Action> {
        let status = exec["status"].as_u64().unwrap_or(0);
        let is_binary = exec["is_binary"].as_bool().unwrap_or(false);
        ns.set("status", exec["status"].clone());
        ns.set("headers", exec["headers"].clone());
        ns.set("response", exec["response"].clone());
        ns.set("response_is_binary", Value::Bool(is_binary));
        if status < 400 {
            Ok(Action::default_action())
        } else {
            Ok(Action::error_action())
        }
    }
}

pub fn register(registry: &NodeRegistry) -> Result<()> {
    registry.register(
        "http",
        "1.0.0",
        INTERFACE,
        Arc::new(FnNodeFactory(|_spec: &NodeSpec, _ctx: &NodeContext| {
            Ok(Arc::new(HttpNode::new()) as Arc<dyn Node>)
        })),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use warpflow::SharedStore;
    use wiremock::matchers::{body_string, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn run(params: Value) -> Result<(SharedStore, Action)> {
        let mut store = SharedStore::new();
        let node = HttpNode::new();
        let ctx = ExecContext::new("t", "fetch");
        let prep = {
            let view = store.view();
            node.prep(&view, &params).await?
        };
        let exec = node.exec(prep.clone(), &ctx).await?;
        let action = {
            let mut ns = store.namespace("fetch");
            node.post(&mut ns, &prep, exec).await?
        };
        Ok((store, action))
    }

    #[tokio::test]
    async fn test_get_text_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/hello"))
            .respond_with(ResponseTemplate::new(200).set_body_string("world"))
            .mount(&server)
            .await;

        let (store, action) = run(json!({"url": format!("{}/hello", server.uri())}))
            .await
            .unwrap();
        assert_eq!(action, Action::default_action());
        let outputs = store.node_outputs("fetch").unwrap();
        assert_eq!(outputs["status"], json!(200));
        assert_eq!(outputs["response"], json!("world"));
        assert_eq!(outputs["response_is_binary"], json!(false));
    }

    #[tokio::test]
    async fn test_404_routes_to_error_without_raising() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404).set_body_string("not found"))
            .mount(&server)
            .await;

        let (store, action) = run(json!({"url": server.uri()})).await.unwrap();
        assert_eq!(action, Action::error_action());
        let outputs = store.node_outputs("fetch").unwrap();
        assert_eq!(outputs["status"], json!(404));
        assert_eq!(outputs["response"], json!("not found"));
    }

    #[tokio::test]
    async fn test_binary_body_flagged_and_encoded() {
        let payload: Vec<u8> = vec![0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a, 0xff];
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(payload.clone())
                    .insert_header("content-type", "image/png"),
            )
            .mount(&server)
            .await;

        let (store, _) = run(json!({"url": server.uri()})).await.unwrap();
        let outputs = store.node_outputs("fetch").unwrap();
        assert_eq!(outputs["response_is_binary"], json!(true));
        let decoded = binary::decode(outputs["response"].as_str().unwrap()).unwrap();
        assert_eq!(decoded, payload);
    }

    #[tokio::test]
    async fn test_post_with_headers_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/submit"))
            .and(header("x-token", "secret"))
            .and(body_string("payload"))
            .respond_with(ResponseTemplate::new(201))
            .mount(&server)
            .await;

        let (store, action) = run(json!({
            "url": format!("{}/submit", server.uri()),
            "method": "post",
            "headers": {"x-token": "secret"},
            "body": "payload",
        }))
        .await
        .unwrap();
        assert_eq!(action, Action::default_action());
        assert_eq!(store.node_outputs("fetch").unwrap()["status"], json!(201));
    }

    #[tokio::test]
    async fn test_transport_failure_raises_http_error() {
        // Nothing listens on this port.
        let err = run(json!({"url": "http://127.0.0.1:1/nope"})).await.unwrap_err();
        assert_eq!(err.category, ErrorCategory::Http);
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_invalid_url_rejected_in_prep() {
        let err = run(json!({"url": "ftp://example.com"})).await.unwrap_err();
        assert!(err.message.contains("invalid url"));
    }

    #[test]
    fn test_interface_parses() {
        let iface = warpflow::Interface::parse(INTERFACE).unwrap();
        assert!(iface.covers_write_path(&["response"]));
        assert!(iface.covers_write_path(&["headers", "content-type"]));
        assert_eq!(iface.actions[1].name, "error");
    }
}
