//! Binary data contract
//!
//! Binary payloads travel between nodes as base64 strings accompanied by a
//! sibling boolean flag `<key>_is_binary: true` in the same namespace.
//! A missing flag means text, for backward compatibility. Producers warn
//! past a soft size limit; consumers decode only when the flag is set.

use crate::store::Namespace;
use crate::{EngineError, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::{Map, Value};

/// Suffix of the sibling flag key.
pub const BINARY_FLAG_SUFFIX: &str = "_is_binary";

/// Soft size limit: 50 MB of raw bytes. Larger payloads still pass, with a
/// warning that degrades the execution.
pub const BINARY_SOFT_LIMIT: usize = 50 * 1024 * 1024;

/// The sibling flag key for a data key.
pub fn flag_key(key: &str) -> String {
    format!("{key}{BINARY_FLAG_SUFFIX}")
}

pub fn encode(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

pub fn decode(text: &str) -> Result<Vec<u8>> {
    BASE64
        .decode(text.trim())
        .map_err(|e| EngineError::internal(format!("invalid base64 payload: {e}")))
}

/// Whether `key` in an output object is flagged as binary.
pub fn is_marked_binary(outputs: &Map<String, Value>, key: &str) -> bool {
    outputs
        .get(&flag_key(key))
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

/// Write bytes under `key` with the sibling flag set, warning past the soft
/// size limit.
pub fn write_binary(ns: &mut Namespace<'_>, key: &str, bytes: &[u8]) {
    if bytes.len() > BINARY_SOFT_LIMIT {
        ns.push_warning(format!(
            "node '{}' wrote {} bytes of binary data under '{key}' (soft limit {} bytes)",
            ns.node_id(),
            bytes.len(),
            BINARY_SOFT_LIMIT
        ));
    }
    ns.set(key, Value::String(encode(bytes)));
    ns.set(flag_key(key), Value::Bool(true));
}

/// The redacted rendering of a binary value for traces.
pub fn redacted(encoded_len: usize) -> String {
    // Four base64 characters encode three bytes.
    let approx_bytes = encoded_len / 4 * 3;
    format!("<binary data: {approx_bytes} bytes>")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SharedStore;
    use serde_json::json;

    #[test]
    fn test_round_trip() {
        let bytes: Vec<u8> = (0..=255).collect();
        assert_eq!(decode(&encode(&bytes)).unwrap(), bytes);
    }

    #[test]
    fn test_flag_key_shape() {
        assert_eq!(flag_key("response"), "response_is_binary");
    }

    #[test]
    fn test_write_binary_sets_sibling_flag() {
        let mut store = SharedStore::new();
        let mut ns = store.namespace("download");
        write_binary(&mut ns, "response", b"\x89PNG\r\n");
        drop(ns);
        let outputs = store.node_outputs("download").unwrap();
        assert!(is_marked_binary(outputs, "response"));
        assert_eq!(
            decode(outputs["response"].as_str().unwrap()).unwrap(),
            b"\x89PNG\r\n"
        );
    }

    #[test]
    fn test_missing_flag_means_text() {
        let outputs = json!({"content": "plain"}).as_object().unwrap().clone();
        assert!(!is_marked_binary(&outputs, "content"));
    }

    #[test]
    fn test_invalid_base64_rejected() {
        assert!(decode("no spaces allowed!").is_err());
    }

    #[test]
    fn test_redacted_rendering() {
        assert_eq!(redacted(8), "<binary data: 6 bytes>");
    }
}
