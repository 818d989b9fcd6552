//! Connector protocols coordinating KV-cache transfer between the
//! prefiller and the local decoder.
//!
//! All four protocols share one contract: given the inbound request and a
//! validated prefiller `host:port`, leave the client with either a fully
//! streamed decode response, a 4xx/5xx JSON error, or a 502 when the
//! prefiller transport fails.

mod lmcache;
mod nixl_v1;
mod nixl_v2;
mod sglang;

use axum::{
    body::to_bytes,
    extract::Request,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use serde_json::{json, Map, Value};
use tracing::error;

use crate::config::ConnectorKind;
use crate::proxy::RequestContext;
use crate::server::ProxyState;

// Wire-level field names. Fixed strings: the model server keys on them.
pub const FIELD_KV_TRANSFER_PARAMS: &str = "kv_transfer_params";
pub const FIELD_DO_REMOTE_PREFILL: &str = "do_remote_prefill";
pub const FIELD_DO_REMOTE_DECODE: &str = "do_remote_decode";
pub const FIELD_REMOTE_BLOCK_IDS: &str = "remote_block_ids";
pub const FIELD_REMOTE_ENGINE_ID: &str = "remote_engine_id";
pub const FIELD_REMOTE_HOST: &str = "remote_host";
pub const FIELD_REMOTE_PORT: &str = "remote_port";
pub const FIELD_MAX_TOKENS: &str = "max_tokens";
pub const FIELD_MAX_COMPLETION_TOKENS: &str = "max_completion_tokens";
pub const FIELD_STREAM: &str = "stream";
pub const FIELD_STREAM_OPTIONS: &str = "stream_options";
pub const FIELD_BOOTSTRAP_HOST: &str = "bootstrap_host";
pub const FIELD_BOOTSTRAP_PORT: &str = "bootstrap_port";
pub const FIELD_BOOTSTRAP_ROOM: &str = "bootstrap_room";

/// Run the configured connector protocol for one request. Single dispatch
/// site; the connector kind is fixed at startup.
pub async fn run(state: &ProxyState, req: Request, prefiller: &str) -> Response {
    let (parts, body) = req.into_parts();

    // Child of the shutdown token: fires when the server shuts down, or
    // when this handler is dropped before the connector finishes (the
    // client went away). The guard is disarmed on normal completion.
    let cancel = state.shutdown.child_token();
    let ctx = RequestContext::from_parts(&parts, cancel.clone());
    let guard = cancel.drop_guard();

    let original = match to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(err) => {
            error!(error = %err, "failed to read request body");
            return error_response(
                StatusCode::BAD_REQUEST,
                format!("failed to read request body: {err}"),
            );
        }
    };

    let response = match state.config.connector {
        ConnectorKind::NixlV1 => nixl_v1::run(state, ctx, original, prefiller).await,
        ConnectorKind::NixlV2 => nixl_v2::run(state, ctx, original, prefiller).await,
        ConnectorKind::LmCache => lmcache::run(state, ctx, original, prefiller).await,
        ConnectorKind::SgLang => sglang::run(state, ctx, original, prefiller).await,
    };

    guard.disarm();
    response
}

/// JSON error body in the shape OpenAI-compatible clients expect.
pub(crate) fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(json!({
            "object": "error",
            "message": message.into(),
        })),
    )
        .into_response()
}

/// Decode the request body into an open JSON object. The body is a superset
/// of the OpenAI schema; unknown fields must survive the round trip, so it
/// is never deserialized into a closed struct.
pub(crate) fn parse_request_object(body: &Bytes) -> Result<Map<String, Value>, Response> {
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(error_response(
            StatusCode::BAD_REQUEST,
            format!("request body must be a JSON object, got {}", json_type(&other)),
        )),
        Err(err) => Err(error_response(
            StatusCode::BAD_REQUEST,
            format!("invalid JSON in request body: {err}"),
        )),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_request_object() {
        let body = Bytes::from_static(br#"{"model":"m","prompt":"hi"}"#);
        let map = parse_request_object(&body).unwrap();
        assert_eq!(map["model"], "m");
    }

    #[test]
    fn test_parse_rejects_non_objects() {
        assert!(parse_request_object(&Bytes::from_static(b"[1,2]")).is_err());
        assert!(parse_request_object(&Bytes::from_static(b"not json")).is_err());
        assert!(parse_request_object(&Bytes::new()).is_err());
    }
}
