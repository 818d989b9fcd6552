//! NIXL v1 connector (deprecated).
//!
//! Two-phase handshake in which the sidecar itself transports KV metadata:
//! the prefiller runs with `do_remote_decode` and returns block ids and its
//! engine coordinates; the decode request carries them back under
//! `kv_transfer_params` with `do_remote_prefill` set.

use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use serde_json::{json, Map, Value};
use tracing::{debug, error, warn};
use uuid::Uuid;

use super::{
    error_response, parse_request_object, FIELD_DO_REMOTE_DECODE, FIELD_DO_REMOTE_PREFILL,
    FIELD_KV_TRANSFER_PARAMS, FIELD_REMOTE_BLOCK_IDS, FIELD_REMOTE_ENGINE_ID, FIELD_REMOTE_HOST,
    FIELD_REMOTE_PORT, FIELD_STREAM, FIELD_STREAM_OPTIONS,
};
use crate::proxy::{RequestContext, HEADER_REQUEST_ID};
use crate::server::ProxyState;

const HANDSHAKE_FIELDS: [&str; 4] = [
    FIELD_REMOTE_BLOCK_IDS,
    FIELD_REMOTE_ENGINE_ID,
    FIELD_REMOTE_HOST,
    FIELD_REMOTE_PORT,
];

pub(super) async fn run(
    state: &ProxyState,
    mut ctx: RequestContext,
    original: Bytes,
    prefiller: &str,
) -> Response {
    debug!(prefiller, "running NIXL v1 protocol");

    let mut request = match parse_request_object(&original) {
        Ok(map) => map,
        Err(response) => return response,
    };

    let request_id = Uuid::new_v4().to_string();
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        ctx.headers.insert(HEADER_REQUEST_ID, value);
    }

    // The prefill leg must not stream: its JSON body carries the handshake.
    // Remember the client's streaming settings so the decode leg can
    // restore them.
    let stream = request.get(FIELD_STREAM).cloned();
    let stream_options = request.remove(FIELD_STREAM_OPTIONS);

    request.insert(FIELD_STREAM.to_string(), json!(false));
    request.insert(
        FIELD_KV_TRANSFER_PARAMS.to_string(),
        json!({ FIELD_DO_REMOTE_DECODE: true }),
    );

    let prefill_body = match serde_json::to_vec(&request) {
        Ok(body) => Bytes::from(body),
        Err(err) => {
            error!(%request_id, error = %err, "failed to serialize prefill request");
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "failed to serialize prefill request",
            );
        }
    };

    let handler = match state.prefillers.handler(prefiller) {
        Ok(handler) => handler,
        Err(err) => {
            error!(%request_id, error = %err, "failed to resolve prefiller handler");
            return error_response(StatusCode::BAD_GATEWAY, err.to_string());
        }
    };

    debug!(%request_id, prefiller, "sending request to prefiller");
    let prefill = match handler.forward_buffered(&ctx, prefill_body).await {
        Ok(response) => response,
        Err(err) => {
            error!(%request_id, error = %err, "prefill request failed");
            return error_response(StatusCode::BAD_GATEWAY, "prefill request failed");
        }
    };

    if !prefill.is_success() {
        error!(%request_id, code = %prefill.status, "prefill request failed");
        return prefill.status.into_response();
    }

    let prefill_response = match prefill.json() {
        Ok(value) => value,
        Err(err) => {
            error!(%request_id, error = %err, "prefiller response is not valid JSON");
            return error_response(
                StatusCode::BAD_REQUEST,
                format!("prefiller response is not valid JSON: {err}"),
            );
        }
    };

    // Extract the handshake fields. A missing field is a warning unless
    // strict handshake checking is on: the decoder will almost certainly
    // fail without them, but the model server owns that decision.
    let handshake = prefill_response
        .get(FIELD_KV_TRANSFER_PARAMS)
        .and_then(Value::as_object);
    if handshake.is_none() {
        warn!(
            %request_id,
            "missing 'kv_transfer_params' section in prefiller response"
        );
        if state.config.strict_handshake {
            return error_response(
                StatusCode::BAD_GATEWAY,
                "prefiller response missing kv_transfer_params",
            );
        }
    }

    let mut kv_params = Map::new();
    kv_params.insert(FIELD_DO_REMOTE_PREFILL.to_string(), json!(true));
    for field in HANDSHAKE_FIELDS {
        match handshake.and_then(|params| params.get(field)) {
            Some(value) => {
                kv_params.insert(field.to_string(), value.clone());
            }
            None => {
                warn!(
                    %request_id,
                    field, "missing field in kv_transfer_params in prefiller response"
                );
                if state.config.strict_handshake {
                    return error_response(
                        StatusCode::BAD_GATEWAY,
                        format!("prefiller response missing {field}"),
                    );
                }
            }
        }
    }

    let kv_params_value = Value::Object(kv_params.clone());
    debug!(
        %request_id,
        params = %kv_params_value,
        "received prefiller handshake"
    );

    // Decode leg: restore the client's streaming settings and swap in the
    // handshake parameters.
    match stream {
        Some(value) => request.insert(FIELD_STREAM.to_string(), value),
        None => request.remove(FIELD_STREAM),
    };
    if let Some(value) = stream_options {
        request.insert(FIELD_STREAM_OPTIONS.to_string(), value);
    }
    request.insert(
        FIELD_KV_TRANSFER_PARAMS.to_string(),
        Value::Object(kv_params),
    );

    let decode_body = match serde_json::to_vec(&request) {
        Ok(body) => Bytes::from(body),
        Err(err) => {
            error!(%request_id, error = %err, "failed to serialize decode request");
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "failed to serialize decode request",
            );
        }
    };

    debug!(%request_id, "sending request to decoder");
    state.decoder.forward_rewritten(&ctx, decode_body).await
}
