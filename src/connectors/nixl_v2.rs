//! NIXL v2 connector (the default).
//!
//! The sidecar only flags the request for remote prefill; KV metadata moves
//! over a side channel between the engines, and the decoder pulls blocks
//! directly from the prefiller. The decoder therefore receives the original
//! client body untouched.

use axum::http::{HeaderValue, StatusCode};
use axum::response::Response;
use bytes::Bytes;
use serde_json::{json, Value};
use tracing::{debug, error};
use uuid::Uuid;

use super::{
    error_response, parse_request_object, FIELD_DO_REMOTE_PREFILL, FIELD_KV_TRANSFER_PARAMS,
};
use crate::proxy::{RequestContext, HEADER_REQUEST_ID};
use crate::server::ProxyState;

pub(super) async fn run(
    state: &ProxyState,
    mut ctx: RequestContext,
    original: Bytes,
    prefiller: &str,
) -> Response {
    debug!(prefiller, "running NIXL v2 protocol");

    let mut request = match parse_request_object(&original) {
        Ok(map) => map,
        Err(response) => return response,
    };

    let request_id = Uuid::new_v4().to_string();
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        ctx.headers.insert(HEADER_REQUEST_ID, value);
    }

    // Flag the request for remote prefill, merging into any
    // kv_transfer_params the client already sent.
    match request
        .entry(FIELD_KV_TRANSFER_PARAMS)
        .or_insert_with(|| json!({}))
    {
        Value::Object(params) => {
            params.insert(FIELD_DO_REMOTE_PREFILL.to_string(), json!(true));
        }
        other => {
            *other = json!({ FIELD_DO_REMOTE_PREFILL: true });
        }
    }

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
        return prefill.into_response();
    }

    // The decoder learns of the remote prefill over the side channel; it
    // must see the client body byte for byte.
    debug!(%request_id, "sending original request to decoder");
    state.decoder.forward_rewritten(&ctx, original).await
}
