//! LMCache connector (deprecated).
//!
//! One-shot cache warmer: the prefiller runs the prompt clamped to a single
//! token so its KV cache is populated, its output is discarded, and the
//! decoder then serves the original request against the warm cache.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use serde_json::json;
use tracing::{debug, error};

use super::{
    error_response, parse_request_object, FIELD_MAX_COMPLETION_TOKENS, FIELD_MAX_TOKENS,
};
use crate::proxy::RequestContext;
use crate::server::ProxyState;

pub(super) async fn run(
    state: &ProxyState,
    ctx: RequestContext,
    original: Bytes,
    prefiller: &str,
) -> Response {
    debug!(prefiller, "running LMCache protocol");

    let mut request = match parse_request_object(&original) {
        Ok(map) => map,
        Err(response) => return response,
    };

    request.insert(FIELD_MAX_TOKENS.to_string(), json!(1));
    request.insert(FIELD_MAX_COMPLETION_TOKENS.to_string(), json!(1));

    let prefill_body = match serde_json::to_vec(&request) {
        Ok(body) => Bytes::from(body),
        Err(err) => {
            error!(error = %err, "failed to serialize prefill request");
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "failed to serialize prefill request",
            );
        }
    };

    let handler = match state.prefillers.handler(prefiller) {
        Ok(handler) => handler,
        Err(err) => {
            error!(error = %err, "failed to resolve prefiller handler");
            return error_response(StatusCode::BAD_GATEWAY, err.to_string());
        }
    };

    let prefill = match handler.forward_buffered(&ctx, prefill_body).await {
        Ok(response) => response,
        Err(err) => {
            error!(error = %err, "prefill request failed");
            return error_response(StatusCode::BAD_GATEWAY, "prefill request failed");
        }
    };

    if !prefill.is_success() {
        error!(code = %prefill.status, "prefill request failed");
        return prefill.status.into_response();
    }

    // Cache is warm; the decoder gets the untouched original request.
    state.decoder.forward_rewritten(&ctx, original).await
}
