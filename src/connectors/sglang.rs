//! SGLang connector.
//!
//! Prefiller and decoder both receive the request, tagged with a shared
//! bootstrap room so the two engines can rendezvous out of band. The
//! prefill leg is fire-and-forget; only the decode leg is streamed back to
//! the client.

use std::time::{SystemTime, UNIX_EPOCH};

use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use rand::Rng;
use serde_json::json;
use tracing::{debug, error, warn};

use super::{
    error_response, parse_request_object, FIELD_BOOTSTRAP_HOST, FIELD_BOOTSTRAP_PORT,
    FIELD_BOOTSTRAP_ROOM,
};
use crate::proxy::{RequestContext, HEADER_DECODER_HOST_PORT};
use crate::server::ProxyState;

/// Environment override for the SGLang bootstrap port.
pub const ENV_BOOTSTRAP_PORT: &str = "SGLANG_BOOTSTRAP_PORT";

const DEFAULT_BOOTSTRAP_PORT: u16 = 8998;

pub(super) async fn run(
    state: &ProxyState,
    ctx: RequestContext,
    original: Bytes,
    prefiller: &str,
) -> Response {
    debug!(prefiller, "running SGLang protocol");

    let mut request = match parse_request_object(&original) {
        Ok(map) => map,
        Err(response) => return response,
    };

    if prefiller.is_empty() {
        return error_response(
            StatusCode::BAD_REQUEST,
            "prefill host required for SGLang P/D disaggregation",
        );
    }

    let room_id = generate_room_id();
    request.insert(
        FIELD_BOOTSTRAP_HOST.to_string(),
        json!(bootstrap_host(prefiller)),
    );
    request.insert(FIELD_BOOTSTRAP_PORT.to_string(), json!(bootstrap_port()));
    request.insert(FIELD_BOOTSTRAP_ROOM.to_string(), json!(room_id));

    let body = match serde_json::to_vec(&request) {
        Ok(body) => Bytes::from(body),
        Err(err) => {
            error!(error = %err, "failed to serialize bootstrap request");
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "failed to serialize bootstrap request",
            );
        }
    };

    let prefill_handler = match state.prefillers.handler(prefiller) {
        Ok(handler) => handler,
        Err(err) => {
            error!(error = %err, "failed to resolve prefiller handler");
            return error_response(StatusCode::BAD_GATEWAY, err.to_string());
        }
    };

    // Fire-and-forget prefill. The task is tied to the request's
    // cancellation token: when the client goes away or the server shuts
    // down it is abandoned, never joined.
    let prefill_ctx = ctx.clone();
    let prefill_body = body.clone();
    let cancel = ctx.cancel.clone();
    tokio::spawn(async move {
        debug!(room_id, "sending prefill request");
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(room_id, "abandoning prefill request");
            }
            result = prefill_handler.forward_buffered(&prefill_ctx, prefill_body) => match result {
                Ok(response) => {
                    debug!(room_id, status = %response.status, "prefill request completed");
                }
                Err(err) => {
                    error!(room_id, error = %err, "prefill request failed");
                }
            }
        }
    });

    debug!(room_id, "sending decode request");
    match decoder_override(&ctx.headers) {
        Some(decode_host) => {
            if !state.validator.is_allowed(&decode_host) {
                warn!(decoder = %decode_host, "decode target rejected by allowlist");
                return (
                    StatusCode::FORBIDDEN,
                    "Forbidden: decode target not allowed",
                )
                    .into_response();
            }
            match state.prefillers.handler(&decode_host) {
                Ok(handler) => handler.forward_rewritten(&ctx, body).await,
                Err(err) => {
                    error!(error = %err, "failed to resolve decoder override handler");
                    error_response(StatusCode::BAD_GATEWAY, err.to_string())
                }
            }
        }
        None => state.decoder.forward_rewritten(&ctx, body).await,
    }
}

/// Rendezvous identifier shared by the prefill and decode legs. Nanosecond
/// timestamp plus a small random offset to disambiguate same-instant
/// requests.
fn generate_room_id() -> i64 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos() as i64)
        .unwrap_or_default();

    nanos + rand::rng().random_range(0..1000)
}

/// Hostname portion of the prefiller target, port stripped.
fn bootstrap_host(prefiller: &str) -> String {
    let host_port = prefiller
        .strip_prefix("http://")
        .or_else(|| prefiller.strip_prefix("https://"))
        .unwrap_or(prefiller);

    host_port
        .split(':')
        .next()
        .unwrap_or(host_port)
        .to_string()
}

/// `SGLANG_BOOTSTRAP_PORT` when set and numeric, else 8998.
fn bootstrap_port() -> u16 {
    std::env::var(ENV_BOOTSTRAP_PORT)
        .ok()
        .and_then(|port| port.parse().ok())
        .unwrap_or(DEFAULT_BOOTSTRAP_PORT)
}

fn decoder_override(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(HEADER_DECODER_HOST_PORT)?.to_str().ok()?.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bootstrap_host_strips_port() {
        assert_eq!(bootstrap_host("10.0.0.5:8000"), "10.0.0.5");
        assert_eq!(bootstrap_host("10.0.0.5"), "10.0.0.5");
        assert_eq!(bootstrap_host("http://10.0.0.5:8000"), "10.0.0.5");
    }

    #[test]
    fn test_room_ids_are_positive_and_distinct() {
        let first = generate_room_id();
        // Outpace the random offset so successive ids cannot collide.
        std::thread::sleep(std::time::Duration::from_micros(2));
        let second = generate_room_id();
        assert!(first > 0);
        assert!(second > first);
    }

    #[test]
    fn test_decoder_override() {
        let mut headers = HeaderMap::new();
        assert!(decoder_override(&headers).is_none());

        headers.insert(HEADER_DECODER_HOST_PORT, " ".parse().unwrap());
        assert!(decoder_override(&headers).is_none());

        headers.insert(HEADER_DECODER_HOST_PORT, "10.0.0.9:8001".parse().unwrap());
        assert_eq!(decoder_override(&headers).as_deref(), Some("10.0.0.9:8001"));
    }
}
