//! Full-response capture for intermediate prefiller calls.

use axum::{
    body::Body,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use serde_json::Value;
use tracing::error;

/// A fully buffered upstream response. Used by the NIXL v1/v2 and LMCache
/// protocols, which must observe the prefiller's status (and for v1 parse
/// its body) before the decode step may be issued.
#[derive(Debug)]
pub struct BufferedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl BufferedResponse {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Decode the captured body as JSON.
    pub fn json(&self) -> Result<Value, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    /// Replay the captured response to the client, dropping headers that no
    /// longer describe the replayed body.
    pub fn into_response(self) -> Response {
        let mut builder = Response::builder().status(self.status);
        for (name, value) in &self.headers {
            if name == header::CONTENT_LENGTH || name == header::TRANSFER_ENCODING {
                continue;
            }
            builder = builder.header(name, value);
        }

        match builder.body(Body::from(self.body)) {
            Ok(response) => response,
            Err(err) => {
                error!(error = %err, "failed to replay buffered response");
                StatusCode::BAD_GATEWAY.into_response()
            }
        }
    }
}
