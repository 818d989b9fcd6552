//! Single-host reverse-proxy handlers.
//!
//! A [`ReverseProxy`] owns a base URL and a shared pooled HTTP client. It
//! forwards requests three ways: streaming pass-through of an inbound
//! request, forwarding a rewritten body while streaming the response, and
//! forwarding a rewritten body while buffering the full response so a
//! connector can inspect it before the decode step.

use axum::{
    body::Body,
    extract::Request,
    http::{header, request::Parts, HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tracing::error;
use url::Url;

use super::{buffered::BufferedResponse, ProxyError};

/// Label for the local decoder handler. Connect failures against it get a
/// distinct log line since the decoder may still be booting.
pub const UPSTREAM_DECODER: &str = "decoder";

/// Label for prefiller handlers.
pub const UPSTREAM_PREFILLER: &str = "prefiller";

/// The owned slice of an inbound request that outbound calls need: method,
/// path + query, and headers. Cheap to clone so the SGLang connector can
/// hand a copy to its background prefill task.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub method: Method,
    pub path_and_query: String,
    pub headers: HeaderMap,
    /// Fires when the client request is dropped mid-flight or the server
    /// shuts down. Background work spawned for this request selects on it.
    pub cancel: CancellationToken,
}

impl RequestContext {
    pub fn from_parts(parts: &Parts, cancel: CancellationToken) -> Self {
        let path_and_query = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| "/".to_string());

        Self {
            method: parts.method.clone(),
            path_and_query,
            headers: parts.headers.clone(),
            cancel,
        }
    }
}

/// Reverse proxy pointed at a single upstream.
#[derive(Debug, Clone)]
pub struct ReverseProxy {
    target: Url,
    client: Client,
    upstream: &'static str,
}

impl ReverseProxy {
    pub fn new(target: Url, client: Client, upstream: &'static str) -> Self {
        Self {
            target,
            client,
            upstream,
        }
    }

    pub fn target(&self) -> &Url {
        &self.target
    }

    /// Stream an inbound request through to the upstream verbatim and
    /// stream the response back. The request body is never buffered.
    pub async fn forward(&self, req: Request) -> Response {
        let (parts, body) = req.into_parts();
        // Pass-through spawns no background work, so the token stays inert.
        let ctx = RequestContext::from_parts(&parts, CancellationToken::new());
        let outbound = reqwest::Body::wrap_stream(body.into_data_stream());

        match self.send(&ctx, outbound).await {
            Ok(resp) => streaming_response(resp),
            Err(err) => self.bad_gateway(&err),
        }
    }

    /// Forward a rewritten body and stream the upstream response back.
    pub async fn forward_rewritten(&self, ctx: &RequestContext, body: Bytes) -> Response {
        match self.send(ctx, body.into()).await {
            Ok(resp) => streaming_response(resp),
            Err(err) => self.bad_gateway(&err),
        }
    }

    /// Forward a rewritten body and capture the full upstream response so
    /// the caller can inspect status and body before proceeding.
    pub async fn forward_buffered(
        &self,
        ctx: &RequestContext,
        body: Bytes,
    ) -> Result<BufferedResponse, ProxyError> {
        let resp = self.send(ctx, body.into()).await?;

        let status = resp.status();
        let headers = resp.headers().clone();
        let body = resp.bytes().await?;

        Ok(BufferedResponse {
            status,
            headers,
            body,
        })
    }

    async fn send(
        &self,
        ctx: &RequestContext,
        body: reqwest::Body,
    ) -> Result<reqwest::Response, reqwest::Error> {
        let url = format!(
            "{}{}",
            self.target.as_str().trim_end_matches('/'),
            ctx.path_and_query
        );

        self.client
            .request(ctx.method.clone(), url)
            .headers(outbound_headers(&ctx.headers))
            .body(body)
            .send()
            .await
    }

    fn bad_gateway(&self, err: &reqwest::Error) -> Response {
        if err.is_connect() && self.upstream == UPSTREAM_DECODER {
            error!(error = %err, "waiting for decoder to be ready");
        } else {
            error!(upstream = self.upstream, error = %err, "proxy error");
        }
        StatusCode::BAD_GATEWAY.into_response()
    }
}

/// Hop-by-hop headers that must not cross the proxy in either direction.
fn is_hop_by_hop(name: &str) -> bool {
    matches!(
        name,
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailers"
            | "transfer-encoding"
            | "upgrade"
    )
}

/// Headers forwarded to the upstream. Drops hop-by-hop headers plus `host`
/// (the upstream's own host applies) and `content-length` (the client
/// recomputes it for rewritten bodies).
fn outbound_headers(headers: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::new();
    for (name, value) in headers {
        if is_hop_by_hop(name.as_str())
            || name == header::HOST
            || name == header::CONTENT_LENGTH
        {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    out
}

/// Convert an upstream response into a streaming client response,
/// preserving status and end-to-end headers. The body crosses unmodified,
/// so `content-length` stays valid and is forwarded.
fn streaming_response(resp: reqwest::Response) -> Response {
    let mut builder = Response::builder().status(resp.status());
    for (name, value) in resp.headers() {
        if is_hop_by_hop(name.as_str()) {
            continue;
        }
        builder = builder.header(name, value);
    }

    match builder.body(Body::from_stream(resp.bytes_stream())) {
        Ok(response) => response,
        Err(err) => {
            error!(error = %err, "failed to build upstream response");
            StatusCode::BAD_GATEWAY.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_outbound_headers_drop_hop_by_hop() {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", HeaderValue::from_static("application/json"));
        headers.insert("connection", HeaderValue::from_static("keep-alive"));
        headers.insert("transfer-encoding", HeaderValue::from_static("chunked"));
        headers.insert("host", HeaderValue::from_static("example.com"));
        headers.insert("content-length", HeaderValue::from_static("42"));
        headers.insert("x-request-id", HeaderValue::from_static("abc"));

        let out = outbound_headers(&headers);
        assert_eq!(out.len(), 2);
        assert!(out.contains_key("content-type"));
        assert!(out.contains_key("x-request-id"));
    }

    #[test]
    fn test_outbound_headers_keep_repeated_values() {
        let mut headers = HeaderMap::new();
        headers.append("x-prefiller-host-port", HeaderValue::from_static("a"));
        headers.append("x-prefiller-host-port", HeaderValue::from_static("b"));

        let out = outbound_headers(&headers);
        let values: Vec<_> = out.get_all("x-prefiller-host-port").iter().collect();
        assert_eq!(values.len(), 2);
    }

    #[test]
    fn test_request_context_default_path() {
        let req = Request::builder()
            .method(Method::POST)
            .uri("http://127.0.0.1:8000/v1/completions?echo=1")
            .body(Body::empty())
            .unwrap();
        let (parts, _) = req.into_parts();

        let ctx = RequestContext::from_parts(&parts, CancellationToken::new());
        assert_eq!(ctx.path_and_query, "/v1/completions?echo=1");
    }
}
