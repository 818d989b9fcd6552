//! Reverse-proxy building blocks: upstream forwarding, the prefiller
//! handler cache, SSRF allowlist validation and prefill target extraction.

pub mod buffered;
pub mod cache;
pub mod ssrf;
pub mod targets;
pub mod upstream;

pub use buffered::BufferedResponse;
pub use cache::PrefillerCache;
pub use ssrf::{AllowlistValidator, DynamicAllowlist, StaticAllowlist};
pub use upstream::{RequestContext, ReverseProxy};

/// Primary header naming the prefill target as `host:port`.
pub const HEADER_PREFILLER_HOST_PORT: &str = "x-prefiller-host-port";

/// Legacy alias of [`HEADER_PREFILLER_HOST_PORT`], kept for backward
/// compatibility.
pub const HEADER_PREFILLER_URL: &str = "x-prefiller-url";

/// Correlation id attached to outbound NIXL requests.
pub const HEADER_REQUEST_ID: &str = "x-request-id";

/// Optional override routing the SGLang decode leg to a remote decoder.
pub const HEADER_DECODER_HOST_PORT: &str = "x-decoder-host-port";

/// Errors surfaced by the proxy layer. Handlers convert these into HTTP
/// responses; they never cross the server boundary as panics.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("invalid prefiller target '{target}': {reason}")]
    InvalidTarget { target: String, reason: String },

    #[error("upstream request failed: {0}")]
    Upstream(#[from] reqwest::Error),
}
