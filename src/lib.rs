//! HTTP reverse-proxy sidecar implementing prefill/decode (P/D)
//! disaggregation for an OpenAI-compatible inference server.
//!
//! The sidecar fronts a locally collocated decoder. When a request names a
//! prefill target in its headers, the sidecar validates the target against
//! an allowlist and runs one of four connector protocols to populate the
//! decoder's KV cache from the remote prefiller before streaming the decode
//! response back to the client. Requests without a prefill target, and all
//! non-completion paths, pass straight through to the decoder.

pub mod config;
pub mod connectors;
pub mod logging;
pub mod proxy;
pub mod server;
pub mod tls;
