//! Server assembly and lifecycle.
//!
//! Two routes intercept OpenAI-compatible completion requests; every other
//! path streams through to the local decoder untouched. Interception only
//! engages when the request names a prefill target in its headers.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Request, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Router,
};
use reqwest::Client;
use tokio::{net::TcpListener, signal};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ProxyConfig;
use crate::connectors;
use crate::proxy::{
    targets,
    upstream::{ReverseProxy, UPSTREAM_DECODER},
    AllowlistValidator, PrefillerCache,
};
use crate::tls;

/// OpenAI chat completions path.
pub const CHAT_COMPLETIONS_PATH: &str = "/v1/chat/completions";

/// Legacy completions path.
pub const COMPLETIONS_PATH: &str = "/v1/completions";

/// Grace period for in-flight requests after a shutdown signal.
const SHUTDOWN_DRAIN: Duration = Duration::from_secs(60);

/// Upper bound on buffered request bodies.
const MAX_PAYLOAD_SIZE: usize = 256 * 1024 * 1024;

/// Shared state for every request handler.
pub struct ProxyState {
    pub config: ProxyConfig,
    pub decoder: ReverseProxy,
    pub prefillers: PrefillerCache,
    pub validator: AllowlistValidator,
    pub shutdown: CancellationToken,
}

impl ProxyState {
    pub fn new(config: ProxyConfig, validator: AllowlistValidator) -> Result<Self, String> {
        // One pooled client shared by the decoder proxy and all prefiller
        // handlers. No overall request timeout: decode streams run as long
        // as the client keeps reading.
        let client = Client::builder()
            .pool_idle_timeout(Some(Duration::from_secs(50)))
            .pool_max_idle_per_host(64)
            .connect_timeout(Duration::from_secs(10))
            .tcp_nodelay(true)
            .tcp_keepalive(Some(Duration::from_secs(30)))
            .build()
            .map_err(|err| format!("failed to create HTTP client: {err}"))?;

        let decoder = ReverseProxy::new(
            config.decoder_url.clone(),
            client.clone(),
            UPSTREAM_DECODER,
        );
        let prefillers = PrefillerCache::new(client, config.prefiller_scheme);

        Ok(Self {
            config,
            decoder,
            prefillers,
            validator,
            shutdown: CancellationToken::new(),
        })
    }
}

/// Intercepted completion requests: extract the prefill target, validate
/// it, and hand off to the configured connector protocol.
async fn completions_handler(State(state): State<Arc<ProxyState>>, req: Request) -> Response {
    let candidates = targets::candidates(req.headers());
    let Some(target) = targets::select(&candidates, state.config.enable_prefiller_sampling)
    else {
        debug!("skip disaggregated prefill");
        return state.decoder.forward(req).await;
    };

    if !state.validator.is_allowed(&target) {
        warn!(prefiller = %target, "prefill target rejected by allowlist");
        return (
            StatusCode::FORBIDDEN,
            "Forbidden: prefill target not allowed",
        )
            .into_response();
    }

    connectors::run(&state, req, &target).await
}

/// Everything that is not a completion request streams through to the
/// decoder verbatim.
async fn passthrough_handler(State(state): State<Arc<ProxyState>>, req: Request) -> Response {
    state.decoder.forward(req).await
}

/// Build the axum application.
pub fn build_app(state: Arc<ProxyState>) -> Router {
    Router::new()
        .route(CHAT_COMPLETIONS_PATH, post(completions_handler))
        .route(COMPLETIONS_PATH, post(completions_handler))
        .fallback(passthrough_handler)
        .layer(tower_http::limit::RequestBodyLimitLayer::new(
            MAX_PAYLOAD_SIZE,
        ))
        .with_state(state)
}

/// Bind the listener and serve until a shutdown signal arrives, then drain
/// in-flight requests for up to 60 seconds. Bind failures are fatal;
/// shutdown overruns are logged and abandoned.
pub async fn startup(
    config: ProxyConfig,
    validator: AllowlistValidator,
    tls_config: Option<Arc<rustls::ServerConfig>>,
) -> Result<(), Box<dyn std::error::Error>> {
    let state = Arc::new(ProxyState::new(config, validator)?);
    let shutdown = state.shutdown.clone();
    let app = build_app(state.clone());

    let addr = format!("0.0.0.0:{}", state.config.port);
    let listener = TcpListener::bind(&addr).await.map_err(|err| {
        error!(%addr, error = %err, "failed to start");
        err
    })?;

    info!(
        %addr,
        connector = ?state.config.connector,
        decoder = %state.config.decoder_url,
        tls = tls_config.is_some(),
        "starting proxy server"
    );

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            info!("shutting down");
            shutdown.cancel();
        }
    });

    match tls_config {
        Some(tls_config) => {
            tls::serve(listener, app, tls_config, shutdown, SHUTDOWN_DRAIN).await?;
        }
        None => {
            let server = axum::serve(listener, app).with_graceful_shutdown({
                let shutdown = shutdown.clone();
                async move { shutdown.cancelled().await }
            });

            tokio::select! {
                result = server => result?,
                _ = drain_expired(&shutdown) => {}
            }
        }
    }

    Ok(())
}

async fn drain_expired(shutdown: &CancellationToken) {
    shutdown.cancelled().await;
    tokio::time::sleep(SHUTDOWN_DRAIN).await;
    warn!("graceful shutdown drain window expired, aborting in-flight requests");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            info!("received terminate signal, starting graceful shutdown");
        },
    }
}
