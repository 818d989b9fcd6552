//! TLS listener path.
//!
//! Certificate material lives in a directory containing `tls.crt` and
//! `tls.key` (the Kubernetes TLS-secret mount layout). rustls only; the
//! handshake runs async per connection so a slow peer cannot stall the
//! accept loop.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder;
use hyper_util::service::TowerToHyperService;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, warn};

const CERT_FILE: &str = "tls.crt";
const KEY_FILE: &str = "tls.key";

/// Load a rustls server config from `cert_dir`. Any missing or malformed
/// material is a startup error.
pub fn load_server_config(cert_dir: &Path) -> Result<Arc<rustls::ServerConfig>, String> {
    // The HTTP client links its own rustls provider; install ours as the
    // process default so the server config builder is unambiguous.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let cert_path = cert_dir.join(CERT_FILE);
    let key_path = cert_dir.join(KEY_FILE);

    let mut cert_file = BufReader::new(
        File::open(&cert_path)
            .map_err(|err| format!("failed to open {}: {err}", cert_path.display()))?,
    );
    let certs = rustls_pemfile::certs(&mut cert_file)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| format!("failed to read certificate: {err}"))?;
    if certs.is_empty() {
        return Err(format!("no valid certificate in {}", cert_path.display()));
    }

    let mut key_file = BufReader::new(
        File::open(&key_path)
            .map_err(|err| format!("failed to open {}: {err}", key_path.display()))?,
    );
    let key = rustls_pemfile::private_key(&mut key_file)
        .map_err(|err| format!("failed to read private key: {err}"))?
        .ok_or_else(|| format!("no valid private key in {}", key_path.display()))?;

    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|err| format!("failed to create TLS config: {err}"))?;

    Ok(Arc::new(config))
}

/// Accept loop for the TLS listener. Runs until `shutdown` fires, then
/// waits up to `drain` for open connections to finish.
pub async fn serve(
    listener: TcpListener,
    app: Router,
    tls_config: Arc<rustls::ServerConfig>,
    shutdown: CancellationToken,
    drain: Duration,
) -> std::io::Result<()> {
    let acceptor = TlsAcceptor::from(tls_config);
    let connections = TaskTracker::new();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => {
                let (stream, peer) = accepted?;
                let acceptor = acceptor.clone();
                let service = TowerToHyperService::new(app.clone());

                connections.spawn(async move {
                    match acceptor.accept(stream).await {
                        Ok(tls_stream) => {
                            if let Err(err) = Builder::new(TokioExecutor::new())
                                .serve_connection_with_upgrades(TokioIo::new(tls_stream), service)
                                .await
                            {
                                debug!(%peer, error = %err, "connection closed with error");
                            }
                        }
                        Err(err) => {
                            warn!(%peer, error = %err, "TLS handshake failed");
                        }
                    }
                });
            }
        }
    }

    connections.close();
    if tokio::time::timeout(drain, connections.wait()).await.is_err() {
        warn!("graceful shutdown drain window expired, aborting in-flight connections");
    }

    Ok(())
}
