use std::path::PathBuf;
use std::process;

use clap::Parser;
use tracing::{error, info, warn};
use url::Url;

use pd_router_sidecar::config::{ConnectorKind, ProxyConfig, Scheme};
use pd_router_sidecar::proxy::{AllowlistValidator, DynamicAllowlist, StaticAllowlist};
use pd_router_sidecar::{logging, server, tls};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Port the sidecar is listening on
    #[arg(long, default_value = "8000")]
    port: u16,

    /// Port the local decoder (vLLM) is listening on
    #[arg(long = "vllm-port", default_value = "8001")]
    vllm_port: u16,

    /// The P/D connector protocol being used
    #[arg(long, value_enum, default_value = "nixl")]
    connector: ConnectorKind,

    /// Use TLS when sending requests to prefillers
    #[arg(long, default_value = "false")]
    prefiller_use_tls: bool,

    /// Use TLS when sending requests to the decoder
    #[arg(long, default_value = "false")]
    decoder_use_tls: bool,

    /// Listen on TLS (requires --cert-path)
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    secure_proxy: bool,

    /// Directory containing tls.crt and tls.key
    #[arg(long)]
    cert_path: Option<PathBuf>,

    /// Enable SSRF protection using inference-pool allowlisting
    #[arg(long, default_value = "false")]
    enable_ssrf_protection: bool,

    /// Kubernetes namespace of the inference pool feeding the allowlist
    #[arg(long, env = "INFERENCE_POOL_NAMESPACE")]
    inference_pool_namespace: Option<String>,

    /// Name of the inference pool feeding the allowlist
    #[arg(long, env = "INFERENCE_POOL_NAME")]
    inference_pool_name: Option<String>,

    /// Pick a uniformly random prefiller when the header lists several
    #[arg(long, default_value = "false")]
    enable_prefiller_sampling: bool,

    /// NIXL v1: fail requests when the prefiller response omits handshake
    /// fields instead of warning and continuing
    #[arg(long, default_value = "false")]
    strict_handshake: bool,
}

#[tokio::main]
async fn main() {
    logging::init();
    let args = Args::parse();

    info!(connector = ?args.connector, "p/d connector validated");

    let decoder_scheme = Scheme::from_use_tls(args.decoder_use_tls);
    let decoder_url = match Url::parse(&format!(
        "{}://localhost:{}",
        decoder_scheme.as_str(),
        args.vllm_port
    )) {
        Ok(url) => url,
        Err(err) => {
            error!(error = %err, "failed to create decoder URL");
            process::exit(1);
        }
    };

    let validator = if args.enable_ssrf_protection {
        let Some(namespace) = args.inference_pool_namespace else {
            error!(
                "--inference-pool-namespace or INFERENCE_POOL_NAMESPACE is required \
                 when --enable-ssrf-protection is set"
            );
            process::exit(1);
        };
        let Some(pool_name) = args.inference_pool_name else {
            error!(
                "--inference-pool-name or INFERENCE_POOL_NAME is required \
                 when --enable-ssrf-protection is set"
            );
            process::exit(1);
        };

        info!(%namespace, pool = %pool_name, "SSRF protection enabled");

        // The endpoint watcher that keeps this allowlist fresh runs outside
        // the proxy core; it holds a clone of the allowlist handle and swaps
        // the set as pool membership changes.
        AllowlistValidator::Dynamic(DynamicAllowlist::new())
    } else {
        AllowlistValidator::Static(StaticAllowlist)
    };

    let tls_config = if args.secure_proxy {
        match &args.cert_path {
            Some(cert_dir) => match tls::load_server_config(cert_dir) {
                Ok(config) => Some(config),
                Err(err) => {
                    error!(error = %err, "failed to load TLS configuration");
                    process::exit(1);
                }
            },
            None => {
                warn!("secure proxy enabled but no --cert-path given, serving plain HTTP");
                None
            }
        }
    } else {
        None
    };

    let config = ProxyConfig {
        port: args.port,
        decoder_url,
        connector: args.connector,
        prefiller_scheme: Scheme::from_use_tls(args.prefiller_use_tls),
        enable_prefiller_sampling: args.enable_prefiller_sampling,
        strict_handshake: args.strict_handshake,
    };

    if let Err(err) = server::startup(config, validator, tls_config).await {
        error!(error = %err, "failed to start proxy server");
        process::exit(1);
    }
}
