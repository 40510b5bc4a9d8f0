use std::fs::File;
use std::io::BufReader;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::routing::{Router, get, post};
use axum_server::Handle;
use axum_server::tls_rustls::RustlsConfig;
use clap::{Parser, crate_authors, crate_description, crate_version};
use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::runtime::watcher;
use kube::runtime::{WatchStreamExt, watcher::Event};
use kube::{Api, Client, ResourceExt};
use pullcheck_registry::OciRegistryClient;
use rustls::ServerConfig;
use rustls::crypto::aws_lc_rs::default_provider;
use rustls::pki_types::CertificateDer;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{debug, error, info, warn};

mod admission;
mod handlers;
mod state;
mod telemetry;
mod validator;

use state::WebhookState;

async fn healthz() -> &'static str {
    "ok"
}

static READYZ_READY: AtomicBool = AtomicBool::new(true);

async fn readyz() -> axum::http::StatusCode {
    if READYZ_READY.load(Ordering::Relaxed) {
        axum::http::StatusCode::OK
    } else {
        axum::http::StatusCode::INTERNAL_SERVER_ERROR
    }
}

fn load_tls_config(cert_path: &Path, key_path: &Path) -> anyhow::Result<ServerConfig> {
    let cert_file = File::open(cert_path)?;
    let key_file = File::open(key_path)?;

    let mut cert_reader = BufReader::new(cert_file);
    let mut key_reader = BufReader::new(key_file);

    let certs: Vec<CertificateDer> =
        rustls_pemfile::certs(&mut cert_reader).collect::<Result<Vec<_>, _>>()?;

    let key = rustls_pemfile::private_key(&mut key_reader)?
        .ok_or_else(|| anyhow::anyhow!("No private key found in key file"))?;

    let mut config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)?;

    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

    Ok(config)
}

/// Log pod lifecycle events. Purely informational; admission decisions do
/// not depend on it, and outside a cluster it stays disabled.
async fn watch_pods() {
    let client = match Client::try_default().await {
        Ok(client) => client,
        Err(e) => {
            warn!("pod watcher disabled, no cluster access: {e}");
            return;
        }
    };

    let pods: Api<Pod> = Api::all(client);
    let mut stream = watcher(pods, watcher::Config::default())
        .default_backoff()
        .boxed();

    while let Some(event) = stream.next().await {
        match event {
            Ok(Event::Apply(pod)) => {
                debug!(
                    "pod updated {}/{}",
                    pod.namespace().unwrap_or_default(),
                    pod.name_any()
                );
            }
            Ok(Event::Delete(pod)) => {
                debug!(
                    "pod deleted {}/{}",
                    pod.namespace().unwrap_or_default(),
                    pod.name_any()
                );
            }
            Ok(_) => {}
            Err(e) => error!("pod watch error: {e}"),
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "pullcheck-webhook",
    about = crate_description!(),
    version = crate_version!(),
    author = crate_authors!("\n"),
)]
struct Args {
    /// Listen address (use "::" for IPv6, "0.0.0.0" for IPv4)
    #[arg(long, default_value = "0.0.0.0", env)]
    listen_address: String,

    /// Listen on given port
    #[arg(short, long, default_value_t = 8443, env)]
    port: u16,

    /// Serve /healthz and /readyz on given port, always without TLS
    #[arg(long, default_value_t = 8001, env)]
    health_port: u16,

    /// Image reference (repository plus tag) that every registry listed in
    /// a reviewed secret must be able to serve
    #[arg(short, long, env)]
    tag_to_check: String,

    /// Filter for log messages
    #[arg(short, long, default_value = "info", env)]
    log_filter: String,

    /// Set log format
    #[arg(long, value_enum, default_value_t = telemetry::LogFormat::Json, env)]
    log_format: telemetry::LogFormat,

    /// Path to TLS certificate file; together with --tls-key enables HTTPS
    #[arg(long, env)]
    tls_cert: Option<PathBuf>,

    /// Path to TLS private key file
    #[arg(long, env)]
    tls_key: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    default_provider().install_default().unwrap();

    let args: Args = Args::parse();

    telemetry::init(&args.log_filter, args.log_format)?;

    let state = WebhookState::new(args.tag_to_check.clone(), OciRegistryClient::new());

    let app = Router::new()
        .route("/validate", post(handlers::validate_secret))
        .with_state(state);

    let health_app = Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz));

    let addr: SocketAddr = format!("{}:{}", args.listen_address, args.port).parse()?;
    let health_addr: SocketAddr =
        format!("{}:{}", args.listen_address, args.health_port).parse()?;

    let handle: Handle = Handle::new();
    let health_handle: Handle = Handle::new();

    // Spawn shutdown signal handler
    let shutdown_handle = handle.clone();
    let health_shutdown_handle = health_handle.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        READYZ_READY.store(false, Ordering::Relaxed);
        info!("Received shutdown signal, starting graceful shutdown");
        shutdown_handle.graceful_shutdown(Some(Duration::from_secs(30)));
        health_shutdown_handle.graceful_shutdown(Some(Duration::from_secs(30)));
    });

    tokio::spawn(watch_pods());

    info!("starting health endpoints on {}", health_addr);
    let health_server = axum_server::bind(health_addr)
        .handle(health_handle)
        .serve(health_app.into_make_service());

    let server = async {
        match (&args.tls_cert, &args.tls_key) {
            (Some(cert_path), Some(key_path)) => {
                info!("starting HTTPS server on {}", addr);
                let tls_config = load_tls_config(cert_path, key_path)?;
                let rustls_config = RustlsConfig::from_config(Arc::new(tls_config));
                axum_server::bind_rustls(addr, rustls_config)
                    .handle(handle)
                    .serve(app.into_make_service())
                    .await?;
            }
            _ => {
                warn!("TLS cert and key not provided, serving plain HTTP on {}", addr);
                axum_server::bind(addr)
                    .handle(handle)
                    .serve(app.into_make_service())
                    .await?;
            }
        }
        Ok::<_, anyhow::Error>(())
    };

    tokio::select! {
        result = server => { result?; },
        result = health_server => { result?; },
    }

    Ok(())
}

async fn shutdown_signal() {
    let mut sigterm =
        signal(SignalKind::terminate()).expect("failed to install SIGTERM signal handler");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {},
        _ = sigterm.recv() => {},
    }
}
