//! wolf-host: the game-streaming host binary. Brings up the plain-HTTP
//! server-info surface, the mTLS pairing/launch surface, the RTSP
//! negotiator, and the local management API, one `TcpListener::accept`
//! loop per port with a task spawned per connection.

mod api;
mod control;
mod dispatch;
mod http;
mod pairing;
mod rtp;
mod rtsp;
mod state;
mod tls;
mod xml;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use hyper_util::rt::{TokioExecutor, TokioIo};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tracing::{error, info, warn};
use wolf_common::crypto::HostCertificate;
use wolf_common::state::config::Config;
use wolf_common::state::{ports, DisplayMode, Host};

use crate::state::AppState;

const CONFIG_PATH: &str = "wolf-host.toml";
const MANAGEMENT_SOCKET_PATH: &str = "/tmp/wolf-host.sock";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    info!("==============================================");
    info!("   wolf-host v{}", env!("CARGO_PKG_VERSION"));
    info!("==============================================");

    let config = match Config::load(CONFIG_PATH) {
        Ok(config) => config,
        Err(e) => {
            warn!(error = %e, path = CONFIG_PATH, "no usable config on disk, starting with defaults");
            Config::from_file(wolf_common::state::config::ConfigFile {
                hostname: "wolf".into(),
                uuid: uuid::Uuid::new_v4().to_string(),
                base_port: ports::DEFAULT_BASE_PORT,
                support_hevc: true,
                support_av1: false,
                paired_clients: Vec::new(),
                apps: Vec::new(),
            })
        }
    };

    let host = Host {
        display_modes: vec![
            DisplayMode { width: 1920, height: 1080, refresh_rate: 60 },
            DisplayMode { width: 1280, height: 720, refresh_rate: 60 },
        ],
        audio_modes: Vec::new(),
        external_ip: local_ip_guess(),
        internal_ip: local_ip_guess(),
        mac_address: "00:00:00:00:00:00".into(),
    };

    info!("Generating host RSA-2048 keypair and self-signed certificate...");
    let host_cert = HostCertificate::generate()?;
    info!("Host certificate generated");

    let base_port = config.base_port;
    let state = Arc::new(AppState::new(config, host, host_cert));

    let http_addr = SocketAddr::from(([0, 0, 0, 0], base_port));
    let https_addr = SocketAddr::from(([0, 0, 0, 0], base_port - 5));
    let rtsp_addr = SocketAddr::from(([0, 0, 0, 0], base_port + ports::RTSP_OFFSET));

    let tls_config = tls::build_server_config(&state.host_cert)?;
    let tls_acceptor = TlsAcceptor::from(Arc::new(tls_config));

    info!(%http_addr, %https_addr, %rtsp_addr, "binding listeners");

    let http_listener = TcpListener::bind(http_addr).await?;
    let https_listener = TcpListener::bind(https_addr).await?;
    let rtsp_listener = TcpListener::bind(rtsp_addr).await?;

    tokio::spawn(run_http(http_listener, state.clone()));
    tokio::spawn(run_https(https_listener, tls_acceptor, state.clone()));
    tokio::spawn(rtsp::run(rtsp_listener, state.clone()));
    tokio::spawn(api::run(MANAGEMENT_SOCKET_PATH, state.clone()));
    tokio::spawn(dispatch::run(state.clone()));

    info!("wolf-host is up");

    // Block forever; each listener task runs until the process exits.
    std::future::pending::<()>().await;
    Ok(())
}

async fn run_http(listener: TcpListener, state: Arc<AppState>) {
    loop {
        match listener.accept().await {
            Ok((socket, peer)) => {
                let state = state.clone();
                tokio::spawn(async move {
                    let io = TokioIo::new(socket);
                    let service = hyper::service::service_fn(move |req| http::handle(req, state.clone(), peer, None));
                    if let Err(e) = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new()).serve_connection(io, service).await {
                        warn!(%peer, error = %e, "http connection error");
                    }
                });
            }
            Err(e) => error!(error = %e, "http accept failed"),
        }
    }
}

async fn run_https(listener: TcpListener, acceptor: TlsAcceptor, state: Arc<AppState>) {
    loop {
        match listener.accept().await {
            Ok((socket, peer)) => {
                let acceptor = acceptor.clone();
                let state = state.clone();
                tokio::spawn(async move {
                    let tls_stream = match acceptor.accept(socket).await {
                        Ok(stream) => stream,
                        Err(e) => {
                            warn!(%peer, error = %e, "tls handshake failed");
                            return;
                        }
                    };

                    let client_cert = tls_stream
                        .get_ref()
                        .1
                        .peer_certificates()
                        .and_then(|certs| certs.first())
                        .map(|cert| cert.as_ref().to_vec());

                    let io = TokioIo::new(tls_stream);
                    let service = hyper::service::service_fn(move |req| http::handle(req, state.clone(), peer, client_cert.clone()));
                    if let Err(e) = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new()).serve_connection(io, service).await {
                        warn!(%peer, error = %e, "https connection error");
                    }
                });
            }
            Err(e) => error!(error = %e, "https accept failed"),
        }
    }
}

/// Used only as a display-layer default when the config doesn't pin an
/// address; actual reachability is the operator's concern, not this
/// binary's.
fn local_ip_guess() -> String {
    "127.0.0.1".to_string()
}
