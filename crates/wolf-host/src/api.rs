//! Management API (C10): a local control surface over a Unix domain
//! socket, separate from the client-facing HTTP(S)/RTSP/UDP ports so a PIN
//! prompt or event viewer never needs network exposure.
//!
//! `GET /api/v1/pair/pending`  — list pairing requests waiting on a PIN
//! `POST /api/v1/pair/client`  — submit (or cancel) a PIN for one request
//! `GET /api/v1/events`        — newline-delimited JSON stream of `HostEvent`s

use std::convert::Infallible;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::{Body, Frame, Incoming};
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::{Deserialize, Serialize};
use tokio::net::UnixListener;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::state::AppState;

#[derive(Serialize)]
struct PendingPairing {
    pair_secret: String,
    client_ip: String,
}

#[derive(Deserialize)]
struct PinSubmission {
    pair_secret: String,
    pin: Option<String>,
}

pub async fn run(socket_path: impl AsRef<Path>, state: Arc<AppState>) -> anyhow::Result<()> {
    let path = socket_path.as_ref();
    let _ = std::fs::remove_file(path);
    let listener = UnixListener::bind(path)?;
    info!(path = %path.display(), "management api listening");

    loop {
        let (stream, _addr) = listener.accept().await?;
        let state = state.clone();
        tokio::spawn(async move {
            let io = TokioIo::new(stream);
            let service = hyper::service::service_fn(move |req| handle(req, state.clone()));
            if let Err(e) = hyper_util::server::conn::auto::Builder::new(hyper_util::rt::TokioExecutor::new()).serve_connection(io, service).await {
                warn!(error = %e, "management api connection error");
            }
        });
    }
}

type ApiBody = http_body_util::combinators::BoxBody<Bytes, std::io::Error>;

fn full_body(bytes: Vec<u8>) -> ApiBody {
    Full::new(Bytes::from(bytes)).map_err(|never| match never {}).boxed()
}

/// A chunked body fed by an mpsc channel, one JSON line per event. Used in
/// place of a generic `Stream`-to-`Body` adapter crate since all we need is
/// "forward whatever lands in this channel as the next frame."
struct ChannelBody {
    receiver: mpsc::Receiver<Vec<u8>>,
}

impl Body for ChannelBody {
    type Data = Bytes;
    type Error = std::io::Error;

    fn poll_frame(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        match self.receiver.poll_recv(cx) {
            Poll::Ready(Some(line)) => Poll::Ready(Some(Ok(Frame::data(Bytes::from(line))))),
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

async fn handle(req: Request<Incoming>, state: Arc<AppState>) -> Result<Response<ApiBody>, Infallible> {
    let response = match (req.method(), req.uri().path()) {
        (&Method::GET, "/api/v1/pair/pending") => list_pending(&state),
        (&Method::POST, "/api/v1/pair/client") => submit_pin(req, &state).await,
        (&Method::GET, "/api/v1/events") => return Ok(event_stream(&state)),
        _ => json_response(StatusCode::NOT_FOUND, &serde_json::json!({"error": "not found"})),
    };
    Ok(response)
}

fn list_pending(state: &AppState) -> Response<ApiBody> {
    let pending: Vec<PendingPairing> = state
        .pairing
        .list_pending()
        .into_iter()
        .map(|(pair_secret, client_ip)| PendingPairing { pair_secret, client_ip: client_ip.to_string() })
        .collect();
    json_response(StatusCode::OK, &pending)
}

async fn submit_pin(req: Request<Incoming>, state: &AppState) -> Response<ApiBody> {
    let body = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            error!(error = %e, "failed to read request body");
            return json_response(StatusCode::BAD_REQUEST, &serde_json::json!({"error": "invalid body"}));
        }
    };

    let submission: PinSubmission = match serde_json::from_slice(&body) {
        Ok(s) => s,
        Err(_) => return json_response(StatusCode::BAD_REQUEST, &serde_json::json!({"error": "invalid json"})),
    };

    let resolved = match submission.pin {
        Some(pin) => state.pairing.submit_pin(&submission.pair_secret, pin),
        None => state.pairing.cancel(&submission.pair_secret),
    };

    if resolved {
        json_response(StatusCode::OK, &serde_json::json!({"status": "ok"}))
    } else {
        json_response(StatusCode::NOT_FOUND, &serde_json::json!({"error": "unknown pair_secret"}))
    }
}

fn event_stream(state: &AppState) -> Response<ApiBody> {
    let mut broadcast_rx = state.events.subscribe();
    let (tx, rx) = mpsc::channel(64);

    tokio::spawn(async move {
        loop {
            match broadcast_rx.recv().await {
                Ok(event) => {
                    if let Ok(mut line) = serde_json::to_vec(&event) {
                        line.push(b'\n');
                        if tx.send(line).await.is_err() {
                            return;
                        }
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
            }
        }
    });

    let body = ChannelBody { receiver: rx }.boxed();
    Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", "application/x-ndjson")
        .body(body)
        .unwrap()
}

fn json_response(status: StatusCode, value: &impl Serialize) -> Response<ApiBody> {
    let bytes = serde_json::to_vec(value).unwrap_or_default();
    Response::builder().status(status).header("Content-Type", "application/json").body(full_body(bytes)).unwrap()
}
