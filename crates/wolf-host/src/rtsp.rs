//! RTSP negotiator (C5): one request per TCP connection, line-oriented,
//! CRLF-terminated, parsed with a buffered incremental read-then-dispatch
//! loop.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tracing::{error, info, warn};
use wolf_common::events::HostEvent;
use wolf_common::state::{AudioMode, DisplayMode, Speaker};

use crate::control;
use crate::state::AppState;

const SESSION_IDENTIFIER: &str = "DEADBEEFCAFE";

pub async fn run(listener: TcpListener, state: Arc<AppState>) {
    loop {
        match listener.accept().await {
            Ok((socket, addr)) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(socket, addr, state).await {
                        error!(%addr, error = %e, "rtsp connection failed");
                    }
                });
            }
            Err(e) => error!(error = %e, "rtsp accept failed"),
        }
    }
}

async fn handle_connection(mut socket: TcpStream, addr: SocketAddr, state: Arc<AppState>) -> anyhow::Result<()> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = socket.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(request) = try_parse_request(&buf) {
            let response = handle_request(&request, addr, &state).await;
            socket.write_all(response.as_bytes()).await?;
            socket.flush().await?;
            return Ok(());
        }
    }
}

struct RtspRequest {
    method: String,
    target: String,
    cseq: String,
    body: String,
}

fn try_parse_request(buf: &[u8]) -> Option<RtspRequest> {
    let text = std::str::from_utf8(buf).ok()?;
    let (head, body) = match text.split_once("\r\n\r\n") {
        Some((h, b)) => (h, b),
        None => return None,
    };

    let mut lines = head.split("\r\n");
    let request_line = lines.next()?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next()?.to_string();
    let target = parts.next()?.to_string();

    let mut cseq = String::new();
    for line in lines {
        if let Some((key, value)) = line.split_once(':') {
            if key.trim().eq_ignore_ascii_case("CSeq") {
                cseq = value.trim().to_string();
            }
        }
    }

    Some(RtspRequest { method, target, cseq, body: body.to_string() })
}

async fn handle_request(request: &RtspRequest, addr: SocketAddr, state: &Arc<AppState>) -> String {
    info!(method = %request.method, target = %request.target, "rtsp request");
    match request.method.as_str() {
        "OPTIONS" => ok_response(&request.cseq, ""),
        "DESCRIBE" => handle_describe(request, addr, state),
        "SETUP" => handle_setup(request, addr, state),
        "ANNOUNCE" => handle_announce(request, addr, state),
        "PLAY" => handle_play(request, addr, state).await,
        other => {
            warn!(method = %other, "unknown rtsp method");
            format!("RTSP/1.0 404 NOT FOUND\r\nCSeq: {}\r\n\r\n", request.cseq)
        }
    }
}

fn ok_response(cseq: &str, body: &str) -> String {
    format!("RTSP/1.0 200 OK\r\nCSeq: {cseq}\r\nContent-Length: {}\r\n\r\n{body}", body.len())
}

fn handle_describe(request: &RtspRequest, addr: SocketAddr, state: &Arc<AppState>) -> String {
    let session = state.sessions.lookup_by_ip(addr.ip());
    let support_hevc = state.config.support_hevc;

    let mut sdp = String::new();
    sdp.push_str("v=0\r\n");
    if support_hevc {
        sdp.push_str("a=sprop-parameter-sets=AAAAAU\r\n");
    }

    let (channels, streams, coupled, speakers) = session
        .as_ref()
        .and_then(|s| s.negotiated_audio_mode.clone())
        .map(|mode| (mode.channels, mode.streams, mode.coupled_streams, speaker_digits(&mode.speakers)))
        .unwrap_or((2, 1, 1, "0100".into()));
    sdp.push_str(&format!("a=fmtp:97 surround-params={channels}{streams}{coupled}{speakers}\r\n"));

    ok_response(&request.cseq, &sdp)
}

fn speaker_digits(speakers: &[Speaker]) -> String {
    speakers
        .iter()
        .map(|s| match s {
            Speaker::FrontLeft => '0',
            Speaker::FrontRight => '1',
            Speaker::FrontCenter => '2',
            Speaker::Lfe => '3',
            Speaker::BackLeft => '4',
            Speaker::BackRight => '5',
            Speaker::SideLeft => '6',
            Speaker::SideRight => '7',
        })
        .collect()
}

fn handle_setup(request: &RtspRequest, addr: SocketAddr, state: &Arc<AppState>) -> String {
    let Some(session) = state.sessions.lookup_by_ip(addr.ip()) else {
        return format!("RTSP/1.0 404 NOT FOUND\r\nCSeq: {}\r\n\r\n", request.cseq);
    };

    let stream_id = request.target.split("streamid=").nth(1).unwrap_or("").split('/').next().unwrap_or("");
    let port = match stream_id {
        "video" => session.video_port,
        "audio" => session.audio_port,
        "control" => session.control_port,
        _ => {
            return format!("RTSP/1.0 404 NOT FOUND\r\nCSeq: {}\r\n\r\n", request.cseq);
        }
    };

    format!(
        "RTSP/1.0 200 OK\r\nCSeq: {}\r\nSession: {SESSION_IDENTIFIER};timeout=90\r\nTransport: server_port={port}\r\n\r\n",
        request.cseq
    )
}

fn handle_announce(request: &RtspRequest, addr: SocketAddr, state: &Arc<AppState>) -> String {
    let Some(session) = state.sessions.lookup_by_ip(addr.ip()) else {
        return format!("RTSP/1.0 404 NOT FOUND\r\nCSeq: {}\r\n\r\n", request.cseq);
    };

    let params = parse_announce_body(&request.body);

    let width = params.get("x-nv-video[0].clientViewportWd").and_then(|v| v.parse().ok()).unwrap_or(1920);
    let height = params.get("x-nv-video[0].clientViewportHt").and_then(|v| v.parse().ok()).unwrap_or(1080);
    let refresh_rate = params.get("x-nv-video[0].maxFPS").and_then(|v| v.parse().ok()).unwrap_or(60);
    let channels = params.get("x-nv-audio.surround.numChannels").and_then(|v| v.parse().ok()).unwrap_or(2);

    state.sessions.update(session.session_id, |s| {
        s.negotiated_display_mode = Some(DisplayMode { width, height, refresh_rate });
        s.negotiated_audio_mode = Some(AudioMode { channels, streams: 1, coupled_streams: 1, speakers: vec![Speaker::FrontLeft, Speaker::FrontRight] });
    });

    state.events.publish(HostEvent::SessionConnected { session_id: session.session_id, client_ip: addr.ip() });
    ok_response(&request.cseq, "")
}

fn parse_announce_body(body: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for line in body.lines() {
        if let Some(rest) = line.strip_prefix("a=") {
            if let Some((key, value)) = rest.split_once(':') {
                map.insert(key.to_string(), value.to_string());
            }
        }
    }
    map
}

async fn handle_play(request: &RtspRequest, addr: SocketAddr, state: &Arc<AppState>) -> String {
    if let Some(session) = state.sessions.lookup_by_ip(addr.ip()) {
        state.events.publish(HostEvent::ResumeStream { session_id: session.session_id });
        spawn_control_channel(&session, state);
    }
    ok_response(&request.cseq, "")
}

/// Binds the session's control port and spawns its long-lived recv loop.
/// Video/audio RTP tasks are not started here: this binary has no media
/// encoder feeding frames into them, so nothing would ever consume the
/// channel they'd be wired to — standing up those sockets with no producer
/// would just be a silent no-op dressed up as a real stream.
fn spawn_control_channel(session: &wolf_common::state::session::StreamSession, state: &Arc<AppState>) {
    let session_id = session.session_id;
    let aes_key = session.aes_key;
    let control_port = session.control_port;
    let state = Arc::clone(state);
    let (stop_tx, stop_rx) = tokio::sync::watch::channel(false);

    tokio::spawn(watch_for_stop(session_id, Arc::clone(&state), stop_tx));

    tokio::spawn(async move {
        let socket = match UdpSocket::bind(SocketAddr::from(([0, 0, 0, 0], control_port))).await {
            Ok(socket) => socket,
            Err(e) => {
                error!(%session_id, error = %e, "failed to bind control socket");
                return;
            }
        };
        control::run_session(socket, session_id, aes_key, state, stop_rx).await;
    });
}

/// Subscribes to the event bus and flips `stop_tx` once a `StopStream` for
/// this session id is observed, letting `control::run_session` notice the
/// cancellation on its next `stop.borrow()` check. Exits once the control
/// task has already stopped (the watch channel's receiver is dropped) or the
/// bus itself is closed.
async fn watch_for_stop(session_id: wolf_common::state::session::SessionId, state: Arc<AppState>, stop_tx: tokio::sync::watch::Sender<bool>) {
    let mut events = state.events.subscribe();
    while !stop_tx.is_closed() {
        match events.recv().await {
            Ok(HostEvent::StopStream { session_id: stopped }) if stopped == session_id => {
                let _ = stop_tx.send(true);
                return;
            }
            Ok(_) => continue,
            Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
            Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_options_request() {
        let request = try_parse_request(b"OPTIONS rtsp://localhost RTSP/1.0\r\nCSeq: 1\r\n\r\n").unwrap();
        assert_eq!(request.method, "OPTIONS");
        assert_eq!(request.cseq, "1");
    }

    #[test]
    fn parses_announce_with_body() {
        let raw = b"ANNOUNCE rtsp://localhost RTSP/1.0\r\nCSeq: 2\r\n\r\na=x-nv-video[0].clientViewportWd:1920\r\n";
        let request = try_parse_request(raw).unwrap();
        let params = parse_announce_body(&request.body);
        assert_eq!(params.get("x-nv-video[0].clientViewportWd").unwrap(), "1920");
    }

    #[test]
    fn incomplete_request_returns_none() {
        assert!(try_parse_request(b"OPTIONS rtsp").is_none());
    }
}
