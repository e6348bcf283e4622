//! HTTP(S) surface (C4): `/serverinfo`, `/pair`, `/applist`, `/launch`,
//! `/resume`, `/cancel`, `/appasset`.

use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use tracing::warn;
use wolf_common::crypto;
use wolf_common::events::HostEvent;
use wolf_common::state::Runner;

use crate::pairing::{self, Phase1Request};
use crate::state::AppState;
use crate::xml::{display_mode_xml, XmlBuilder};

const APP_VERSION: &str = "7.1.431.0";
const GFE_VERSION: &str = "3.23.0.74";
const MAX_LUMA_PIXELS_HEVC: &str = "1869449984";

/// Certificate presented on this connection, if any (`None` on the plain
/// HTTP listener; `Some(der)` once the TLS layer has handed us the peer's
/// leaf certificate on the HTTPS listener).
pub type ClientCert = Option<Vec<u8>>;

pub async fn handle(req: Request<Incoming>, state: Arc<AppState>, peer: SocketAddr, client_cert: ClientCert) -> Result<Response<Full<Bytes>>, Infallible> {
    let path = req.uri().path().to_string();
    let query = parse_query(req.uri().query().unwrap_or(""));

    let body = match path.as_str() {
        "/serverinfo" => serverinfo(&state, peer, &query, client_cert.as_deref()),
        "/pair" => pair(&state, peer, &query).await,
        "/applist" => {
            if !is_paired(&state, client_cert.as_deref()) {
                unauthorized()
            } else {
                applist(&state)
            }
        }
        "/launch" => {
            if !is_paired(&state, client_cert.as_deref()) {
                unauthorized()
            } else {
                launch(&state, peer, &query)
            }
        }
        "/resume" => {
            if !is_paired(&state, client_cert.as_deref()) {
                unauthorized()
            } else {
                resume(&state, peer)
            }
        }
        "/cancel" => {
            if !is_paired(&state, client_cert.as_deref()) {
                unauthorized()
            } else {
                cancel(&state, peer)
            }
        }
        "/appasset" => {
            if !is_paired(&state, client_cert.as_deref()) {
                unauthorized()
            } else {
                return Ok(appasset_response());
            }
        }
        other => {
            warn!(path = %other, "unknown http path");
            XmlBuilder::new(404).finish()
        }
    };

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", "application/xml")
        .body(Full::new(Bytes::from(body)))
        .unwrap())
}

fn parse_query(raw: &str) -> HashMap<String, String> {
    raw.split('&')
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.to_string(), urldecode(v)))
        .collect()
}

fn urldecode(value: &str) -> String {
    value.replace('+', " ")
}

fn is_paired(state: &AppState, client_cert: Option<&[u8]>) -> bool {
    let Some(cert_der) = client_cert else { return false };
    match crypto::cert_signature_from_der(cert_der) {
        Ok(signature) => state.config.is_paired(&signature),
        Err(_) => false,
    }
}

fn unauthorized() -> String {
    XmlBuilder::new(401).finish()
}

fn serverinfo(state: &AppState, peer: SocketAddr, query: &HashMap<String, String>, client_cert: Option<&[u8]>) -> String {
    let paired = is_paired(state, client_cert);
    let active_session = state.sessions.lookup_by_ip(peer.ip());
    let server_state = if active_session.is_some() { "SUNSHINE_SERVER_BUSY" } else { "SUNSHINE_SERVER_FREE" };
    let current_game = active_session.as_ref().map(|s| s.app.id).unwrap_or(0);

    let mut builder = XmlBuilder::new(200)
        .element("hostname", &state.config.hostname)
        .element("appversion", APP_VERSION)
        .element("GfeVersion", GFE_VERSION)
        .element("uniqueid", &state.config.uuid)
        .element("MaxLumaPixelsHEVC", MAX_LUMA_PIXELS_HEVC)
        .element("ServerCodecModeSupport", "3")
        .element("HttpsPort", state.config.base_port - 5)
        .element("ExternalPort", state.config.base_port)
        .element("mac", &state.host.mac_address)
        .element("ExternalIP", &state.host.external_ip)
        .element("LocalIP", &state.host.internal_ip)
        .element("PairStatus", if paired { 1 } else { 0 })
        .element("currentgame", current_game)
        .element("state", server_state);

    let mut display_modes = String::from("<SupportedDisplayMode>");
    for mode in &state.host.display_modes {
        display_modes.push_str(&display_mode_xml(mode.width, mode.height, mode.refresh_rate));
    }
    display_modes.push_str("</SupportedDisplayMode>");
    builder = builder.raw(&display_modes);

    let _ = query.get("uniqueid");
    builder.finish()
}

async fn pair(state: &AppState, peer: SocketAddr, query: &HashMap<String, String>) -> String {
    if let (Some(salt), Some(client_cert)) = (query.get("salt"), query.get("clientcert")) {
        return pairing::phase1_get_server_cert(state, Phase1Request { client_ip: peer.ip(), salt_hex: salt, client_cert_hex: client_cert }).await;
    }
    if let Some(challenge) = query.get("clientchallenge") {
        return pairing::phase2_client_challenge(state, peer.ip(), challenge);
    }
    if let Some(resp) = query.get("serverchallengeresp") {
        return pairing::phase3_server_challenge_resp(state, peer.ip(), resp);
    }
    if let Some(secret) = query.get("clientpairingsecret") {
        return pairing::phase4_client_pairing_secret(state, peer.ip(), secret);
    }
    XmlBuilder::new(400).element("paired", 0).finish()
}

fn applist(state: &AppState) -> String {
    let mut body = String::new();
    for app in &state.config.apps {
        body.push_str(&format!("<App><Title>{}</Title><ID>{}</ID><IsHdrSupported>{}</IsHdrSupported></App>", app.title, app.id, app.support_hdr as u8));
    }
    XmlBuilder::new(200).raw(&body).finish()
}

fn launch(state: &AppState, peer: SocketAddr, query: &HashMap<String, String>) -> String {
    if state.sessions.lookup_by_ip(peer.ip()).is_some() {
        return XmlBuilder::new(503).finish();
    }

    let app_id: u32 = query.get("appid").and_then(|v| v.parse().ok()).unwrap_or(0);
    let Some(app) = state.config.apps.iter().find(|a| a.id == app_id).cloned() else {
        return XmlBuilder::new(404).finish();
    };

    let aes_key = crypto::generate_session_key();
    let aes_iv = crypto::generate_session_key();
    let session = state.sessions.create(peer.ip(), String::new(), app, aes_key, aes_iv, state.config.base_port);

    state.events.publish(HostEvent::SessionConnected { session_id: session.session_id, client_ip: peer.ip() });

    XmlBuilder::new(200)
        .element("sessionUrl0", format!("rtsp://{}:{}", state.host.internal_ip, session.rtsp_port))
        .element("gamesession", 1)
        .element("rtspport", session.rtsp_port)
        .finish()
}

fn resume(state: &AppState, peer: SocketAddr) -> String {
    match state.sessions.lookup_by_ip(peer.ip()) {
        Some(session) => {
            state.events.publish(HostEvent::ResumeStream { session_id: session.session_id });
            XmlBuilder::new(200).element("resume", 1).finish()
        }
        None => XmlBuilder::new(404).finish(),
    }
}

/// Publishes `StopStream` only; the event dispatch task is the single place
/// that actually removes the session from the registry.
fn cancel(state: &AppState, peer: SocketAddr) -> String {
    match state.sessions.lookup_by_ip(peer.ip()) {
        Some(session) => {
            state.events.publish(HostEvent::StopStream { session_id: session.session_id });
            XmlBuilder::new(200).element("cancel", 1).finish()
        }
        None => XmlBuilder::new(404).finish(),
    }
}

fn appasset_response() -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::NOT_FOUND)
        .header("Content-Type", "image/png")
        .body(Full::new(Bytes::new()))
        .unwrap()
}

#[allow(dead_code)]
fn runner_kind(runner: &Runner) -> &'static str {
    match runner {
        Runner::Process { .. } => "process",
        Runner::Container { .. } => "container",
        Runner::ChildSession { .. } => "child_session",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wolf_common::crypto::HostCertificate;
    use wolf_common::state::config::{Config, ConfigFile};
    use wolf_common::state::{DisplayMode, Host};

    #[test]
    fn parse_query_decodes_plus_as_space() {
        let query = parse_query("a=1&b=hello+world");
        assert_eq!(query.get("a").unwrap(), "1");
        assert_eq!(query.get("b").unwrap(), "hello world");
    }

    #[test]
    fn parse_query_on_empty_string_is_empty() {
        assert!(parse_query("").is_empty());
    }

    fn test_state() -> AppState {
        let config = Config::from_file(ConfigFile {
            hostname: "test_wolf".into(),
            uuid: "uid-12345".into(),
            base_port: 3000,
            support_hevc: true,
            support_av1: false,
            paired_clients: vec![],
            apps: vec![],
        });
        let host = Host {
            display_modes: vec![DisplayMode { width: 1920, height: 1080, refresh_rate: 60 }, DisplayMode { width: 1024, height: 768, refresh_rate: 30 }],
            audio_modes: vec![],
            external_ip: "192.168.99.1".into(),
            internal_ip: "192.168.1.1".into(),
            mac_address: "AA:BB:CC:DD".into(),
        };
        AppState::new(config, host, HostCertificate::generate().unwrap())
    }

    #[test]
    fn serverinfo_reports_derived_ports_and_free_state_when_unpaired() {
        let state = test_state();
        let peer: SocketAddr = "203.0.113.9:1234".parse().unwrap();
        let xml = serverinfo(&state, peer, &HashMap::new(), None);

        assert!(xml.contains("<HttpsPort>2995</HttpsPort>"));
        assert!(xml.contains("<ExternalPort>3000</ExternalPort>"));
        assert!(xml.contains("<PairStatus>0</PairStatus>"));
        assert!(xml.contains("<state>SUNSHINE_SERVER_FREE</state>"));
        assert!(xml.contains("<hostname>test_wolf</hostname>"));
        assert!(xml.contains("<uniqueid>uid-12345</uniqueid>"));
    }

    #[test]
    fn is_paired_is_false_without_a_client_certificate() {
        let state = test_state();
        assert!(!is_paired(&state, None));
    }

    #[test]
    fn is_paired_is_true_for_a_client_whose_der_signature_was_recorded() {
        let state = test_state();
        let client_cert = HostCertificate::generate().unwrap();
        let signature = crypto::cert_signature_from_der(&client_cert.cert_der).unwrap();

        state.config.add_paired_client(wolf_common::state::PairedClient {
            client_cert_signature: signature,
            client_cert_pem: client_cert.cert_pem.clone(),
            app_state_folder: String::new(),
            run_uid: 1000,
            run_gid: 1000,
            controllers_override: Vec::new(),
            mouse_acceleration: 1.0,
            v_scroll_acceleration: 1.0,
            h_scroll_acceleration: 1.0,
        });

        assert!(is_paired(&state, Some(&client_cert.cert_der)));
    }
}
