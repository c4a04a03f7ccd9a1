//! Read-only HTTP front end: `/`, `/{drive}[.{user}]/`, and
//! `/{drive}[.{user}]/{filename}`, proxied through the file bridge.
//! Never touches the filesystem directly — every byte served crosses the
//! same bridge mailbox the SSH/SFTP front ends use.

use crate::access_log::{AccessLog, Kind};
use crate::bridge::{default_timeout, BridgeRequest, RequestType};
use crate::context::Context;
use axum::extract::{ConnectInfo, Path, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
struct AppState {
    context: Arc<Context>,
    access_log: Arc<AccessLog>,
}

pub fn router(context: Arc<Context>, access_log: Arc<AccessLog>) -> Router {
    let state = AppState { context, access_log };
    Router::new()
        .route("/", get(list_drives))
        .route("/:drive", get(list_directory))
        .route("/:drive/", get(list_directory))
        .route("/:drive/:name", get(serve_file))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn submit(
    context: &Context,
    kind: RequestType,
    drive: u8,
    user: u8,
    name: &str,
) -> Result<crate::bridge::BridgeReply, StatusCode> {
    let request = BridgeRequest {
        id: 0,
        kind,
        drive,
        user,
        flags: 0,
        name: encode_8_3_name(name),
        offset: 0,
        length: u16::MAX,
        data: Vec::new(),
    };
    context
        .bridge
        .submit(request, default_timeout())
        .map_err(|_| StatusCode::GATEWAY_TIMEOUT)
}

fn encode_8_3_name(name: &str) -> [u8; 11] {
    let mut buf = [b' '; 11];
    let upper = name.to_ascii_uppercase();
    let (stem, ext) = upper.split_once('.').unwrap_or((upper.as_str(), ""));
    for (i, b) in stem.bytes().take(8).enumerate() {
        buf[i] = b;
    }
    for (i, b) in ext.bytes().take(3).enumerate() {
        buf[8 + i] = b;
    }
    buf
}

async fn list_drives(State(state): State<AppState>, ConnectInfo(addr): ConnectInfo<SocketAddr>) -> Response {
    state.access_log.record(Kind::Http, &addr.to_string(), "GET /");
    let mut body = String::from("<html><body><h1>Mounted drives</h1><ul>\n");
    if let Ok(disks) = state.context.disks.lock() {
        for letter in b'A'..=b'P' {
            if disks.is_mounted((letter - b'A') as usize) {
                let ch = letter as char;
                body.push_str(&format!("<li><a href=\"/{ch}/\">{ch}:</a></li>\n"));
            }
        }
    }
    body.push_str("</ul></body></html>\n");
    Html(body).into_response()
}

fn parse_drive_segment(segment: &str) -> Option<(char, u8)> {
    let mut parts = segment.splitn(2, '.');
    let drive = parts.next()?.chars().next()?.to_ascii_uppercase();
    if !('A'..='P').contains(&drive) {
        return None;
    }
    let user = match parts.next() {
        Some(u) => u.parse::<u8>().ok()?,
        None => 0,
    };
    Some((drive, user))
}

async fn list_directory(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Path(drive_segment): Path<String>,
) -> Response {
    let Some((drive, user)) = parse_drive_segment(&drive_segment) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    state
        .access_log
        .record(Kind::Http, &addr.to_string(), &format!("GET /{drive_segment}/"));
    match submit(&state.context, RequestType::Directory, drive as u8, user, "") {
        Ok(reply) => {
            let listing = String::from_utf8_lossy(&reply.data);
            let mut body = format!("<html><body><h1>{drive}:</h1><ul>\n");
            for entry in listing.split_whitespace() {
                body.push_str(&format!(
                    "<li><a href=\"/{drive_segment}/{entry}\">{entry}</a></li>\n"
                ));
            }
            body.push_str("</ul></body></html>\n");
            Html(body).into_response()
        }
        Err(status) => status.into_response(),
    }
}

async fn serve_file(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Path((drive_segment, name)): Path<(String, String)>,
) -> Response {
    let Some((drive, user)) = parse_drive_segment(&drive_segment) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    state
        .access_log
        .record(Kind::Http, &addr.to_string(), &format!("GET /{drive_segment}/{name}"));
    match submit(&state.context, RequestType::Open, drive as u8, user, &name) {
        Ok(open_reply) if open_reply.status == 0 => {}
        Ok(_) => return StatusCode::NOT_FOUND.into_response(),
        Err(status) => return status.into_response(),
    }
    let mut contents = Vec::new();
    loop {
        let request = BridgeRequest {
            id: 0,
            kind: RequestType::Read,
            drive: drive as u8,
            user,
            flags: 0,
            name: encode_8_3_name(&name),
            offset: contents.len() as u32,
            length: 4096,
            data: Vec::new(),
        };
        let Ok(reply) = state.context.bridge.submit(request, default_timeout()) else {
            return StatusCode::GATEWAY_TIMEOUT.into_response();
        };
        if reply.data.is_empty() {
            break;
        }
        contents.extend_from_slice(&reply.data);
    }
    let _ = submit(&state.context, RequestType::Close, drive as u8, user, &name);

    let body = if is_text_name(&name) {
        crlf_to_lf(&contents)
    } else {
        contents
    };
    let content_type = if is_text_name(&name) { "text/plain; charset=utf-8" } else { "application/octet-stream" };
    ([(header::CONTENT_TYPE, content_type)], body).into_response()
}

fn is_text_name(name: &str) -> bool {
    let upper = name.to_ascii_uppercase();
    matches!(upper.rsplit('.').next(), Some("TXT") | Some("ASM") | Some("PRN") | Some("LST") | Some("DOC"))
}

/// Guest text files are CP/M-style CR/LF; the spec asks for CR removed so
/// the files render as plain LF without a terminal. Every CR is dropped,
/// not just ones paired with a following LF.
fn crlf_to_lf(data: &[u8]) -> Vec<u8> {
    data.iter().copied().filter(|&b| b != b'\r').collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_drive_segment() {
        assert_eq!(parse_drive_segment("A"), Some(('A', 0)));
    }

    #[test]
    fn parses_drive_with_user_number() {
        assert_eq!(parse_drive_segment("b.3"), Some(('B', 3)));
    }

    #[test]
    fn rejects_out_of_range_drive() {
        assert_eq!(parse_drive_segment("Z"), None);
    }

    #[test]
    fn crlf_is_collapsed_to_lf() {
        assert_eq!(crlf_to_lf(b"hello\r\nworld\r\n"), b"hello\nworld\n");
    }

    #[test]
    fn lone_cr_is_also_removed() {
        assert_eq!(crlf_to_lf(b"a\rb"), b"ab");
    }

    #[test]
    fn text_extension_detection_is_case_insensitive() {
        assert!(is_text_name("readme.TXT"));
        assert!(!is_text_name("image.com"));
    }
}
