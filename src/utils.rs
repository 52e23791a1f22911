use crate::error::{AppError, AppResult};
use crate::model::{MAX_CODE_LENGTH, MIN_CODE_LENGTH};
use axum::extract::ConnectInfo;
use axum::http::HeaderMap;
use base64::prelude::BASE64_URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::time::timeout;
use url::Url;

const GENERATED_CODE_BYTES: usize = 12;
const UNKNOWN_VISITOR_IP: &str = "unknown";

pub async fn with_timeout<F: Future>(
    duration_in_mills: u64,
    task: F,
) -> AppResult<<F as Future>::Output> {
    Ok(timeout(Duration::from_millis(duration_in_mills), task).await?)
}

pub fn get_header(name: &str, headers: &HeaderMap) -> Option<String> {
    headers
        .get(name)
        .map(|value| value.to_str().unwrap_or_default().to_string())
}

/// Best-effort client address. Proxy headers are only honoured when the
/// service sits behind a proxy that sets them; otherwise the socket peer.
pub fn client_ip(
    headers: &HeaderMap,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    trust_proxy_headers: bool,
) -> String {
    trust_proxy_headers
        .then(|| forwarded_ip(headers))
        .flatten()
        .or_else(|| connect_info.map(|ConnectInfo(address)| address.ip().to_string()))
        .unwrap_or_else(|| UNKNOWN_VISITOR_IP.to_string())
}

fn forwarded_ip(headers: &HeaderMap) -> Option<String> {
    get_header("X-Forwarded-For", headers)
        .and_then(|value| value.split(',').next().map(|ip| ip.trim().to_string()))
        .filter(|ip| !ip.is_empty())
        .or_else(|| get_header("X-Real-IP", headers).filter(|ip| !ip.is_empty()))
}

pub fn parse_url(text: &str) -> AppResult<String> {
    Url::parse(text)
        .map(|url| url.to_string())
        .map_err(|_| AppError::Validation("Malformed url".into()))
}

pub fn memorial_url(public_base_url: &Url, code: &str) -> AppResult<String> {
    public_base_url
        .join(&format!("memorials/{code}"))
        .map(|url| url.to_string())
        .map_err(|_| AppError::Validation("Malformed code".into()))
}

/// 16 URL-safe characters.
pub fn generate_code() -> String {
    let mut bytes = [0u8; GENERATED_CODE_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    BASE64_URL_SAFE_NO_PAD.encode(bytes)
}

pub fn validate_code(code: &str) -> AppResult<()> {
    if !(MIN_CODE_LENGTH..=MAX_CODE_LENGTH).contains(&code.len()) {
        return Err(AppError::Validation(format!(
            "Code must be between {MIN_CODE_LENGTH} and {MAX_CODE_LENGTH} characters"
        )));
    }
    if !code
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(AppError::Validation(
            "Code may only contain letters, digits, '-' and '_'".into(),
        ));
    }
    Ok(())
}
