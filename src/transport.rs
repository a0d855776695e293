//! Per-fragment HTTP sub-request contract against a drive (spec §6 "Wire
//! protocol to a drive", §4.4.4).
//!
//! One [`Transport`] call maps to exactly one fragment PUT/GET/DELETE.
//! Grounded on the teacher's own `reqwest::Client` usage in `src/oauth.rs`
//! (`client.post(..).json(..).send().await`), generalized from JSON bodies
//! to streamed binary bodies and from a single request to a pluggable trait
//! so tests can substitute a fake drive.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::StreamExt;
use reqwest::{Client, StatusCode};

use crate::corruption::parse_content_type;
use crate::split::ByteStream;

/// `host:port` plus the per-fragment storage key, already resolved from a
/// drive UUID by the client's drive map.
#[derive(Debug, Clone)]
pub struct FragmentAddress {
    pub host_port: String,
    pub key: String,
}

impl FragmentAddress {
    fn url(&self, scheme: &str) -> String {
        format!("{scheme}://{}/store/{}", self.host_port, self.key)
    }
}

/// The outcome of one fragment sub-request (spec §4.4.4): `200`/`206` is
/// success, any other status is a fragment error, and socket inactivity
/// past the configured timeout is reported distinctly so the dispatcher can
/// route it to a "check" rather than "delete" repair job on PUT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentOutcome {
    Ok { status: u16 },
    Status(u16),
    Timeout,
}

impl FragmentOutcome {
    pub fn is_ok(self) -> bool {
        matches!(self, FragmentOutcome::Ok { .. })
    }

    pub fn is_timeout(self) -> bool {
        matches!(self, FragmentOutcome::Timeout)
    }

    fn from_status(status: StatusCode, ranged: bool) -> Self {
        let code = status.as_u16();
        let ok = code == 200 || (code == 206 && ranged);
        if ok { FragmentOutcome::Ok { status: code } } else { FragmentOutcome::Status(code) }
    }
}

/// A successful GET reply: the raw body plus whatever the server announced
/// in `Content-Type` about payload length and CRC. The corruption checker
/// (§4.5) is applied by the dispatcher, not here, since "forward unchanged"
/// is a valid outcome when either token is missing.
pub struct FragmentReply {
    pub body: ByteStream,
    pub data_len: Option<u64>,
    pub crc: Option<u32>,
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn put(&self, addr: &FragmentAddress, body: ByteStream, len: u64, timeout_ms: u64) -> FragmentOutcome;

    async fn get(
        &self,
        addr: &FragmentAddress,
        range: Option<(u64, Option<u64>)>,
        want_crc: bool,
        timeout_ms: u64,
    ) -> (FragmentOutcome, Option<FragmentReply>);

    async fn delete(&self, addr: &FragmentAddress, timeout_ms: u64) -> FragmentOutcome;
}

/// The production [`Transport`]: HTTP/1.1 over a pooled `reqwest::Client`
/// with keep-alive and `TCP_NODELAY` (spec §6).
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = Client::builder().tcp_nodelay(true).pool_idle_timeout(Duration::from_secs(90)).build()?;
        Ok(Self { client })
    }
}

fn accept_range_token(range: Option<(u64, Option<u64>)>) -> String {
    match range {
        None => String::new(),
        Some((lo, hi)) => format!("data={}-{}", lo, hi.map(|h| h.to_string()).unwrap_or_default()),
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn put(&self, addr: &FragmentAddress, body: ByteStream, len: u64, timeout_ms: u64) -> FragmentOutcome {
        let request = self
            .client
            .put(addr.url("http"))
            .header("Content-Type", format!("application/x-scality-storage-data; data={len}"))
            .header("Content-Length", len.to_string())
            .timeout(Duration::from_millis(timeout_ms))
            .body(reqwest::Body::wrap_stream(body));

        match request.send().await {
            Ok(resp) => FragmentOutcome::from_status(resp.status(), false),
            Err(e) if e.is_timeout() => FragmentOutcome::Timeout,
            Err(e) => FragmentOutcome::Status(e.status().map(|s| s.as_u16()).unwrap_or(500)),
        }
    }

    async fn get(
        &self,
        addr: &FragmentAddress,
        range: Option<(u64, Option<u64>)>,
        want_crc: bool,
        timeout_ms: u64,
    ) -> (FragmentOutcome, Option<FragmentReply>) {
        let mut accept = "application/x-scality-storage-data".to_string();
        let range_token = accept_range_token(range);
        if !range_token.is_empty() {
            accept.push_str("; ");
            accept.push_str(&range_token);
        }
        if want_crc {
            accept.push_str("; crc");
        }

        let request = self.client.get(addr.url("http")).header("Accept", accept).timeout(Duration::from_millis(timeout_ms));

        match request.send().await {
            Ok(resp) => {
                let ranged = range.is_some();
                let outcome = FragmentOutcome::from_status(resp.status(), ranged);
                if !outcome.is_ok() {
                    return (outcome, None);
                }
                let (data_len, crc) = resp
                    .headers()
                    .get("Content-Type")
                    .and_then(|v| v.to_str().ok())
                    .map(parse_content_type)
                    .unwrap_or((None, None));

                let body: ByteStream = Box::pin(resp.bytes_stream().map(|r| r.map_err(std::io::Error::other)));
                (outcome, Some(FragmentReply { body, data_len, crc }))
            }
            Err(e) if e.is_timeout() => (FragmentOutcome::Timeout, None),
            Err(e) => (FragmentOutcome::Status(e.status().map(|s| s.as_u16()).unwrap_or(500)), None),
        }
    }

    async fn delete(&self, addr: &FragmentAddress, timeout_ms: u64) -> FragmentOutcome {
        let request = self
            .client
            .delete(addr.url("http"))
            .header("Accept", "application/x-scality-storage-data")
            .header("Content-Length", "0")
            .timeout(Duration::from_millis(timeout_ms));

        match request.send().await {
            Ok(resp) => FragmentOutcome::from_status(resp.status(), false),
            Err(e) if e.is_timeout() => FragmentOutcome::Timeout,
            Err(e) => FragmentOutcome::Status(e.status().map(|s| s.as_u16()).unwrap_or(500)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_200_is_ok() {
        assert!(FragmentOutcome::from_status(StatusCode::OK, false).is_ok());
    }

    #[test]
    fn status_206_is_ok_only_when_ranged() {
        assert!(FragmentOutcome::from_status(StatusCode::PARTIAL_CONTENT, true).is_ok());
        assert!(!FragmentOutcome::from_status(StatusCode::PARTIAL_CONTENT, false).is_ok());
    }

    #[test]
    fn other_statuses_are_fragment_errors() {
        let outcome = FragmentOutcome::from_status(StatusCode::NOT_FOUND, false);
        assert_eq!(outcome, FragmentOutcome::Status(404));
    }

    #[test]
    fn accept_range_token_formats_open_ended_range() {
        assert_eq!(accept_range_token(Some((10, None))), "data=10-");
        assert_eq!(accept_range_token(Some((10, Some(20)))), "data=10-20");
        assert_eq!(accept_range_token(None), "");
    }
}
