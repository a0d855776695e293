//! Corruption checker (spec §4.5): a transform stream sitting between an
//! HTTP GET reply and the chunk's output stream. Strips a 12-byte trailer
//! (three little-endian u32 CRCs — data/meta/usermd, only the first
//! validated) and compares it against the value announced in the reply's
//! `Content-Type` header.

use bytes::{Buf, Bytes, BytesMut};
use futures::stream::{Stream, StreamExt};

use crate::error::Error;
use crate::split::ByteStream;

const TRAILER_LEN: usize = 12;

/// Parses a `data=<N>` and optional `$crc.data=<u32>` pair out of a
/// `Content-Type` header value, e.g.
/// `application/x-scality-storage-data; data=1024; $crc.data=3735928559`.
/// Returns `(None, _)` if `data=` is absent, meaning "forward unchanged".
pub fn parse_content_type(content_type: &str) -> (Option<u64>, Option<u32>) {
    let mut n = None;
    let mut crc = None;
    for token in content_type.split(';').map(str::trim) {
        if let Some(v) = token.strip_prefix("data=") {
            n = v.parse().ok();
        } else if let Some(v) = token.strip_prefix("$crc.data=") {
            crc = v.parse().ok();
        }
    }
    (n, crc)
}

/// Wraps `input` in the corruption checker. `n` is the announced payload
/// length in bytes; `expected_crc` is the announced data CRC, if any. When
/// `expected_crc` is `None` the stream is forwarded unchanged (spec: "If
/// either is missing, the reply is forwarded unchanged").
///
/// Invariant upheld: downstream never observes bytes past position `n`, and
/// never observes EOF until CRC validation has passed.
pub fn corruption_checker(mut input: ByteStream, n: u64, expected_crc: Option<u32>) -> ByteStream {
    let Some(expected_crc) = expected_crc else {
        return input;
    };

    let stream = async_stream::try_stream! {
        let mut delivered = 0u64;
        // Bytes received past position `n` (the trailer, and anything the
        // server packed alongside it) are held back until fully assembled.
        let mut trailer = BytesMut::with_capacity(TRAILER_LEN);

        while let Some(next) = input.next().await {
            let mut chunk = next.map_err(Error::from)?;

            if delivered < n {
                let take = ((n - delivered) as usize).min(chunk.len());
                let data_part = chunk.split_to(take);
                delivered += take as u64;
                if !data_part.is_empty() {
                    yield data_part;
                }
            }

            if !chunk.is_empty() {
                trailer.extend_from_slice(&chunk);
            }

            if delivered >= n && trailer.len() >= TRAILER_LEN {
                break;
            }
        }

        if trailer.len() < TRAILER_LEN {
            Err(Error::corrupted())?;
        }

        let mut head = &trailer[..4];
        let actual_crc = head.get_u32_le();
        if actual_crc != expected_crc {
            Err(Error::corrupted())?;
        }
    };

    Box::pin(stream.map(|r: Result<Bytes, Error>| r.map_err(std::io::Error::other)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trailer_bytes(data_crc: u32) -> Vec<u8> {
        let mut t = Vec::with_capacity(12);
        t.extend_from_slice(&data_crc.to_le_bytes());
        t.extend_from_slice(&[0u8; 8]);
        t
    }

    async fn collect(stream: ByteStream) -> std::io::Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut stream = stream;
        while let Some(chunk) = stream.next().await {
            out.extend_from_slice(&chunk?);
        }
        Ok(out)
    }

    #[tokio::test]
    async fn s5_crc_accept() {
        let data = vec![1u8; 10];
        let mut body = data.clone();
        body.extend(trailer_bytes(0xDEAD_BEEF));

        let input: ByteStream = Box::pin(tokio_stream::once(Ok(Bytes::from(body))));
        let checked = corruption_checker(input, 10, Some(0xDEAD_BEEF));
        let out = collect(checked).await.unwrap();
        assert_eq!(out, data);
    }

    #[tokio::test]
    async fn crc_reject_never_reaches_eof_cleanly() {
        let data = vec![2u8; 10];
        let mut body = data.clone();
        body.extend(trailer_bytes(0x0000_0000));

        let input: ByteStream = Box::pin(tokio_stream::once(Ok(Bytes::from(body))));
        let checked = corruption_checker(input, 10, Some(0xFFFF_FFFF));
        let result = collect(checked).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn missing_crc_forwards_unchanged() {
        let data = vec![3u8; 5];
        let input: ByteStream = Box::pin(tokio_stream::once(Ok(Bytes::from(data.clone()))));
        let checked = corruption_checker(input, 5, None);
        let out = collect(checked).await.unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn parses_data_and_crc_tokens() {
        let (n, crc) = parse_content_type("application/x-scality-storage-data; data=1024; $crc.data=3735928559");
        assert_eq!(n, Some(1024));
        assert_eq!(crc, Some(3735928559));
    }

    #[test]
    fn missing_data_token_yields_none() {
        let (n, crc) = parse_content_type("application/x-scality-storage-data");
        assert_eq!(n, None);
        assert_eq!(crc, None);
    }
}
