//! Reed-Solomon stripe codec (spec §4.3 step 2, §4.4.2 RS GET path).
//!
//! A chunk's bytes are encoded in fixed-size stripes of `stripeSize * k`
//! bytes: each stripe is split into `k` data shards of `stripeSize` bytes,
//! and `m` coding shards of the same size are computed over them. Encoding
//! emits `k + m` byte streams (one per fragment); decoding consumes any `k`
//! of the `k + m` streams and reconstructs the rest.
//!
//! Grounded on `objectio-block-gateway/src/ec_io.rs`'s parallel shard
//! read/write loop and `ParXive/parx-core/src/encode.rs`'s use of
//! `reed_solomon_erasure::galois_8::ReedSolomon`.

use bytes::{Bytes, BytesMut};
use futures::stream::StreamExt;
use reed_solomon_erasure::galois_8::ReedSolomon;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::error::{self, Error};
use crate::split::ByteStream;

/// `ceil(chunkSize / (stripeSize * k))` (spec §4.3 step 2).
pub fn n_stripes(chunk_size: u64, stripe_size: u32, k: u32) -> u64 {
    chunk_size.div_ceil(stripe_size as u64 * k as u64)
}

/// Pulls exactly `want` bytes off a `ByteStream`, buffering partial reads.
/// Returns fewer than `want` bytes only when the stream ends first (the
/// final, possibly-short stripe); returns `Ok(None)` only when the stream
/// was already exhausted before any bytes were available.
struct StripeReader {
    stream: ByteStream,
    buf: BytesMut,
    done: bool,
}

impl StripeReader {
    fn new(stream: ByteStream) -> Self {
        Self { stream, buf: BytesMut::new(), done: false }
    }

    async fn next_stripe(&mut self, want: usize) -> std::io::Result<Option<Bytes>> {
        while !self.done && self.buf.len() < want {
            match self.stream.next().await {
                Some(Ok(bytes)) => self.buf.extend_from_slice(&bytes),
                Some(Err(e)) => return Err(e),
                None => self.done = true,
            }
        }

        if self.buf.is_empty() {
            return Ok(None);
        }

        let take = want.min(self.buf.len());
        Ok(Some(self.buf.split_to(take).freeze()))
    }
}

fn pad(mut shard: Vec<u8>, stripe_size: usize) -> Vec<u8> {
    shard.resize(stripe_size, 0);
    shard
}

/// RS-encodes `input` (a single chunk's byte stream, `chunk_size` bytes
/// long) into `k + m` fragment streams.
pub fn rs_encode(input: ByteStream, chunk_size: u64, k: u32, m: u32, stripe_size: u32) -> error::Result<Vec<ByteStream>> {
    let codec = ReedSolomon::new(k as usize, m as usize)?;
    let stripes = n_stripes(chunk_size, stripe_size, k);

    let mut senders = Vec::with_capacity((k + m) as usize);
    let mut outputs = Vec::with_capacity((k + m) as usize);
    for _ in 0..(k + m) {
        let (tx, rx) = mpsc::channel::<std::io::Result<Bytes>>(2);
        senders.push(tx);
        outputs.push(Box::pin(ReceiverStream::new(rx)) as ByteStream);
    }

    tokio::spawn(async move {
        let mut reader = StripeReader::new(input);
        let stripe_bytes = stripe_size as usize;

        for _ in 0..stripes {
            let mut shards: Vec<Vec<u8>> = Vec::with_capacity((k + m) as usize);
            let mut read_err = None;

            for _ in 0..k {
                match reader.next_stripe(stripe_bytes).await {
                    Ok(Some(bytes)) => shards.push(pad(bytes.to_vec(), stripe_bytes)),
                    Ok(None) => shards.push(vec![0u8; stripe_bytes]),
                    Err(e) => {
                        read_err = Some(e);
                        break;
                    }
                }
            }

            if let Some(e) = read_err {
                let kind = e.kind();
                let msg = e.to_string();
                for tx in &senders {
                    let _ = tx.send(Err(std::io::Error::new(kind, msg.clone()))).await;
                }
                return;
            }

            for _ in 0..m {
                shards.push(vec![0u8; stripe_bytes]);
            }

            if let Err(e) = codec.encode(&mut shards) {
                let msg = e.to_string();
                for tx in &senders {
                    let _ = tx.send(Err(std::io::Error::other(msg.clone()))).await;
                }
                return;
            }

            for (tx, shard) in senders.iter().zip(shards.into_iter()) {
                if tx.send(Ok(Bytes::from(shard))).await.is_err() {
                    return;
                }
            }
        }
    });

    Ok(outputs)
}

/// RS-decodes a chunk from any `k` of its `k + m` fragment streams. `shards`
/// has length `k + m`; entries present in the GET quorum are `Some(stream)`,
/// missing/unused ones are `None`. Returns the reconstructed chunk's byte
/// stream, trimmed to `chunk_size`.
pub fn rs_decode(shards: Vec<Option<ByteStream>>, chunk_size: u64, k: u32, m: u32, stripe_size: u32) -> error::Result<ByteStream> {
    if shards.len() != (k + m) as usize {
        return Err(Error::key_scheme(format!("expected {} shard slots, found {}", k + m, shards.len())));
    }
    if shards.iter().filter(|s| s.is_some()).count() < k as usize {
        return Err(Error::corrupted());
    }

    let codec = ReedSolomon::new(k as usize, m as usize)?;
    let stripes = n_stripes(chunk_size, stripe_size, k);
    let mut readers: Vec<Option<StripeReader>> = shards.into_iter().map(|s| s.map(StripeReader::new)).collect();

    let (tx, rx) = mpsc::channel::<std::io::Result<Bytes>>(2);
    let output = Box::pin(ReceiverStream::new(rx)) as ByteStream;

    tokio::spawn(async move {
        let stripe_bytes = stripe_size as usize;
        let mut delivered = 0u64;

        for _ in 0..stripes {
            let mut present = vec![true; (k + m) as usize];
            let mut shard_opts: Vec<Option<Vec<u8>>> = Vec::with_capacity((k + m) as usize);

            for reader in readers.iter_mut() {
                match reader {
                    Some(r) => match r.next_stripe(stripe_bytes).await {
                        Ok(Some(bytes)) => shard_opts.push(Some(pad(bytes.to_vec(), stripe_bytes))),
                        Ok(None) | Err(_) => shard_opts.push(None),
                    },
                    None => shard_opts.push(None),
                }
            }
            for (i, s) in shard_opts.iter().enumerate() {
                present[i] = s.is_some();
            }

            if let Err(e) = codec.reconstruct(&mut shard_opts) {
                let msg = e.to_string();
                let _ = tx.send(Err(std::io::Error::other(msg))).await;
                return;
            }

            let mut stripe_out = BytesMut::with_capacity(stripe_bytes * k as usize);
            for shard in shard_opts.into_iter().take(k as usize) {
                stripe_out.extend_from_slice(&shard.expect("reconstruct fills every shard"));
            }

            let remaining = chunk_size - delivered;
            let take = remaining.min(stripe_out.len() as u64) as usize;
            delivered += take as u64;
            if tx.send(Ok(stripe_out.split_to(take).freeze())).await.is_err() {
                return;
            }
        }
    });

    Ok(output)
}
