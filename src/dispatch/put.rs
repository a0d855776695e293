//! PUT pipeline (spec §4.4.1).

use bytes::Bytes;
use futures::future::join_all;
use futures::stream::StreamExt;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use super::context::OperationContext;
use super::{chunk_addresses, DriveMap};
use crate::error::{self, Error, HttpMethod};
use crate::keyscheme::{keygen, serialize, Code};
use crate::policy::{fairness_rng, Policy};
use crate::repair::{self, RepairJob, RepairQueue, TOPIC_CHECK, TOPIC_DELETE};
use crate::rs_codec::{n_stripes, rs_encode};
use crate::split::{chunk_len, chunked_stream_demux, ByteStream};
use crate::transport::Transport;

/// Fans identical bytes out to `n` byte streams (CP replication: spec
/// §4.4.1 "the chunk stream is piped identically to each of the k fragment
/// requests"). `Bytes` clones are refcounted, not copied.
fn tee(mut input: ByteStream, n: usize) -> Vec<ByteStream> {
    let mut senders = Vec::with_capacity(n);
    let mut outputs = Vec::with_capacity(n);
    for _ in 0..n {
        let (tx, rx) = mpsc::channel::<std::io::Result<Bytes>>(4);
        senders.push(tx);
        outputs.push(Box::pin(ReceiverStream::new(rx)) as ByteStream);
    }

    tokio::spawn(async move {
        while let Some(next) = input.next().await {
            match next {
                Ok(bytes) => {
                    for tx in &senders {
                        if tx.send(Ok(bytes.clone())).await.is_err() {
                            return;
                        }
                    }
                }
                Err(e) => {
                    let kind = e.kind();
                    let msg = e.to_string();
                    for tx in &senders {
                        let _ = tx.send(Err(std::io::Error::new(kind, msg.clone()))).await;
                    }
                    return;
                }
            }
        }
    });

    outputs
}

fn encoded_len(code: Code, chunk_bytes: u64, k: u32, stripe_size: u32) -> u64 {
    match code {
        Code::Cp => chunk_bytes,
        Code::Rs => n_stripes(chunk_bytes, stripe_size, k) * stripe_size as u64,
    }
}

/// §8 property #8 / §9 open question (i): CP requires a strict majority
/// (`nOk > floor(k/2)`), RS requires at least `k` (`nOk >= k`) — not the
/// same comparison, even though §4.4.1's prose states both as `nOk >
/// quorum`. Reproduced literally per the quorum values given in testable
/// property #8, which is unambiguous where the prose is not.
fn chunk_put_ok(code: Code, k: u32, n_ok: u32, n_error: u32) -> bool {
    if n_error > 0 {
        return false;
    }
    match code {
        Code::Cp => n_ok > k / 2,
        Code::Rs => n_ok >= k,
    }
}

#[allow(clippy::too_many_arguments)]
pub async fn put(
    policy: &Policy,
    drive_map: &DriveMap,
    transport: &dyn Transport,
    repair_queue: &dyn RepairQueue,
    object_key: &str,
    size: u64,
    code: Code,
    k: u32,
    m: u32,
    input: impl AsyncRead + Unpin + Send + 'static,
    timeout_ms: u64,
) -> error::Result<String> {
    let mut rng = fairness_rng();
    let map = keygen(policy, object_key, size, code, k, m, None, &mut rng)?;
    let raw_key = serialize(&map);

    let mut ctx = OperationContext::new(&raw_key, map.chunks.len(), (k + m) as usize);

    let (chunk_tx, mut chunk_rx) = mpsc::unbounded_channel::<(u32, ByteStream)>();
    chunked_stream_demux(input, size, map.n_chunks, map.split_size, move |c, stream| {
        let _ = chunk_tx.send((c, stream));
    });

    while let Some((c, chunk_stream)) = chunk_rx.recv().await {
        let descriptor = &map.chunks[c as usize];
        let addrs = chunk_addresses(drive_map, descriptor)?;
        let this_chunk_len = chunk_len(c, map.n_chunks, size, map.split_size);

        let bodies = match code {
            Code::Cp => tee(chunk_stream, addrs.len()),
            Code::Rs => rs_encode(chunk_stream, this_chunk_len, k, m, map.stripe_size)?,
        };
        let len = encoded_len(code, this_chunk_len, k, map.stripe_size);

        let futures = addrs.into_iter().zip(bodies).map(|(addr, body)| async move { transport.put(&addr, body, len, timeout_ms).await });
        let outcomes = join_all(futures).await;

        for (i, outcome) in outcomes.into_iter().enumerate() {
            ctx.chunks[c as usize].record(i, outcome, HttpMethod::Put);
        }
    }

    let all_chunks_ok = ctx.chunks.iter().all(|chunk| chunk_put_ok(code, k, chunk.n_ok, chunk.n_error));

    if all_chunks_ok {
        let timed_out: Vec<(u32, u32)> = ctx
            .chunks
            .iter()
            .enumerate()
            .flat_map(|(c, chunk_status)| {
                chunk_status
                    .fragments
                    .iter()
                    .enumerate()
                    .filter(|(_, f)| f.timeout)
                    .map(move |(fragment_id, _)| (c as u32, fragment_id as u32))
            })
            .collect();
        if !timed_out.is_empty() {
            let job = RepairJob::new(raw_key.clone(), timed_out);
            let _ = repair::enqueue(repair_queue, TOPIC_CHECK, object_key, &job).await;
        }
        return Ok(raw_key);
    }

    let mut all_fragments = Vec::new();
    for (c, chunk_status) in ctx.chunks.iter().enumerate() {
        for fragment_id in 0..chunk_status.fragments.len() {
            all_fragments.push((c as u32, fragment_id as u32));
        }
    }
    let job = RepairJob::new(raw_key.clone(), all_fragments);
    if repair::enqueue(repair_queue, TOPIC_DELETE, object_key, &job).await.is_err() {
        ctx.failed_to_persist = true;
    }

    let worst = ctx.worst_error().cloned();
    if ctx.failed_to_persist && !worst.as_ref().is_some_and(Error::is_fatal_config) {
        return Err(Error::persistence());
    }
    Err(worst.unwrap_or_else(|| Error::http(500, HttpMethod::Put)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cp_requires_strict_majority() {
        assert!(!chunk_put_ok(Code::Cp, 4, 2, 0));
        assert!(chunk_put_ok(Code::Cp, 4, 3, 0));
    }

    #[test]
    fn rs_requires_at_least_k() {
        assert!(!chunk_put_ok(Code::Rs, 4, 3, 0));
        assert!(chunk_put_ok(Code::Rs, 4, 4, 0));
    }

    #[test]
    fn any_error_fails_the_chunk() {
        assert!(!chunk_put_ok(Code::Rs, 4, 5, 1));
    }
}
