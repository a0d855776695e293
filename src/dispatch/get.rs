//! GET pipeline (spec §4.4.2).
//!
//! The first intersecting chunk is resolved synchronously and its stream
//! handed back to the caller immediately; chunks after it are fetched and
//! decoded by a spawned task feeding the same passthrough channel, so a
//! caller is never blocked on chunks it hasn't started reading yet and a
//! late chunk's failure surfaces as a stream error rather than an
//! up-front `Err` from `get`. Per-chunk fragment-status repair jobs
//! (topic `repair`) are enqueued as each chunk resolves rather than
//! batched at the very end, since later chunks may not have been fetched
//! yet when the caller's stream starts draining. A CRC mismatch found
//! only after some bytes of a fragment have already streamed out still
//! produces its own single-fragment `repair` job at the moment it's
//! discovered, via `tag_corruption` wrapping each fragment's checked body.

use std::sync::Arc;

use bytes::Bytes;
use futures::future::join_all;
use futures::stream::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use super::{chunk_addresses, DriveMap};
use crate::corruption::corruption_checker;
use crate::error::{self, Error, HttpMethod};
use crate::keyscheme::{deserialize, Code, ObjectMap};
use crate::repair::{self, RepairJob, RepairQueue, TOPIC_REPAIR};
use crate::rs_codec::rs_decode;
use crate::split::{chunk_len, get_chunk_slice, intra_chunk_range, ByteStream};
use crate::transport::{FragmentOutcome, FragmentReply, Transport};

fn checked_body(reply: FragmentReply) -> ByteStream {
    match (reply.data_len, reply.crc) {
        (Some(n), Some(crc)) => corruption_checker(reply.body, n, Some(crc)),
        _ => reply.body,
    }
}

fn io_error_is_corrupted(err: &std::io::Error) -> bool {
    err.get_ref().and_then(|e| e.downcast_ref::<Error>()).is_some_and(Error::is_corrupted)
}

/// Wraps a fragment's checked body so that a `CorruptedError` observed
/// while the caller drains the stream synthesizes a single-fragment
/// `repair` job (spec §4.5 "synthesize a repair record for this
/// fragment"), not just an error event.
fn tag_corruption(mut body: ByteStream, raw_key: String, object_key: String, chunk_id: u32, fragment_id: u32, repair_queue: Arc<dyn RepairQueue>) -> ByteStream {
    let stream = async_stream::stream! {
        while let Some(next) = body.next().await {
            if let Err(ref e) = next {
                if io_error_is_corrupted(e) {
                    let job = RepairJob::new(raw_key.clone(), vec![(chunk_id, fragment_id)]);
                    let _ = repair::enqueue(repair_queue.as_ref(), TOPIC_REPAIR, &object_key, &job).await;
                }
            }
            yield next;
        }
    };
    Box::pin(stream)
}

async fn fetch_chunk(
    map: &ObjectMap,
    drive_map: &DriveMap,
    transport: &dyn Transport,
    repair_queue: &Arc<dyn RepairQueue>,
    raw_key: &str,
    c: u32,
    range: Option<(u64, u64)>,
    timeout_ms: u64,
) -> error::Result<(Vec<FragmentOutcome>, Option<ByteStream>)> {
    let descriptor = &map.chunks[c as usize];
    let addrs = chunk_addresses(drive_map, descriptor)?;

    let futures = addrs
        .iter()
        .map(|addr| async move { transport.get(addr, range.map(|(lo, hi)| (lo, Some(hi))), true, timeout_ms).await });
    let replies = join_all(futures).await;

    let outcomes: Vec<FragmentOutcome> = replies.iter().map(|(o, _)| *o).collect();

    let body = match map.code {
        Code::Cp => replies
            .into_iter()
            .enumerate()
            .find_map(|(fragment_id, (outcome, reply))| if outcome.is_ok() { reply.map(|r| (fragment_id as u32, r)) } else { None })
            .map(|(fragment_id, reply)| {
                tag_corruption(checked_body(reply), raw_key.to_string(), map.object_key.clone(), c, fragment_id, repair_queue.clone())
            }),
        Code::Rs => {
            let n_ok = outcomes.iter().filter(|o| o.is_ok()).count();
            if n_ok < map.k as usize {
                None
            } else {
                let mut shards: Vec<Option<ByteStream>> = Vec::with_capacity((map.k + map.m) as usize);
                for (fragment_id, (outcome, reply)) in replies.into_iter().enumerate() {
                    let shard = if outcome.is_ok() {
                        reply.map(|r| tag_corruption(checked_body(r), raw_key.to_string(), map.object_key.clone(), c, fragment_id as u32, repair_queue.clone()))
                    } else {
                        None
                    };
                    shards.push(shard);
                }
                let chunk_bytes = chunk_len(c, map.n_chunks, map.size, map.split_size);
                Some(rs_decode(shards, chunk_bytes, map.k, map.m, map.stripe_size)?)
            }
        }
    };

    Ok((outcomes, body))
}

/// Collects fragments that replied with a drive-level 404/422 into a
/// `repair` job for chunk `c` (spec §4.4.2 `decideGET`). Distinct from
/// `tag_corruption`, which handles corruption discovered client-side
/// after a 200.
async fn enqueue_status_repairs(repair_queue: &Arc<dyn RepairQueue>, raw_key: &str, object_key: &str, c: u32, outcomes: &[FragmentOutcome]) {
    let bad: Vec<(u32, u32)> = outcomes
        .iter()
        .enumerate()
        .filter_map(|(fragment_id, outcome)| match outcome {
            FragmentOutcome::Status(404 | 422) => Some((c, fragment_id as u32)),
            _ => None,
        })
        .collect();

    if !bad.is_empty() {
        let job = RepairJob::new(raw_key.to_string(), bad);
        let _ = repair::enqueue(repair_queue.as_ref(), TOPIC_REPAIR, object_key, &job).await;
    }
}

fn worst_http_error(outcomes: &[FragmentOutcome]) -> Error {
    outcomes
        .iter()
        .filter_map(|o| match o {
            FragmentOutcome::Status(status) => Some(Error::http(*status, HttpMethod::Get)),
            _ => None,
        })
        .fold(None, |worst, candidate| match worst {
            Some(w) => Some(error::compare_errors(Some(&w), Some(&candidate)).unwrap().clone()),
            None => Some(candidate),
        })
        .unwrap_or_else(|| Error::http(500, HttpMethod::Get))
}

/// `get(rawKey, range?) -> stream`. Validates the range, resolves the
/// first intersecting chunk synchronously, and returns its stream right
/// away; any further chunks are fetched and piped in by a spawned task.
pub async fn get(
    drive_map: &DriveMap,
    transport: Arc<dyn Transport>,
    repair_queue: Arc<dyn RepairQueue>,
    raw_key: &str,
    range: Option<(u64, Option<u64>)>,
    timeout_ms: u64,
) -> error::Result<ByteStream> {
    let map = deserialize(raw_key)?;

    if let Some((lo, _)) = range {
        if lo >= map.size {
            return Err(Error::invalid_range());
        }
    }

    let mut chunk_iter = get_chunk_slice(map.n_chunks, map.split_size, range);
    let Some(first_chunk) = chunk_iter.next() else {
        return Ok(Box::pin(futures::stream::empty::<std::io::Result<Bytes>>()));
    };

    let first_chunk_bytes = chunk_len(first_chunk, map.n_chunks, map.size, map.split_size);
    let first_intra = range.map(|(lo, hi)| intra_chunk_range(lo, hi, first_chunk, map.split_size, first_chunk_bytes));

    let (outcomes, body) = fetch_chunk(&map, drive_map, transport.as_ref(), &repair_queue, raw_key, first_chunk, first_intra, timeout_ms).await?;
    enqueue_status_repairs(&repair_queue, raw_key, &map.object_key, first_chunk, &outcomes).await;

    let Some(first_body) = body else {
        return Err(worst_http_error(&outcomes));
    };

    let remaining_chunks: Vec<u32> = chunk_iter.collect();
    if remaining_chunks.is_empty() {
        return Ok(first_body);
    }

    let (tx, rx) = mpsc::channel::<std::io::Result<Bytes>>(4);
    let drive_map = drive_map.clone();
    let raw_key = raw_key.to_string();

    tokio::spawn(async move {
        let mut first_body = first_body;
        while let Some(next) = first_body.next().await {
            if tx.send(next).await.is_err() {
                return;
            }
        }

        for c in remaining_chunks {
            let chunk_bytes = chunk_len(c, map.n_chunks, map.size, map.split_size);
            let intra = range.map(|(lo, hi)| intra_chunk_range(lo, hi, c, map.split_size, chunk_bytes));

            let fetched = fetch_chunk(&map, &drive_map, transport.as_ref(), &repair_queue, &raw_key, c, intra, timeout_ms).await;
            let (outcomes, body) = match fetched {
                Ok(pair) => pair,
                Err(e) => {
                    let _ = tx.send(Err(std::io::Error::other(e))).await;
                    return;
                }
            };

            enqueue_status_repairs(&repair_queue, &raw_key, &map.object_key, c, &outcomes).await;

            let Some(mut body) = body else {
                let _ = tx.send(Err(std::io::Error::other(worst_http_error(&outcomes)))).await;
                return;
            };

            while let Some(next) = body.next().await {
                if tx.send(next).await.is_err() {
                    return;
                }
            }
        }
    });

    Ok(Box::pin(ReceiverStream::new(rx)))
}
