//! DELETE pipeline (spec §4.4.3).

use futures::future::join_all;

use super::{chunk_addresses, DriveMap};
use crate::error::{self, Error, HttpMethod};
use crate::keyscheme::deserialize;
use crate::repair::{self, RepairJob, RepairQueue, TOPIC_DELETE};
use crate::transport::{FragmentOutcome, Transport};

/// Fan out all `nChunks * (k+m)` deletes in parallel. A `404` counts as
/// success (already gone). Overall success iff at least one fragment
/// succeeded; any non-404 error queues a "delete" repair job for
/// reconciliation.
pub async fn delete(drive_map: &DriveMap, transport: &dyn Transport, repair_queue: &dyn RepairQueue, raw_key: &str, timeout_ms: u64) -> error::Result<()> {
    let map = deserialize(raw_key)?;

    let mut futures = Vec::new();
    for descriptor in map.chunks.iter() {
        let addrs = chunk_addresses(drive_map, descriptor)?;
        for addr in addrs {
            futures.push(async move { transport.delete(&addr, timeout_ms).await });
        }
    }

    let outcomes = join_all(futures).await;

    let n_fragments_per_chunk = (map.k + map.m) as usize;
    let mut bad_fragments = Vec::new();
    let mut n_succeeded = 0u32;
    let mut worst: Option<Error> = None;

    for (i, outcome) in outcomes.into_iter().enumerate() {
        let c = (i / n_fragments_per_chunk) as u32;
        let fragment_id = (i % n_fragments_per_chunk) as u32;

        let succeeded = match outcome {
            FragmentOutcome::Ok { .. } => true,
            FragmentOutcome::Status(404) => true,
            _ => false,
        };

        if succeeded {
            n_succeeded += 1;
        } else {
            bad_fragments.push((c, fragment_id));
            let err = match outcome {
                FragmentOutcome::Status(status) => Error::http(status, HttpMethod::Delete),
                FragmentOutcome::Timeout => Error::timeout(HttpMethod::Delete),
                FragmentOutcome::Ok { .. } => unreachable!(),
            };
            worst = Some(match worst {
                Some(w) => crate::error::compare_errors(Some(&w), Some(&err)).unwrap().clone(),
                None => err,
            });
        }
    }

    if !bad_fragments.is_empty() {
        let job = RepairJob::new(raw_key.to_string(), bad_fragments);
        let _ = repair::enqueue(repair_queue, TOPIC_DELETE, &map.object_key, &job).await;
    }

    if n_succeeded > 0 {
        Ok(())
    } else {
        Err(worst.unwrap_or_else(|| Error::http(500, HttpMethod::Delete)))
    }
}
