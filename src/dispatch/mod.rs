//! Fragment Dispatcher (spec §4.4): fans out one HTTP sub-request per
//! `(chunkId, fragmentId)` pair and runs the per-verb success/failure
//! decision routine.

pub mod context;
mod delete;
mod get;
mod put;

pub use delete::delete;
pub use get::get;
pub use put::put;

use std::collections::HashMap;

use crate::error::{self, Error};
use crate::keyscheme::ChunkDescriptor;
use crate::transport::FragmentAddress;

/// UUID-to-`host:port` resolution. Unresolved UUID is a fatal, synchronous
/// configuration error (spec §4.4: "unresolved UUID -> fatal config error
/// surfaced synchronously").
pub type DriveMap = HashMap<String, String>;

fn resolve(drive_map: &DriveMap, uuid: &str) -> error::Result<String> {
    drive_map.get(uuid).cloned().ok_or_else(|| Error::config(format!("no endpoint for drive {uuid}")))
}

/// One `FragmentAddress` per fragment of `chunk`, data fragments first.
fn chunk_addresses(drive_map: &DriveMap, chunk: &ChunkDescriptor) -> error::Result<Vec<FragmentAddress>> {
    chunk
        .data
        .iter()
        .chain(chunk.coding.iter())
        .map(|frag| Ok(FragmentAddress { host_port: resolve(drive_map, &frag.uuid)?, key: frag.key.clone() }))
        .collect()
}

