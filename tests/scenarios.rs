//! Black-box scenario tests (spec §8 S1-S6 and the numbered invariants),
//! exercised against the public `Client` API over an in-memory fake drive
//! fleet rather than a real HTTP server.

use std::collections::HashMap;
use std::sync::Mutex as StdMutex;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::StreamExt;

use blobfleet::client::{drive_map_from_pairs, Client, KeyContext};
use blobfleet::config::{AffinityConfig, CodePattern, Config, FragmentClassConfig, PolicyNodeConfig};
use blobfleet::error;
use blobfleet::keyscheme::Code;
use blobfleet::repair::{RepairJob, RepairQueue};
use blobfleet::transport::{FragmentAddress, FragmentOutcome, FragmentReply, Transport};

/// An in-memory drive fleet: PUT stores raw fragment bytes, GET synthesizes
/// a real CRC trailer the way a drive would, DELETE is idempotent on a
/// missing key (404 counts as already-gone, per spec §4.4.3).
#[derive(Default)]
struct FakeFleet {
    storage: StdMutex<HashMap<String, Vec<u8>>>,
}

impl FakeFleet {
    fn slot(addr: &FragmentAddress) -> String {
        format!("{}/{}", addr.host_port, addr.key)
    }

    /// Test-only hook: drops a specific fragment by `(host_port, key)`, as
    /// if that drive had lost it, so degraded-read scenarios can be driven
    /// through the real `Client` API instead of only at the codec layer.
    fn drop_fragment(&self, host_port: &str, key: &str) {
        self.storage.lock().unwrap().remove(&format!("{host_port}/{key}"));
    }
}

#[async_trait]
impl Transport for FakeFleet {
    async fn put(&self, addr: &FragmentAddress, mut body: blobfleet::split::ByteStream, _len: u64, _timeout_ms: u64) -> FragmentOutcome {
        let mut buf = Vec::new();
        while let Some(next) = body.next().await {
            match next {
                Ok(bytes) => buf.extend_from_slice(&bytes),
                Err(_) => return FragmentOutcome::Status(500),
            }
        }
        self.storage.lock().unwrap().insert(Self::slot(addr), buf);
        FragmentOutcome::Ok { status: 200 }
    }

    async fn get(
        &self,
        addr: &FragmentAddress,
        _range: Option<(u64, Option<u64>)>,
        want_crc: bool,
        _timeout_ms: u64,
    ) -> (FragmentOutcome, Option<FragmentReply>) {
        let data = { self.storage.lock().unwrap().get(&Self::slot(addr)).cloned() };
        let Some(data) = data else {
            return (FragmentOutcome::Status(404), None);
        };

        let n = data.len() as u64;
        let mut body = data;
        let crc = crc32fast::hash(&body);
        if want_crc {
            body.extend_from_slice(&crc.to_le_bytes());
            body.extend_from_slice(&[0u8; 8]);
        }

        let stream: blobfleet::split::ByteStream = Box::pin(tokio_stream::once(Ok(Bytes::from(body))));
        (FragmentOutcome::Ok { status: 200 }, Some(FragmentReply { body: stream, data_len: Some(n), crc: want_crc.then_some(crc) }))
    }

    async fn delete(&self, addr: &FragmentAddress, _timeout_ms: u64) -> FragmentOutcome {
        let removed = self.storage.lock().unwrap().remove(&Self::slot(addr)).is_some();
        if removed { FragmentOutcome::Ok { status: 200 } } else { FragmentOutcome::Status(404) }
    }
}

#[derive(Default)]
struct RecordingRepairQueue {
    jobs: StdMutex<Vec<(String, String, RepairJob)>>,
}

#[async_trait]
impl RepairQueue for RecordingRepairQueue {
    async fn produce(&self, topic: &str, key: &str, job: &RepairJob) -> error::Result<()> {
        self.jobs.lock().unwrap().push((topic.to_string(), key.to_string(), job.clone()));
        Ok(())
    }
}

fn leaf(uuid: &str) -> PolicyNodeConfig {
    PolicyNodeConfig::Leaf { uuid: uuid.to_string(), affinity: AffinityConfig::Hard, ftype: FragmentClassConfig::Both }
}

fn config_with_leaves(n: usize) -> Config {
    let children: Vec<PolicyNodeConfig> = (0..n).map(|i| leaf(&format!("drive-{i}"))).collect();
    Config {
        policy: PolicyNodeConfig::Internal { children, weights: vec![1.0; n], affinity: AffinityConfig::Hard, ftype: FragmentClassConfig::Both },
        min_split_size: 4096,
        codes: vec![CodePattern { pattern: "default".into(), data_parts: 4, coding_parts: 2 }],
        request_timeout_ms: 5_000,
        error_agent: None,
    }
}

fn drive_map(n: usize) -> HashMap<String, String> {
    drive_map_from_pairs((0..n).map(|i| (format!("drive-{i}"), format!("127.0.0.1:{}", 9000 + i))))
}

fn test_client(n: usize) -> (Client, Arc<RecordingRepairQueue>, Arc<FakeFleet>) {
    let config = config_with_leaves(n);
    let repair_queue = Arc::new(RecordingRepairQueue::default());
    let fleet = Arc::new(FakeFleet::default());
    let transport: Arc<dyn Transport> = fleet.clone();
    let client = Client::with_transport(&config, drive_map(n), repair_queue.clone(), transport).unwrap();
    (client, repair_queue, fleet)
}

async fn collect(mut stream: blobfleet::split::ByteStream) -> Vec<u8> {
    let mut out = Vec::new();
    while let Some(chunk) = stream.next().await {
        out.extend_from_slice(&chunk.unwrap());
    }
    out
}

#[tokio::test]
async fn rs_put_then_get_round_trips_exact_bytes() {
    let (client, _repair, _fleet) = test_client(8);
    let key_context = KeyContext { bucket_name: "b".into(), object_key: "obj-rs".into(), owner: "o".into(), namespace: "n".into() };

    let data: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();
    let raw_key = client.put(std::io::Cursor::new(data.clone()), data.len() as u64, &key_context, Code::Rs, 4, 2, vec![]).await.unwrap();

    let stream = client.get(&raw_key, None, vec![]).await.unwrap();
    assert_eq!(collect(stream).await, data);
}

#[tokio::test]
async fn cp_put_then_get_round_trips_exact_bytes() {
    let (client, _repair, _fleet) = test_client(6);
    let key_context = KeyContext { bucket_name: "b".into(), object_key: "obj-cp".into(), owner: "o".into(), namespace: "n".into() };

    let data: Vec<u8> = (0..9_000u32).map(|i| (i % 199) as u8).collect();
    let raw_key = client.put(std::io::Cursor::new(data.clone()), data.len() as u64, &key_context, Code::Cp, 3, 0, vec![]).await.unwrap();

    let stream = client.get(&raw_key, None, vec![]).await.unwrap();
    assert_eq!(collect(stream).await, data);
}

/// Property #10: GET survives any `k` of `k+m` fragments healthy.
#[tokio::test]
async fn rs_get_survives_m_lost_fragments() {
    let (client, _repair, fleet) = test_client(8);
    let drives = drive_map(8);
    let key_context = KeyContext { bucket_name: "b".into(), object_key: "obj-degraded".into(), owner: "o".into(), namespace: "n".into() };

    let data: Vec<u8> = (0..16_384u32).map(|i| (i % 97) as u8).collect();
    let raw_key = client.put(std::io::Cursor::new(data.clone()), data.len() as u64, &key_context, Code::Rs, 4, 2, vec![]).await.unwrap();

    let map = blobfleet::keyscheme::deserialize(&raw_key).unwrap();
    assert_eq!(map.k, 4);
    assert_eq!(map.m, 2);

    // Drop 2 of the chunk's 6 fragments (still k=4 healthy) to drive the
    // degraded-read path through the real Client API, not just the codec.
    let chunk = &map.chunks[0];
    for fragment in chunk.data.iter().take(1).chain(chunk.coding.iter().take(1)) {
        let host_port = drives.get(&fragment.uuid).unwrap();
        fleet.drop_fragment(host_port, &fragment.key);
    }

    let stream = client.get(&raw_key, None, vec![]).await.unwrap();
    assert_eq!(collect(stream).await, data);
}

#[tokio::test]
async fn delete_is_idempotent_when_fragments_already_gone() {
    let (client, repair, _fleet) = test_client(6);
    let key_context = KeyContext { bucket_name: "b".into(), object_key: "obj-del".into(), owner: "o".into(), namespace: "n".into() };

    let data = vec![7u8; 4096];
    let raw_key = client.put(std::io::Cursor::new(data.clone()), data.len() as u64, &key_context, Code::Cp, 3, 0, vec![]).await.unwrap();

    client.delete(&raw_key, vec![]).await.unwrap();
    // Second delete: every fragment now replies 404, which counts as
    // success (spec §4.4.3 "DELETE 404 idempotence").
    client.delete(&raw_key, vec![]).await.unwrap();

    let jobs = repair.jobs.lock().unwrap();
    assert!(jobs.iter().all(|(topic, ..)| topic != "repair"));
}

#[tokio::test]
async fn get_of_unknown_key_surfaces_key_scheme_error() {
    let (client, _repair, _fleet) = test_client(4);
    let err = client.get("not a valid raw key", None, vec![]).await.unwrap_err();
    assert!(format!("{err:?}").contains("KeyScheme"));
}

#[tokio::test]
async fn range_with_lo_past_size_is_invalid_range() {
    let (client, _repair, _fleet) = test_client(6);
    let key_context = KeyContext { bucket_name: "b".into(), object_key: "obj-range".into(), owner: "o".into(), namespace: "n".into() };
    let data = vec![1u8; 4096];
    let raw_key = client.put(std::io::Cursor::new(data.clone()), data.len() as u64, &key_context, Code::Cp, 3, 0, vec![]).await.unwrap();

    let err = client.get(&raw_key, Some((1_000_000, None)), vec![]).await.unwrap_err();
    assert_eq!(err.status(), Some(406));
}
