//! Repair-job persistence (spec §4.4.5): asynchronous cleanup/check work
//! queued whenever a PUT/GET/DELETE leaves fragments in a questionable
//! state. Jobs are JSON documents produced to one of three named topics.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{self, Error};

pub const TOPIC_DELETE: &str = "delete";
pub const TOPIC_CHECK: &str = "check";
pub const TOPIC_REPAIR: &str = "repair";

/// `{ rawKey, fragments: [[chunkId, fragmentId], …], version: 1 }`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RepairJob {
    pub raw_key: String,
    pub fragments: Vec<(u32, u32)>,
    pub version: u32,
}

impl RepairJob {
    pub fn new(raw_key: impl Into<String>, fragments: Vec<(u32, u32)>) -> Self {
        Self { raw_key: raw_key.into(), fragments, version: 1 }
    }
}

/// `produce(topic, partition=0, value=JSON, key=objectKey)`. Mirrors a
/// Kafka-style producer interface (spec §6 "Repair-queue interface",
/// configured via `errorAgent.kafkaBrokers`). The producer itself is an
/// out-of-scope external collaborator (spec §1); this crate only defines
/// the trait an embedding application implements against its own queue.
#[async_trait]
pub trait RepairQueue: Send + Sync {
    async fn produce(&self, topic: &str, key: &str, job: &RepairJob) -> error::Result<()>;
}

/// Enqueues a job to a topic, converting transport/serialization failures
/// into the status-500 `PersistenceError` the dispatcher surfaces per §4.4.5.
pub async fn enqueue(queue: &dyn RepairQueue, topic: &str, object_key: &str, job: &RepairJob) -> error::Result<()> {
    queue.produce(topic, object_key, job).await.map_err(|_| Error::persistence())
}
