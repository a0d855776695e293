//! `OperationContext` (spec §3): per-request fragment bookkeeping, mutated
//! only by the dispatcher that owns it.

use crate::error::{Error, HttpMethod, compare_errors};
use crate::transport::FragmentOutcome;

#[derive(Debug, Default)]
pub struct FragmentStatus {
    pub ok: bool,
    pub error: Option<Error>,
    pub timeout: bool,
    settled: bool,
}

impl FragmentStatus {
    /// Applies an outcome exactly once; a duplicate event from a racing
    /// abort is a no-op (spec §4.4.4 "updates the context exactly once").
    fn settle(&mut self, outcome: FragmentOutcome, method: HttpMethod) {
        if self.settled {
            return;
        }
        self.settled = true;
        match outcome {
            FragmentOutcome::Ok { .. } => self.ok = true,
            FragmentOutcome::Timeout => {
                self.timeout = true;
                self.error = Some(Error::timeout(method));
            }
            FragmentOutcome::Status(status) => {
                self.error = Some(Error::http(status, method));
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct ChunkStatus {
    pub fragments: Vec<FragmentStatus>,
    pub n_ok: u32,
    pub n_error: u32,
    pub n_timeout: u32,
}

impl ChunkStatus {
    pub fn new(n_fragments: usize) -> Self {
        Self { fragments: (0..n_fragments).map(|_| FragmentStatus::default()).collect(), n_ok: 0, n_error: 0, n_timeout: 0 }
    }

    pub fn record(&mut self, fragment_id: usize, outcome: FragmentOutcome, method: HttpMethod) {
        let slot = &mut self.fragments[fragment_id];
        if slot.settled {
            return;
        }
        slot.settle(outcome, method);
        if slot.ok {
            self.n_ok += 1;
        } else if slot.timeout {
            self.n_timeout += 1;
        } else {
            self.n_error += 1;
        }
    }

    /// The worst error across this chunk's fragments, per §7 ordering.
    pub fn worst_error(&self) -> Option<&Error> {
        self.fragments.iter().filter_map(|f| f.error.as_ref()).fold(None, |acc, e| compare_errors(acc, Some(e)))
    }
}

/// Per in-flight PUT/GET/DELETE. Created at request entry, consumed once
/// every chunk has settled (PUT/DELETE) or the output stream has drained
/// (GET).
#[derive(Debug)]
pub struct OperationContext {
    pub raw_key: String,
    pub chunks: Vec<ChunkStatus>,
    pub failed_to_persist: bool,
}

impl OperationContext {
    pub fn new(raw_key: impl Into<String>, n_chunks: usize, fragments_per_chunk: usize) -> Self {
        Self {
            raw_key: raw_key.into(),
            chunks: (0..n_chunks).map(|_| ChunkStatus::new(fragments_per_chunk)).collect(),
            failed_to_persist: false,
        }
    }

    pub fn worst_error(&self) -> Option<&Error> {
        self.chunks.iter().filter_map(|c| c.worst_error()).fold(None, |acc, e| compare_errors(acc, Some(e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_settle_is_idempotent() {
        let mut chunk = ChunkStatus::new(3);
        chunk.record(0, FragmentOutcome::Ok { status: 200 }, HttpMethod::Put);
        chunk.record(0, FragmentOutcome::Status(500), HttpMethod::Put);
        assert_eq!(chunk.n_ok, 1);
        assert_eq!(chunk.n_error, 0);
    }

    #[test]
    fn worst_error_prefers_higher_status() {
        let mut chunk = ChunkStatus::new(2);
        chunk.record(0, FragmentOutcome::Status(404), HttpMethod::Get);
        chunk.record(1, FragmentOutcome::Status(500), HttpMethod::Get);
        assert_eq!(chunk.worst_error().unwrap().status(), Some(500));
    }
}
