//! Request-scoped logger (spec §3 `OperationContext.log`, §6).
//!
//! Mirrors the teacher's contextual log-prefix style (`src/oauth.rs`:
//! `log::debug!("Got oauth response: {}", i)`) generalized to a `reqUids`
//! correlation id threaded in from the upper S3 layer. The library never
//! calls `env_logger::init()` itself — wiring up a logger is the embedding
//! application's job, same as the teacher's `Database`/`RWFragmentStore`.

#[derive(Debug, Clone, Default)]
pub struct RequestLog {
    req_uids: Vec<String>,
}

impl RequestLog {
    pub fn new(req_uids: Vec<String>) -> Self {
        Self { req_uids }
    }

    fn prefix(&self) -> String {
        if self.req_uids.is_empty() {
            String::new()
        } else {
            format!("[{}] ", self.req_uids.join(","))
        }
    }

    pub fn info(&self, msg: &str) {
        log::info!("{}{msg}", self.prefix());
    }

    pub fn warn(&self, msg: &str) {
        log::warn!("{}{msg}", self.prefix());
    }

    pub fn error(&self, msg: &str) {
        log::error!("{}{msg}", self.prefix());
    }

    pub fn debug(&self, msg: &str) {
        log::debug!("{}{msg}", self.prefix());
    }
}
