//! Crate-wide error type.
//!
//! Follows the teacher's `multi_error!` pattern: a single enum generated by a
//! declarative macro, wrapping both hand-written variants and `From`-derived
//! external errors, with a captured backtrace rendered only when
//! `RUST_BACKTRACE` is set.

use std::fmt;

/// The HTTP verb a fragment sub-request used, kept on timeout/HTTP errors so
/// the dispatcher can log and repair-job-persist with full context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Put,
    Get,
    Delete,
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HttpMethod::Put => write!(f, "PUT"),
            HttpMethod::Get => write!(f, "GET"),
            HttpMethod::Delete => write!(f, "DELETE"),
        }
    }
}

macro_rules! multi_error {
    ($name:ident($($manual:ident),*); $($err:ident = $obj:ty);*) => {
        pub mod $name {
            use backtrace::Backtrace;

            #[derive(Debug)]
            pub enum Inner {
                $($err($obj),)*
                $($manual(super::Manual),)*
            }

            impl std::fmt::Display for Inner { fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { std::fmt::Debug::fmt(self, f) } }
            impl std::error::Error for Inner {}

            $(impl From<$obj> for Inner { fn from(value: $obj) -> Self { Self::$err(value) } })*

            pub struct Error {
                pub(super) inner: Inner,
                backtrace: Backtrace,
            }

            impl<Err> From<Err> for Error where Err: Into<Inner> {
                fn from(err: Err) -> Self {
                    Self {
                        inner: err.into(),
                        backtrace: Backtrace::new(),
                    }
                }
            }

            impl std::error::Error for Error {}
            impl std::fmt::Display for Error {
                fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { std::fmt::Debug::fmt(&self.inner, f) }
            }

            impl std::fmt::Debug for Error {
                fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                    write!(f, "{:?}\n", &self.inner)?;
                    match std::env::var("RUST_BACKTRACE").as_ref().map(|i| i.as_str()) {
                        Ok("full") => write!(f, "{:#?}", self.backtrace),
                        Ok("1") => write!(f, "{:?}", self.backtrace),
                        _ => write!(f, ""),
                    }
                }
            }
        }
    }
}

multi_error! { global(ConfigError, KeySchemeError, Http, Timeout, Corrupted, Persistence, InvalidRange);
    IoError = std::io::Error;
    JsonError = serde_json::Error;
    ReqwestError = reqwest::Error;
    RsError = reed_solomon_erasure::Error
}

pub type Result<T> = ::std::result::Result<T, Error>;
pub use global::Error;

/// The hand-written error kinds from spec §7, each carrying the context
/// needed for `status()` and `compare_errors`.
#[derive(Debug, Clone)]
pub enum Manual {
    /// Construction-time configuration problem. Fatal to the client.
    Config(String),
    /// A raw key failed to parse.
    KeyScheme(String),
    /// A drive returned a non-2xx status for a fragment sub-request.
    Http { status: u16, method: HttpMethod },
    /// Socket-inactivity timeout on a fragment sub-request.
    Timeout { method: HttpMethod },
    /// CRC trailer mismatch on a GET reply (status 422).
    Corrupted,
    /// Failed to enqueue a repair/check/delete job (status 500).
    Persistence,
    /// Caller-supplied GET range has `lo >= size` (status 406).
    InvalidRange,
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        global::Inner::ConfigError(Manual::Config(msg.into())).into()
    }

    pub fn key_scheme(msg: impl Into<String>) -> Self {
        global::Inner::KeySchemeError(Manual::KeyScheme(msg.into())).into()
    }

    pub fn http(status: u16, method: HttpMethod) -> Self {
        global::Inner::Http(Manual::Http { status, method }).into()
    }

    pub fn timeout(method: HttpMethod) -> Self {
        global::Inner::Timeout(Manual::Timeout { method }).into()
    }

    pub fn corrupted() -> Self {
        global::Inner::Corrupted(Manual::Corrupted).into()
    }

    pub fn persistence() -> Self {
        global::Inner::Persistence(Manual::Persistence).into()
    }

    pub fn invalid_range() -> Self {
        global::Inner::InvalidRange(Manual::InvalidRange).into()
    }

    /// The HTTP status this error is surfaced to the caller as, per spec §7.
    /// `None` for errors with no natural status (e.g. a raw io error that
    /// never reached the wire).
    pub fn status(&self) -> Option<u16> {
        match &self.inner {
            global::Inner::ConfigError(_) => None,
            global::Inner::KeySchemeError(_) => None,
            global::Inner::Http(Manual::Http { status, .. }) => Some(*status),
            global::Inner::Timeout(_) => Some(500),
            global::Inner::Corrupted(_) => Some(422),
            global::Inner::Persistence(_) => Some(500),
            global::Inner::InvalidRange(_) => Some(406),
            global::Inner::IoError(_) => None,
            global::Inner::JsonError(_) => None,
            global::Inner::ReqwestError(_) => None,
            global::Inner::RsError(_) => None,
        }
    }

    pub fn is_persistence(&self) -> bool {
        matches!(&self.inner, global::Inner::Persistence(_))
    }

    pub fn is_corrupted(&self) -> bool {
        matches!(&self.inner, global::Inner::Corrupted(_))
    }

    pub fn is_fatal_config(&self) -> bool {
        matches!(&self.inner, global::Inner::ConfigError(_))
    }
}

/// `compareErrors` (spec §7): `null < error` always; between two errors,
/// higher HTTP status wins the worst-error slot. Errors without a status
/// (config/key-scheme/io/json) are treated as maximally severe, since they
/// indicate the operation could not even be attempted.
pub fn compare_errors<'a>(a: Option<&'a Error>, b: Option<&'a Error>) -> Option<&'a Error> {
    match (a, b) {
        (None, None) => None,
        (None, Some(e)) | (Some(e), None) => Some(e),
        (Some(e1), Some(e2)) => {
            let s1 = e1.status().unwrap_or(u16::MAX);
            let s2 = e2.status().unwrap_or(u16::MAX);
            if s2 > s1 { Some(e2) } else { Some(e1) }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_is_always_less_than_an_error() {
        let err = Error::corrupted();
        assert!(compare_errors(None, Some(&err)).is_some());
        assert!(compare_errors(Some(&err), None).is_some());
        assert!(compare_errors(None, None).is_none());
    }

    #[test]
    fn higher_status_wins() {
        let low = Error::invalid_range(); // 406
        let high = Error::persistence(); // 500
        let worst = compare_errors(Some(&low), Some(&high)).unwrap();
        assert_eq!(worst.status(), Some(500));
    }

    #[test]
    fn corrupted_error_is_detected_by_is_corrupted() {
        let err = Error::corrupted();
        assert!(err.is_corrupted());
        assert!(!Error::persistence().is_corrupted());
    }

    #[test]
    fn corrupted_error_downcasts_out_of_an_io_error() {
        let io_err = std::io::Error::other(Error::corrupted());
        let recovered = io_err.get_ref().and_then(|e| e.downcast_ref::<Error>());
        assert!(recovered.is_some_and(Error::is_corrupted));
    }

    #[test]
    fn config_errors_outrank_everything() {
        let http = Error::http(404, HttpMethod::Get);
        let cfg = Error::config("bad policy");
        let worst = compare_errors(Some(&http), Some(&cfg)).unwrap();
        assert!(worst.is_fatal_config());
    }
}
