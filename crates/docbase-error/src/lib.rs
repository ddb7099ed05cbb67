//! Unified error type for docbase.
//!
//! Every docbase error carries an [`ErrorKind`] — the same closed set the
//! request engine and the transaction retry loop use to decide whether an
//! operation may be retried — a human-readable message, an optional cause
//! chain, and arbitrary structured context. [`DocbaseError::no_such_entity`]
//! and [`DocbaseError::done`] are the two precise sentinels callers are
//! expected to match on by kind rather than by string.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// The closed set of error classifications the retry engine and the
/// transaction loop inspect.
///
/// See spec §4.8 / §8: `ClientError`/`ServerError`/`UnexpectedSuccess`
/// govern the request engine's retry policy; `Conflict` is retried only by
/// the transaction loop (the request engine treats it like `ClientError`);
/// `NotFound` and `Done` are the precise sentinels surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// 4xx other than 404. Never retried.
    ClientError,
    /// 404 from a lookup. Never retried; entity operations surface this as
    /// [`DocbaseError::no_such_entity`].
    NotFound,
    /// 5xx status or a transport-level failure. Retried up to `N` attempts.
    ServerError,
    /// A 2xx status other than 200. Never retried.
    UnexpectedSuccess,
    /// 409, or a body containing `ABORTED`. Retried only by
    /// `RunInTransaction`; the request engine itself treats this like
    /// [`ErrorKind::ClientError`].
    Conflict,
    /// The caller's context was cancelled. Never retried.
    Cancelled,
    /// A local precondition failed before any network call was made (nil
    /// key, empty key slice, length mismatch, unsupported value type, ...).
    Validation,
    /// Decoding the wire response failed (bad JSON shape, type mismatch on
    /// a named property).
    Decode,
    /// The iterator has no more results. Terminal; not wire-related.
    Done,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ClientError => "client_error",
            Self::NotFound => "not_found",
            Self::ServerError => "server_error",
            Self::UnexpectedSuccess => "unexpected_success",
            Self::Conflict => "conflict",
            Self::Cancelled => "cancelled",
            Self::Validation => "validation",
            Self::Decode => "decode",
            Self::Done => "done",
        };
        f.write_str(s)
    }
}

impl ErrorKind {
    /// Whether the request engine (as opposed to the transaction retry
    /// loop) should retry an error of this kind, per spec §4.4/§4.8.
    pub fn request_retriable(&self) -> bool {
        matches!(self, Self::ServerError)
    }
}

/// Unified docbase error.
///
/// Construct with [`DocbaseError::new`] and chain `with_context`/
/// `with_source` the way `abp_error::AbpError` does.
pub struct DocbaseError {
    kind: ErrorKind,
    message: String,
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
    context: BTreeMap<String, serde_json::Value>,
}

impl DocbaseError {
    /// Create a new error with the given kind and message.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
            context: BTreeMap::new(),
        }
    }

    /// The precise `ErrNoSuchEntity` sentinel: `Get`/`GetMulti` (any
    /// missing) and in-transaction `Get` surface this exact kind.
    pub fn no_such_entity() -> Self {
        Self::new(ErrorKind::NotFound, "no such entity")
    }

    /// The precise `ErrDone` sentinel terminating an iterator.
    pub fn done() -> Self {
        Self::new(ErrorKind::Done, "no more results")
    }

    /// A local validation error (no network call was made).
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    /// Attach a key-value pair to the diagnostic context. The value is
    /// converted via [`serde_json::to_value`]; a value that fails to
    /// serialize is silently skipped rather than panicking.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    /// Attach an underlying cause.
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// This error's kind.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Shorthand for `self.kind() == ErrorKind::NotFound`.
    pub fn is_no_such_entity(&self) -> bool {
        self.kind == ErrorKind::NotFound
    }

    /// Shorthand for `self.kind() == ErrorKind::Done`.
    pub fn is_done(&self) -> bool {
        self.kind == ErrorKind::Done
    }

    /// Whether the request engine may retry an error of this shape.
    pub fn request_retriable(&self) -> bool {
        self.kind.request_retriable()
    }
}

impl fmt::Debug for DocbaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("DocbaseError");
        d.field("kind", &self.kind);
        d.field("message", &self.message);
        if let Some(ref src) = self.source {
            d.field("source", &src.to_string());
        }
        if !self.context.is_empty() {
            d.field("context", &self.context);
        }
        d.finish()
    }
}

impl fmt::Display for DocbaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)?;
        if !self.context.is_empty() {
            if let Ok(ctx) = serde_json::to_string(&self.context) {
                write!(f, " {ctx}")?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for DocbaseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Convenience alias used throughout the docbase crates.
pub type Result<T> = std::result::Result<T, DocbaseError>;
