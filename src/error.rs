// Copyright (c) 2026 the yakushima authors
//
// Licensed under the Apache License, Version 2.0 or the MIT license,
// at your option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The [`Status`] taxonomy returned by every public operation, plus
//! [`YakushimaError`] for the usage-error and fatal arms.

use core::fmt;

pub type Result<T> = core::result::Result<T, YakushimaError>;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[repr(u8)]
/// Outcome of a public operation.
///
/// Retry signals (`OK_RETRY_*`, `WARN_RETRY_FROM_ROOT_OF_ALL`) never escape
/// the crate; they drive internal descent/validation loops and are converted
/// into one of the other variants before a call returns.
pub enum Status {
    Ok,
    OkDestroyAll,
    OkNotFound,
    OkRootIsNull,
    OkScanContinue,
    OkScanEnd,
    OkRetryFetchLv,
    OkRetryFromRoot,
    WarnNotExist,
    WarnExist,
    WarnUniqueRestriction,
    WarnMaxSessions,
    WarnStorageNotExist,
    WarnInvalidToken,
    WarnConcurrentOperations,
    WarnRetryFromRootOfAll,
    ErrBadUsage,
    ErrFatal,
}

impl Status {
    /// True for the two `OK_RETRY_*`/`WARN_RETRY_FROM_ROOT_OF_ALL` internal
    /// retry signals, which must never be surfaced from a public call.
    pub const fn is_retry(self) -> bool {
        matches!(
            self,
            Self::OkRetryFetchLv | Self::OkRetryFromRoot | Self::WarnRetryFromRootOfAll
        )
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone)]
/// A usage error or a detected structural invariant violation.
///
/// `YakushimaError` is the `Err` arm used internally by the tree/session
/// layer; the public function-level API (crate root) flattens both arms
/// down to [`Status::ErrBadUsage`] / [`Status::ErrFatal`].
pub enum YakushimaError {
    /// Malformed input: a null pointer paired with a nonzero length, or a
    /// scan range with `left == right` and an `EXCLUSIVE` endpoint.
    BadUsage(&'static str),
    /// A [`crate::Config`] field was out of its valid range (e.g. `fanout`
    /// outside `[3, 15]`). Raised at construction time, before a `Config`
    /// ever reaches a [`crate::Runtime`].
    InvalidConfig(String),
    /// A structural invariant was violated (e.g. a child pointer expected
    /// to reference a border node turned out to reference an interior
    /// node). Never expected from valid API usage; logged at `error`
    /// before being surfaced.
    Fatal(String),
}

impl fmt::Display for YakushimaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadUsage(msg) => write!(f, "bad usage: {msg}"),
            Self::InvalidConfig(msg) => write!(f, "invalid config: {msg}"),
            Self::Fatal(msg) => write!(f, "fatal: {msg}"),
        }
    }
}

impl std::error::Error for YakushimaError {}

impl From<&YakushimaError> for Status {
    fn from(e: &YakushimaError) -> Self {
        match e {
            YakushimaError::BadUsage(_) | YakushimaError::InvalidConfig(_) => Status::ErrBadUsage,
            YakushimaError::Fatal(_) => Status::ErrFatal,
        }
    }
}

/// Flattens a `Result<Status, YakushimaError>` into the outward-facing
/// `Status`-only surface, logging fatal conditions on the way out.
pub(crate) fn flatten(r: Result<Status>) -> Status {
    match r {
        Ok(s) => s,
        Err(e) => {
            let status = Status::from(&e);
            if status == Status::ErrFatal {
                log::error!(target: "yakushima::tree", "{e}");
            }
            status
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_signals_are_flagged() {
        assert!(Status::OkRetryFromRoot.is_retry());
        assert!(Status::WarnRetryFromRootOfAll.is_retry());
        assert!(!Status::Ok.is_retry());
    }

    #[test]
    fn flatten_maps_fatal() {
        let err = YakushimaError::Fatal("expected border, found interior".into());
        assert_eq!(flatten(Err(err)), Status::ErrFatal);
    }
}
