//! Error types for bucket operations.
//!
//! Every failure a backend can raise is first captured as a [`BackendError`],
//! which wraps the raw error of the storage engine (`redb`, `sled`, `rusqlite`)
//! or of the surrounding plumbing (I/O, key encoding, a closed connection).
//! Before it reaches a caller it is passed through the [`Normalize`] trait and
//! becomes a [`BucketError`] carrying one of the five [`ErrorKind`]s.
//!
//! All public APIs return [`BucketResult<T>`]:
//!
//! ```
//! use bucket_store::error::{BucketError, BucketResult, ErrorKind};
//!
//! fn lookup(found: bool) -> BucketResult<u32> {
//!     if found {
//!         Ok(7)
//!     } else {
//!         Err(BucketError::new(ErrorKind::NotFound, "no such record"))
//!     }
//! }
//!
//! match lookup(false) {
//!     Err(e) if e.kind() == ErrorKind::NotFound => {}
//!     other => panic!("unexpected {other:?}"),
//! }
//! ```
//!
//! # Error Conversion
//!
//! `From<BackendError> for BucketError` normalizes, so backend code can use the
//! `?` operator on raw engine errors and hand a taxonomy error to the caller.

use std::error::Error as StdError;
use std::fmt::Display;
use std::io;
use std::sync::Arc;
use thiserror::Error;

use crate::codec::CodecError;

/// Result type alias for bucket operations.
pub type BucketResult<T> = Result<T, BucketError>;

/// The shared error taxonomy, independent of the backend that failed.
///
/// The `Display` form is the upper-case name (`NOT_FOUND`, `QUOTA_EXCEEDED`, ...).
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
    strum::EnumIter,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// The record, resource or connection does not exist.
    NotFound,
    /// The backend rejected the data or the shape of the request.
    ConstraintViolation,
    /// The backend refused access (read-only, locked, denied).
    PermissionDenied,
    /// The backend ran out of space or a size limit was hit.
    QuotaExceeded,
    /// Anything else. The original message is preserved.
    Unknown,
}

/// A normalized error: one taxonomy kind, a diagnostic message and,
/// when one exists, the backend error that caused it.
#[derive(Error, Debug, Clone)]
#[error("{kind}: {message}")]
pub struct BucketError {
    kind: ErrorKind,
    message: String,
    #[source]
    source: Option<Arc<dyn StdError + Send + Sync>>,
}

impl BucketError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Attach the error that caused this one.
    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unknown, message)
    }

    /// The error returned by operations on an instance that is not connected.
    pub fn connection_unavailable(reason: impl Display) -> Self {
        Self::not_found(format!("connection unavailable: {reason}"))
    }

    pub fn timed_out(what: impl Display) -> Self {
        Self::unknown(format!("{what} timed out"))
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is(&self, kind: ErrorKind) -> bool {
        self.kind == kind
    }
}

/// Raw failures raised by storage engines and the plumbing around them.
#[derive(Error, Debug)]
pub enum BackendError {
    /// Wraps errors from the redb database
    #[cfg(feature = "redb")]
    #[error(transparent)]
    Redb(#[from] redb::Error),

    /// Wraps errors from the sled database
    #[cfg(feature = "sled")]
    #[error(transparent)]
    Sled(#[from] sled::Error),

    /// Wraps errors from SQLite
    #[cfg(feature = "sqlite")]
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Io(#[from] io::Error),

    /// A record key could not be encoded for a byte-oriented store
    #[error(transparent)]
    KeyEncode(#[from] bincode::error::EncodeError),

    /// Stored key bytes could not be decoded
    #[error(transparent)]
    KeyDecode(#[from] bincode::error::DecodeError),

    /// The backend has no open connection
    #[error("connection is not open")]
    Closed,

    /// A lock guarding the connection was poisoned by a panicking holder
    #[error("connection lock poisoned: {0}")]
    Poisoned(String),

    #[error("{0}")]
    Other(String),
}

#[cfg(feature = "redb")]
macro_rules! impl_from_redb {
    ($($err:ty),*) => {
        $(
            impl From<$err> for BackendError {
                fn from(err: $err) -> Self {
                    BackendError::Redb(err.into())
                }
            }
        )*
    };
}

#[cfg(feature = "redb")]
impl_from_redb!(
    redb::DatabaseError,
    redb::TransactionError,
    redb::TableError,
    redb::CommitError,
    redb::StorageError
);

impl BackendError {
    /// Classify this failure into the shared taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            #[cfg(feature = "redb")]
            BackendError::Redb(e) => redb_kind(e),
            #[cfg(feature = "sled")]
            BackendError::Sled(e) => sled_kind(e),
            #[cfg(feature = "sqlite")]
            BackendError::Sqlite(e) => sqlite_kind(e),
            BackendError::Io(e) => io_kind(e),
            BackendError::KeyEncode(_) => ErrorKind::ConstraintViolation,
            BackendError::Closed => ErrorKind::NotFound,
            BackendError::KeyDecode(_) | BackendError::Poisoned(_) | BackendError::Other(_) => {
                ErrorKind::Unknown
            }
        }
    }
}

fn io_kind(err: &io::Error) -> ErrorKind {
    match err.kind() {
        io::ErrorKind::NotFound => ErrorKind::NotFound,
        io::ErrorKind::AlreadyExists => ErrorKind::ConstraintViolation,
        io::ErrorKind::PermissionDenied
        | io::ErrorKind::ReadOnlyFilesystem
        | io::ErrorKind::WouldBlock => ErrorKind::PermissionDenied,
        io::ErrorKind::StorageFull => ErrorKind::QuotaExceeded,
        _ => ErrorKind::Unknown,
    }
}

#[cfg(feature = "redb")]
fn redb_kind(err: &redb::Error) -> ErrorKind {
    match err {
        redb::Error::TableDoesNotExist(_) => ErrorKind::NotFound,
        redb::Error::TableTypeMismatch { .. } => ErrorKind::ConstraintViolation,
        redb::Error::DatabaseAlreadyOpen => ErrorKind::PermissionDenied,
        redb::Error::ValueTooLarge(_) => ErrorKind::QuotaExceeded,
        redb::Error::Io(e) => io_kind(e),
        _ => ErrorKind::Unknown,
    }
}

#[cfg(feature = "sled")]
fn sled_kind(err: &sled::Error) -> ErrorKind {
    match err {
        sled::Error::CollectionNotFound(_) => ErrorKind::NotFound,
        // sled reports a held directory lock as a plain `Other` io error
        sled::Error::Io(e) if e.to_string().contains("could not acquire lock") => {
            ErrorKind::PermissionDenied
        }
        sled::Error::Io(e) => io_kind(e),
        _ => ErrorKind::Unknown,
    }
}

#[cfg(feature = "sqlite")]
fn sqlite_kind(err: &rusqlite::Error) -> ErrorKind {
    use rusqlite::ErrorCode;

    match err {
        rusqlite::Error::SqliteFailure(failure, _) => match failure.code {
            ErrorCode::ConstraintViolation => ErrorKind::ConstraintViolation,
            ErrorCode::PermissionDenied
            | ErrorCode::ReadOnly
            | ErrorCode::AuthorizationForStatementDenied => ErrorKind::PermissionDenied,
            ErrorCode::DiskFull | ErrorCode::TooBig => ErrorKind::QuotaExceeded,
            ErrorCode::NotFound | ErrorCode::CannotOpen => ErrorKind::NotFound,
            _ => ErrorKind::Unknown,
        },
        rusqlite::Error::QueryReturnedNoRows => ErrorKind::NotFound,
        _ => ErrorKind::Unknown,
    }
}

/// The error normalizer: maps any failure onto the shared taxonomy.
///
/// Normalizing a [`BucketError`] returns it unchanged.
pub trait Normalize {
    fn normalize(self) -> BucketError;
}

impl Normalize for BucketError {
    fn normalize(self) -> BucketError {
        self
    }
}

impl Normalize for BackendError {
    fn normalize(self) -> BucketError {
        let kind = self.kind();
        BucketError::new(kind, self.to_string()).with_source(self)
    }
}

impl Normalize for CodecError {
    fn normalize(self) -> BucketError {
        let kind = match self {
            CodecError::Encode(_) => ErrorKind::ConstraintViolation,
            CodecError::Decode(_) => ErrorKind::Unknown,
        };
        BucketError::new(kind, self.to_string()).with_source(self)
    }
}

impl From<BackendError> for BucketError {
    fn from(err: BackendError) -> Self {
        err.normalize()
    }
}

impl From<CodecError> for BucketError {
    fn from(err: CodecError) -> Self {
        err.normalize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use strum::IntoEnumIterator;

    #[test]
    fn kinds_display_as_taxonomy_names() {
        let names: Vec<String> = ErrorKind::iter().map(|k| k.to_string()).collect();
        assert_eq!(
            names,
            [
                "NOT_FOUND",
                "CONSTRAINT_VIOLATION",
                "PERMISSION_DENIED",
                "QUOTA_EXCEEDED",
                "UNKNOWN"
            ]
        );
        assert_eq!(
            ErrorKind::from_str("QUOTA_EXCEEDED").ok(),
            Some(ErrorKind::QuotaExceeded)
        );
    }

    #[test]
    fn normalizing_twice_is_a_no_op() {
        let once = BackendError::Closed.normalize();
        let twice = once.clone().normalize();
        assert_eq!(once.kind(), twice.kind());
        assert_eq!(once.message(), twice.message());
        assert!(twice.source().is_some());
    }

    #[test]
    fn unknown_failures_keep_their_message() {
        let err = BackendError::Other("disk made a strange noise".into()).normalize();
        assert_eq!(err.kind(), ErrorKind::Unknown);
        assert!(err.to_string().contains("disk made a strange noise"));
        assert!(err.to_string().starts_with("UNKNOWN"));
    }

    #[test]
    fn io_errors_map_by_kind() {
        let cases = [
            (io::ErrorKind::NotFound, ErrorKind::NotFound),
            (io::ErrorKind::AlreadyExists, ErrorKind::ConstraintViolation),
            (io::ErrorKind::PermissionDenied, ErrorKind::PermissionDenied),
            (io::ErrorKind::WouldBlock, ErrorKind::PermissionDenied),
            (io::ErrorKind::StorageFull, ErrorKind::QuotaExceeded),
            (io::ErrorKind::Interrupted, ErrorKind::Unknown),
        ];
        for (io_kind, expected) in cases {
            let err: BucketError = BackendError::Io(io::Error::new(io_kind, "io")).into();
            assert_eq!(err.kind(), expected, "{io_kind:?}");
        }
    }

    #[test]
    fn closed_connection_is_not_found() {
        assert_eq!(BackendError::Closed.kind(), ErrorKind::NotFound);
    }

    #[cfg(feature = "sqlite")]
    #[test]
    fn sqlite_result_codes_map_to_taxonomy() {
        use rusqlite::ffi;

        let cases = [
            (ffi::SQLITE_CONSTRAINT, ErrorKind::ConstraintViolation),
            (ffi::SQLITE_PERM, ErrorKind::PermissionDenied),
            (ffi::SQLITE_READONLY, ErrorKind::PermissionDenied),
            (ffi::SQLITE_FULL, ErrorKind::QuotaExceeded),
            (ffi::SQLITE_CANTOPEN, ErrorKind::NotFound),
            (ffi::SQLITE_BUSY, ErrorKind::Unknown),
        ];
        for (code, expected) in cases {
            let raw = rusqlite::Error::SqliteFailure(ffi::Error::new(code), None);
            assert_eq!(BackendError::from(raw).kind(), expected, "code {code}");
        }
        assert_eq!(
            BackendError::from(rusqlite::Error::QueryReturnedNoRows).kind(),
            ErrorKind::NotFound
        );
    }

    #[cfg(feature = "sled")]
    #[test]
    fn sled_errors_map_to_taxonomy() {
        let missing = sled::Error::CollectionNotFound(sled::IVec::from("records"));
        assert_eq!(BackendError::from(missing).kind(), ErrorKind::NotFound);

        let bug = sled::Error::ReportableBug("oops".to_string());
        assert_eq!(BackendError::from(bug).kind(), ErrorKind::Unknown);

        let locked = sled::Error::Io(io::Error::new(
            io::ErrorKind::Other,
            "could not acquire lock on \"/data/app\": WouldBlock",
        ));
        assert_eq!(BackendError::from(locked).kind(), ErrorKind::PermissionDenied);

        let other = sled::Error::Io(io::Error::other("short read"));
        assert_eq!(BackendError::from(other).kind(), ErrorKind::Unknown);
    }

    #[cfg(feature = "redb")]
    #[test]
    fn redb_errors_map_to_taxonomy() {
        let missing = redb::Error::TableDoesNotExist("records".to_string());
        assert_eq!(BackendError::from(missing).kind(), ErrorKind::NotFound);

        let locked = redb::Error::DatabaseAlreadyOpen;
        assert_eq!(BackendError::from(locked).kind(), ErrorKind::PermissionDenied);
    }
}
