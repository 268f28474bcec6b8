use std::ffi::NulError;
use std::os::raw::c_int;
use std::result;

use thiserror::Error;

/// Custom result type for upscaledb operations
pub type Result<T> = result::Result<T, Error>;

/// Status codes reported by the engine, for whole calls and for each
/// operation of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum Status {
    #[error("Success")]
    Success,
    #[error("Invalid record size")]
    InvRecordSize,
    #[error("Invalid key size")]
    InvKeySize,
    #[error("Invalid page size")]
    InvPageSize,
    #[error("Out of memory")]
    OutOfMemory,
    #[error("Invalid parameter")]
    InvParameter,
    #[error("Invalid database file header")]
    InvFileHeader,
    #[error("Invalid database file version")]
    InvFileVersion,
    #[error("Key not found")]
    KeyNotFound,
    #[error("Duplicate key")]
    DuplicateKey,
    #[error("Internal integrity violated")]
    IntegrityViolated,
    #[error("Internal error")]
    InternalError,
    #[error("Database opened in read-only mode")]
    WriteProtected,
    #[error("Data blob not found")]
    BlobNotFound,
    #[error("System I/O error")]
    IoError,
    #[error("Operation not implemented")]
    NotImplemented,
    #[error("File not found")]
    FileNotFound,
    #[error("Operation would block")]
    WouldBlock,
    #[error("Object was not initialized correctly")]
    NotReady,
    #[error("Database limits reached")]
    LimitsReached,
    #[error("Object was already initialized")]
    AlreadyInitialized,
    #[error("Database needs recovery")]
    NeedRecovery,
    #[error("Cursor must be closed prior to Transaction abort/commit")]
    CursorStillOpen,
    #[error("Record filter or file filter not found")]
    FilterNotFound,
    #[error("Operation conflicts with another Transaction")]
    TxnConflict,
    #[error("Database item is erased in a pending Transaction")]
    KeyErasedInTxn,
    #[error("Transaction must be committed or aborted first")]
    TxnStillOpen,
    #[error("Cursor points to NIL")]
    CursorIsNil,
    #[error("Database not found")]
    DatabaseNotFound,
    #[error("Database name already exists")]
    DatabaseAlreadyExists,
    #[error("Database already open, or database handle already in use")]
    DatabaseAlreadyOpen,
    #[error("Environment already open, or handle already in use")]
    EnvironmentAlreadyOpen,
    #[error("Invalid log file header")]
    LogInvFileHeader,
    #[error("Remote I/O error/Network error")]
    NetworkError,
    #[error("Plugin not found")]
    PluginNotFound,
    #[error("Failed to parse query")]
    ParserError,
    #[error("Plugin already registered")]
    PluginAlreadyExists,
    #[error("Unknown error code: {0}")]
    Other(c_int),
}

impl Status {
    /// Every named status, in wire order.
    pub const KNOWN: [Status; 37] = [
        Status::Success,
        Status::InvRecordSize,
        Status::InvKeySize,
        Status::InvPageSize,
        Status::OutOfMemory,
        Status::InvParameter,
        Status::InvFileHeader,
        Status::InvFileVersion,
        Status::KeyNotFound,
        Status::DuplicateKey,
        Status::IntegrityViolated,
        Status::InternalError,
        Status::WriteProtected,
        Status::BlobNotFound,
        Status::IoError,
        Status::NotImplemented,
        Status::FileNotFound,
        Status::WouldBlock,
        Status::NotReady,
        Status::LimitsReached,
        Status::AlreadyInitialized,
        Status::NeedRecovery,
        Status::CursorStillOpen,
        Status::FilterNotFound,
        Status::TxnConflict,
        Status::KeyErasedInTxn,
        Status::TxnStillOpen,
        Status::CursorIsNil,
        Status::DatabaseNotFound,
        Status::DatabaseAlreadyExists,
        Status::DatabaseAlreadyOpen,
        Status::EnvironmentAlreadyOpen,
        Status::LogInvFileHeader,
        Status::NetworkError,
        Status::PluginNotFound,
        Status::ParserError,
        Status::PluginAlreadyExists,
    ];

    /// The integer value used on the wire
    pub fn code(self) -> c_int {
        match self {
            Status::Success => 0,
            Status::InvRecordSize => -2,
            Status::InvKeySize => -3,
            Status::InvPageSize => -4,
            Status::OutOfMemory => -6,
            Status::InvParameter => -8,
            Status::InvFileHeader => -9,
            Status::InvFileVersion => -10,
            Status::KeyNotFound => -11,
            Status::DuplicateKey => -12,
            Status::IntegrityViolated => -13,
            Status::InternalError => -14,
            Status::WriteProtected => -15,
            Status::BlobNotFound => -16,
            Status::IoError => -18,
            Status::NotImplemented => -20,
            Status::FileNotFound => -21,
            Status::WouldBlock => -22,
            Status::NotReady => -23,
            Status::LimitsReached => -24,
            Status::AlreadyInitialized => -27,
            Status::NeedRecovery => -28,
            Status::CursorStillOpen => -29,
            Status::FilterNotFound => -30,
            Status::TxnConflict => -31,
            Status::KeyErasedInTxn => -32,
            Status::TxnStillOpen => -33,
            Status::CursorIsNil => -100,
            Status::DatabaseNotFound => -200,
            Status::DatabaseAlreadyExists => -201,
            Status::DatabaseAlreadyOpen => -202,
            Status::EnvironmentAlreadyOpen => -203,
            Status::LogInvFileHeader => -300,
            Status::NetworkError => -400,
            Status::PluginNotFound => -500,
            Status::ParserError => -501,
            Status::PluginAlreadyExists => -502,
            Status::Other(code) => code,
        }
    }

    pub fn is_success(self) -> bool {
        self == Status::Success
    }

    pub fn into_result(self) -> Result<()> {
        if self.is_success() {
            Ok(())
        } else {
            Err(Error::Engine(self))
        }
    }
}

impl From<c_int> for Status {
    fn from(code: c_int) -> Status {
        match code {
            0 => Status::Success,
            -2 => Status::InvRecordSize,
            -3 => Status::InvKeySize,
            -4 => Status::InvPageSize,
            -6 => Status::OutOfMemory,
            -8 => Status::InvParameter,
            -9 => Status::InvFileHeader,
            -10 => Status::InvFileVersion,
            -11 => Status::KeyNotFound,
            -12 => Status::DuplicateKey,
            -13 => Status::IntegrityViolated,
            -14 => Status::InternalError,
            -15 => Status::WriteProtected,
            -16 => Status::BlobNotFound,
            -18 => Status::IoError,
            -20 => Status::NotImplemented,
            -21 => Status::FileNotFound,
            -22 => Status::WouldBlock,
            -23 => Status::NotReady,
            -24 => Status::LimitsReached,
            -27 => Status::AlreadyInitialized,
            -28 => Status::NeedRecovery,
            -29 => Status::CursorStillOpen,
            -30 => Status::FilterNotFound,
            -31 => Status::TxnConflict,
            -32 => Status::KeyErasedInTxn,
            -33 => Status::TxnStillOpen,
            -100 => Status::CursorIsNil,
            -200 => Status::DatabaseNotFound,
            -201 => Status::DatabaseAlreadyExists,
            -202 => Status::DatabaseAlreadyOpen,
            -203 => Status::EnvironmentAlreadyOpen,
            -300 => Status::LogInvFileHeader,
            -400 => Status::NetworkError,
            -500 => Status::PluginNotFound,
            -501 => Status::ParserError,
            -502 => Status::PluginAlreadyExists,
            code => Status::Other(code),
        }
    }
}

impl From<Status> for c_int {
    fn from(status: Status) -> c_int {
        status.code()
    }
}

/// Errors raised by the binding
#[derive(Debug, Error)]
pub enum Error {
    /// The engine rejected the call
    #[error("{0}")]
    Engine(Status),

    /// Key does not fit the 16-bit length field of the wire format
    #[error("key of {len} bytes exceeds the {} byte limit", crate::constants::MAX_KEY_SIZE)]
    KeyTooLarge { len: usize },

    /// Record does not fit the signed 32-bit length the binding accepts
    #[error("record of {len} bytes exceeds the {} byte limit", crate::constants::MAX_RECORD_SIZE)]
    RecordTooLarge { len: usize },

    /// One operation of a batch could not be marshalled
    #[error("operation {index}: {source}")]
    Operation {
        index: usize,
        #[source]
        source: Box<Error>,
    },

    /// String argument contains an interior NUL byte
    #[error("string contains an interior NUL byte")]
    Nul(#[from] NulError),

    /// Path is not valid UTF-8
    #[error("path is not valid UTF-8")]
    InvalidPath,
}

impl Error {
    /// Engine status behind this error, if the engine produced it
    pub fn status(&self) -> Option<Status> {
        match self {
            Error::Engine(status) => Some(*status),
            _ => None,
        }
    }

    /// True when the error was raised before anything reached the engine
    pub fn is_marshalling(&self) -> bool {
        match self {
            Error::KeyTooLarge { .. } | Error::RecordTooLarge { .. } => true,
            Error::Operation { source, .. } => source.is_marshalling(),
            _ => false,
        }
    }
}

impl From<Status> for Error {
    fn from(status: Status) -> Error {
        Error::Engine(status)
    }
}

/// Helper trait for converting C status codes to Results
pub(crate) trait IntoResult {
    fn into_result(self) -> Result<()>;
}

impl IntoResult for c_int {
    fn into_result(self) -> Result<()> {
        Status::from(self).into_result()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_round_trip_for_named_statuses() {
        for status in Status::KNOWN {
            assert_eq!(Status::from(status.code()), status);
        }
        assert_eq!(Status::from(-7), Status::Other(-7));
        assert_eq!(Status::Other(-7).code(), -7);
    }

    #[test]
    fn nonzero_codes_become_engine_errors() {
        assert!((0 as c_int).into_result().is_ok());
        let err = (-11 as c_int).into_result().unwrap_err();
        assert_eq!(err.status(), Some(Status::KeyNotFound));
        assert!(!err.is_marshalling());
    }

    #[test]
    fn marshalling_errors_are_distinct() {
        let err = Error::Operation {
            index: 3,
            source: Box::new(Error::KeyTooLarge { len: 70_000 }),
        };
        assert!(err.is_marshalling());
        assert_eq!(err.status(), None);
        assert_eq!(
            err.to_string(),
            "operation 3: key of 70000 bytes exceeds the 65535 byte limit"
        );
    }
}
