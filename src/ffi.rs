//! Raw C layouts shared with the engine
//!
//! These mirror `ups_key_t`, `ups_record_t`, `ups_operation_t` and
//! `ups_parameter_t` from `ups/upscaledb.h`. Handles are opaque pointers owned
//! by the engine.

use libc::{c_int, c_void};
use std::ptr;

/// Opaque `ups_env_t *`
pub type EnvPtr = *mut c_void;
/// Opaque `ups_db_t *`
pub type DbPtr = *mut c_void;
/// Opaque `ups_txn_t *`, null meaning no transaction
pub type TxnPtr = *mut c_void;
/// Opaque `ups_cursor_t *`
pub type CursorPtr = *mut c_void;
/// Opaque `uqi_result_t *`
pub type ResultPtr = *mut c_void;

/// Key descriptor (`ups_key_t`)
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawKey {
    pub size: u16,
    pub data: *mut c_void,
    pub flags: u32,
    pub _flags: u32,
}

/// Record descriptor (`ups_record_t`)
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawRecord {
    pub size: u32,
    pub data: *mut c_void,
    pub flags: u32,
}

/// One element of a bulk call (`ups_operation_t`)
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawOperation {
    pub kind: c_int,
    pub key: RawKey,
    pub record: RawRecord,
    pub flags: u32,
    pub result: c_int,
}

/// Numeric configuration entry (`ups_parameter_t`); lists end with name 0
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawParameter {
    pub name: u32,
    pub value: u64,
}

impl Default for RawKey {
    fn default() -> Self {
        RawKey {
            size: 0,
            data: ptr::null_mut(),
            flags: 0,
            _flags: 0,
        }
    }
}

impl Default for RawRecord {
    fn default() -> Self {
        RawRecord {
            size: 0,
            data: ptr::null_mut(),
            flags: 0,
        }
    }
}

impl RawOperation {
    pub fn new(kind: c_int, flags: u32) -> Self {
        RawOperation {
            kind,
            key: RawKey::default(),
            record: RawRecord::default(),
            flags,
            result: 0,
        }
    }
}

impl RawParameter {
    pub const TERMINATOR: RawParameter = RawParameter { name: 0, value: 0 };
}

#[cfg(feature = "native")]
pub(crate) mod sys {
    use super::*;
    use libc::{c_char, size_t};

    #[link(name = "upscaledb")]
    extern "C" {
        pub fn ups_strerror(status: c_int) -> *const c_char;
        pub fn ups_get_version(major: *mut u32, minor: *mut u32, revision: *mut u32);

        pub fn ups_env_create(
            env: *mut EnvPtr,
            filename: *const c_char,
            flags: u32,
            mode: u32,
            params: *const RawParameter,
        ) -> c_int;
        pub fn ups_env_open(
            env: *mut EnvPtr,
            filename: *const c_char,
            flags: u32,
            params: *const RawParameter,
        ) -> c_int;
        pub fn ups_env_create_db(
            env: EnvPtr,
            db: *mut DbPtr,
            name: u16,
            flags: u32,
            params: *const RawParameter,
        ) -> c_int;
        pub fn ups_env_open_db(
            env: EnvPtr,
            db: *mut DbPtr,
            name: u16,
            flags: u32,
            params: *const RawParameter,
        ) -> c_int;
        pub fn ups_env_rename_db(env: EnvPtr, oldname: u16, newname: u16, flags: u32) -> c_int;
        pub fn ups_env_erase_db(env: EnvPtr, name: u16, flags: u32) -> c_int;
        pub fn ups_env_flush(env: EnvPtr, flags: u32) -> c_int;
        pub fn ups_env_get_database_names(env: EnvPtr, names: *mut u16, length: *mut u32) -> c_int;
        pub fn ups_env_close(env: EnvPtr, flags: u32) -> c_int;

        pub fn ups_txn_begin(
            txn: *mut TxnPtr,
            env: EnvPtr,
            name: *const c_char,
            reserved: *mut c_void,
            flags: u32,
        ) -> c_int;
        pub fn ups_txn_commit(txn: TxnPtr, flags: u32) -> c_int;
        pub fn ups_txn_abort(txn: TxnPtr, flags: u32) -> c_int;

        pub fn ups_db_find(
            db: DbPtr,
            txn: TxnPtr,
            key: *mut RawKey,
            record: *mut RawRecord,
            flags: u32,
        ) -> c_int;
        pub fn ups_db_insert(
            db: DbPtr,
            txn: TxnPtr,
            key: *mut RawKey,
            record: *mut RawRecord,
            flags: u32,
        ) -> c_int;
        pub fn ups_db_erase(db: DbPtr, txn: TxnPtr, key: *mut RawKey, flags: u32) -> c_int;
        pub fn ups_db_count(db: DbPtr, txn: TxnPtr, flags: u32, count: *mut u64) -> c_int;
        pub fn ups_db_get_parameters(db: DbPtr, params: *mut RawParameter) -> c_int;
        pub fn ups_db_bulk_operations(
            db: DbPtr,
            txn: TxnPtr,
            operations: *mut RawOperation,
            operations_length: size_t,
            flags: u32,
        ) -> c_int;
        pub fn ups_db_close(db: DbPtr, flags: u32) -> c_int;

        pub fn ups_cursor_create(cursor: *mut CursorPtr, db: DbPtr, txn: TxnPtr, flags: u32) -> c_int;
        pub fn ups_cursor_clone(src: CursorPtr, dest: *mut CursorPtr) -> c_int;
        pub fn ups_cursor_move(
            cursor: CursorPtr,
            key: *mut RawKey,
            record: *mut RawRecord,
            flags: u32,
        ) -> c_int;
        pub fn ups_cursor_overwrite(cursor: CursorPtr, record: *mut RawRecord, flags: u32) -> c_int;
        pub fn ups_cursor_find(
            cursor: CursorPtr,
            key: *mut RawKey,
            record: *mut RawRecord,
            flags: u32,
        ) -> c_int;
        pub fn ups_cursor_insert(
            cursor: CursorPtr,
            key: *mut RawKey,
            record: *mut RawRecord,
            flags: u32,
        ) -> c_int;
        pub fn ups_cursor_erase(cursor: CursorPtr, flags: u32) -> c_int;
        pub fn ups_cursor_get_duplicate_count(cursor: CursorPtr, count: *mut u32, flags: u32) -> c_int;
        pub fn ups_cursor_close(cursor: CursorPtr) -> c_int;

        pub fn uqi_select_range(
            env: EnvPtr,
            query: *const c_char,
            begin: CursorPtr,
            end: CursorPtr,
            result: *mut ResultPtr,
        ) -> c_int;
        pub fn uqi_result_get_row_count(result: ResultPtr) -> u32;
        pub fn uqi_result_get_key_type(result: ResultPtr) -> u32;
        pub fn uqi_result_get_record_type(result: ResultPtr) -> u32;
        pub fn uqi_result_get_key(result: ResultPtr, row: u32, key: *mut RawKey);
        pub fn uqi_result_get_record(result: ResultPtr, row: u32, record: *mut RawRecord);
        pub fn uqi_result_close(result: ResultPtr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::{offset_of, size_of};

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn layouts_match_the_c_headers() {
        assert_eq!(size_of::<RawKey>(), 24);
        assert_eq!(offset_of!(RawKey, data), 8);
        assert_eq!(offset_of!(RawKey, flags), 16);

        assert_eq!(size_of::<RawRecord>(), 24);
        assert_eq!(offset_of!(RawRecord, data), 8);
        assert_eq!(offset_of!(RawRecord, flags), 16);

        assert_eq!(size_of::<RawOperation>(), 64);
        assert_eq!(offset_of!(RawOperation, key), 8);
        assert_eq!(offset_of!(RawOperation, record), 32);
        assert_eq!(offset_of!(RawOperation, flags), 56);
        assert_eq!(offset_of!(RawOperation, result), 60);

        assert_eq!(size_of::<RawParameter>(), 16);
    }

    #[test]
    fn fresh_descriptors_are_null() {
        let op = RawOperation::new(crate::constants::OP_FIND, 0);
        assert!(op.key.data.is_null());
        assert!(op.record.data.is_null());
        assert_eq!(op.result, 0);
    }
}
