//! The seam between the binding and a storage engine
//!
//! Every method mirrors one C entry point of upscaledb and keeps its calling
//! contract: handles are opaque pointers, outputs are written through raw
//! pointers, and memory the engine hands back in a key or record descriptor
//! stays valid only until the next call on the same handle.

use std::sync::Arc;

use libc::{c_char, c_int, c_void};

use crate::ffi::{
    CursorPtr, DbPtr, EnvPtr, RawKey, RawOperation, RawParameter, RawRecord, ResultPtr, TxnPtr,
};

/// A storage engine speaking the upscaledb C contract.
///
/// Callers of the unsafe methods must pass handles obtained from the same
/// engine that have not been closed, descriptor pointers that are valid for
/// reads and writes for the duration of the call, and parameter lists
/// terminated by a zero name.
///
/// # Safety
///
/// The safe wrappers build slices from what an engine writes back, so an
/// implementation must uphold the following:
///
/// - a non-null `data` pointer written into a key or record descriptor is
///   valid for reads of `size` bytes until the next call on the same
///   database, cursor or result handle, or until that handle is closed
/// - `strerror` returns a pointer to a NUL-terminated string with static
///   lifetime
/// - caller pointers are not retained past the return of a call
/// - calls on handles of different environments may run concurrently and
///   must not invalidate each other's returned memory
pub unsafe trait Engine: Send + Sync {
    /// Static description of a status code
    fn strerror(&self, status: c_int) -> *const c_char;

    fn get_version(&self, major: &mut u32, minor: &mut u32, revision: &mut u32);

    unsafe fn env_create(
        &self,
        env: *mut EnvPtr,
        filename: *const c_char,
        flags: u32,
        mode: u32,
        params: *const RawParameter,
    ) -> c_int;

    unsafe fn env_open(
        &self,
        env: *mut EnvPtr,
        filename: *const c_char,
        flags: u32,
        params: *const RawParameter,
    ) -> c_int;

    unsafe fn env_create_db(
        &self,
        env: EnvPtr,
        db: *mut DbPtr,
        name: u16,
        flags: u32,
        params: *const RawParameter,
    ) -> c_int;

    unsafe fn env_open_db(
        &self,
        env: EnvPtr,
        db: *mut DbPtr,
        name: u16,
        flags: u32,
        params: *const RawParameter,
    ) -> c_int;

    unsafe fn env_rename_db(&self, env: EnvPtr, oldname: u16, newname: u16, flags: u32) -> c_int;

    unsafe fn env_erase_db(&self, env: EnvPtr, name: u16, flags: u32) -> c_int;

    unsafe fn env_flush(&self, env: EnvPtr, flags: u32) -> c_int;

    /// On entry `length` holds the capacity of `names`; on success it holds
    /// the number of names written.
    unsafe fn env_get_database_names(&self, env: EnvPtr, names: *mut u16, length: *mut u32) -> c_int;

    unsafe fn env_close(&self, env: EnvPtr, flags: u32) -> c_int;

    unsafe fn txn_begin(
        &self,
        txn: *mut TxnPtr,
        env: EnvPtr,
        name: *const c_char,
        reserved: *mut c_void,
        flags: u32,
    ) -> c_int;

    unsafe fn txn_commit(&self, txn: TxnPtr, flags: u32) -> c_int;

    unsafe fn txn_abort(&self, txn: TxnPtr, flags: u32) -> c_int;

    unsafe fn db_find(
        &self,
        db: DbPtr,
        txn: TxnPtr,
        key: *mut RawKey,
        record: *mut RawRecord,
        flags: u32,
    ) -> c_int;

    unsafe fn db_insert(
        &self,
        db: DbPtr,
        txn: TxnPtr,
        key: *mut RawKey,
        record: *mut RawRecord,
        flags: u32,
    ) -> c_int;

    unsafe fn db_erase(&self, db: DbPtr, txn: TxnPtr, key: *mut RawKey, flags: u32) -> c_int;

    unsafe fn db_count(&self, db: DbPtr, txn: TxnPtr, flags: u32, count: *mut u64) -> c_int;

    /// Fills the `value` of every entry of a zero-terminated list
    unsafe fn db_get_parameters(&self, db: DbPtr, params: *mut RawParameter) -> c_int;

    /// Applies `len` operations in order, filling each `result` field
    unsafe fn db_bulk_operations(
        &self,
        db: DbPtr,
        txn: TxnPtr,
        operations: *mut RawOperation,
        len: usize,
        flags: u32,
    ) -> c_int;

    unsafe fn db_close(&self, db: DbPtr, flags: u32) -> c_int;

    unsafe fn cursor_create(&self, cursor: *mut CursorPtr, db: DbPtr, txn: TxnPtr, flags: u32) -> c_int;

    unsafe fn cursor_clone(&self, src: CursorPtr, dest: *mut CursorPtr) -> c_int;

    /// Either descriptor may be null when the caller does not want it
    unsafe fn cursor_move(
        &self,
        cursor: CursorPtr,
        key: *mut RawKey,
        record: *mut RawRecord,
        flags: u32,
    ) -> c_int;

    unsafe fn cursor_overwrite(&self, cursor: CursorPtr, record: *mut RawRecord, flags: u32) -> c_int;

    unsafe fn cursor_find(
        &self,
        cursor: CursorPtr,
        key: *mut RawKey,
        record: *mut RawRecord,
        flags: u32,
    ) -> c_int;

    unsafe fn cursor_insert(
        &self,
        cursor: CursorPtr,
        key: *mut RawKey,
        record: *mut RawRecord,
        flags: u32,
    ) -> c_int;

    unsafe fn cursor_erase(&self, cursor: CursorPtr, flags: u32) -> c_int;

    unsafe fn cursor_get_duplicate_count(&self, cursor: CursorPtr, count: *mut u32, flags: u32) -> c_int;

    unsafe fn cursor_close(&self, cursor: CursorPtr) -> c_int;

    unsafe fn select_range(
        &self,
        env: EnvPtr,
        query: *const c_char,
        begin: CursorPtr,
        end: CursorPtr,
        result: *mut ResultPtr,
    ) -> c_int;

    unsafe fn result_get_row_count(&self, result: ResultPtr) -> u32;

    unsafe fn result_get_key_type(&self, result: ResultPtr) -> u32;

    unsafe fn result_get_record_type(&self, result: ResultPtr) -> u32;

    unsafe fn result_get_key(&self, result: ResultPtr, row: u32, key: *mut RawKey);

    unsafe fn result_get_record(&self, result: ResultPtr, row: u32, record: *mut RawRecord);

    unsafe fn result_close(&self, result: ResultPtr);
}

/// Engine used by environments that are not given one: the linked library
/// with the `native` feature, the shared in-process engine otherwise.
pub fn default_engine() -> Arc<dyn Engine> {
    #[cfg(feature = "native")]
    {
        NativeEngine::shared()
    }
    #[cfg(not(feature = "native"))]
    {
        crate::memory::MemoryEngine::shared()
    }
}

/// Forwards every call to the linked upscaledb library
#[cfg(feature = "native")]
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeEngine;

#[cfg(feature = "native")]
impl NativeEngine {
    /// Process-wide instance, shared by every environment that does not
    /// bring its own engine.
    pub fn shared() -> Arc<dyn Engine> {
        static SHARED: once_cell::sync::Lazy<Arc<NativeEngine>> =
            once_cell::sync::Lazy::new(|| Arc::new(NativeEngine));
        SHARED.clone()
    }
}

#[cfg(feature = "native")]
unsafe impl Engine for NativeEngine {
    fn strerror(&self, status: c_int) -> *const c_char {
        unsafe { crate::ffi::sys::ups_strerror(status) }
    }

    fn get_version(&self, major: &mut u32, minor: &mut u32, revision: &mut u32) {
        unsafe { crate::ffi::sys::ups_get_version(major, minor, revision) }
    }

    unsafe fn env_create(
        &self,
        env: *mut EnvPtr,
        filename: *const c_char,
        flags: u32,
        mode: u32,
        params: *const RawParameter,
    ) -> c_int {
        crate::ffi::sys::ups_env_create(env, filename, flags, mode, params)
    }

    unsafe fn env_open(
        &self,
        env: *mut EnvPtr,
        filename: *const c_char,
        flags: u32,
        params: *const RawParameter,
    ) -> c_int {
        crate::ffi::sys::ups_env_open(env, filename, flags, params)
    }

    unsafe fn env_create_db(
        &self,
        env: EnvPtr,
        db: *mut DbPtr,
        name: u16,
        flags: u32,
        params: *const RawParameter,
    ) -> c_int {
        crate::ffi::sys::ups_env_create_db(env, db, name, flags, params)
    }

    unsafe fn env_open_db(
        &self,
        env: EnvPtr,
        db: *mut DbPtr,
        name: u16,
        flags: u32,
        params: *const RawParameter,
    ) -> c_int {
        crate::ffi::sys::ups_env_open_db(env, db, name, flags, params)
    }

    unsafe fn env_rename_db(&self, env: EnvPtr, oldname: u16, newname: u16, flags: u32) -> c_int {
        crate::ffi::sys::ups_env_rename_db(env, oldname, newname, flags)
    }

    unsafe fn env_erase_db(&self, env: EnvPtr, name: u16, flags: u32) -> c_int {
        crate::ffi::sys::ups_env_erase_db(env, name, flags)
    }

    unsafe fn env_flush(&self, env: EnvPtr, flags: u32) -> c_int {
        crate::ffi::sys::ups_env_flush(env, flags)
    }

    unsafe fn env_get_database_names(&self, env: EnvPtr, names: *mut u16, length: *mut u32) -> c_int {
        crate::ffi::sys::ups_env_get_database_names(env, names, length)
    }

    unsafe fn env_close(&self, env: EnvPtr, flags: u32) -> c_int {
        crate::ffi::sys::ups_env_close(env, flags)
    }

    unsafe fn txn_begin(
        &self,
        txn: *mut TxnPtr,
        env: EnvPtr,
        name: *const c_char,
        reserved: *mut c_void,
        flags: u32,
    ) -> c_int {
        crate::ffi::sys::ups_txn_begin(txn, env, name, reserved, flags)
    }

    unsafe fn txn_commit(&self, txn: TxnPtr, flags: u32) -> c_int {
        crate::ffi::sys::ups_txn_commit(txn, flags)
    }

    unsafe fn txn_abort(&self, txn: TxnPtr, flags: u32) -> c_int {
        crate::ffi::sys::ups_txn_abort(txn, flags)
    }

    unsafe fn db_find(
        &self,
        db: DbPtr,
        txn: TxnPtr,
        key: *mut RawKey,
        record: *mut RawRecord,
        flags: u32,
    ) -> c_int {
        crate::ffi::sys::ups_db_find(db, txn, key, record, flags)
    }

    unsafe fn db_insert(
        &self,
        db: DbPtr,
        txn: TxnPtr,
        key: *mut RawKey,
        record: *mut RawRecord,
        flags: u32,
    ) -> c_int {
        crate::ffi::sys::ups_db_insert(db, txn, key, record, flags)
    }

    unsafe fn db_erase(&self, db: DbPtr, txn: TxnPtr, key: *mut RawKey, flags: u32) -> c_int {
        crate::ffi::sys::ups_db_erase(db, txn, key, flags)
    }

    unsafe fn db_count(&self, db: DbPtr, txn: TxnPtr, flags: u32, count: *mut u64) -> c_int {
        crate::ffi::sys::ups_db_count(db, txn, flags, count)
    }

    unsafe fn db_get_parameters(&self, db: DbPtr, params: *mut RawParameter) -> c_int {
        crate::ffi::sys::ups_db_get_parameters(db, params)
    }

    unsafe fn db_bulk_operations(
        &self,
        db: DbPtr,
        txn: TxnPtr,
        operations: *mut RawOperation,
        len: usize,
        flags: u32,
    ) -> c_int {
        crate::ffi::sys::ups_db_bulk_operations(db, txn, operations, len, flags)
    }

    unsafe fn db_close(&self, db: DbPtr, flags: u32) -> c_int {
        crate::ffi::sys::ups_db_close(db, flags)
    }

    unsafe fn cursor_create(&self, cursor: *mut CursorPtr, db: DbPtr, txn: TxnPtr, flags: u32) -> c_int {
        crate::ffi::sys::ups_cursor_create(cursor, db, txn, flags)
    }

    unsafe fn cursor_clone(&self, src: CursorPtr, dest: *mut CursorPtr) -> c_int {
        crate::ffi::sys::ups_cursor_clone(src, dest)
    }

    unsafe fn cursor_move(
        &self,
        cursor: CursorPtr,
        key: *mut RawKey,
        record: *mut RawRecord,
        flags: u32,
    ) -> c_int {
        crate::ffi::sys::ups_cursor_move(cursor, key, record, flags)
    }

    unsafe fn cursor_overwrite(&self, cursor: CursorPtr, record: *mut RawRecord, flags: u32) -> c_int {
        crate::ffi::sys::ups_cursor_overwrite(cursor, record, flags)
    }

    unsafe fn cursor_find(
        &self,
        cursor: CursorPtr,
        key: *mut RawKey,
        record: *mut RawRecord,
        flags: u32,
    ) -> c_int {
        crate::ffi::sys::ups_cursor_find(cursor, key, record, flags)
    }

    unsafe fn cursor_insert(
        &self,
        cursor: CursorPtr,
        key: *mut RawKey,
        record: *mut RawRecord,
        flags: u32,
    ) -> c_int {
        crate::ffi::sys::ups_cursor_insert(cursor, key, record, flags)
    }

    unsafe fn cursor_erase(&self, cursor: CursorPtr, flags: u32) -> c_int {
        crate::ffi::sys::ups_cursor_erase(cursor, flags)
    }

    unsafe fn cursor_get_duplicate_count(&self, cursor: CursorPtr, count: *mut u32, flags: u32) -> c_int {
        crate::ffi::sys::ups_cursor_get_duplicate_count(cursor, count, flags)
    }

    unsafe fn cursor_close(&self, cursor: CursorPtr) -> c_int {
        crate::ffi::sys::ups_cursor_close(cursor)
    }

    unsafe fn select_range(
        &self,
        env: EnvPtr,
        query: *const c_char,
        begin: CursorPtr,
        end: CursorPtr,
        result: *mut ResultPtr,
    ) -> c_int {
        crate::ffi::sys::uqi_select_range(env, query, begin, end, result)
    }

    unsafe fn result_get_row_count(&self, result: ResultPtr) -> u32 {
        crate::ffi::sys::uqi_result_get_row_count(result)
    }

    unsafe fn result_get_key_type(&self, result: ResultPtr) -> u32 {
        crate::ffi::sys::uqi_result_get_key_type(result)
    }

    unsafe fn result_get_record_type(&self, result: ResultPtr) -> u32 {
        crate::ffi::sys::uqi_result_get_record_type(result)
    }

    unsafe fn result_get_key(&self, result: ResultPtr, row: u32, key: *mut RawKey) {
        crate::ffi::sys::uqi_result_get_key(result, row, key)
    }

    unsafe fn result_get_record(&self, result: ResultPtr, row: u32, record: *mut RawRecord) {
        crate::ffi::sys::uqi_result_get_record(result, row, record)
    }

    unsafe fn result_close(&self, result: ResultPtr) {
        crate::ffi::sys::uqi_result_close(result)
    }
}
