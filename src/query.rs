//! Results of range queries (`uqi_select_range`)

use log::trace;

use crate::env::Environment;
use crate::error::{Error, Result, Status};
use crate::ffi::{RawKey, RawRecord, ResultPtr};
use crate::value::{copy_key, copy_record};

/// Rows produced by [`Environment::select_range`].
///
/// Keys and records are copied out of the engine row by row. An aggregate
/// query such as `COUNT($key) FROM DATABASE 1` yields a single row whose
/// record holds the value, typed by [`QueryResult::record_type`].
pub struct QueryResult<'env> {
    env: &'env Environment,
    handle: ResultPtr,
    closed: bool,
}

unsafe impl Send for QueryResult<'_> {}

impl<'env> QueryResult<'env> {
    pub(crate) fn from_handle(env: &'env Environment, handle: ResultPtr) -> Self {
        QueryResult {
            env,
            handle,
            closed: false,
        }
    }

    pub fn row_count(&self) -> u32 {
        let _guard = self.env.lock();
        unsafe { self.env.engine().result_get_row_count(self.handle) }
    }

    /// One of the `TYPE_*` constants
    pub fn key_type(&self) -> u32 {
        let _guard = self.env.lock();
        unsafe { self.env.engine().result_get_key_type(self.handle) }
    }

    /// One of the `TYPE_*` constants
    pub fn record_type(&self) -> u32 {
        let _guard = self.env.lock();
        unsafe { self.env.engine().result_get_record_type(self.handle) }
    }

    pub fn key(&self, row: u32) -> Result<Vec<u8>> {
        let _guard = self.env.lock();
        self.check_row(row)?;
        let mut key = RawKey::default();
        unsafe {
            self.env.engine().result_get_key(self.handle, row, &mut key);
            Ok(copy_key(&key))
        }
    }

    pub fn record(&self, row: u32) -> Result<Vec<u8>> {
        let _guard = self.env.lock();
        self.check_row(row)?;
        let mut record = RawRecord::default();
        unsafe {
            self.env.engine().result_get_record(self.handle, row, &mut record);
            Ok(copy_record(&record))
        }
    }

    // Caller holds the environment lock.
    fn check_row(&self, row: u32) -> Result<()> {
        let rows = unsafe { self.env.engine().result_get_row_count(self.handle) };
        if row >= rows {
            return Err(Error::Engine(Status::InvParameter));
        }
        Ok(())
    }

    pub fn close(mut self) {
        self.close_raw();
    }

    fn close_raw(&mut self) {
        let _guard = self.env.lock();
        unsafe { self.env.engine().result_close(self.handle) };
        self.closed = true;
        trace!("closed query result");
    }
}

impl Drop for QueryResult<'_> {
    fn drop(&mut self) {
        if !self.closed {
            self.close_raw();
        }
    }
}
