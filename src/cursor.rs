use log::warn;
use std::ptr;

use crate::constants::{CursorMove, FindFlags, InsertFlags};
use crate::database::Database;
use crate::env::Environment;
use crate::error::{IntoResult, Result, Status};
use crate::ffi::{CursorPtr, RawKey, RawRecord};
use crate::transaction::{txn_handle, Transaction};
use crate::value::{copy_key, copy_record, PinSet};

/// A position in a database.
///
/// The cursor borrows its database, and its transaction if it has one, so
/// both outlive it.
pub struct Cursor<'db> {
    env: &'db Environment,
    handle: CursorPtr,
    closed: bool,
}

unsafe impl Send for Cursor<'_> {}

impl<'db> Cursor<'db> {
    pub fn create(db: &'db Database<'_>, txn: Option<&'db Transaction<'_>>, flags: u32) -> Result<Self> {
        let env = db.env();
        let mut handle: CursorPtr = ptr::null_mut();
        let _guard = env.lock();
        unsafe {
            env.engine()
                .cursor_create(&mut handle, db.handle(), txn_handle(txn), flags)
                .into_result()?;
        }
        Ok(Cursor {
            env,
            handle,
            closed: false,
        })
    }

    pub(crate) fn handle(&self) -> CursorPtr {
        self.handle
    }

    /// New cursor at the same position
    pub fn try_clone(&self) -> Result<Cursor<'db>> {
        let mut handle: CursorPtr = ptr::null_mut();
        let _guard = self.env.lock();
        unsafe { self.env.engine().cursor_clone(self.handle, &mut handle) }.into_result()?;
        Ok(Cursor {
            env: self.env,
            handle,
            closed: false,
        })
    }

    /// Moves the cursor and returns the key and record it lands on
    pub fn move_to(&mut self, flags: CursorMove) -> Result<(Vec<u8>, Vec<u8>)> {
        let mut key = RawKey::default();
        let mut record = RawRecord::default();
        let _guard = self.env.lock();
        unsafe {
            self.env
                .engine()
                .cursor_move(self.handle, &mut key, &mut record, flags.bits())
                .into_result()?;
            Ok((copy_key(&key), copy_record(&record)))
        }
    }

    pub fn first(&mut self) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        self.step(CursorMove::FIRST)
    }

    pub fn last(&mut self) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        self.step(CursorMove::LAST)
    }

    pub fn next(&mut self) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        self.step(CursorMove::NEXT)
    }

    pub fn previous(&mut self) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        self.step(CursorMove::PREVIOUS)
    }

    // Running off either end is not an error for iteration
    fn step(&mut self, flags: CursorMove) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        match self.move_to(flags) {
            Ok(entry) => Ok(Some(entry)),
            Err(err) if err.status() == Some(Status::KeyNotFound) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Key at the current position
    pub fn key(&self) -> Result<Vec<u8>> {
        let mut key = RawKey::default();
        let _guard = self.env.lock();
        unsafe {
            self.env
                .engine()
                .cursor_move(self.handle, &mut key, ptr::null_mut(), 0)
                .into_result()?;
            Ok(copy_key(&key))
        }
    }

    /// Record at the current position
    pub fn record(&self) -> Result<Vec<u8>> {
        let mut record = RawRecord::default();
        let _guard = self.env.lock();
        unsafe {
            self.env
                .engine()
                .cursor_move(self.handle, ptr::null_mut(), &mut record, 0)
                .into_result()?;
            Ok(copy_record(&record))
        }
    }

    /// Positions the cursor on `key` and returns its record
    pub fn find(&mut self, key: &[u8]) -> Result<Vec<u8>> {
        self.find_approx(key, FindFlags::empty())
            .map(|(_, record)| record)
    }

    /// Positions the cursor on the key matching `key` under `flags` and
    /// returns that key with its record
    pub fn find_approx(&mut self, key: &[u8], flags: FindFlags) -> Result<(Vec<u8>, Vec<u8>)> {
        let mut pins = PinSet::new();
        let mut raw_key = pins.key(key)?;
        let mut raw_record = RawRecord::default();

        let _guard = self.env.lock();
        unsafe {
            self.env
                .engine()
                .cursor_find(self.handle, &mut raw_key, &mut raw_record, flags.bits())
                .into_result()?;
            let matched = if flags.is_approximate() {
                copy_key(&raw_key)
            } else {
                key.to_vec()
            };
            Ok((matched, copy_record(&raw_record)))
        }
    }

    /// Inserts through the cursor and leaves it on the new entry
    pub fn insert(&mut self, key: &[u8], record: &[u8], flags: InsertFlags) -> Result<()> {
        let mut pins = PinSet::new();
        let mut raw_key = pins.key(key)?;
        let mut raw_record = pins.record(record)?;

        let _guard = self.env.lock();
        unsafe {
            self.env
                .engine()
                .cursor_insert(self.handle, &mut raw_key, &mut raw_record, flags.bits())
                .into_result()
        }
    }

    /// Replaces the record at the current position
    pub fn overwrite(&mut self, record: &[u8]) -> Result<()> {
        let mut pins = PinSet::new();
        let mut raw_record = pins.record(record)?;

        let _guard = self.env.lock();
        unsafe {
            self.env
                .engine()
                .cursor_overwrite(self.handle, &mut raw_record, 0)
                .into_result()
        }
    }

    /// Erases the entry at the current position; the cursor becomes nil
    pub fn erase(&mut self) -> Result<()> {
        let _guard = self.env.lock();
        unsafe { self.env.engine().cursor_erase(self.handle, 0) }.into_result()
    }

    /// Number of records stored under the current key
    pub fn duplicate_count(&self) -> Result<u32> {
        let mut count = 0u32;
        let _guard = self.env.lock();
        unsafe {
            self.env
                .engine()
                .cursor_get_duplicate_count(self.handle, &mut count, 0)
                .into_result()?;
        }
        Ok(count)
    }

    pub fn close(mut self) -> Result<()> {
        self.close_raw()
    }

    fn close_raw(&mut self) -> Result<()> {
        let _guard = self.env.lock();
        unsafe { self.env.engine().cursor_close(self.handle) }.into_result()?;
        self.closed = true;
        Ok(())
    }
}

impl Drop for Cursor<'_> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Err(err) = self.close_raw() {
            warn!("failed to close cursor on drop: {}", err);
        }
    }
}
