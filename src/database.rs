use log::{debug, warn};

use crate::constants::{CountFlags, EraseFlags, FindFlags, InsertFlags};
use crate::env::Environment;
use crate::error::{IntoResult, Result, Status};
use crate::ffi::{DbPtr, RawKey, RawRecord};
use crate::operation::{self, Operation};
use crate::transaction::{txn_handle, Transaction};
use crate::types::{raw_parameters, Parameter};
use crate::value::{copy_key, copy_record, PinSet};

/// An open database of an environment.
///
/// Every method takes an optional transaction; `None` runs the call outside
/// of any transaction.
pub struct Database<'env> {
    env: &'env Environment,
    handle: DbPtr,
    name: u16,
    closed: bool,
}

// Calls on the handle are serialized by the environment lock.
unsafe impl Send for Database<'_> {}
unsafe impl Sync for Database<'_> {}

impl<'env> Database<'env> {
    pub(crate) fn from_handle(env: &'env Environment, handle: DbPtr, name: u16) -> Self {
        Database {
            env,
            handle,
            name,
            closed: false,
        }
    }

    pub(crate) fn env(&self) -> &'env Environment {
        self.env
    }

    pub(crate) fn handle(&self) -> DbPtr {
        self.handle
    }

    pub fn name(&self) -> u16 {
        self.name
    }

    /// Record stored under `key`
    pub fn find(&self, txn: Option<&Transaction<'_>>, key: &[u8]) -> Result<Vec<u8>> {
        self.find_approx(txn, key, FindFlags::empty())
            .map(|(_, record)| record)
    }

    /// Looks `key` up with approximate matching and returns the key that
    /// matched together with its record.
    pub fn find_approx(
        &self,
        txn: Option<&Transaction<'_>>,
        key: &[u8],
        flags: FindFlags,
    ) -> Result<(Vec<u8>, Vec<u8>)> {
        let mut pins = PinSet::new();
        let mut raw_key = pins.key(key)?;
        let mut raw_record = RawRecord::default();

        let _guard = self.env.lock();
        unsafe {
            self.env
                .engine()
                .db_find(self.handle, txn_handle(txn), &mut raw_key, &mut raw_record, flags.bits())
                .into_result()?;
            let matched = if flags.is_approximate() {
                copy_key(&raw_key)
            } else {
                key.to_vec()
            };
            Ok((matched, copy_record(&raw_record)))
        }
    }

    pub fn insert(
        &self,
        txn: Option<&Transaction<'_>>,
        key: &[u8],
        record: &[u8],
        flags: InsertFlags,
    ) -> Result<()> {
        let mut pins = PinSet::new();
        let mut raw_key = pins.key(key)?;
        let mut raw_record = pins.record(record)?;

        let _guard = self.env.lock();
        unsafe {
            self.env
                .engine()
                .db_insert(self.handle, txn_handle(txn), &mut raw_key, &mut raw_record, flags.bits())
                .into_result()
        }
    }

    /// Inserts into a record-number database and returns the assigned key
    pub fn insert_recno(
        &self,
        txn: Option<&Transaction<'_>>,
        record: &[u8],
        flags: InsertFlags,
    ) -> Result<Vec<u8>> {
        let mut pins = PinSet::new();
        let mut raw_key = RawKey::default();
        let mut raw_record = pins.record(record)?;

        let _guard = self.env.lock();
        unsafe {
            self.env
                .engine()
                .db_insert(self.handle, txn_handle(txn), &mut raw_key, &mut raw_record, flags.bits())
                .into_result()?;
            Ok(copy_key(&raw_key))
        }
    }

    pub fn erase(&self, txn: Option<&Transaction<'_>>, key: &[u8], flags: EraseFlags) -> Result<()> {
        let mut pins = PinSet::new();
        let mut raw_key = pins.key(key)?;

        let _guard = self.env.lock();
        unsafe {
            self.env
                .engine()
                .db_erase(self.handle, txn_handle(txn), &mut raw_key, flags.bits())
                .into_result()
        }
    }

    /// Number of records, or of distinct keys with `SKIP_DUPLICATES`
    pub fn count(&self, txn: Option<&Transaction<'_>>, flags: CountFlags) -> Result<u64> {
        let mut count = 0u64;
        let _guard = self.env.lock();
        unsafe {
            self.env
                .engine()
                .db_count(self.handle, txn_handle(txn), flags.bits(), &mut count)
                .into_result()?;
        }
        Ok(count)
    }

    /// Current values of the parameters named in `names`, one of the
    /// `PARAM_*` constants each, in the same order.
    pub fn parameters(&self, names: &[u32]) -> Result<Vec<Parameter>> {
        if names.contains(&0) {
            return Err(Status::InvParameter.into());
        }
        let query: Vec<Parameter> = names.iter().map(|&name| Parameter::new(name, 0)).collect();
        let mut raw = raw_parameters(&query);
        {
            let _guard = self.env.lock();
            unsafe { self.env.engine().db_get_parameters(self.handle, raw.as_mut_ptr()) }
                .into_result()?;
        }
        Ok(raw[..names.len()]
            .iter()
            .map(|param| Parameter::new(param.name, param.value))
            .collect())
    }

    /// Runs a batch of operations in one engine call.
    ///
    /// See [`Operation`] for what each operation receives back. Per-operation
    /// failures are reported in [`Operation::result`] and do not fail the
    /// call.
    pub fn bulk_operations(
        &self,
        txn: Option<&Transaction<'_>>,
        operations: &mut [Operation],
        flags: u32,
    ) -> Result<()> {
        let _guard = self.env.lock();
        operation::bulk_operations(self.env.engine(), self.handle, txn_handle(txn), operations, flags)
    }

    pub fn close(mut self) -> Result<()> {
        self.close_raw()
    }

    fn close_raw(&mut self) -> Result<()> {
        let _guard = self.env.lock();
        unsafe { self.env.engine().db_close(self.handle, 0) }.into_result()?;
        self.closed = true;
        debug!("closed database {}", self.name);
        Ok(())
    }
}

impl Drop for Database<'_> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Err(err) = self.close_raw() {
            warn!("failed to close database {} on drop: {}", self.name, err);
        }
    }
}
