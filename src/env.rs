use lazy_static::lazy_static;
use libc::c_char;
use log::{debug, warn};
use parking_lot::{Mutex, MutexGuard};
use std::ffi::{CStr, CString};
use std::path::Path;
use std::ptr;
use std::sync::Arc;

use crate::constants::{CloseFlags, DbFlags, EnvFlags, TxnFlags, DEFAULT_FILE_MODE};
use crate::cursor::Cursor;
use crate::database::Database;
use crate::engine::{default_engine, Engine};
use crate::error::{Error, IntoResult, Result, Status};
use crate::ffi::{CursorPtr, DbPtr, EnvPtr};
use crate::query::QueryResult;
use crate::transaction::Transaction;
use crate::types::{self, raw_parameters, Parameter, Version};

lazy_static! {
    /// Flags the engine only accepts when an environment is created
    static ref CREATE_ONLY: EnvFlags = EnvFlags::IN_MEMORY;
    /// Flags the engine only accepts when an existing environment is opened
    static ref OPEN_ONLY: EnvFlags = EnvFlags::READ_ONLY | EnvFlags::AUTO_RECOVERY;
}

/// Initial capacity when listing database names
const NAME_BATCH: usize = 64;

/// Settings for creating or opening an environment
#[derive(Clone)]
pub struct EnvironmentBuilder {
    engine: Option<Arc<dyn Engine>>,
    flags: EnvFlags,
    mode: u32,
    params: Vec<Parameter>,
}

impl Default for EnvironmentBuilder {
    fn default() -> Self {
        EnvironmentBuilder {
            engine: None,
            flags: EnvFlags::empty(),
            mode: DEFAULT_FILE_MODE,
            params: Vec::new(),
        }
    }
}

impl EnvironmentBuilder {
    pub fn new() -> Self {
        EnvironmentBuilder::default()
    }

    /// Engine to run against instead of the default one
    pub fn engine(mut self, engine: Arc<dyn Engine>) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn flags(mut self, flags: EnvFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Unix file mode of a newly created file
    pub fn mode(mut self, mode: u32) -> Self {
        self.mode = mode;
        self
    }

    pub fn parameter(mut self, name: u32, value: u64) -> Self {
        self.params.push(Parameter::new(name, value));
        self
    }

    /// Creates a new environment at `path`, replacing any existing one
    pub fn create<P: AsRef<Path>>(self, path: P) -> Result<Environment> {
        let filename = path_to_cstring(path.as_ref())?;
        self.create_raw(Some(filename))
    }

    /// Creates an environment that lives only in memory
    pub fn create_in_memory(mut self) -> Result<Environment> {
        self.flags |= EnvFlags::IN_MEMORY;
        self.create_raw(None)
    }

    fn create_raw(self, filename: Option<CString>) -> Result<Environment> {
        if self.flags.intersects(*OPEN_ONLY) {
            return Err(Status::InvParameter.into());
        }
        let engine = self.engine.unwrap_or_else(default_engine);
        let params = raw_parameters(&self.params);
        let name = filename.as_ref().map_or(ptr::null(), |name| name.as_ptr());

        let mut handle: EnvPtr = ptr::null_mut();
        unsafe {
            engine
                .env_create(&mut handle, name, self.flags.bits(), self.mode, params.as_ptr())
                .into_result()?;
        }
        debug!("created environment {:?} with flags {:?}", filename, self.flags);
        Ok(Environment::from_handle(engine, handle, self.flags))
    }

    /// Opens an existing environment at `path`
    pub fn open<P: AsRef<Path>>(self, path: P) -> Result<Environment> {
        if self.flags.intersects(*CREATE_ONLY) {
            return Err(Status::InvParameter.into());
        }
        let filename = path_to_cstring(path.as_ref())?;
        let engine = self.engine.unwrap_or_else(default_engine);
        let params = raw_parameters(&self.params);

        let mut handle: EnvPtr = ptr::null_mut();
        unsafe {
            engine
                .env_open(&mut handle, filename.as_ptr(), self.flags.bits(), params.as_ptr())
                .into_result()?;
        }
        debug!("opened environment {:?} with flags {:?}", filename, self.flags);
        Ok(Environment::from_handle(engine, handle, self.flags))
    }
}

fn path_to_cstring(path: &Path) -> Result<CString> {
    let path = path.to_str().ok_or(Error::InvalidPath)?;
    Ok(CString::new(path)?)
}

/// An open environment.
///
/// Every call into the engine on behalf of this environment, or of the
/// databases, transactions and cursors opened from it, holds the
/// environment's lock.
pub struct Environment {
    engine: Arc<dyn Engine>,
    handle: EnvPtr,
    flags: EnvFlags,
    lock: Mutex<()>,
    closed: bool,
}

// The handle is only used while holding `lock`.
unsafe impl Send for Environment {}
unsafe impl Sync for Environment {}

impl Environment {
    pub fn builder() -> EnvironmentBuilder {
        EnvironmentBuilder::new()
    }

    /// Creates an environment at `path` with the default engine
    pub fn create<P: AsRef<Path>>(path: P, flags: EnvFlags) -> Result<Self> {
        EnvironmentBuilder::new().flags(flags).create(path)
    }

    /// Opens an environment at `path` with the default engine
    pub fn open<P: AsRef<Path>>(path: P, flags: EnvFlags) -> Result<Self> {
        EnvironmentBuilder::new().flags(flags).open(path)
    }

    fn from_handle(engine: Arc<dyn Engine>, handle: EnvPtr, flags: EnvFlags) -> Self {
        Environment {
            engine,
            handle,
            flags,
            lock: Mutex::new(()),
            closed: false,
        }
    }

    pub(crate) fn engine(&self) -> &dyn Engine {
        self.engine.as_ref()
    }

    pub(crate) fn handle(&self) -> EnvPtr {
        self.handle
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, ()> {
        self.lock.lock()
    }

    pub fn flags(&self) -> EnvFlags {
        self.flags
    }

    pub fn version(&self) -> Version {
        types::version(self.engine())
    }

    /// Creates database `name` and opens it
    pub fn create_db(&self, name: u16, flags: DbFlags, params: &[Parameter]) -> Result<Database<'_>> {
        let params = raw_parameters(params);
        let mut handle: DbPtr = ptr::null_mut();
        {
            let _guard = self.lock();
            unsafe {
                self.engine
                    .env_create_db(self.handle, &mut handle, name, flags.bits(), params.as_ptr())
                    .into_result()?;
            }
        }
        debug!("created database {} with flags {:?}", name, flags);
        Ok(Database::from_handle(self, handle, name))
    }

    pub fn open_db(&self, name: u16, flags: DbFlags) -> Result<Database<'_>> {
        let params = raw_parameters(&[]);
        let mut handle: DbPtr = ptr::null_mut();
        {
            let _guard = self.lock();
            unsafe {
                self.engine
                    .env_open_db(self.handle, &mut handle, name, flags.bits(), params.as_ptr())
                    .into_result()?;
            }
        }
        debug!("opened database {}", name);
        Ok(Database::from_handle(self, handle, name))
    }

    /// Renames a database that is not open
    pub fn rename_db(&self, old_name: u16, new_name: u16) -> Result<()> {
        let _guard = self.lock();
        unsafe { self.engine.env_rename_db(self.handle, old_name, new_name, 0) }.into_result()
    }

    /// Deletes a database that is not open, with all of its data
    pub fn erase_db(&self, name: u16) -> Result<()> {
        let _guard = self.lock();
        unsafe { self.engine.env_erase_db(self.handle, name, 0) }.into_result()
    }

    pub fn flush(&self) -> Result<()> {
        let _guard = self.lock();
        unsafe { self.engine.env_flush(self.handle, 0) }.into_result()
    }

    /// Names of all databases in the environment, in ascending order
    pub fn database_names(&self) -> Result<Vec<u16>> {
        let _guard = self.lock();
        let mut capacity = NAME_BATCH;
        loop {
            let mut names = vec![0u16; capacity];
            let mut length = capacity as u32;
            let status = Status::from(unsafe {
                self.engine
                    .env_get_database_names(self.handle, names.as_mut_ptr(), &mut length)
            });
            match status {
                Status::Success => {
                    names.truncate(length as usize);
                    return Ok(names);
                }
                Status::LimitsReached if capacity <= u16::MAX as usize => capacity *= 4,
                status => return Err(status.into()),
            }
        }
    }

    pub fn begin_txn(&self, flags: TxnFlags) -> Result<Transaction<'_>> {
        Transaction::begin(self, flags)
    }

    /// Runs a query over a database of this environment.
    ///
    /// `begin` and `end` restrict the scan to the keys from `begin`'s
    /// position up to, but not including, `end`'s position.
    pub fn select_range(
        &self,
        query: &str,
        begin: Option<&Cursor<'_>>,
        end: Option<&Cursor<'_>>,
    ) -> Result<QueryResult<'_>> {
        let query = CString::new(query)?;
        let cursor = |cursor: Option<&Cursor<'_>>| -> CursorPtr {
            cursor.map_or(ptr::null_mut(), |cursor| cursor.handle())
        };
        let mut result = ptr::null_mut();
        {
            let _guard = self.lock();
            unsafe {
                self.engine
                    .select_range(self.handle, query.as_ptr(), cursor(begin), cursor(end), &mut result)
                    .into_result()?;
            }
        }
        Ok(QueryResult::from_handle(self, result))
    }

    /// Message the engine associates with `status`
    pub fn describe(&self, status: Status) -> String {
        let message: *const c_char = self.engine.strerror(status.code());
        if message.is_null() {
            return String::new();
        }
        unsafe { CStr::from_ptr(message) }.to_string_lossy().into_owned()
    }

    /// Closes the environment.
    ///
    /// With `TXN_AUTO_ABORT` or `TXN_AUTO_COMMIT` pending transactions are
    /// finished by the engine; otherwise they make the call fail.
    pub fn close(mut self, flags: CloseFlags) -> Result<()> {
        self.close_raw(flags)
    }

    fn close_raw(&mut self, flags: CloseFlags) -> Result<()> {
        let _guard = self.lock.lock();
        unsafe { self.engine.env_close(self.handle, flags.bits()) }.into_result()?;
        self.closed = true;
        debug!("closed environment");
        Ok(())
    }
}

impl Drop for Environment {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Err(err) = self.close_raw(CloseFlags::AUTO_CLEANUP | CloseFlags::TXN_AUTO_ABORT) {
            warn!("failed to close environment on drop: {}", err);
        }
    }
}
