//! In-process engine
//!
//! `MemoryEngine` speaks the same C contract as the native library on top of
//! ordered maps. It exists so the binding can run without the native library,
//! in tests and in small embedded uses; it makes no attempt at the native
//! engine's storage format, caching or recovery.
//!
//! Data handed back through key and record descriptors lives in a scratch
//! arena owned by the database or cursor handle the call was made on. The
//! arena is recycled by the next call on that handle returning data, so
//! callers have to copy it out just as they would with the native engine.
//!
//! Transactions work on a snapshot of the environment. Committing replaces
//! the environment's contents with the snapshot, so writes made outside a
//! transaction while it is pending do not survive its commit.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::ffi::{CStr, CString};
use std::ops::Bound;
use std::slice;
use std::sync::Arc;

use libc::{c_char, c_int, c_void};
use log::debug;
use once_cell::sync::Lazy;
use parking_lot::Mutex;

use crate::constants::{
    CloseFlags, CountFlags, CursorMove, DbFlags, EnvFlags, FindFlags, InsertFlags, TxnFlags,
    KEY_SIZE_UNLIMITED, OP_ERASE, OP_FIND, OP_INSERT, PARAM_DATABASE_NAME, PARAM_FLAGS,
    PARAM_KEY_SIZE, PARAM_KEY_TYPE, PARAM_MAX_DATABASES, PARAM_RECORD_SIZE, PARAM_RECORD_TYPE,
    RECORD_SIZE_UNLIMITED, TYPE_BINARY, TYPE_UINT32, TYPE_UINT64,
};
use crate::engine::Engine;
use crate::error::Status;
use crate::ffi::{
    CursorPtr, DbPtr, EnvPtr, RawKey, RawOperation, RawParameter, RawRecord, ResultPtr, TxnPtr,
};

type Answer<T> = std::result::Result<T, Status>;

static MESSAGES: Lazy<HashMap<c_int, CString>> = Lazy::new(|| {
    Status::KNOWN
        .iter()
        .filter_map(|status| {
            CString::new(status.to_string())
                .ok()
                .map(|message| (status.code(), message))
        })
        .collect()
});

const UNKNOWN_MESSAGE: &CStr = c"Unknown error";

/// Database names at or above this value are reserved
const RESERVED_NAMES: u16 = 0xf000;

/// Database limit of an environment created without `PARAM_MAX_DATABASES`
const DEFAULT_MAX_DATABASES: usize = 512;

#[derive(Debug, Clone)]
struct Table {
    flags: u32,
    key_size: u64,
    key_type: u32,
    record_size: u64,
    record_type: u32,
    entries: BTreeMap<Vec<u8>, Vec<Vec<u8>>>,
    next_recno: u64,
}

type Position = (Vec<u8>, usize);

impl Table {
    fn new(flags: u32, params: &[RawParameter]) -> Answer<Self> {
        let mut table = Table {
            flags,
            key_size: KEY_SIZE_UNLIMITED,
            key_type: TYPE_BINARY,
            record_size: RECORD_SIZE_UNLIMITED,
            record_type: TYPE_BINARY,
            entries: BTreeMap::new(),
            next_recno: 0,
        };
        if let Some(width) = table.recno_width() {
            table.key_size = width as u64;
            table.key_type = if width == 4 { TYPE_UINT32 } else { TYPE_UINT64 };
        }
        let recno = table.recno_width().is_some();
        for param in params {
            match param.name {
                // Record-number keys have a fixed shape
                PARAM_KEY_SIZE | PARAM_KEY_TYPE if recno => {}
                PARAM_KEY_SIZE => table.key_size = param.value,
                PARAM_KEY_TYPE => table.key_type = param.value as u32,
                PARAM_RECORD_SIZE => table.record_size = param.value,
                PARAM_RECORD_TYPE => table.record_type = param.value as u32,
                _ => return Err(Status::InvParameter),
            }
        }
        Ok(table)
    }

    /// Value of a queryable per-database parameter
    fn parameter(&self, name: u32) -> Option<u64> {
        match name {
            PARAM_KEY_SIZE => Some(self.key_size),
            PARAM_KEY_TYPE => Some(self.key_type as u64),
            PARAM_RECORD_SIZE => Some(self.record_size),
            PARAM_RECORD_TYPE => Some(self.record_type as u64),
            _ => None,
        }
    }

    fn recno_width(&self) -> Option<usize> {
        if self.flags & DbFlags::RECORD_NUMBER32.bits() != 0 {
            Some(4)
        } else if self.flags & DbFlags::RECORD_NUMBER64.bits() != 0 {
            Some(8)
        } else {
            None
        }
    }

    fn allows_duplicates(&self) -> bool {
        self.flags & DbFlags::ENABLE_DUPLICATE_KEYS.bits() != 0
    }

    /// Key matched by a find with `flags`
    fn locate(&self, key: &[u8], flags: u32) -> Option<&Vec<u8>> {
        let lt = flags & FindFlags::LT_MATCH.bits() != 0;
        let gt = flags & FindFlags::GT_MATCH.bits() != 0;
        let exact = flags & FindFlags::EXACT_MATCH.bits() != 0 || !(lt || gt);

        if exact {
            if let Some((found, _)) = self.entries.get_key_value(key) {
                return Some(found);
            }
        }
        if lt {
            let below = self
                .entries
                .range::<[u8], _>((Bound::Unbounded, Bound::Excluded(key)))
                .next_back();
            if let Some((found, _)) = below {
                return Some(found);
            }
        }
        if gt {
            let above = self
                .entries
                .range::<[u8], _>((Bound::Excluded(key), Bound::Unbounded))
                .next();
            if let Some((found, _)) = above {
                return Some(found);
            }
        }
        None
    }

    fn find(&self, key: &[u8], flags: u32) -> Answer<(Vec<u8>, Vec<u8>)> {
        let matched = self.locate(key, flags).ok_or(Status::KeyNotFound)?;
        let record = self.entries[matched][0].clone();
        Ok((matched.clone(), record))
    }

    fn insert(&mut self, key: Option<&[u8]>, record: &[u8], flags: u32) -> Answer<Position> {
        let key = match (key, self.recno_width()) {
            (Some(key), None) => {
                if self.key_size != KEY_SIZE_UNLIMITED && key.len() as u64 != self.key_size {
                    return Err(Status::InvKeySize);
                }
                key.to_vec()
            }
            (None, None) => return Err(Status::InvParameter),
            (key, Some(width)) => match key.filter(|key| !key.is_empty()) {
                Some(key) if key.len() != width => return Err(Status::InvKeySize),
                Some(key) => {
                    let mut number = [0u8; 8];
                    number[..width].copy_from_slice(key);
                    self.next_recno = self.next_recno.max(u64::from_le_bytes(number));
                    key.to_vec()
                }
                None => {
                    self.next_recno += 1;
                    if width == 4 {
                        (self.next_recno as u32).to_le_bytes().to_vec()
                    } else {
                        self.next_recno.to_le_bytes().to_vec()
                    }
                }
            },
        };

        let duplicates = self.allows_duplicates();
        match self.entries.entry(key.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(vec![record.to_vec()]);
                Ok((key, 0))
            }
            Entry::Occupied(mut slot) => {
                let records = slot.get_mut();
                if flags & InsertFlags::OVERWRITE.bits() != 0 {
                    records[0] = record.to_vec();
                    Ok((key, 0))
                } else if duplicates && flags & InsertFlags::DUPLICATE.bits() != 0 {
                    if flags & InsertFlags::DUPLICATE_INSERT_FIRST.bits() != 0 {
                        records.insert(0, record.to_vec());
                        Ok((key, 0))
                    } else {
                        records.push(record.to_vec());
                        Ok((key, records.len() - 1))
                    }
                } else {
                    Err(Status::DuplicateKey)
                }
            }
        }
    }

    fn erase(&mut self, key: &[u8]) -> Answer<()> {
        self.entries
            .remove(key)
            .map(|_| ())
            .ok_or(Status::KeyNotFound)
    }

    fn count(&self, flags: u32) -> u64 {
        if flags & CountFlags::SKIP_DUPLICATES.bits() != 0 {
            self.entries.len() as u64
        } else {
            self.entries.values().map(|records| records.len() as u64).sum()
        }
    }

    fn record_at(&self, position: &Position) -> Option<&Vec<u8>> {
        self.entries
            .get(&position.0)
            .and_then(|records| records.get(position.1))
    }

    fn first(&self) -> Option<Position> {
        self.entries.keys().next().map(|key| (key.clone(), 0))
    }

    fn last(&self, skip_duplicates: bool) -> Option<Position> {
        self.entries.iter().next_back().map(|(key, records)| {
            let index = if skip_duplicates { 0 } else { records.len() - 1 };
            (key.clone(), index)
        })
    }

    fn next(&self, position: &Position, flags: u32) -> Option<Position> {
        let skip = flags & CursorMove::SKIP_DUPLICATES.bits() != 0;
        let only = flags & CursorMove::ONLY_DUPLICATES.bits() != 0;
        if !skip {
            if let Some(records) = self.entries.get(&position.0) {
                if position.1 + 1 < records.len() {
                    return Some((position.0.clone(), position.1 + 1));
                }
            }
        }
        if only {
            return None;
        }
        self.entries
            .range::<[u8], _>((Bound::Excluded(position.0.as_slice()), Bound::Unbounded))
            .next()
            .map(|(key, _)| (key.clone(), 0))
    }

    fn previous(&self, position: &Position, flags: u32) -> Option<Position> {
        let skip = flags & CursorMove::SKIP_DUPLICATES.bits() != 0;
        let only = flags & CursorMove::ONLY_DUPLICATES.bits() != 0;
        if !skip && position.1 > 0 && self.entries.contains_key(&position.0) {
            return Some((position.0.clone(), position.1 - 1));
        }
        if only {
            return None;
        }
        self.entries
            .range::<[u8], _>((Bound::Unbounded, Bound::Excluded(position.0.as_slice())))
            .next_back()
            .map(|(key, records)| {
                let index = if skip { 0 } else { records.len() - 1 };
                (key.clone(), index)
            })
    }
}

#[derive(Debug, Clone)]
struct Store {
    max_databases: usize,
    tables: BTreeMap<u16, Table>,
}

impl Store {
    fn new(max_databases: usize) -> Self {
        Store {
            max_databases,
            tables: BTreeMap::new(),
        }
    }
}

#[derive(Debug)]
struct Env {
    path: Option<String>,
    flags: u32,
    store: Store,
}

impl Env {
    fn persist(&self, files: &mut HashMap<String, Store>) {
        if let Some(path) = &self.path {
            if self.flags & EnvFlags::IN_MEMORY.bits() == 0 {
                files.insert(path.clone(), self.store.clone());
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Db {
    env: usize,
    name: u16,
    read_only: bool,
}

#[derive(Debug)]
struct Txn {
    env: usize,
    read_only: bool,
    store: Store,
}

#[derive(Debug, Clone)]
struct Cursor {
    db: usize,
    txn: usize,
    position: Option<Position>,
}

#[derive(Debug)]
struct Rows {
    key_type: u32,
    record_type: u32,
    rows: Vec<(Vec<u8>, Vec<u8>)>,
}

#[derive(Debug, Default)]
struct State {
    next_handle: usize,
    /// Contents of closed, file-backed environments by path
    files: HashMap<String, Store>,
    envs: HashMap<usize, Env>,
    dbs: HashMap<usize, Db>,
    txns: HashMap<usize, Txn>,
    cursors: HashMap<usize, Cursor>,
    results: HashMap<usize, Rows>,
    /// Memory lent out through descriptors, by the database or cursor handle
    /// whose last call returned it
    scratch: HashMap<usize, Vec<Box<[u8]>>>,
}

fn id(handle: *mut c_void) -> usize {
    handle as usize
}

fn handle(id: usize) -> *mut c_void {
    id as *mut c_void
}

fn code(answer: Answer<()>) -> c_int {
    match answer {
        Ok(()) => 0,
        Err(status) => status.code(),
    }
}

unsafe fn key_bytes(key: &RawKey) -> Option<Vec<u8>> {
    if key.data.is_null() {
        return None;
    }
    Some(slice::from_raw_parts(key.data as *const u8, key.size as usize).to_vec())
}

unsafe fn record_bytes(record: &RawRecord) -> Vec<u8> {
    if record.data.is_null() {
        return Vec::new();
    }
    slice::from_raw_parts(record.data as *const u8, record.size as usize).to_vec()
}

unsafe fn read_parameters(mut params: *const RawParameter) -> Vec<RawParameter> {
    let mut list = Vec::new();
    if params.is_null() {
        return list;
    }
    while (*params).name != 0 {
        list.push(*params);
        params = params.add(1);
    }
    list
}

unsafe fn read_path(filename: *const c_char) -> Answer<Option<String>> {
    if filename.is_null() {
        return Ok(None);
    }
    CStr::from_ptr(filename)
        .to_str()
        .map(|path| Some(path.to_owned()))
        .map_err(|_| Status::InvParameter)
}

impl State {
    fn allocate(&mut self) -> usize {
        self.next_handle += 1;
        self.next_handle
    }

    /// Frees what earlier calls on `owner` lent out
    fn recycle(&mut self, owner: usize) {
        if let Some(arena) = self.scratch.get_mut(&owner) {
            arena.clear();
        }
    }

    /// Drops the arenas of handles that no longer exist
    fn release_closed(&mut self) {
        let State {
            scratch, dbs, cursors, ..
        } = self;
        scratch.retain(|owner, _| dbs.contains_key(owner) || cursors.contains_key(owner));
    }

    fn lend(&mut self, owner: usize, bytes: &[u8]) -> *mut c_void {
        let mut copy: Box<[u8]> = bytes.into();
        let data = copy.as_mut_ptr() as *mut c_void;
        self.scratch.entry(owner).or_default().push(copy);
        data
    }

    unsafe fn lend_key(&mut self, owner: usize, key: *mut RawKey, bytes: &[u8]) {
        if let Some(key) = key.as_mut() {
            key.data = self.lend(owner, bytes);
            key.size = bytes.len() as u16;
        }
    }

    unsafe fn lend_record(&mut self, owner: usize, record: *mut RawRecord, bytes: &[u8]) {
        if let Some(record) = record.as_mut() {
            record.data = self.lend(owner, bytes);
            record.size = bytes.len() as u32;
        }
    }

    fn db(&self, db: usize) -> Answer<Db> {
        self.dbs.get(&db).copied().ok_or(Status::InvParameter)
    }

    fn table(&mut self, db: usize, txn: usize) -> Answer<&mut Table> {
        let Db { env, name, .. } = self.db(db)?;
        let store = if txn != 0 {
            let txn = self.txns.get_mut(&txn).ok_or(Status::InvParameter)?;
            if txn.env != env {
                return Err(Status::InvParameter);
            }
            &mut txn.store
        } else {
            &mut self.envs.get_mut(&env).ok_or(Status::InvParameter)?.store
        };
        store.tables.get_mut(&name).ok_or(Status::DatabaseNotFound)
    }

    fn writable(&self, db: usize, txn: usize) -> Answer<()> {
        let db = self.db(db)?;
        let env = self.envs.get(&db.env).ok_or(Status::InvParameter)?;
        let txn_read_only = self.txns.get(&txn).map_or(false, |txn| txn.read_only);
        if db.read_only || txn_read_only || env.flags & EnvFlags::READ_ONLY.bits() != 0 {
            return Err(Status::WriteProtected);
        }
        Ok(())
    }

    fn has_cursors(&self, filter: impl Fn(&Cursor) -> bool) -> bool {
        self.cursors.values().any(filter)
    }

    unsafe fn find(&mut self, db: usize, txn: usize, key: *mut RawKey, record: *mut RawRecord, flags: u32) -> Answer<()> {
        let wanted = key.as_ref().and_then(|key| key_bytes(key)).ok_or(Status::InvParameter)?;
        let (matched, found) = self.table(db, txn)?.find(&wanted, flags)?;
        self.lend_record(db, record, &found);
        if FindFlags::from_bits_retain(flags).is_approximate() {
            self.lend_key(db, key, &matched);
        }
        Ok(())
    }

    /// Inserts through `db`; an assigned key is lent out on behalf of `owner`
    unsafe fn insert(
        &mut self,
        owner: usize,
        db: usize,
        txn: usize,
        key: *mut RawKey,
        record: *const RawRecord,
        flags: u32,
    ) -> Answer<Position> {
        self.writable(db, txn)?;
        let supplied = key.as_ref().and_then(|key| key_bytes(key));
        let data = record.as_ref().map(|record| record_bytes(record)).unwrap_or_default();
        let position = self.table(db, txn)?.insert(supplied.as_deref(), &data, flags)?;
        if supplied.map_or(true, |key| key.is_empty()) {
            self.lend_key(owner, key, &position.0);
        }
        Ok(position)
    }

    unsafe fn erase(&mut self, db: usize, txn: usize, key: *const RawKey) -> Answer<()> {
        self.writable(db, txn)?;
        let wanted = key.as_ref().and_then(|key| key_bytes(key)).ok_or(Status::InvParameter)?;
        self.table(db, txn)?.erase(&wanted)
    }

    unsafe fn apply(&mut self, db: usize, txn: usize, operation: &mut RawOperation) -> Answer<()> {
        match operation.kind {
            OP_INSERT => self
                .insert(db, db, txn, &mut operation.key, &operation.record, operation.flags)
                .map(|_| ()),
            OP_FIND => self.find(db, txn, &mut operation.key, &mut operation.record, operation.flags),
            OP_ERASE => self.erase(db, txn, &operation.key),
            _ => Err(Status::InvParameter),
        }
    }

    fn cursor(&self, cursor: usize) -> Answer<Cursor> {
        self.cursors.get(&cursor).cloned().ok_or(Status::InvParameter)
    }

    fn cursor_position(&self, cursor: usize) -> Answer<(Cursor, Position)> {
        let state = self.cursor(cursor)?;
        let position = state.position.clone().ok_or(Status::CursorIsNil)?;
        Ok((state, position))
    }

    fn set_position(&mut self, cursor: usize, position: Option<Position>) {
        if let Some(state) = self.cursors.get_mut(&cursor) {
            state.position = position;
        }
    }

    fn cursor_move(&mut self, cursor: usize, flags: u32) -> Answer<(Vec<u8>, Vec<u8>)> {
        let state = self.cursor(cursor)?;
        let table = self.table(state.db, state.txn)?;
        let skip = flags & CursorMove::SKIP_DUPLICATES.bits() != 0;
        let moved = if flags & CursorMove::FIRST.bits() != 0 {
            table.first().ok_or(Status::KeyNotFound)?
        } else if flags & CursorMove::LAST.bits() != 0 {
            table.last(skip).ok_or(Status::KeyNotFound)?
        } else if flags & CursorMove::NEXT.bits() != 0 {
            match &state.position {
                Some(position) => table.next(position, flags),
                None => table.first(),
            }
            .ok_or(Status::KeyNotFound)?
        } else if flags & CursorMove::PREVIOUS.bits() != 0 {
            match &state.position {
                Some(position) => table.previous(position, flags),
                None => table.last(skip),
            }
            .ok_or(Status::KeyNotFound)?
        } else {
            state
                .position
                .clone()
                .filter(|position| table.record_at(position).is_some())
                .ok_or(Status::CursorIsNil)?
        };
        let record = table.record_at(&moved).cloned().ok_or(Status::CursorIsNil)?;
        let key = moved.0.clone();
        self.set_position(cursor, Some(moved));
        Ok((key, record))
    }

    fn select(&mut self, env: usize, query: &str, begin: usize, end: usize) -> Answer<Rows> {
        let query = query.to_ascii_lowercase();
        let clause = query.find("from database").ok_or(Status::ParserError)?;
        let name: u16 = query[clause + "from database".len()..]
            .split_whitespace()
            .next()
            .and_then(|token| token.parse().ok())
            .ok_or(Status::ParserError)?;

        let bound = |cursor: usize, state: &State| -> Answer<Option<Vec<u8>>> {
            if cursor == 0 {
                return Ok(None);
            }
            Ok(state.cursor(cursor)?.position.map(|(key, _)| key))
        };
        let lower = bound(begin, self)?;
        let upper = bound(end, self)?;

        let env = self.envs.get(&env).ok_or(Status::InvParameter)?;
        let table = env.store.tables.get(&name).ok_or(Status::DatabaseNotFound)?;
        let range = (
            lower.as_deref().map_or(Bound::Unbounded, Bound::Included),
            upper.as_deref().map_or(Bound::Unbounded, Bound::Excluded),
        );
        let rows: Vec<(Vec<u8>, Vec<u8>)> = table
            .entries
            .range::<[u8], _>(range)
            .flat_map(|(key, records)| records.iter().map(move |record| (key.clone(), record.clone())))
            .collect();

        if query.trim_start().starts_with("count") {
            let total = rows.len() as u64;
            return Ok(Rows {
                key_type: TYPE_BINARY,
                record_type: TYPE_UINT64,
                rows: vec![(Vec::new(), total.to_le_bytes().to_vec())],
            });
        }
        Ok(Rows {
            key_type: TYPE_BINARY,
            record_type: TYPE_BINARY,
            rows,
        })
    }
}

/// Engine keeping every environment in process memory
#[derive(Debug, Default)]
pub struct MemoryEngine {
    state: Mutex<State>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        MemoryEngine::default()
    }

    /// Process-wide instance, used when no engine is configured and the
    /// native library is not linked.
    pub fn shared() -> Arc<dyn Engine> {
        static SHARED: Lazy<Arc<MemoryEngine>> = Lazy::new(|| Arc::new(MemoryEngine::new()));
        SHARED.clone()
    }

    /// Number of live handles of any kind: environments, databases,
    /// transactions, cursors and query results.
    pub fn open_handles(&self) -> usize {
        let state = self.state.lock();
        state.envs.len() + state.dbs.len() + state.txns.len() + state.cursors.len() + state.results.len()
    }
}

unsafe impl Engine for MemoryEngine {
    fn strerror(&self, status: c_int) -> *const c_char {
        MESSAGES
            .get(&status)
            .map_or(UNKNOWN_MESSAGE.as_ptr(), |message| message.as_ptr())
    }

    fn get_version(&self, major: &mut u32, minor: &mut u32, revision: &mut u32) {
        *major = 2;
        *minor = 2;
        *revision = 1;
    }

    unsafe fn env_create(
        &self,
        env: *mut EnvPtr,
        filename: *const c_char,
        flags: u32,
        _mode: u32,
        params: *const RawParameter,
    ) -> c_int {
        let mut state = self.state.lock();
        let path = match read_path(filename) {
            Ok(path) => path,
            Err(status) => return status.code(),
        };
        if env.is_null() || (path.is_none() && flags & EnvFlags::IN_MEMORY.bits() == 0) {
            return Status::InvParameter.code();
        }
        let max_databases = read_parameters(params)
            .iter()
            .find(|param| param.name == PARAM_MAX_DATABASES)
            .map_or(DEFAULT_MAX_DATABASES, |param| param.value as usize);

        let handle_id = state.allocate();
        debug!("memory engine: created environment {} at {:?}", handle_id, path);
        state.envs.insert(
            handle_id,
            Env {
                path,
                flags,
                store: Store::new(max_databases),
            },
        );
        *env = handle(handle_id);
        0
    }

    unsafe fn env_open(
        &self,
        env: *mut EnvPtr,
        filename: *const c_char,
        flags: u32,
        _params: *const RawParameter,
    ) -> c_int {
        let mut state = self.state.lock();
        let path = match read_path(filename) {
            Ok(Some(path)) => path,
            Ok(None) => return Status::InvParameter.code(),
            Err(status) => return status.code(),
        };
        if env.is_null() || flags & EnvFlags::IN_MEMORY.bits() != 0 {
            return Status::InvParameter.code();
        }
        if state.envs.values().any(|open| open.path.as_deref() == Some(path.as_str())) {
            return Status::WouldBlock.code();
        }
        let Some(store) = state.files.get(&path).cloned() else {
            return Status::FileNotFound.code();
        };

        let handle_id = state.allocate();
        debug!("memory engine: opened environment {} at {}", handle_id, path);
        state.envs.insert(
            handle_id,
            Env {
                path: Some(path),
                flags,
                store,
            },
        );
        *env = handle(handle_id);
        0
    }

    unsafe fn env_create_db(
        &self,
        env: EnvPtr,
        db: *mut DbPtr,
        name: u16,
        flags: u32,
        params: *const RawParameter,
    ) -> c_int {
        let mut state = self.state.lock();
        let env = id(env);
        if db.is_null() || name == 0 || name >= RESERVED_NAMES {
            return Status::InvParameter.code();
        }
        let Some(open) = state.envs.get_mut(&env) else {
            return Status::InvParameter.code();
        };
        if open.flags & EnvFlags::READ_ONLY.bits() != 0 {
            return Status::WriteProtected.code();
        }
        if open.store.tables.contains_key(&name) {
            return Status::DatabaseAlreadyExists.code();
        }
        if open.store.tables.len() >= open.store.max_databases {
            return Status::LimitsReached.code();
        }
        let table = match Table::new(flags, &read_parameters(params)) {
            Ok(table) => table,
            Err(status) => return status.code(),
        };
        open.store.tables.insert(name, table.clone());
        for txn in state.txns.values_mut().filter(|txn| txn.env == env) {
            txn.store.tables.insert(name, table.clone());
        }

        let handle_id = state.allocate();
        state.dbs.insert(
            handle_id,
            Db {
                env,
                name,
                read_only: false,
            },
        );
        *db = handle(handle_id);
        0
    }

    unsafe fn env_open_db(
        &self,
        env: EnvPtr,
        db: *mut DbPtr,
        name: u16,
        flags: u32,
        _params: *const RawParameter,
    ) -> c_int {
        let mut state = self.state.lock();
        let env = id(env);
        if db.is_null() {
            return Status::InvParameter.code();
        }
        let Some(open) = state.envs.get(&env) else {
            return Status::InvParameter.code();
        };
        if !open.store.tables.contains_key(&name) {
            return Status::DatabaseNotFound.code();
        }
        if state.dbs.values().any(|db| db.env == env && db.name == name) {
            return Status::DatabaseAlreadyOpen.code();
        }
        let handle_id = state.allocate();
        state.dbs.insert(
            handle_id,
            Db {
                env,
                name,
                read_only: flags & DbFlags::READ_ONLY.bits() != 0,
            },
        );
        *db = handle(handle_id);
        0
    }

    unsafe fn env_rename_db(&self, env: EnvPtr, oldname: u16, newname: u16, _flags: u32) -> c_int {
        let mut state = self.state.lock();
        let env = id(env);
        if newname == 0 || newname >= RESERVED_NAMES {
            return Status::InvParameter.code();
        }
        if state.dbs.values().any(|db| db.env == env && db.name == oldname) {
            return Status::DatabaseAlreadyOpen.code();
        }
        let Some(open) = state.envs.get_mut(&env) else {
            return Status::InvParameter.code();
        };
        if open.store.tables.contains_key(&newname) {
            return Status::DatabaseAlreadyExists.code();
        }
        match open.store.tables.remove(&oldname) {
            Some(table) => {
                open.store.tables.insert(newname, table);
                0
            }
            None => Status::DatabaseNotFound.code(),
        }
    }

    unsafe fn env_erase_db(&self, env: EnvPtr, name: u16, _flags: u32) -> c_int {
        let mut state = self.state.lock();
        let env = id(env);
        if state.dbs.values().any(|db| db.env == env && db.name == name) {
            return Status::DatabaseAlreadyOpen.code();
        }
        let Some(open) = state.envs.get_mut(&env) else {
            return Status::InvParameter.code();
        };
        match open.store.tables.remove(&name) {
            Some(_) => 0,
            None => Status::DatabaseNotFound.code(),
        }
    }

    unsafe fn env_flush(&self, env: EnvPtr, _flags: u32) -> c_int {
        let mut state = self.state.lock();
        let State { envs, files, .. } = &mut *state;
        match envs.get(&id(env)) {
            Some(open) => {
                open.persist(files);
                0
            }
            None => Status::InvParameter.code(),
        }
    }

    unsafe fn env_get_database_names(&self, env: EnvPtr, names: *mut u16, length: *mut u32) -> c_int {
        let state = self.state.lock();
        let Some(open) = state.envs.get(&id(env)) else {
            return Status::InvParameter.code();
        };
        if names.is_null() || length.is_null() {
            return Status::InvParameter.code();
        }
        if open.store.tables.len() > *length as usize {
            return Status::LimitsReached.code();
        }
        for (index, name) in open.store.tables.keys().enumerate() {
            *names.add(index) = *name;
        }
        *length = open.store.tables.len() as u32;
        0
    }

    unsafe fn env_close(&self, env: EnvPtr, flags: u32) -> c_int {
        let mut state = self.state.lock();
        let env = id(env);
        if !state.envs.contains_key(&env) {
            return Status::InvParameter.code();
        }

        let txns: Vec<usize> = state
            .txns
            .iter()
            .filter(|(_, txn)| txn.env == env)
            .map(|(handle, _)| *handle)
            .collect();
        if !txns.is_empty() {
            if flags & (CloseFlags::TXN_AUTO_ABORT | CloseFlags::TXN_AUTO_COMMIT).bits() == 0 {
                return Status::TxnStillOpen.code();
            }
            let commit = flags & CloseFlags::TXN_AUTO_COMMIT.bits() != 0;
            for handle in txns {
                state.cursors.retain(|_, cursor| cursor.txn != handle);
                if let Some(txn) = state.txns.remove(&handle) {
                    if commit && !txn.read_only {
                        if let Some(open) = state.envs.get_mut(&env) {
                            open.store = txn.store;
                        }
                    }
                }
            }
        }

        let dbs: Vec<usize> = state
            .dbs
            .iter()
            .filter(|(_, db)| db.env == env)
            .map(|(handle, _)| *handle)
            .collect();
        if !dbs.is_empty() {
            if flags & CloseFlags::AUTO_CLEANUP.bits() == 0 {
                return Status::DatabaseAlreadyOpen.code();
            }
            for handle in dbs {
                state.cursors.retain(|_, cursor| cursor.db != handle);
                state.dbs.remove(&handle);
            }
        }

        state.release_closed();
        let State { envs, files, .. } = &mut *state;
        if let Some(open) = envs.remove(&env) {
            open.persist(files);
            debug!("memory engine: closed environment {}", env);
        }
        0
    }

    unsafe fn txn_begin(
        &self,
        txn: *mut TxnPtr,
        env: EnvPtr,
        _name: *const c_char,
        _reserved: *mut c_void,
        flags: u32,
    ) -> c_int {
        let mut state = self.state.lock();
        let env = id(env);
        if txn.is_null() {
            return Status::InvParameter.code();
        }
        let Some(open) = state.envs.get(&env) else {
            return Status::InvParameter.code();
        };
        if open.flags & EnvFlags::ENABLE_TRANSACTIONS.bits() == 0 {
            return Status::InvParameter.code();
        }
        let store = open.store.clone();
        let handle_id = state.allocate();
        state.txns.insert(
            handle_id,
            Txn {
                env,
                read_only: flags & TxnFlags::READ_ONLY.bits() != 0,
                store,
            },
        );
        *txn = handle(handle_id);
        0
    }

    unsafe fn txn_commit(&self, txn: TxnPtr, _flags: u32) -> c_int {
        let mut state = self.state.lock();
        let txn = id(txn);
        if !state.txns.contains_key(&txn) {
            return Status::InvParameter.code();
        }
        if state.has_cursors(|cursor| cursor.txn == txn) {
            return Status::CursorStillOpen.code();
        }
        if let Some(finished) = state.txns.remove(&txn) {
            if !finished.read_only {
                if let Some(open) = state.envs.get_mut(&finished.env) {
                    open.store = finished.store;
                }
            }
        }
        0
    }

    unsafe fn txn_abort(&self, txn: TxnPtr, _flags: u32) -> c_int {
        let mut state = self.state.lock();
        let txn = id(txn);
        if !state.txns.contains_key(&txn) {
            return Status::InvParameter.code();
        }
        if state.has_cursors(|cursor| cursor.txn == txn) {
            return Status::CursorStillOpen.code();
        }
        state.txns.remove(&txn);
        0
    }

    unsafe fn db_find(
        &self,
        db: DbPtr,
        txn: TxnPtr,
        key: *mut RawKey,
        record: *mut RawRecord,
        flags: u32,
    ) -> c_int {
        let mut state = self.state.lock();
        state.recycle(id(db));
        code(state.find(id(db), id(txn), key, record, flags))
    }

    unsafe fn db_insert(
        &self,
        db: DbPtr,
        txn: TxnPtr,
        key: *mut RawKey,
        record: *mut RawRecord,
        flags: u32,
    ) -> c_int {
        let mut state = self.state.lock();
        state.recycle(id(db));
        code(state.insert(id(db), id(db), id(txn), key, record, flags).map(|_| ()))
    }

    unsafe fn db_erase(&self, db: DbPtr, txn: TxnPtr, key: *mut RawKey, _flags: u32) -> c_int {
        let mut state = self.state.lock();
        code(state.erase(id(db), id(txn), key))
    }

    unsafe fn db_count(&self, db: DbPtr, txn: TxnPtr, flags: u32, count: *mut u64) -> c_int {
        let mut state = self.state.lock();
        if count.is_null() {
            return Status::InvParameter.code();
        }
        match state.table(id(db), id(txn)) {
            Ok(table) => {
                *count = table.count(flags);
                0
            }
            Err(status) => status.code(),
        }
    }

    unsafe fn db_get_parameters(&self, db: DbPtr, params: *mut RawParameter) -> c_int {
        let state = self.state.lock();
        let answer = (|| -> Answer<()> {
            let open = state.db(id(db))?;
            let env = state.envs.get(&open.env).ok_or(Status::InvParameter)?;
            let table = env.store.tables.get(&open.name).ok_or(Status::DatabaseNotFound)?;
            if params.is_null() {
                return Err(Status::InvParameter);
            }
            let mut param = params;
            while (*param).name != 0 {
                let name = (*param).name;
                (*param).value = match name {
                    PARAM_FLAGS => {
                        let read_only = if open.read_only { DbFlags::READ_ONLY.bits() } else { 0 };
                        (table.flags | read_only) as u64
                    }
                    PARAM_DATABASE_NAME => open.name as u64,
                    PARAM_MAX_DATABASES => env.store.max_databases as u64,
                    _ => table.parameter(name).ok_or(Status::InvParameter)?,
                };
                param = param.add(1);
            }
            Ok(())
        })();
        code(answer)
    }

    unsafe fn db_bulk_operations(
        &self,
        db: DbPtr,
        txn: TxnPtr,
        operations: *mut RawOperation,
        len: usize,
        _flags: u32,
    ) -> c_int {
        let mut state = self.state.lock();
        let (db, txn) = (id(db), id(txn));
        if let Err(status) = state.table(db, txn) {
            return status.code();
        }
        state.recycle(db);
        if len == 0 {
            return 0;
        }
        if operations.is_null() {
            return Status::InvParameter.code();
        }
        for operation in slice::from_raw_parts_mut(operations, len) {
            operation.result = code(state.apply(db, txn, operation));
        }
        0
    }

    unsafe fn db_close(&self, db: DbPtr, flags: u32) -> c_int {
        let mut state = self.state.lock();
        let db = id(db);
        if !state.dbs.contains_key(&db) {
            return Status::InvParameter.code();
        }
        if state.has_cursors(|cursor| cursor.db == db) {
            if flags & CloseFlags::AUTO_CLEANUP.bits() == 0 {
                return Status::CursorStillOpen.code();
            }
            state.cursors.retain(|_, cursor| cursor.db != db);
        }
        state.dbs.remove(&db);
        state.release_closed();
        0
    }

    unsafe fn cursor_create(&self, cursor: *mut CursorPtr, db: DbPtr, txn: TxnPtr, _flags: u32) -> c_int {
        let mut state = self.state.lock();
        let (db, txn) = (id(db), id(txn));
        if cursor.is_null() {
            return Status::InvParameter.code();
        }
        if let Err(status) = state.table(db, txn) {
            return status.code();
        }
        let handle_id = state.allocate();
        state.cursors.insert(
            handle_id,
            Cursor {
                db,
                txn,
                position: None,
            },
        );
        *cursor = handle(handle_id);
        0
    }

    unsafe fn cursor_clone(&self, src: CursorPtr, dest: *mut CursorPtr) -> c_int {
        let mut state = self.state.lock();
        let source = match state.cursor(id(src)) {
            Ok(source) => source,
            Err(status) => return status.code(),
        };
        if dest.is_null() {
            return Status::InvParameter.code();
        }
        let handle_id = state.allocate();
        state.cursors.insert(handle_id, source);
        *dest = handle(handle_id);
        0
    }

    unsafe fn cursor_move(
        &self,
        cursor: CursorPtr,
        key: *mut RawKey,
        record: *mut RawRecord,
        flags: u32,
    ) -> c_int {
        let mut state = self.state.lock();
        state.recycle(id(cursor));
        match state.cursor_move(id(cursor), flags) {
            Ok((found_key, found_record)) => {
                state.lend_key(id(cursor), key, &found_key);
                state.lend_record(id(cursor), record, &found_record);
                0
            }
            Err(status) => status.code(),
        }
    }

    unsafe fn cursor_overwrite(&self, cursor: CursorPtr, record: *mut RawRecord, _flags: u32) -> c_int {
        let mut state = self.state.lock();
        let answer = (|| -> Answer<()> {
            let (open, position) = state.cursor_position(id(cursor))?;
            state.writable(open.db, open.txn)?;
            let data = record.as_ref().map(|record| record_bytes(record)).unwrap_or_default();
            let table = state.table(open.db, open.txn)?;
            let slot = table
                .entries
                .get_mut(&position.0)
                .and_then(|records| records.get_mut(position.1))
                .ok_or(Status::CursorIsNil)?;
            *slot = data;
            Ok(())
        })();
        code(answer)
    }

    unsafe fn cursor_find(
        &self,
        cursor: CursorPtr,
        key: *mut RawKey,
        record: *mut RawRecord,
        flags: u32,
    ) -> c_int {
        let mut state = self.state.lock();
        state.recycle(id(cursor));
        let answer = (|| -> Answer<()> {
            let open = state.cursor(id(cursor))?;
            let wanted = key.as_ref().and_then(|key| key_bytes(key)).ok_or(Status::InvParameter)?;
            let (matched, found) = state.table(open.db, open.txn)?.find(&wanted, flags)?;
            state.set_position(id(cursor), Some((matched.clone(), 0)));
            state.lend_record(id(cursor), record, &found);
            if FindFlags::from_bits_retain(flags).is_approximate() {
                state.lend_key(id(cursor), key, &matched);
            }
            Ok(())
        })();
        code(answer)
    }

    unsafe fn cursor_insert(
        &self,
        cursor: CursorPtr,
        key: *mut RawKey,
        record: *mut RawRecord,
        flags: u32,
    ) -> c_int {
        let mut state = self.state.lock();
        state.recycle(id(cursor));
        let answer = (|| -> Answer<()> {
            let open = state.cursor(id(cursor))?;
            let position = state.insert(id(cursor), open.db, open.txn, key, record, flags)?;
            state.set_position(id(cursor), Some(position));
            Ok(())
        })();
        code(answer)
    }

    unsafe fn cursor_erase(&self, cursor: CursorPtr, _flags: u32) -> c_int {
        let mut state = self.state.lock();
        let answer = (|| -> Answer<()> {
            let (open, position) = state.cursor_position(id(cursor))?;
            state.writable(open.db, open.txn)?;
            let table = state.table(open.db, open.txn)?;
            let records = table.entries.get_mut(&position.0).ok_or(Status::CursorIsNil)?;
            if position.1 >= records.len() {
                return Err(Status::CursorIsNil);
            }
            records.remove(position.1);
            if records.is_empty() {
                table.entries.remove(&position.0);
            }
            state.set_position(id(cursor), None);
            Ok(())
        })();
        code(answer)
    }

    unsafe fn cursor_get_duplicate_count(&self, cursor: CursorPtr, count: *mut u32, _flags: u32) -> c_int {
        let mut state = self.state.lock();
        let answer = (|| -> Answer<()> {
            let (open, position) = state.cursor_position(id(cursor))?;
            let table = state.table(open.db, open.txn)?;
            let records = table.entries.get(&position.0).ok_or(Status::CursorIsNil)?;
            let count = count.as_mut().ok_or(Status::InvParameter)?;
            *count = records.len() as u32;
            Ok(())
        })();
        code(answer)
    }

    unsafe fn cursor_close(&self, cursor: CursorPtr) -> c_int {
        let mut state = self.state.lock();
        match state.cursors.remove(&id(cursor)) {
            Some(_) => {
                state.release_closed();
                0
            }
            None => Status::InvParameter.code(),
        }
    }

    unsafe fn select_range(
        &self,
        env: EnvPtr,
        query: *const c_char,
        begin: CursorPtr,
        end: CursorPtr,
        result: *mut ResultPtr,
    ) -> c_int {
        let mut state = self.state.lock();
        if query.is_null() || result.is_null() {
            return Status::InvParameter.code();
        }
        let Ok(query) = CStr::from_ptr(query).to_str() else {
            return Status::ParserError.code();
        };
        match state.select(id(env), query, id(begin), id(end)) {
            Ok(rows) => {
                let handle_id = state.allocate();
                state.results.insert(handle_id, rows);
                *result = handle(handle_id);
                0
            }
            Err(status) => status.code(),
        }
    }

    unsafe fn result_get_row_count(&self, result: ResultPtr) -> u32 {
        let state = self.state.lock();
        state
            .results
            .get(&id(result))
            .map_or(0, |rows| rows.rows.len() as u32)
    }

    unsafe fn result_get_key_type(&self, result: ResultPtr) -> u32 {
        let state = self.state.lock();
        state.results.get(&id(result)).map_or(TYPE_BINARY, |rows| rows.key_type)
    }

    unsafe fn result_get_record_type(&self, result: ResultPtr) -> u32 {
        let state = self.state.lock();
        state.results.get(&id(result)).map_or(TYPE_BINARY, |rows| rows.record_type)
    }

    // Row data stays in the result until it is closed, so descriptors point
    // straight into it.
    unsafe fn result_get_key(&self, result: ResultPtr, row: u32, key: *mut RawKey) {
        let state = self.state.lock();
        let row = state
            .results
            .get(&id(result))
            .and_then(|rows| rows.rows.get(row as usize));
        if let (Some((data, _)), Some(key)) = (row, key.as_mut()) {
            key.data = data.as_ptr() as *mut c_void;
            key.size = data.len() as u16;
        }
    }

    unsafe fn result_get_record(&self, result: ResultPtr, row: u32, record: *mut RawRecord) {
        let state = self.state.lock();
        let row = state
            .results
            .get(&id(result))
            .and_then(|rows| rows.rows.get(row as usize));
        if let (Some((_, data)), Some(record)) = (row, record.as_mut()) {
            record.data = data.as_ptr() as *mut c_void;
            record.size = data.len() as u32;
        }
    }

    unsafe fn result_close(&self, result: ResultPtr) {
        self.state.lock().results.remove(&id(result));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ptr;

    unsafe fn database_holding(engine: &MemoryEngine, record: &[u8]) -> DbPtr {
        let params = [RawParameter::TERMINATOR];
        let mut env: EnvPtr = ptr::null_mut();
        let flags = EnvFlags::IN_MEMORY.bits();
        assert_eq!(engine.env_create(&mut env, ptr::null(), flags, 0o644, params.as_ptr()), 0);
        let mut db: DbPtr = ptr::null_mut();
        assert_eq!(engine.env_create_db(env, &mut db, 1, 0, params.as_ptr()), 0);

        let mut key = RawKey {
            size: 1,
            data: b"k".as_ptr() as *mut c_void,
            ..RawKey::default()
        };
        let mut stored = RawRecord {
            size: record.len() as u32,
            data: record.as_ptr() as *mut c_void,
            ..RawRecord::default()
        };
        assert_eq!(engine.db_insert(db, ptr::null_mut(), &mut key, &mut stored, 0), 0);
        db
    }

    unsafe fn find(engine: &MemoryEngine, db: DbPtr) -> RawRecord {
        let mut key = RawKey {
            size: 1,
            data: b"k".as_ptr() as *mut c_void,
            ..RawKey::default()
        };
        let mut record = RawRecord::default();
        assert_eq!(engine.db_find(db, ptr::null_mut(), &mut key, &mut record, 0), 0);
        record
    }

    #[test]
    fn lent_memory_outlives_calls_on_other_handles() {
        let engine = MemoryEngine::new();
        unsafe {
            let first = database_holding(&engine, b"first");
            let second = database_holding(&engine, b"second");

            let lent = find(&engine, first);
            find(&engine, second);
            find(&engine, second);
            let bytes = slice::from_raw_parts(lent.data as *const u8, lent.size as usize);
            assert_eq!(bytes, b"first");
        }
    }

    #[test]
    fn closing_a_database_releases_its_arena() {
        let engine = MemoryEngine::new();
        unsafe {
            let db = database_holding(&engine, b"value");
            find(&engine, db);
            find(&engine, db);
            assert_eq!(engine.state.lock().scratch[&id(db)].len(), 1);

            assert_eq!(engine.db_close(db, 0), 0);
            assert!(engine.state.lock().scratch.is_empty());
        }
    }
}
