use bitflags::bitflags;

// Environment flags
bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct EnvFlags: u32 {
        const ENABLE_FSYNC = 0x0001;
        const READ_ONLY = 0x0004;
        const IN_MEMORY = 0x0080;
        const DISABLE_MMAP = 0x0200;
        const AUTO_RECOVERY = 0x10000;
        const ENABLE_TRANSACTIONS = 0x20000;
        const CACHE_UNLIMITED = 0x40000;
        const DISABLE_RECOVERY = 0x80000;
        const FLUSH_WHEN_COMMITTED = 0x100_0000;
        const ENABLE_CRC32 = 0x200_0000;
    }
}

// Database flags
bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DbFlags: u32 {
        const READ_ONLY = 0x0004;
        const RECORD_NUMBER32 = 0x1000;
        const RECORD_NUMBER64 = 0x2000;
        const ENABLE_DUPLICATE_KEYS = 0x4000;
        const FORCE_RECORDS_INLINE = 0x80_0000;
    }
}

// Insert flags, also used by cursor inserts
bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct InsertFlags: u32 {
        const OVERWRITE = 0x0001;
        const DUPLICATE = 0x0002;
        const DUPLICATE_INSERT_BEFORE = 0x0004;
        const DUPLICATE_INSERT_AFTER = 0x0008;
        const DUPLICATE_INSERT_FIRST = 0x0010;
        const DUPLICATE_INSERT_LAST = 0x0020;
        const HINT_APPEND = 0x8_0000;
        const HINT_PREPEND = 0x10_0000;
    }
}

// Approximate matching for find operations
bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct FindFlags: u32 {
        const LT_MATCH = 0x1000;
        const GT_MATCH = 0x2000;
        const EXACT_MATCH = 0x4000;
        const LEQ_MATCH = Self::LT_MATCH.bits() | Self::EXACT_MATCH.bits();
        const GEQ_MATCH = Self::GT_MATCH.bits() | Self::EXACT_MATCH.bits();
        const NEAR_MATCH = Self::LT_MATCH.bits() | Self::GT_MATCH.bits() | Self::EXACT_MATCH.bits();
    }
}

impl FindFlags {
    /// Flags under which the engine may return a key other than the one
    /// supplied, so the matched key has to be copied back.
    pub const APPROXIMATE: FindFlags =
        FindFlags::from_bits_retain(FindFlags::LT_MATCH.bits() | FindFlags::GT_MATCH.bits());

    pub fn is_approximate(self) -> bool {
        self.intersects(Self::APPROXIMATE)
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct EraseFlags: u32 {
        const ALL_DUPLICATES = 0x0001;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CountFlags: u32 {
        const SKIP_DUPLICATES = 0x0010;
    }
}

// Cursor movement
bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CursorMove: u32 {
        const FIRST = 0x0001;
        const LAST = 0x0002;
        const NEXT = 0x0004;
        const PREVIOUS = 0x0008;
        const SKIP_DUPLICATES = 0x0010;
        const ONLY_DUPLICATES = 0x0020;
    }
}

// Transaction flags
bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TxnFlags: u32 {
        const READ_ONLY = 0x0001;
        const TEMPORARY = 0x0002;
    }
}

// Close flags for environments and databases
bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CloseFlags: u32 {
        const AUTO_CLEANUP = 0x0001;
        const TXN_AUTO_ABORT = 0x0004;
        const TXN_AUTO_COMMIT = 0x0008;
    }
}

/// Wire tags of `ups_operation_t::type`
pub const OP_INSERT: i32 = 1;
pub const OP_ERASE: i32 = 2;
pub const OP_FIND: i32 = 3;

/// Parameter names understood by `ups_env_create` and friends
pub const PARAM_CACHE_SIZE: u32 = 0x0100;
pub const PARAM_PAGE_SIZE: u32 = 0x0101;
pub const PARAM_KEY_SIZE: u32 = 0x0102;
pub const PARAM_MAX_DATABASES: u32 = 0x0103;
pub const PARAM_KEY_TYPE: u32 = 0x0104;
pub const PARAM_NETWORK_TIMEOUT_SEC: u32 = 0x0107;
pub const PARAM_RECORD_SIZE: u32 = 0x0108;
pub const PARAM_FILE_SIZE_LIMIT: u32 = 0x0109;
pub const PARAM_POSIX_FADVISE: u32 = 0x0110;
pub const PARAM_RECORD_TYPE: u32 = 0x0111;

/// Parameter names that can only be queried
pub const PARAM_FLAGS: u32 = 0x0200;
pub const PARAM_DATABASE_NAME: u32 = 0x0203;
pub const PARAM_MAX_KEYS_PER_PAGE: u32 = 0x0204;

/// `PARAM_KEY_SIZE` and `PARAM_RECORD_SIZE` values of variable-length data
pub const KEY_SIZE_UNLIMITED: u64 = 0xffff;
pub const RECORD_SIZE_UNLIMITED: u64 = 0xffff_ffff;

/// Key and record type identifiers
pub const TYPE_BINARY: u32 = 0;
pub const TYPE_CUSTOM: u32 = 1;
pub const TYPE_UINT8: u32 = 3;
pub const TYPE_UINT16: u32 = 5;
pub const TYPE_UINT32: u32 = 7;
pub const TYPE_UINT64: u32 = 9;
pub const TYPE_REAL32: u32 = 11;
pub const TYPE_REAL64: u32 = 12;

/// Largest key the wire format can describe
pub const MAX_KEY_SIZE: usize = u16::MAX as usize;
/// Largest record the binding accepts
pub const MAX_RECORD_SIZE: usize = i32::MAX as usize;

/// Default file mode for newly created environments
pub const DEFAULT_FILE_MODE: u32 = 0o644;
