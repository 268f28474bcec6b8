use std::sync::Arc;

use tempfile::TempDir;
use upsdb::constants::{
    KEY_SIZE_UNLIMITED, MAX_KEY_SIZE, PARAM_CACHE_SIZE, PARAM_DATABASE_NAME, PARAM_FLAGS,
    PARAM_KEY_SIZE, PARAM_MAX_DATABASES, PARAM_RECORD_SIZE, RECORD_SIZE_UNLIMITED,
};
use upsdb::{
    pinned_buffers, CloseFlags, CountFlags, DbFlags, EnvFlags, Environment, EraseFlags, Error,
    FindFlags, InsertFlags, MemoryEngine, Parameter, Status, TxnFlags,
};

// Common test setup
fn setup_test_env() -> (TempDir, Arc<MemoryEngine>, Environment) {
    let temp_dir = TempDir::new().unwrap();
    let engine = Arc::new(MemoryEngine::new());
    let env = Environment::builder()
        .engine(engine.clone())
        .flags(EnvFlags::ENABLE_TRANSACTIONS)
        .create(temp_dir.path().join("test.db"))
        .unwrap();
    (temp_dir, engine, env)
}

#[test]
fn test_insert_find_erase() {
    let (_dir, _engine, env) = setup_test_env();
    let db = env.create_db(1, DbFlags::empty(), &[]).unwrap();

    db.insert(None, b"test_key", b"test_value", InsertFlags::empty()).unwrap();
    assert_eq!(db.find(None, b"test_key").unwrap(), b"test_value");

    db.erase(None, b"test_key", EraseFlags::empty()).unwrap();
    let err = db.find(None, b"test_key").unwrap_err();
    assert_eq!(err.status(), Some(Status::KeyNotFound));

    let err = db.erase(None, b"test_key", EraseFlags::empty()).unwrap_err();
    assert_eq!(err.status(), Some(Status::KeyNotFound));
}

#[test]
fn test_duplicate_and_overwrite() {
    let (_dir, _engine, env) = setup_test_env();
    let db = env.create_db(1, DbFlags::empty(), &[]).unwrap();

    db.insert(None, b"key", b"first", InsertFlags::empty()).unwrap();
    let err = db.insert(None, b"key", b"second", InsertFlags::empty()).unwrap_err();
    assert_eq!(err.status(), Some(Status::DuplicateKey));

    db.insert(None, b"key", b"second", InsertFlags::OVERWRITE).unwrap();
    assert_eq!(db.find(None, b"key").unwrap(), b"second");
}

#[test]
fn test_empty_key_and_record() {
    let (_dir, _engine, env) = setup_test_env();
    let db = env.create_db(1, DbFlags::empty(), &[]).unwrap();

    db.insert(None, b"", b"", InsertFlags::empty()).unwrap();
    assert_eq!(db.find(None, b"").unwrap(), Vec::<u8>::new());
}

#[test]
fn test_approximate_find() {
    let (_dir, _engine, env) = setup_test_env();
    let db = env.create_db(1, DbFlags::empty(), &[]).unwrap();
    for key in [b"10", b"20", b"30"] {
        db.insert(None, key, &[key[0]], InsertFlags::empty()).unwrap();
    }

    let (key, record) = db.find_approx(None, b"25", FindFlags::LT_MATCH).unwrap();
    assert_eq!(key, b"20");
    assert_eq!(record, b"2");

    let (key, _) = db.find_approx(None, b"25", FindFlags::GT_MATCH).unwrap();
    assert_eq!(key, b"30");

    let (key, _) = db.find_approx(None, b"20", FindFlags::LEQ_MATCH).unwrap();
    assert_eq!(key, b"20");

    let err = db.find_approx(None, b"05", FindFlags::LT_MATCH).unwrap_err();
    assert_eq!(err.status(), Some(Status::KeyNotFound));
}

#[test]
fn test_count_with_duplicates() {
    let (_dir, _engine, env) = setup_test_env();
    let db = env.create_db(1, DbFlags::ENABLE_DUPLICATE_KEYS, &[]).unwrap();

    db.insert(None, b"a", b"1", InsertFlags::empty()).unwrap();
    db.insert(None, b"a", b"2", InsertFlags::DUPLICATE).unwrap();
    db.insert(None, b"b", b"3", InsertFlags::empty()).unwrap();

    assert_eq!(db.count(None, CountFlags::empty()).unwrap(), 3);
    assert_eq!(db.count(None, CountFlags::SKIP_DUPLICATES).unwrap(), 2);
}

#[test]
fn test_record_number_insert() {
    let (_dir, _engine, env) = setup_test_env();
    let db = env.create_db(1, DbFlags::RECORD_NUMBER32, &[]).unwrap();

    let first = db.insert_recno(None, b"one", InsertFlags::empty()).unwrap();
    let second = db.insert_recno(None, b"two", InsertFlags::empty()).unwrap();
    assert_eq!(first, 1u32.to_le_bytes());
    assert_eq!(second, 2u32.to_le_bytes());
    assert_eq!(db.find(None, &second).unwrap(), b"two");
}

#[test]
fn test_record_number_continues_after_explicit_key() {
    let (_dir, _engine, env) = setup_test_env();
    let db = env.create_db(1, DbFlags::RECORD_NUMBER32, &[]).unwrap();

    db.insert(None, &5u32.to_le_bytes(), b"five", InsertFlags::empty()).unwrap();
    let next = db.insert_recno(None, b"six", InsertFlags::empty()).unwrap();
    assert_eq!(next, 6u32.to_le_bytes());
    assert_eq!(db.find(None, &5u32.to_le_bytes()).unwrap(), b"five");
}

#[test]
fn test_database_parameters() {
    let engine = Arc::new(MemoryEngine::new());
    let env = Environment::builder()
        .engine(engine)
        .parameter(PARAM_MAX_DATABASES, 8)
        .create_in_memory()
        .unwrap();
    let db = env.create_db(1, DbFlags::empty(), &[]).unwrap();

    let params = db
        .parameters(&[PARAM_KEY_SIZE, PARAM_DATABASE_NAME, PARAM_FLAGS, PARAM_MAX_DATABASES])
        .unwrap();
    assert_eq!(
        params,
        vec![
            Parameter::new(PARAM_KEY_SIZE, KEY_SIZE_UNLIMITED),
            Parameter::new(PARAM_DATABASE_NAME, 1),
            Parameter::new(PARAM_FLAGS, 0),
            Parameter::new(PARAM_MAX_DATABASES, 8),
        ]
    );
    assert_eq!(db.parameters(&[]).unwrap(), Vec::new());

    let err = db.parameters(&[PARAM_CACHE_SIZE]).unwrap_err();
    assert_eq!(err.status(), Some(Status::InvParameter));
    let err = db.parameters(&[PARAM_KEY_SIZE, 0]).unwrap_err();
    assert_eq!(err.status(), Some(Status::InvParameter));
}

#[test]
fn test_fixed_size_database_parameters() {
    let (_dir, _engine, env) = setup_test_env();
    let recno = env.create_db(1, DbFlags::RECORD_NUMBER64, &[]).unwrap();
    let params = recno.parameters(&[PARAM_KEY_SIZE, PARAM_FLAGS]).unwrap();
    assert_eq!(params[0].value, 8);
    assert_eq!(params[1].value, DbFlags::RECORD_NUMBER64.bits() as u64);

    let fixed = env
        .create_db(2, DbFlags::empty(), &[Parameter::new(PARAM_KEY_SIZE, 4)])
        .unwrap();
    let params = fixed.parameters(&[PARAM_KEY_SIZE, PARAM_RECORD_SIZE]).unwrap();
    assert_eq!(params[0].value, 4);
    assert_eq!(params[1].value, RECORD_SIZE_UNLIMITED);
    fixed.insert(None, b"four", b"v", InsertFlags::empty()).unwrap();
    let err = fixed.insert(None, b"six!!!", b"v", InsertFlags::empty()).unwrap_err();
    assert_eq!(err.status(), Some(Status::InvKeySize));
}

#[test]
fn test_key_too_large() {
    let (_dir, _engine, env) = setup_test_env();
    let db = env.create_db(1, DbFlags::empty(), &[]).unwrap();

    let key = vec![0u8; MAX_KEY_SIZE + 1];
    let err = db.insert(None, &key, b"value", InsertFlags::empty()).unwrap_err();
    assert!(matches!(err, Error::KeyTooLarge { .. }));
    assert!(err.is_marshalling());
    assert_eq!(pinned_buffers(), 0);
    assert_eq!(db.count(None, CountFlags::empty()).unwrap(), 0);
}

#[test]
fn test_database_management() {
    let (_dir, _engine, env) = setup_test_env();
    drop(env.create_db(1, DbFlags::empty(), &[]).unwrap());
    drop(env.create_db(7, DbFlags::empty(), &[]).unwrap());

    let err = env.create_db(1, DbFlags::empty(), &[]).err().unwrap();
    assert_eq!(err.status(), Some(Status::DatabaseAlreadyExists));
    assert_eq!(env.database_names().unwrap(), vec![1, 7]);

    env.rename_db(7, 3).unwrap();
    assert_eq!(env.database_names().unwrap(), vec![1, 3]);

    env.erase_db(1).unwrap();
    assert_eq!(env.database_names().unwrap(), vec![3]);

    let err = env.open_db(1, DbFlags::empty()).err().unwrap();
    assert_eq!(err.status(), Some(Status::DatabaseNotFound));

    let db = env.open_db(3, DbFlags::empty()).unwrap();
    let err = env.erase_db(3).unwrap_err();
    assert_eq!(err.status(), Some(Status::DatabaseAlreadyOpen));
    db.close().unwrap();
    env.erase_db(3).unwrap();
}

#[test]
fn test_max_databases_parameter() {
    let engine = Arc::new(MemoryEngine::new());
    let env = Environment::builder()
        .engine(engine)
        .parameter(PARAM_MAX_DATABASES, 1)
        .create_in_memory()
        .unwrap();
    drop(env.create_db(1, DbFlags::empty(), &[]).unwrap());
    let err = env.create_db(2, DbFlags::empty(), &[]).err().unwrap();
    assert_eq!(err.status(), Some(Status::LimitsReached));
}

#[test]
fn test_reopen_persists_data() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("persist.db");
    let engine = Arc::new(MemoryEngine::new());

    let env = Environment::builder().engine(engine.clone()).create(&path).unwrap();
    {
        let db = env.create_db(1, DbFlags::empty(), &[]).unwrap();
        db.insert(None, b"durable", b"yes", InsertFlags::empty()).unwrap();
    }
    env.close(CloseFlags::empty()).unwrap();

    let env = Environment::builder().engine(engine.clone()).open(&path).unwrap();
    let db = env.open_db(1, DbFlags::empty()).unwrap();
    assert_eq!(db.find(None, b"durable").unwrap(), b"yes");

    let err = Environment::builder()
        .engine(engine)
        .open(temp_dir.path().join("missing.db"))
        .err()
        .unwrap();
    assert_eq!(err.status(), Some(Status::FileNotFound));
}

#[test]
fn test_read_only_environment() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("ro.db");
    let engine = Arc::new(MemoryEngine::new());

    let env = Environment::builder().engine(engine.clone()).create(&path).unwrap();
    drop(env.create_db(1, DbFlags::empty(), &[]).unwrap());
    drop(env);

    let env = Environment::builder()
        .engine(engine)
        .flags(EnvFlags::READ_ONLY)
        .open(&path)
        .unwrap();
    let db = env.open_db(1, DbFlags::empty()).unwrap();
    let err = db.insert(None, b"k", b"v", InsertFlags::empty()).unwrap_err();
    assert_eq!(err.status(), Some(Status::WriteProtected));
}

#[test]
fn test_transaction_commit_and_abort() {
    let (_dir, _engine, env) = setup_test_env();
    let db = env.create_db(1, DbFlags::empty(), &[]).unwrap();

    let txn = env.begin_txn(TxnFlags::empty()).unwrap();
    db.insert(Some(&txn), b"committed", b"1", InsertFlags::empty()).unwrap();
    assert_eq!(db.find(Some(&txn), b"committed").unwrap(), b"1");
    let err = db.find(None, b"committed").unwrap_err();
    assert_eq!(err.status(), Some(Status::KeyNotFound));
    txn.commit().unwrap();
    assert_eq!(db.find(None, b"committed").unwrap(), b"1");

    let txn = env.begin_txn(TxnFlags::empty()).unwrap();
    db.insert(Some(&txn), b"aborted", b"2", InsertFlags::empty()).unwrap();
    txn.abort().unwrap();
    assert!(db.find(None, b"aborted").is_err());

    {
        let txn = env.begin_txn(TxnFlags::empty()).unwrap();
        db.insert(Some(&txn), b"dropped", b"3", InsertFlags::empty()).unwrap();
    }
    assert!(db.find(None, b"dropped").is_err());
}

#[test]
fn test_read_only_transaction() {
    let (_dir, _engine, env) = setup_test_env();
    let db = env.create_db(1, DbFlags::empty(), &[]).unwrap();
    db.insert(None, b"k", b"v", InsertFlags::empty()).unwrap();

    let txn = env.begin_txn(TxnFlags::READ_ONLY).unwrap();
    assert!(txn.is_read_only());
    assert_eq!(db.find(Some(&txn), b"k").unwrap(), b"v");
    let err = db.insert(Some(&txn), b"x", b"y", InsertFlags::empty()).unwrap_err();
    assert_eq!(err.status(), Some(Status::WriteProtected));
    txn.commit().unwrap();
}

#[test]
fn test_transactions_require_flag() {
    let env = Environment::builder()
        .engine(Arc::new(MemoryEngine::new()))
        .create_in_memory()
        .unwrap();
    let err = env.begin_txn(TxnFlags::empty()).err().unwrap();
    assert_eq!(err.status(), Some(Status::InvParameter));
}

#[test]
fn test_drop_closes_every_handle() {
    let engine = Arc::new(MemoryEngine::new());
    {
        let env = Environment::builder()
            .engine(engine.clone())
            .flags(EnvFlags::ENABLE_TRANSACTIONS)
            .create_in_memory()
            .unwrap();
        let db = env.create_db(1, DbFlags::empty(), &[]).unwrap();
        let txn = env.begin_txn(TxnFlags::empty()).unwrap();
        db.insert(Some(&txn), b"k", b"v", InsertFlags::empty()).unwrap();
        assert_eq!(engine.open_handles(), 3);
    }
    assert_eq!(engine.open_handles(), 0);
}

#[test]
fn test_describe_and_version() {
    let (_dir, _engine, env) = setup_test_env();
    assert_eq!(env.describe(Status::KeyNotFound), "Key not found");
    assert_eq!(env.describe(Status::Other(-9999)), "Unknown error");

    let version = env.version();
    assert_eq!((version.major, version.minor, version.revision), (2, 2, 1));
}
