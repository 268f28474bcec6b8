use std::sync::Arc;

use upsdb::constants::{TYPE_BINARY, TYPE_UINT64};
use upsdb::{
    Cursor, CursorMove, DbFlags, EnvFlags, Environment, FindFlags, InsertFlags, MemoryEngine,
    Status, TxnFlags,
};

fn setup_test_env() -> (Arc<MemoryEngine>, Environment) {
    let engine = Arc::new(MemoryEngine::new());
    let env = Environment::builder()
        .engine(engine.clone())
        .flags(EnvFlags::ENABLE_TRANSACTIONS)
        .create_in_memory()
        .unwrap();
    (engine, env)
}

fn entry(key: &[u8], record: &[u8]) -> Option<(Vec<u8>, Vec<u8>)> {
    Some((key.to_vec(), record.to_vec()))
}

#[test]
fn test_cursor_iteration() {
    let (_engine, env) = setup_test_env();
    let db = env.create_db(1, DbFlags::empty(), &[]).unwrap();
    for (key, record) in [(b"b", b"2"), (b"a", b"1"), (b"c", b"3")] {
        db.insert(None, key, record, InsertFlags::empty()).unwrap();
    }

    let mut cursor = Cursor::create(&db, None, 0).unwrap();
    assert_eq!(cursor.first().unwrap(), entry(b"a", b"1"));
    assert_eq!(cursor.next().unwrap(), entry(b"b", b"2"));
    assert_eq!(cursor.next().unwrap(), entry(b"c", b"3"));
    assert_eq!(cursor.next().unwrap(), None);

    assert_eq!(cursor.last().unwrap(), entry(b"c", b"3"));
    assert_eq!(cursor.previous().unwrap(), entry(b"b", b"2"));
    assert_eq!(cursor.key().unwrap(), b"b");
    assert_eq!(cursor.record().unwrap(), b"2");
}

#[test]
fn test_cursor_on_empty_database() {
    let (_engine, env) = setup_test_env();
    let db = env.create_db(1, DbFlags::empty(), &[]).unwrap();

    let mut cursor = Cursor::create(&db, None, 0).unwrap();
    assert_eq!(cursor.first().unwrap(), None);
    let err = cursor.key().unwrap_err();
    assert_eq!(err.status(), Some(Status::CursorIsNil));
}

#[test]
fn test_cursor_duplicates() {
    let (_engine, env) = setup_test_env();
    let db = env.create_db(1, DbFlags::ENABLE_DUPLICATE_KEYS, &[]).unwrap();
    db.insert(None, b"a", b"1", InsertFlags::empty()).unwrap();
    db.insert(None, b"a", b"2", InsertFlags::DUPLICATE).unwrap();
    db.insert(None, b"a", b"3", InsertFlags::DUPLICATE).unwrap();
    db.insert(None, b"b", b"4", InsertFlags::empty()).unwrap();

    let mut cursor = Cursor::create(&db, None, 0).unwrap();
    assert_eq!(cursor.find(b"a").unwrap(), b"1");
    assert_eq!(cursor.duplicate_count().unwrap(), 3);
    assert_eq!(cursor.next().unwrap(), entry(b"a", b"2"));

    let (key, record) = cursor
        .move_to(CursorMove::NEXT | CursorMove::SKIP_DUPLICATES)
        .unwrap();
    assert_eq!((key.as_slice(), record.as_slice()), (&b"b"[..], &b"4"[..]));

    cursor.find(b"a").unwrap();
    cursor.next().unwrap();
    cursor.next().unwrap();
    let err = cursor
        .move_to(CursorMove::NEXT | CursorMove::ONLY_DUPLICATES)
        .unwrap_err();
    assert_eq!(err.status(), Some(Status::KeyNotFound));
}

#[test]
fn test_cursor_find_approx() {
    let (_engine, env) = setup_test_env();
    let db = env.create_db(1, DbFlags::empty(), &[]).unwrap();
    db.insert(None, b"10", b"x", InsertFlags::empty()).unwrap();
    db.insert(None, b"30", b"y", InsertFlags::empty()).unwrap();

    let mut cursor = Cursor::create(&db, None, 0).unwrap();
    let (key, record) = cursor.find_approx(b"20", FindFlags::GT_MATCH).unwrap();
    assert_eq!(key, b"30");
    assert_eq!(record, b"y");
    assert_eq!(cursor.previous().unwrap(), entry(b"10", b"x"));
}

#[test]
fn test_cursor_modifications() {
    let (_engine, env) = setup_test_env();
    let db = env.create_db(1, DbFlags::empty(), &[]).unwrap();

    let mut cursor = Cursor::create(&db, None, 0).unwrap();
    cursor.insert(b"k", b"old", InsertFlags::empty()).unwrap();
    assert_eq!(cursor.key().unwrap(), b"k");

    cursor.overwrite(b"new").unwrap();
    assert_eq!(db.find(None, b"k").unwrap(), b"new");

    let clone = cursor.try_clone().unwrap();
    assert_eq!(clone.record().unwrap(), b"new");

    cursor.erase().unwrap();
    assert_eq!(cursor.key().unwrap_err().status(), Some(Status::CursorIsNil));
    assert_eq!(db.find(None, b"k").unwrap_err().status(), Some(Status::KeyNotFound));
    clone.close().unwrap();
    cursor.close().unwrap();
}

#[test]
fn test_cursor_in_transaction() {
    let (engine, env) = setup_test_env();
    let db = env.create_db(1, DbFlags::empty(), &[]).unwrap();
    let txn = env.begin_txn(TxnFlags::empty()).unwrap();
    {
        let mut cursor = Cursor::create(&db, Some(&txn), 0).unwrap();
        cursor.insert(b"k", b"v", InsertFlags::empty()).unwrap();
        assert_eq!(engine.open_handles(), 4);
    }
    assert_eq!(engine.open_handles(), 3);
    assert!(db.find(None, b"k").is_err());
    txn.commit().unwrap();
    assert_eq!(db.find(None, b"k").unwrap(), b"v");
}

#[test]
fn test_select_range_count() {
    let (_engine, env) = setup_test_env();
    let db = env.create_db(3, DbFlags::empty(), &[]).unwrap();
    for i in 0..5u8 {
        db.insert(None, &[i], &[i], InsertFlags::empty()).unwrap();
    }

    let result = env.select_range("COUNT($key) FROM DATABASE 3", None, None).unwrap();
    assert_eq!(result.row_count(), 1);
    assert_eq!(result.record_type(), TYPE_UINT64);
    let count = result.record(0).unwrap();
    assert_eq!(u64::from_le_bytes(count.try_into().unwrap()), 5);
    assert_eq!(result.record(1).unwrap_err().status(), Some(Status::InvParameter));
    result.close();
}

#[test]
fn test_select_range_rows_between_cursors() {
    let (_engine, env) = setup_test_env();
    let db = env.create_db(3, DbFlags::empty(), &[]).unwrap();
    for key in [b"a", b"b", b"c", b"d"] {
        db.insert(None, key, b"r", InsertFlags::empty()).unwrap();
    }

    let mut begin = Cursor::create(&db, None, 0).unwrap();
    begin.find(b"b").unwrap();
    let mut end = Cursor::create(&db, None, 0).unwrap();
    end.find(b"d").unwrap();

    let result = env
        .select_range("value($key) from database 3", Some(&begin), Some(&end))
        .unwrap();
    assert_eq!(result.key_type(), TYPE_BINARY);
    assert_eq!(result.row_count(), 2);
    assert_eq!(result.key(0).unwrap(), b"b");
    assert_eq!(result.key(1).unwrap(), b"c");
    assert_eq!(result.record(1).unwrap(), b"r");
}

#[test]
fn test_select_range_errors() {
    let (_engine, env) = setup_test_env();
    drop(env.create_db(3, DbFlags::empty(), &[]).unwrap());

    let err = env.select_range("SUM($key)", None, None).err().unwrap();
    assert_eq!(err.status(), Some(Status::ParserError));

    let err = env.select_range("COUNT($key) FROM DATABASE 9", None, None).err().unwrap();
    assert_eq!(err.status(), Some(Status::DatabaseNotFound));
}
