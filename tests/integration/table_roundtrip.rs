#![allow(missing_docs)]

use burrow::db::{Database, DatabaseOptions};
use burrow::storage::{ColumnInfo, IndexColumn, SeekOp};
use burrow::types::{BurrowError, DataType, IndexId, Result, TableId, Value};
use tempfile::tempdir;

const PEOPLE: TableId = TableId(3);

fn options() -> DatabaseOptions {
    DatabaseOptions::unsynced().page_size(1024).buffer_size(256)
}

fn people() -> Vec<ColumnInfo> {
    vec![
        ColumnInfo::id(),
        ColumnInfo::new("name", DataType::String),
        ColumnInfo::new("age", DataType::Smallint),
        ColumnInfo::new("photo", DataType::Binary),
    ]
}

fn person(name: &str, age: i64, photo: &[u8]) -> Vec<Value> {
    vec![Value::Int(0), Value::str(name), Value::Int(age), Value::bin(photo)]
}

fn with_id(mut row: Vec<Value>, id: i64) -> Vec<Value> {
    row[0] = Value::Int(id);
    row
}

#[test]
fn insert_get_delete_and_duplicate_ids() -> Result<()> {
    let dir = tempdir()?;
    let mut db = Database::open(dir.path(), options())?;
    db.create_table(PEOPLE, "people", people())?;
    let t = db.table_mut(PEOPLE).ok_or(BurrowError::NotFound("table"))?;

    let ada = person("Ada", 36, b"\x89PNG");
    let id = t.insert(&ada, None)?;
    assert_eq!(id, 1);
    assert_eq!(t.row(id)?, Some(with_id(ada.clone(), 1)));

    t.delete(id, &ada)?;
    assert_eq!(t.row(id)?, None);

    let explicit = with_id(person("Grace", 85, b""), 7);
    assert_eq!(t.insert(&explicit, Some(0))?, 7);
    assert_eq!(t.row_count(), 7);
    let err = t.insert(&explicit, Some(0));
    assert!(matches!(err, Err(BurrowError::DuplicateKey { table: 3, id: 7 })));

    // Deleted slots can be reused with an explicit id.
    assert_eq!(t.insert(&with_id(ada.clone(), 1), Some(0))?, 1);
    db.commit()?;
    Ok(())
}

#[test]
fn rows_and_interned_values_survive_reopen() -> Result<()> {
    let dir = tempdir()?;
    let names = ["Ada", "Grace", "Alan", "Ada", "Barbara"];
    {
        let mut db = Database::open(dir.path(), options())?;
        db.create_table(PEOPLE, "people", people())?;
        db.create_index(PEOPLE, IndexId(1), &[1, 2])?;
        db.batch(|db| {
            let t = db.table_mut(PEOPLE).ok_or(BurrowError::NotFound("table"))?;
            for (i, name) in names.iter().enumerate() {
                t.insert(&person(name, 20 + i as i64, name.as_bytes()), None)?;
            }
            Ok(())
        })?;
        let stats = db.handle().pool().stats();
        assert!(stats.intern_hits >= 2, "{stats:?}");
        db.close()?;
    }

    let mut db = Database::open(dir.path(), options())?;
    let t = db.open_table(
        PEOPLE,
        "people",
        people(),
        &IndexColumn::for_index(IndexId(1), &[1, 2]),
    )?;
    let rows = t.get_all(None).collect::<Result<Vec<_>>>()?;
    assert_eq!(rows.len(), names.len());
    for ((id, row), (i, name)) in rows.iter().zip(names.iter().enumerate()) {
        assert_eq!(*id, i as i64 + 1);
        assert_eq!(row, &with_id(person(name, 20 + i as i64, name.as_bytes()), *id));
    }

    let ada = t.index_mut(IndexId(1)).ok_or(BurrowError::NotFound("index"))?;
    let ids: Vec<i64> = ada
        .seek(SeekOp::Equal, &[Value::str("Ada")])?
        .map(|r| r.map(|rec| rec.row_id().unwrap_or(0)))
        .collect::<Result<_>>()?;
    assert_eq!(ids, vec![1, 4]);
    Ok(())
}

#[test]
fn get_all_skips_unused_columns() -> Result<()> {
    let dir = tempdir()?;
    let mut db = Database::open(dir.path(), options())?;
    db.create_table(PEOPLE, "people", people())?;
    let t = db.table_mut(PEOPLE).ok_or(BurrowError::NotFound("table"))?;
    t.insert(&person("Ada", 36, b"x"), None)?;
    let rows = t
        .get_all(Some(vec![true, false, true, false]))
        .collect::<Result<Vec<_>>>()?;
    assert_eq!(
        rows,
        vec![(
            1,
            vec![Value::Int(1), Value::str(""), Value::Int(36), Value::bin(b"")]
        )]
    );
    Ok(())
}

#[test]
fn alter_growing_rows_keeps_every_value() -> Result<()> {
    let dir = tempdir()?;
    let narrow = vec![ColumnInfo::id(), ColumnInfo::new("a", DataType::Int)];
    let wide = vec![
        ColumnInfo::id(),
        ColumnInfo::new("a", DataType::Int),
        ColumnInfo::new("b", DataType::String),
    ];
    {
        let mut db = Database::open(dir.path(), options())?;
        db.create_table(TableId(1), "t", narrow.clone())?;
        db.batch(|db| {
            let t = db.table_mut(TableId(1)).ok_or(BurrowError::NotFound("table"))?;
            for a in 0..10 {
                t.insert(&[Value::Int(0), Value::Int(a * 11)], None)?;
            }
            Ok(())
        })?;
        db.batch(|db| {
            let t = db.table_mut(TableId(1)).ok_or(BurrowError::NotFound("table"))?;
            t.alter_data(wide.clone(), &[Some(0), Some(1), None])
        })?;
    }

    let mut db = Database::open(dir.path(), options())?;
    let t = db.open_table(TableId(1), "t", wide, &[])?;
    assert_eq!(t.row_count(), 10);
    for id in 1..=10 {
        assert_eq!(
            t.row(id)?,
            Some(vec![Value::Int(id), Value::Int((id - 1) * 11), Value::str("")])
        );
    }
    Ok(())
}

#[test]
fn alter_shrinking_rows_truncates_the_file() -> Result<()> {
    let dir = tempdir()?;
    let mut db = Database::open(dir.path(), options())?;
    db.create_table(PEOPLE, "people", people())?;
    let t = db.table_mut(PEOPLE).ok_or(BurrowError::NotFound("table"))?;
    for i in 0..5 {
        t.insert(&person("p", i, b"bytes"), None)?;
    }
    let before = t.row_size();
    let slim = vec![ColumnInfo::id(), ColumnInfo::new("age", DataType::Bigint)];
    t.alter_data(slim, &[Some(0), Some(2)])?;
    assert!(t.row_size() < before);
    assert_eq!(t.row(5)?, Some(vec![Value::Int(5), Value::Int(4)]));
    db.commit()?;
    Ok(())
}
