#![allow(missing_docs)]

use std::path::Path;

use burrow::db::{Database, DatabaseOptions};
use burrow::storage::{ColumnInfo, IndexColumn, IndexFile, SeekOp};
use burrow::types::{BurrowError, DataType, IndexId, Result, TableId, Value};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tempfile::tempdir;

const TABLE: TableId = TableId(1);
const INDEX: IndexId = IndexId(1);
const KEYS: i64 = 3_000;

fn options() -> DatabaseOptions {
    DatabaseOptions::unsynced().page_size(32_768)
}

fn columns() -> Vec<ColumnInfo> {
    vec![ColumnInfo::id(), ColumnInfo::new("a", DataType::Int)]
}

fn load(dir: &Path, keys: impl IntoIterator<Item = i64>) -> Result<()> {
    let mut db = Database::open(dir, options())?;
    db.create_table(TABLE, "t", columns())?;
    db.create_index(TABLE, INDEX, &[1])?;
    db.batch(|db| {
        let t = db.table_mut(TABLE).ok_or(BurrowError::NotFound("table"))?;
        for k in keys {
            t.insert(&[Value::Int(0), Value::Int(k)], None)?;
        }
        Ok(())
    })
}

fn first_keys(index: &mut IndexFile, desc: bool) -> Result<Vec<i64>> {
    index
        .scan(desc)
        .map(|r| r.map(|rec| rec.cols[0].as_int().unwrap_or(i64::MIN)))
        .collect()
}

#[test]
fn sequential_keys_force_a_split() -> Result<()> {
    let dir = tempdir()?;
    load(dir.path(), 0..KEYS)?;

    let mut db = Database::open(dir.path(), options())?;
    let t = db.open_table(TABLE, "t", columns(), &IndexColumn::for_index(INDEX, &[1]))?;
    let index = t.index_mut(INDEX).ok_or(BurrowError::NotFound("index"))?;
    assert!(index.page_count() >= 2, "pages = {}", index.page_count());

    let asc = first_keys(index, false)?;
    assert_eq!(asc, (0..KEYS).collect::<Vec<_>>());
    let desc = first_keys(index, true)?;
    assert_eq!(desc, (0..KEYS).rev().collect::<Vec<_>>());

    let report = index.verify()?;
    assert_eq!(report.records, KEYS as u64);
    assert!(report.parent_pages >= 1);
    assert!(report.leaf_pages >= 2);
    Ok(())
}

#[test]
fn range_seek_crosses_page_boundaries() -> Result<()> {
    let dir = tempdir()?;
    load(dir.path(), 0..KEYS)?;
    let mut db = Database::open(dir.path(), options())?;
    let t = db.open_table(TABLE, "t", columns(), &IndexColumn::for_index(INDEX, &[1]))?;
    let index = t.index_mut(INDEX).ok_or(BurrowError::NotFound("index"))?;

    let from_mid: Vec<i64> = index
        .seek(SeekOp::GreaterEqual, &[Value::Int(1_000)])?
        .map(|r| r.map(|rec| rec.cols[0].as_int().unwrap_or(-1)))
        .collect::<Result<_>>()?;
    assert_eq!(from_mid, (1_000..KEYS).collect::<Vec<_>>());

    let below: Vec<i64> = index
        .seek(SeekOp::Less, &[Value::Int(2_500)])?
        .map(|r| r.map(|rec| rec.cols[0].as_int().unwrap_or(-1)))
        .collect::<Result<_>>()?;
    assert_eq!(below, (0..2_500).rev().collect::<Vec<_>>());
    Ok(())
}

#[test]
fn random_deletes_keep_the_tree_consistent() -> Result<()> {
    let dir = tempdir()?;
    let mut keys: Vec<i64> = (0..KEYS).collect();
    keys.shuffle(&mut ChaCha8Rng::seed_from_u64(0x5EED));
    load(dir.path(), keys.iter().copied())?;

    let mut db = Database::open(dir.path(), options())?;
    db.open_table(TABLE, "t", columns(), &IndexColumn::for_index(INDEX, &[1]))?;
    let doomed: Vec<i64> = (1..=KEYS).filter(|id| id % 3 == 0).collect();
    db.batch(|db| {
        let t = db.table_mut(TABLE).ok_or(BurrowError::NotFound("table"))?;
        for &id in &doomed {
            let old = t.row(id)?.ok_or(BurrowError::NotFound("row"))?;
            t.delete(id, &old)?;
        }
        Ok(())
    })?;

    let t = db.table_mut(TABLE).ok_or(BurrowError::NotFound("table"))?;
    let mut expected: Vec<i64> = (1..=KEYS)
        .filter(|id| id % 3 != 0)
        .map(|id| keys[(id - 1) as usize])
        .collect();
    expected.sort_unstable();
    let index = t.index_mut(INDEX).ok_or(BurrowError::NotFound("index"))?;
    assert_eq!(first_keys(index, false)?, expected);
    assert_eq!(index.verify()?.records, expected.len() as u64);
    Ok(())
}
