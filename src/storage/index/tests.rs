use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use proptest::prelude::*;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tempfile::tempdir;

use super::*;
use crate::primitives::wal::{Log, LogOptions};
use crate::storage::pool::MemoryInterner;

const INDEX_FILE: FileId = FileId(5);

fn open_index(dir: &Path, page_size: usize, key_types: &[DataType]) -> Result<(Arc<Log>, IndexFile)> {
    let log = Arc::new(Log::open(dir, LogOptions { sync: false })?);
    let stream = BufferedStream::open(Arc::clone(&log), dir, INDEX_FILE, 256, false)?;
    let base: Vec<usize> = (0..key_types.len()).collect();
    let info = IndexFileInfo::new(IndexId(0), key_types, &base)?;
    let index = IndexFile::open(stream, info, Arc::new(MemoryInterner::default()), page_size)?;
    Ok((log, index))
}

fn commit(log: &Log, index: &mut IndexFile) -> Result<()> {
    index.commit(CommitStage::Prepare)?;
    log.commit()?;
    index.commit(CommitStage::Flush)?;
    log.reset()
}

fn rec(k: i64, id: i64) -> IndexRecord {
    IndexRecord::new([Value::Int(k), Value::Int(id)])
}

fn keys<S: Seek>(scan: IndexScan<'_, S>) -> Result<Vec<i64>> {
    scan.map(|r| r.map(|r| r.cols[0].as_int().unwrap_or(i64::MIN)))
        .collect()
}

#[test]
fn scans_are_sorted_in_both_directions() -> Result<()> {
    let dir = tempdir()?;
    let (_log, mut index) = open_index(dir.path(), 512, &[DataType::Int])?;
    let mut input: Vec<i64> = (0..2000).collect();
    input.shuffle(&mut ChaCha8Rng::seed_from_u64(7));
    for &k in &input {
        assert!(index.insert(&rec(k, k))?);
    }
    assert!(index.page_count() > 10);
    let asc = keys(index.scan(false))?;
    assert_eq!(asc, (0..2000).collect::<Vec<_>>());
    let desc = keys(index.scan(true))?;
    assert_eq!(desc, (0..2000).rev().collect::<Vec<_>>());
    let report = index.verify()?;
    assert_eq!(report.records, 2000);
    assert!(report.depth >= 2);
    assert!(index.stats().splits > 0);
    Ok(())
}

#[test]
fn duplicate_records_are_refused() -> Result<()> {
    let dir = tempdir()?;
    let (_log, mut index) = open_index(dir.path(), 512, &[DataType::Int])?;
    assert!(index.insert(&rec(3, 1))?);
    assert!(!index.insert(&rec(3, 1))?);
    assert!(index.insert(&rec(3, 2))?);
    assert!(index.contains(&rec(3, 2))?);
    assert!(!index.contains(&rec(3, 4))?);
    assert!(index.insert(&IndexRecord::new([Value::Int(1)])).is_err());
    Ok(())
}

#[test]
fn seek_operators_select_ranges() -> Result<()> {
    let dir = tempdir()?;
    let (_log, mut index) = open_index(dir.path(), 512, &[DataType::Int])?;
    for k in (0..1000).step_by(2) {
        index.insert(&rec(k, k + 1))?;
    }
    let at = [Value::Int(500)];
    let ge = keys(index.seek(SeekOp::GreaterEqual, &at)?)?;
    assert_eq!(ge, (500..1000).step_by(2).collect::<Vec<_>>());
    let gt = keys(index.seek(SeekOp::Greater, &at)?)?;
    assert_eq!(gt, (502..1000).step_by(2).collect::<Vec<_>>());
    let le = keys(index.seek(SeekOp::LessEqual, &at)?)?;
    assert_eq!(le, (0..=500).rev().step_by(2).collect::<Vec<_>>());
    let lt = keys(index.seek(SeekOp::Less, &at)?)?;
    assert_eq!(lt, (0..500).step_by(2).collect::<Vec<i64>>().into_iter().rev().collect::<Vec<_>>());
    assert_eq!(keys(index.seek(SeekOp::Equal, &at)?)?, vec![500]);
    assert!(keys(index.seek(SeekOp::Equal, &[Value::Int(501)])?)?.is_empty());
    let odd = [Value::Int(501)];
    assert_eq!(keys(index.seek(SeekOp::GreaterEqual, &odd)?)?.first(), Some(&502));
    assert_eq!(keys(index.seek(SeekOp::LessEqual, &odd)?)?.first(), Some(&500));
    Ok(())
}

#[test]
fn equal_seek_returns_every_row_of_a_key() -> Result<()> {
    let dir = tempdir()?;
    let (_log, mut index) = open_index(dir.path(), 512, &[DataType::Int])?;
    for id in 1..=300 {
        index.insert(&rec(id % 3, id))?;
    }
    let ids: Vec<i64> = index
        .seek(SeekOp::Equal, &[Value::Int(1)])?
        .map(|r| r.map(|r| r.row_id().unwrap_or(0)))
        .collect::<Result<_>>()?;
    assert_eq!(ids, (1..=300).filter(|id| id % 3 == 1).collect::<Vec<_>>());
    Ok(())
}

#[test]
fn custom_seek_closure_positions_scan() -> Result<()> {
    let dir = tempdir()?;
    let (_log, mut index) = open_index(dir.path(), 512, &[DataType::Int])?;
    for k in 0..400 {
        index.insert(&rec(k, k))?;
    }
    let from_250 = |r: &IndexRecord| Value::Int(250).compare(&r.cols[0]).then(Ordering::Less);
    let got = keys(index.from(from_250, false))?;
    assert_eq!(got, (250..400).collect::<Vec<_>>());
    Ok(())
}

#[test]
fn deletes_leave_remaining_records_ordered() -> Result<()> {
    let dir = tempdir()?;
    let (_log, mut index) = open_index(dir.path(), 512, &[DataType::Int])?;
    for k in 0..600 {
        index.insert(&rec(k, k))?;
    }
    let pages = index.page_count();
    for k in (0..600).step_by(2) {
        assert!(index.delete(&rec(k, k))?);
    }
    assert!(!index.delete(&rec(0, 0))?);
    assert_eq!(index.page_count(), pages);
    let left = keys(index.scan(false))?;
    assert_eq!(left, (1..600).step_by(2).collect::<Vec<_>>());
    assert_eq!(index.verify()?.records, 300);
    assert_eq!(index.stats().deletes, 300);
    Ok(())
}

#[test]
fn committed_index_survives_reopen() -> Result<()> {
    let dir = tempdir()?;
    let pages = {
        let (log, mut index) = open_index(dir.path(), 512, &[DataType::Int])?;
        for k in (0..800).rev() {
            index.insert(&rec(k, k))?;
        }
        commit(&log, &mut index)?;
        assert!(!index.is_dirty());
        index.page_count()
    };
    let (_log, mut index) = open_index(dir.path(), 512, &[DataType::Int])?;
    assert_eq!(index.page_count(), pages);
    assert_eq!(keys(index.scan(false))?, (0..800).collect::<Vec<_>>());
    assert_eq!(index.verify()?.records, 800);
    assert!(index.stats().pages_loaded > 0);
    Ok(())
}

#[test]
fn rollback_restores_last_commit() -> Result<()> {
    let dir = tempdir()?;
    let (log, mut index) = open_index(dir.path(), 512, &[DataType::Int])?;
    for k in 0..100 {
        index.insert(&rec(k, k))?;
    }
    commit(&log, &mut index)?;
    let pages = index.page_count();
    for k in 100..500 {
        index.insert(&rec(k, k))?;
    }
    index.delete(&rec(5, 5))?;
    assert!(index.is_dirty());
    log.reset()?;
    index.commit(CommitStage::Rollback)?;
    assert!(!index.is_dirty());
    assert_eq!(index.page_count(), pages);
    assert_eq!(keys(index.scan(false))?, (0..100).collect::<Vec<_>>());
    index.verify()?;
    Ok(())
}

#[test]
fn string_keys_use_ordinal_order() -> Result<()> {
    let dir = tempdir()?;
    let (_log, mut index) = open_index(dir.path(), 1024, &[DataType::String, DataType::Int])?;
    let names = ["pear", "Apple", "apple", "banana", "", "zebra", "Zulu"];
    for (id, name) in names.iter().enumerate() {
        let r = IndexRecord::new([Value::str(name), Value::Int(id as i64), Value::Int(id as i64)]);
        index.insert(&r)?;
    }
    let got: Vec<String> = index
        .scan(false)
        .map(|r| {
            r.map(|r| match &r.cols[0] {
                Value::Str(s) => s.to_string(),
                other => other.to_string(),
            })
        })
        .collect::<Result<_>>()?;
    let mut expected: Vec<String> = names.iter().map(|s| s.to_string()).collect();
    expected.sort();
    assert_eq!(got, expected);
    let hits = index
        .seek(SeekOp::Equal, &[Value::str("banana")])?
        .collect::<Result<Vec<_>>>()?;
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].row_id(), Some(3));
    Ok(())
}

#[test]
fn extract_key_projects_columns() -> Result<()> {
    let dir = tempdir()?;
    let log = Arc::new(Log::open(dir.path(), LogOptions { sync: false })?);
    let stream = BufferedStream::open(Arc::clone(&log), dir.path(), INDEX_FILE, 256, false)?;
    let info = IndexFileInfo::new(IndexId(2), &[DataType::Int], &[2])?;
    assert_eq!(info.file_id(), FileId(9));
    let index = IndexFile::open(stream, info, Arc::new(MemoryInterner::default()), 512)?;
    let row = [Value::Int(10), Value::str("x"), Value::Int(30)];
    let key = index.extract_key(&row, 10)?;
    assert_eq!(key, rec(30, 10));
    assert!(index.extract_key(&row[..2], 10).is_err());
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn scan_matches_sorted_set(input in prop::collection::vec(-5000i64..5000, 0..400)) {
        let dir = tempdir().unwrap();
        let (_log, mut index) = open_index(dir.path(), 512, &[DataType::Int]).unwrap();
        let mut expected = BTreeSet::new();
        for &k in &input {
            let added = index.insert(&rec(k, 0)).unwrap();
            prop_assert_eq!(added, expected.insert(k));
        }
        let asc = keys(index.scan(false)).unwrap();
        prop_assert_eq!(&asc, &expected.iter().copied().collect::<Vec<_>>());
        let mut desc = keys(index.scan(true)).unwrap();
        desc.reverse();
        prop_assert_eq!(desc, asc);
        index.verify().unwrap();
    }
}
