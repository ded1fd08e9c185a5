//! AVL Index Validation Tests
//!
//! Integration tests for the arbor-index public API:
//! - Tree shape and ordering after inserts and deletes
//! - Descending, nulls-last and multi-column keys
//! - Unique and non-unique indexes under MVCC
//! - Randomized insert/delete workloads checked against a model
//! - Concurrent readers and writers on one store

use bytes::Bytes;
use rand::seq::SliceRandom;
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;

use arbor_common::{ArborError, ColumnType, IndexConfig, StoreConfig, Value};
use arbor_index::{
    IndexAvl, IndexDef, MatchType, MemoryStore, PersistentStore, ReadMode, Row, RowVisibility,
    Table, TreeStorage, TxnManager,
};

// =============================================================================
// Helpers
// =============================================================================

fn bigint_index(name: &str, unique: bool) -> IndexAvl {
    let def = IndexDef::new(name, 1, vec![0], vec![ColumnType::BigInt]).with_unique(unique);
    IndexAvl::new(def, 0, IndexConfig::default()).unwrap()
}

fn store() -> MemoryStore {
    MemoryStore::new(1, StoreConfig::default()).unwrap()
}

fn row(id: u64, key: i64) -> Arc<Row> {
    Arc::new(Row::new(id, vec![Value::BigInt(key)]))
}

fn key(row: &Row) -> i64 {
    match row.data()[0] {
        Value::BigInt(k) => k,
        ref other => panic!("unexpected key {:?}", other),
    }
}

/// Verifies parent links and balance factors of the whole tree, returning
/// its height.
fn verify_shape<T: TreeStorage>(tree: &T) -> usize {
    fn walk<T: TreeStorage>(tree: &T, node: Option<arbor_index::NodeId>) -> usize {
        let Some(id) = node else { return 0 };
        let n = tree.get(id).unwrap();
        for child in [n.left(), n.right()].into_iter().flatten() {
            assert_eq!(tree.parent(child).unwrap(), Some(id));
        }
        let l = walk(tree, n.left());
        let r = walk(tree, n.right());
        assert_eq!(n.balance() as i64, r as i64 - l as i64, "balance of {}", id);
        1 + l.max(r)
    }
    if let Some(root) = tree.root() {
        assert_eq!(tree.parent(root).unwrap(), None);
    }
    walk(tree, tree.root())
}

/// Worst-case AVL height for n nodes.
fn height_bound(n: usize) -> usize {
    (1.4405 * ((n + 2) as f64).log2() - 0.3277).floor() as usize
}

// =============================================================================
// Scenarios
// =============================================================================

#[test]
fn test_scenario_insert_delete() {
    let index = bigint_index("idx_scenario", true);
    let store = store();
    let keys = [5, 3, 8, 1, 4, 7, 9, 2, 6];
    let rows: Vec<_> = keys.iter().enumerate().map(|(i, &k)| row(i as u64, k)).collect();
    for r in &rows {
        index.insert(None, &store, Arc::clone(r)).unwrap();
    }

    assert_eq!(key(&index.first_row(None, &store).unwrap().next().unwrap()), 1);
    assert_eq!(key(&index.last_row(None, &store).unwrap().next().unwrap()), 9);
    let h = index.height(&store).unwrap();
    assert!(h <= 5, "height {}", h);

    index.delete(&store, &rows[0]).unwrap();
    let remaining: Vec<_> = index.first_row(None, &store).unwrap().map(|r| key(&r)).collect();
    assert_eq!(remaining, vec![1, 2, 3, 4, 6, 7, 8, 9]);
    assert_eq!(index.check_index(&store).unwrap(), 0);
    verify_shape(&*store.tree(&index).unwrap().read());
}

#[test]
fn test_descending_first_row() {
    let def = IndexDef::new("idx_desc", 1, vec![0], vec![ColumnType::BigInt])
        .with_descending(vec![true]);
    let index = IndexAvl::new(def, 0, IndexConfig::default()).unwrap();
    let store = store();
    for k in 1..=3 {
        index.insert(None, &store, row(k as u64, k)).unwrap();
    }
    assert_eq!(key(&index.first_row(None, &store).unwrap().next().unwrap()), 3);
    let all: Vec<_> = index.first_row(None, &store).unwrap().map(|r| key(&r)).collect();
    assert_eq!(all, vec![3, 2, 1]);
}

#[test]
fn test_unique_conflict_and_null_exemption() {
    let index = bigint_index("idx_unique", true);
    let store = store();
    index.insert(None, &store, row(1, 10)).unwrap();

    let err = index.insert(None, &store, row(2, 10)).unwrap_err();
    assert!(matches!(err, ArborError::DuplicateKey { .. }));
    assert_eq!(err.to_string(), "Duplicate key in unique index idx_unique");

    for id in 3..6 {
        index
            .insert(None, &store, Arc::new(Row::new(id, vec![Value::Null])))
            .unwrap();
    }
    assert_eq!(index.size(&store).unwrap(), 4);
    let nulls = index
        .find_first_row(None, &store, &[Value::Null], 1, MatchType::IsNull, false)
        .unwrap()
        .take_while(|r| r.data()[0].is_null())
        .count();
    assert_eq!(nulls, 3);
}

#[test]
fn test_non_unique_range_scan() {
    let index = bigint_index("idx_range", false);
    let store = store();
    let mut id = 0;
    for k in 0..20 {
        for _ in 0..3 {
            index.insert(None, &store, row(id, k)).unwrap();
            id += 1;
        }
    }

    // keys in [5, 8)
    let hits: Vec<_> = index
        .find_first_row(None, &store, &[Value::BigInt(5)], 1, MatchType::GreaterEqual, false)
        .unwrap()
        .take_while(|r| key(r) < 8)
        .map(|r| (key(&r), r.id()))
        .collect();
    assert_eq!(hits.len(), 9);
    assert!(hits.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(hits[0], (5, 15));

    let after: Vec<_> = index
        .find_first_row(None, &store, &[Value::BigInt(18)], 1, MatchType::Greater, false)
        .unwrap()
        .map(|r| key(&r))
        .collect();
    assert_eq!(after, vec![19, 19, 19]);
}

#[test]
fn test_multi_column_mixed_order() {
    // (region ASC NULLS LAST, amount DESC)
    let def = IndexDef::new(
        "idx_region_amount",
        4,
        vec![1, 0],
        vec![ColumnType::Varchar, ColumnType::Double],
    )
    .with_descending(vec![false, true])
    .with_nulls_last(vec![true, false]);
    let index = IndexAvl::new(def, 0, IndexConfig::default()).unwrap();
    let store = store();

    let data = [
        (1.5, Some("east")),
        (9.0, Some("west")),
        (3.0, None),
        (7.25, Some("east")),
        (2.0, Some("west")),
    ];
    for (i, (amount, region)) in data.iter().enumerate() {
        let values = vec![Value::Double(*amount), Value::from(*region)];
        index
            .insert(None, &store, Arc::new(Row::new(i as u64, values)))
            .unwrap();
    }

    let order: Vec<_> = index.first_row(None, &store).unwrap().map(|r| r.id()).collect();
    assert_eq!(order, vec![3, 0, 1, 4, 2]);

    let west: Vec<_> = index
        .find_first_row(None, &store, &[Value::from("west")], 1, MatchType::Equal, false)
        .unwrap()
        .take_while(|r| r.data()[1] == Value::from("west"))
        .map(|r| r.id())
        .collect();
    assert_eq!(west, vec![1, 4]);
    assert_eq!(index.check_index(&store).unwrap(), 0);
}

#[test]
fn test_binary_keys() {
    let def = IndexDef::new("idx_blob", 1, vec![0], vec![ColumnType::Binary]).with_unique(true);
    let index = IndexAvl::new(def, 0, IndexConfig::default()).unwrap();
    let store = store();
    let blobs: [&'static [u8]; 4] = [b"\x02", b"\x01\xff", b"\x01", b""];
    for (i, b) in blobs.into_iter().enumerate() {
        let values = vec![Value::Binary(Bytes::from_static(b))];
        index
            .insert(None, &store, Arc::new(Row::new(i as u64, values)))
            .unwrap();
    }
    let ids: Vec<_> = index.first_row(None, &store).unwrap().map(|r| r.id()).collect();
    assert_eq!(ids, vec![3, 2, 1, 0]);

    let dup = vec![Value::Binary(Bytes::from_static(b"\x01"))];
    assert!(index
        .insert(None, &store, Arc::new(Row::new(9, dup)))
        .unwrap_err()
        .is_duplicate());
}

// =============================================================================
// MVCC
// =============================================================================

#[test]
fn test_mvcc_reinsert_after_committed_delete() {
    let index = bigint_index("idx_mvcc", true);
    let store = store();
    let mgr = TxnManager::new();

    let t1 = mgr.begin();
    let old = Arc::new(Row::with_version(1, vec![Value::BigInt(7)], t1.xid()));
    index.insert(Some(&t1), &store, Arc::clone(&old)).unwrap();
    mgr.commit(&t1).unwrap();

    let reader = mgr.begin();

    // A concurrent writer cannot reuse the key while the version is live.
    let t2 = mgr.begin();
    let clash = Arc::new(Row::with_version(2, vec![Value::BigInt(7)], t2.xid()));
    assert!(index.insert(Some(&t2), &store, clash).unwrap_err().is_duplicate());

    // After t2 deletes it, t2 may insert a new version with the same key.
    old.version().mark_deleted(t2.xid(), |_| false).unwrap();
    let new = Arc::new(Row::with_version(3, vec![Value::BigInt(7)], t2.xid()));
    index.insert(Some(&t2), &store, Arc::clone(&new)).unwrap();

    let seen = |vis: &dyn RowVisibility| -> Vec<u64> {
        index
            .find_first_row(Some(vis), &store, &[Value::BigInt(7)], 1, MatchType::Equal, false)
            .unwrap()
            .map(|r| r.id())
            .collect()
    };
    assert_eq!(seen(&t2), vec![3]);
    assert_eq!(seen(&reader), vec![1]);
    assert_eq!(index.size(&store).unwrap(), 2);

    mgr.commit(&t2).unwrap();
    let late = mgr.begin();
    assert_eq!(seen(&late), vec![3]);
    assert!(late.can_read(&new, ReadMode::Ref));
}

#[test]
fn test_pending_duplicate_reporting() {
    let def = IndexDef::new("idx_pending", 1, vec![0], vec![ColumnType::BigInt]).with_unique(true);
    let config: IndexConfig =
        serde_json::from_str(r#"{ "report_pending_duplicates": true }"#).unwrap();
    assert!(!config.verify_after_write);
    let index = IndexAvl::new(def, 0, config).unwrap();
    let store = store();
    let mgr = TxnManager::new();

    let writer = mgr.begin();
    let other = mgr.begin();
    let pending = Arc::new(Row::with_version(1, vec![Value::BigInt(1)], writer.xid()));
    index.insert(Some(&writer), &store, pending).unwrap();

    let err = index
        .insert(
            Some(&other),
            &store,
            Arc::new(Row::with_version(2, vec![Value::BigInt(1)], other.xid())),
        )
        .unwrap_err();
    assert!(matches!(err, ArborError::PendingDuplicate { ref index } if index == "idx_pending"));

    // The writer itself sees its own version: a plain duplicate.
    let err = index
        .insert(
            Some(&writer),
            &store,
            Arc::new(Row::with_version(3, vec![Value::BigInt(1)], writer.xid())),
        )
        .unwrap_err();
    assert!(matches!(err, ArborError::DuplicateKey { .. }));
}

#[test]
fn test_aborted_version_does_not_block_key() {
    let index = bigint_index("idx_abort", true);
    let store = store();
    let mgr = TxnManager::new();

    let t1 = mgr.begin();
    index
        .insert(
            Some(&t1),
            &store,
            Arc::new(Row::with_version(1, vec![Value::BigInt(5)], t1.xid())),
        )
        .unwrap();
    mgr.abort(&t1).unwrap();

    let t2 = mgr.begin();
    index
        .insert(
            Some(&t2),
            &store,
            Arc::new(Row::with_version(2, vec![Value::BigInt(5)], t2.xid())),
        )
        .unwrap();
    assert_eq!(index.node_count(Some(&t2), &store).unwrap(), 1);
    assert_eq!(index.node_count(None, &store).unwrap(), 2);
}

#[test]
fn test_table_lifecycle() {
    let mut table = Table::new(
        "orders",
        vec![ColumnType::BigInt, ColumnType::Varchar, ColumnType::Timestamp],
        StoreConfig::default(),
    )
    .unwrap();
    let pk = table
        .add_index(
            IndexDef::new("pk_orders", 1, vec![0], vec![ColumnType::BigInt]).with_primary_key(),
            IndexConfig::default(),
        )
        .unwrap();
    let by_status = table
        .add_index(
            IndexDef::new(
                "idx_status_time",
                2,
                vec![1, 2],
                vec![ColumnType::Varchar, ColumnType::Timestamp],
            )
            .with_descending(vec![false, true]),
            IndexConfig::default(),
        )
        .unwrap();

    let mgr = TxnManager::new();
    let t = mgr.begin();
    let order = |id: i64, status: &str, ts: i64| {
        vec![Value::BigInt(id), Value::from(status), Value::Timestamp(ts)]
    };
    let a = table.insert(&t, order(1, "open", 100)).unwrap();
    table.insert(&t, order(2, "open", 300)).unwrap();
    table.insert(&t, order(3, "done", 200)).unwrap();
    mgr.commit(&t).unwrap();

    let t = mgr.begin();
    table.update(&t, &a, order(1, "done", 400)).unwrap();
    let done: Vec<_> = table
        .find(&t, by_status, &[Value::from("done")])
        .unwrap()
        .iter()
        .map(|r| r.data()[2].clone())
        .collect();
    assert_eq!(done, vec![Value::Timestamp(400), Value::Timestamp(200)]);
    mgr.commit(&t).unwrap();

    assert_eq!(table.vacuum(&mgr).unwrap(), 1);
    let r = mgr.begin();
    let ids: Vec<_> = table.scan(&r, pk).unwrap().iter().map(|row| row.data()[0].clone()).collect();
    assert_eq!(ids, vec![Value::BigInt(1), Value::BigInt(2), Value::BigInt(3)]);
    for index in table.indexes() {
        assert_eq!(index.check_index(table.store()).unwrap(), 0);
        assert_eq!(index.size(table.store()).unwrap(), 3);
    }
}

// =============================================================================
// Randomized
// =============================================================================

#[test]
fn test_random_workload_matches_model() {
    let mut rng = StdRng::seed_from_u64(0xA5B1);
    let index = bigint_index("idx_random", false);
    let store = store();

    // key -> row ids
    let mut model: BTreeMap<(i64, u64), Arc<Row>> = BTreeMap::new();
    let mut next_id = 0u64;

    for step in 0..4000 {
        if model.is_empty() || rng.random_bool(0.6) {
            let r = row(next_id, rng.random_range(0..300));
            next_id += 1;
            index.insert(None, &store, Arc::clone(&r)).unwrap();
            model.insert((key(&r), r.id()), r);
        } else {
            let pick = rng.random_range(0..model.len());
            let k = *model.keys().nth(pick).unwrap();
            let r = model.remove(&k).unwrap();
            assert!(index.delete(&store, &r).unwrap());
        }

        if step % 500 == 0 {
            let tree = store.tree(&index).unwrap().read();
            let h = verify_shape(&*tree);
            assert!(h <= height_bound(model.len()).max(1), "height {} for {}", h, model.len());
        }
    }

    let got: Vec<_> = index.first_row(None, &store).unwrap().map(|r| (key(&r), r.id())).collect();
    let want: Vec<_> = model.keys().copied().collect();
    assert_eq!(got, want);
    assert_eq!(index.size(&store).unwrap(), model.len());
    assert_eq!(index.check_index(&store).unwrap(), 0);

    let back: Vec<_> = index.last_row(None, &store).unwrap().map(|r| (key(&r), r.id())).collect();
    assert_eq!(back, want.iter().rev().copied().collect::<Vec<_>>());
}

#[test]
fn test_round_trip_empties_tree() {
    let mut rng = StdRng::seed_from_u64(7);
    let index = bigint_index("idx_round_trip", true);
    let mut store = store();

    let mut keys: Vec<i64> = (0..1000).collect();
    keys.shuffle(&mut rng);
    let rows: Vec<_> = keys.iter().map(|&k| row(k as u64, k)).collect();
    for r in &rows {
        index.insert(None, &store, Arc::clone(r)).unwrap();
    }
    assert!(index.height(&store).unwrap() <= height_bound(1000));
    assert!(index.size_estimate(&store).unwrap() >= 2);

    let mut order = rows.clone();
    order.shuffle(&mut rng);
    for r in &order {
        assert!(index.delete(&store, r).unwrap());
    }
    assert!(index.is_empty(&store).unwrap());
    assert!(!index.first_row(None, &store).unwrap().has_next());

    // Released slots are reused by the next round once reclaimed.
    assert_eq!(store.reclaim_nodes(), 1000);
    for r in rows.iter().take(10) {
        index.insert(None, &store, Arc::clone(r)).unwrap();
    }
    let tree = store.tree(&index).unwrap().read();
    assert_eq!(tree.arena().slot_count(), 1000);
    assert_eq!(tree.element_count(), 10);
}

// =============================================================================
// Concurrency
// =============================================================================

#[test]
fn test_concurrent_writers_and_readers() {
    let index = bigint_index("idx_concurrent", true);
    let store = store();
    const WRITERS: u64 = 4;
    const PER_WRITER: u64 = 250;

    thread::scope(|s| {
        for w in 0..WRITERS {
            let index = &index;
            let store = &store;
            s.spawn(move || {
                for i in 0..PER_WRITER {
                    let k = (i * WRITERS + w) as i64;
                    index.insert(None, store, row(k as u64, k)).unwrap();
                }
            });
        }
        for _ in 0..2 {
            let index = &index;
            let store = &store;
            s.spawn(move || {
                for _ in 0..50 {
                    let keys: Vec<_> =
                        index.first_row(None, store).unwrap().map(|r| key(&r)).collect();
                    assert!(keys.windows(2).all(|w| w[0] < w[1]));
                }
            });
        }
    });

    let total = (WRITERS * PER_WRITER) as usize;
    assert_eq!(index.size(&store).unwrap(), total);
    let keys: Vec<_> = index.first_row(None, &store).unwrap().map(|r| key(&r)).collect();
    assert_eq!(keys, (0..total as i64).collect::<Vec<_>>());
    assert_eq!(index.check_index(&store).unwrap(), 0);
}

#[test]
fn test_concurrent_duplicate_inserts_admit_one() {
    let index = bigint_index("idx_race", true);
    let store = store();

    let wins: usize = thread::scope(|s| {
        let handles: Vec<_> = (0..8u64)
            .map(|id| {
                let index = &index;
                let store = &store;
                s.spawn(move || index.insert(None, store, row(id, 42)).is_ok() as usize)
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).sum()
    });

    assert_eq!(wins, 1);
    assert_eq!(index.size(&store).unwrap(), 1);
}
