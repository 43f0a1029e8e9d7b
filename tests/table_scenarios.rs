//! End-to-end scenarios against the public `Table` API: round trips,
//! duplicate rejection, splits, rebalancing deletes, and the
//! order-independence of the final row set.

use minidb::{Row, Table};
use tempfile::tempdir;

fn row(id: i32) -> Row {
    Row::new(id, "user", "user@example.com").unwrap()
}

#[test]
fn basic_insert_select_round_trip() {
    let dir = tempdir().unwrap();
    let mut table = Table::open(dir.path().join("test.db")).unwrap();

    table.insert(&Row::new(1, "a", "a@a.com").unwrap()).unwrap();
    table.insert(&Row::new(2, "b", "b@b.com").unwrap()).unwrap();
    table.insert(&Row::new(3, "c", "c@c.com").unwrap()).unwrap();

    let rows = table.scan().unwrap();
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0].id(), 1);
    assert_eq!(rows[0].username().unwrap(), "a");
    assert_eq!(rows[1].id(), 2);
    assert_eq!(rows[1].email().unwrap(), "b@b.com");
    assert_eq!(rows[2].id(), 3);
}

#[test]
fn duplicate_key_is_rejected() {
    let dir = tempdir().unwrap();
    let mut table = Table::open(dir.path().join("test.db")).unwrap();

    table.insert(&Row::new(1, "a", "a@a.com").unwrap()).unwrap();
    let result = table.insert(&Row::new(1, "x", "x@x.com").unwrap());

    assert!(result.is_err());
    assert!(result.unwrap_err().to_string().contains("duplicate key"));

    let rows = table.scan().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].username().unwrap(), "a");
}

#[test]
fn out_of_order_insertion_scans_sorted() {
    let dir = tempdir().unwrap();
    let mut table = Table::open(dir.path().join("test.db")).unwrap();

    let mut rejected = 0;
    for key in [3, 1, 4, 1, 5, 9, 2, 6] {
        if table.insert(&row(key)).is_err() {
            rejected += 1;
        }
    }

    assert_eq!(rejected, 1);
    let ids: Vec<i32> = table.scan().unwrap().iter().map(Row::id).collect();
    assert_eq!(ids, vec![1, 2, 3, 4, 5, 6, 9]);
}

#[test]
fn leaf_split_produces_internal_root() {
    let dir = tempdir().unwrap();
    let mut table = Table::open(dir.path().join("test.db")).unwrap();

    for key in 1..=20 {
        table.insert(&row(key)).unwrap();
    }

    let structure = table.structure().unwrap();
    assert!(structure.contains("internal (page 1"));
    assert!(structure.matches("- leaf").count() >= 2);

    let ids: Vec<i32> = table.scan().unwrap().iter().map(Row::id).collect();
    assert_eq!(ids, (1..=20).collect::<Vec<_>>());
}

#[test]
fn delete_with_rebalance_keeps_invariants_at_every_step() {
    let dir = tempdir().unwrap();
    let mut table = Table::open(dir.path().join("test.db")).unwrap();

    for key in 1..=20 {
        table.insert(&row(key)).unwrap();
    }
    for key in 1..=5 {
        table.delete(key).unwrap();
        table.validate().unwrap();
    }

    let ids: Vec<i32> = table.scan().unwrap().iter().map(Row::id).collect();
    assert_eq!(ids, (6..=20).collect::<Vec<_>>());
    assert_eq!(table.num_rows(), 15);
}

#[test]
fn delete_every_row_then_reinsert() {
    let dir = tempdir().unwrap();
    let mut table = Table::open(dir.path().join("test.db")).unwrap();

    for key in 1..=20 {
        table.insert(&row(key)).unwrap();
    }
    for key in 1..=20 {
        table.delete(key).unwrap();
    }

    assert_eq!(table.num_rows(), 0);
    assert!(table.scan().unwrap().is_empty());

    table.insert(&row(11)).unwrap();
    let ids: Vec<i32> = table.scan().unwrap().iter().map(Row::id).collect();
    assert_eq!(ids, vec![11]);
}

#[test]
fn final_row_set_is_order_independent() {
    let keys = [7, 23, 4, 42, 15, 8, 16, 1, 30, 9, 2, 28];
    let permutations: [Vec<i32>; 3] = [
        keys.to_vec(),
        keys.iter().rev().copied().collect(),
        {
            // interleave halves for a third distinct order
            let (a, b) = keys.split_at(keys.len() / 2);
            a.iter().zip(b.iter()).flat_map(|(x, y)| [*x, *y]).collect()
        },
    ];

    let mut sorted = keys.to_vec();
    sorted.sort();

    for (i, order) in permutations.iter().enumerate() {
        let dir = tempdir().unwrap();
        let mut table = Table::open(dir.path().join(format!("perm{}.db", i))).unwrap();
        for &key in order {
            table.insert(&row(key)).unwrap();
        }

        let ids: Vec<i32> = table.scan().unwrap().iter().map(Row::id).collect();
        assert_eq!(ids, sorted, "permutation {} scans out of order", i);
    }
}

#[test]
fn cursor_walks_rows_one_at_a_time() {
    let dir = tempdir().unwrap();
    let mut table = Table::open(dir.path().join("test.db")).unwrap();
    for key in [5, 3, 9] {
        table.insert(&row(key)).unwrap();
    }

    let mut cursor = table.scan_start().unwrap();
    let mut seen = Vec::new();
    while !cursor.end_of_table {
        seen.push(table.cursor_value(&cursor).unwrap().id());
        table.advance_cursor(&mut cursor).unwrap();
    }

    assert_eq!(seen, vec![3, 5, 9]);
}

#[test]
fn find_reports_hit_and_miss_positions() {
    let dir = tempdir().unwrap();
    let mut table = Table::open(dir.path().join("test.db")).unwrap();
    for key in [10, 20, 30] {
        table.insert(&row(key)).unwrap();
    }

    let hit = table.find(20).unwrap();
    assert!(!hit.end_of_table);
    assert_eq!(table.cursor_value(&hit).unwrap().id(), 20);

    // a miss between existing keys points at the next larger key
    let miss = table.find(25).unwrap();
    assert!(!miss.end_of_table);
    assert_eq!(table.cursor_value(&miss).unwrap().id(), 30);

    // a miss past every key is end-of-table
    let past = table.find(99).unwrap();
    assert!(past.end_of_table);
}
