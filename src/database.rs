//! # Table Handle
//!
//! `Table` is the public face of the engine: it owns the pager and the
//! in-memory copy of the page-0 header, and routes every operation through
//! a per-call [`BTree`] view.
//!
//! ## Lifecycle
//!
//! ```text
//! open:   read header from page 0 (or bootstrap a fresh file:
//!         page 0 header, page 1 empty leaf root, allocator at 2)
//! ops:    insert / delete / find / scan, all in memory
//! close:  write header to page 0, flush every resident page
//! ```
//!
//! Durability is only at [`Table::close`]. Dropping a `Table` without
//! closing it discards every change since open; an interrupted session
//! yields the previous-close state. The engine assumes exclusive access to
//! the file for the duration of a session.

use std::path::Path;

use eyre::Result;

use crate::btree::{BTree, Cursor};
use crate::record::Row;
use crate::storage::{DbHeader, Pager};

#[derive(Debug)]
pub struct Table {
    pager: Pager,
    header: DbHeader,
}

impl Table {
    /// Opens a database file, creating and initializing it if absent or
    /// empty. Rejects files with a partial trailing page or a header whose
    /// root/allocator fields are out of range.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut pager = Pager::open(path)?;

        if pager.num_pages() == 0 {
            let mut header = DbHeader::new_db();
            BTree::new(&mut pager, &mut header).init_empty()?;
            return Ok(Self { pager, header });
        }

        let header = DbHeader::read_from_page(pager.page(0)?)?;
        Ok(Self { pager, header })
    }

    /// Writes the header back to page 0 and flushes every resident page.
    pub fn close(mut self) -> Result<()> {
        self.header.write_to_page(self.pager.page_mut(0)?)?;
        self.pager.flush_all()
    }

    fn tree(&mut self) -> BTree<'_> {
        BTree::new(&mut self.pager, &mut self.header)
    }

    /// Inserts a row keyed by its id; fails with "duplicate key" if the id
    /// is already present, leaving the tree untouched.
    pub fn insert(&mut self, row: &Row) -> Result<()> {
        self.tree().insert(row)
    }

    /// Deletes the row with the given key; fails with "key not found" if
    /// absent, leaving the tree untouched.
    pub fn delete(&mut self, key: i32) -> Result<()> {
        self.tree().delete(key)
    }

    /// Cursor at the cell holding `key`, or at its insertion position.
    pub fn find(&mut self, key: i32) -> Result<Cursor> {
        self.tree().find(key)
    }

    /// Row with the given key, if present.
    pub fn get(&mut self, key: i32) -> Result<Option<Row>> {
        let cursor = self.find(key)?;
        if cursor.end_of_table {
            return Ok(None);
        }
        let row = self.cursor_value(&cursor)?;
        Ok((row.id() == key).then_some(row))
    }

    /// Cursor at the first row in key order.
    pub fn scan_start(&mut self) -> Result<Cursor> {
        self.tree().scan_start()
    }

    pub fn advance_cursor(&mut self, cursor: &mut Cursor) -> Result<()> {
        self.tree().advance(cursor)
    }

    pub fn cursor_value(&mut self, cursor: &Cursor) -> Result<Row> {
        self.tree().row(cursor)
    }

    /// Every row in ascending key order.
    pub fn scan(&mut self) -> Result<Vec<Row>> {
        let mut rows = Vec::with_capacity(self.header.num_rows() as usize);
        let mut cursor = self.scan_start()?;
        while !cursor.end_of_table {
            rows.push(self.cursor_value(&cursor)?);
            self.advance_cursor(&mut cursor)?;
        }
        Ok(rows)
    }

    pub fn num_rows(&self) -> u32 {
        self.header.num_rows()
    }

    pub fn root_page_num(&self) -> u32 {
        self.header.root_page_num()
    }

    /// Indented dump of the tree shape (the `.btree` meta-command).
    pub fn structure(&mut self) -> Result<String> {
        self.tree().structure()
    }

    /// Full invariant check; used by tests and debug builds.
    pub fn validate(&mut self) -> Result<()> {
        self.tree().validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn row(id: i32) -> Row {
        Row::new(id, "user", "user@example.com").unwrap()
    }

    #[test]
    fn open_initializes_fresh_database() {
        let dir = tempdir().unwrap();
        let mut table = Table::open(dir.path().join("test.db")).unwrap();

        assert_eq!(table.num_rows(), 0);
        assert_eq!(table.root_page_num(), 1);
        assert!(table.scan().unwrap().is_empty());
    }

    #[test]
    fn get_returns_matching_row_or_none() {
        let dir = tempdir().unwrap();
        let mut table = Table::open(dir.path().join("test.db")).unwrap();
        table.insert(&Row::new(3, "carol", "carol@c.com").unwrap()).unwrap();

        let hit = table.get(3).unwrap().unwrap();
        assert_eq!(hit.username().unwrap(), "carol");
        assert!(table.get(4).unwrap().is_none());
    }

    #[test]
    fn close_persists_rows_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        {
            let mut table = Table::open(&path).unwrap();
            for key in [2, 1, 3] {
                table.insert(&row(key)).unwrap();
            }
            table.close().unwrap();
        }

        let mut table = Table::open(&path).unwrap();
        assert_eq!(table.num_rows(), 3);
        let ids: Vec<i32> = table.scan().unwrap().iter().map(Row::id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn drop_without_close_discards_changes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        {
            let mut table = Table::open(&path).unwrap();
            table.insert(&row(1)).unwrap();
            table.close().unwrap();
        }
        {
            let mut table = Table::open(&path).unwrap();
            table.insert(&row(2)).unwrap();
            // dropped without close
        }

        let mut table = Table::open(&path).unwrap();
        let ids: Vec<i32> = table.scan().unwrap().iter().map(Row::id).collect();
        assert_eq!(ids, vec![1]);
    }

    #[test]
    fn open_rejects_corrupt_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");
        // a full page of zeroes: length is valid, header is not
        std::fs::write(&path, vec![0u8; crate::storage::PAGE_SIZE]).unwrap();

        let result = Table::open(&path);

        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("invalid header"));
    }

    #[test]
    fn structure_shows_split_after_enough_inserts() {
        let dir = tempdir().unwrap();
        let mut table = Table::open(dir.path().join("test.db")).unwrap();
        for key in 1..=20 {
            table.insert(&row(key)).unwrap();
        }

        let structure = table.structure().unwrap();

        assert!(structure.contains("internal (page 1"));
        assert!(structure.matches("leaf").count() >= 2);
    }
}
