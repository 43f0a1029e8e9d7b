//! # B+Tree Leaf Node Implementation
//!
//! Leaf nodes store the actual (key, row) cells and are linked together for
//! ordered scans. Cells are a packed array directly after the leaf header,
//! sorted by key; insertion and removal shift the tail of the array by one
//! cell.
//!
//! ## Header Layout (14 bytes)
//!
//! ```text
//! Offset  Size  Field      Description
//! ------  ----  ---------  ----------------------------------------
//! 0       1     node_type  always 1 (leaf)
//! 1       1     is_root    nonzero when this leaf is the tree root
//! 2       4     parent     parent page number (0 if none)
//! 6       4     num_cells  live cells in this leaf
//! 10      4     next_leaf  next leaf in key order (0 if last)
//! ```
//!
//! ## Cell Layout (297 bytes)
//!
//! ```text
//! +----------+----------------------+
//! | key (4B) |     row (293B)       |
//! +----------+----------------------+
//! ```
//!
//! With 4096-byte pages this yields `LEAF_MAX_CELLS = 13`; rebalancing keeps
//! non-root leaves at or above `LEAF_MIN_CELLS = 6`.
//!
//! ## View Pair
//!
//! `LeafNode` borrows a page immutably for search and scans; `LeafNodeMut`
//! borrows it mutably for cell edits. Writing through a view mutates the
//! underlying page buffer, which is what makes structural changes durable
//! when the pager flushes at close.

use eyre::{ensure, Result};
use zerocopy::little_endian::{I32, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::record::{Row, ROW_SIZE};
use crate::storage::PAGE_SIZE;

use super::node::{NodeHeader, NodeType, NODE_HEADER_SIZE};

pub const LEAF_HEADER_SIZE: usize = NODE_HEADER_SIZE + 8;
pub const LEAF_CELL_SIZE: usize = 4 + ROW_SIZE;
pub const LEAF_MAX_CELLS: usize = (PAGE_SIZE - LEAF_HEADER_SIZE) / LEAF_CELL_SIZE;
pub const LEAF_MIN_CELLS: usize = LEAF_MAX_CELLS / 2;

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
struct LeafHeader {
    node_type: u8,
    is_root: u8,
    parent: U32,
    num_cells: U32,
    next_leaf: U32,
}

const _: () = assert!(std::mem::size_of::<LeafHeader>() == LEAF_HEADER_SIZE);

impl LeafHeader {
    zerocopy_accessors! {
        parent: u32,
        num_cells: u32,
        next_leaf: u32,
    }
}

/// Outcome of a key search within one leaf: the matching cell index, or the
/// index where the key would be inserted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchResult {
    Found(usize),
    NotFound(usize),
}

#[derive(Debug)]
pub struct LeafNode<'a> {
    data: &'a [u8],
}

pub struct LeafNodeMut<'a> {
    data: &'a mut [u8],
}

fn check_leaf_page(data: &[u8]) -> Result<()> {
    ensure!(
        data.len() == PAGE_SIZE,
        "invalid page size: {} != {}",
        data.len(),
        PAGE_SIZE
    );
    let header = NodeHeader::from_page(data)?;
    ensure!(
        header.node_type()? == NodeType::Leaf,
        "expected leaf page, got {:?}",
        header.node_type()?
    );
    Ok(())
}

fn cell_offset(index: usize) -> usize {
    LEAF_HEADER_SIZE + index * LEAF_CELL_SIZE
}

impl<'a> LeafNode<'a> {
    pub fn from_page(data: &'a [u8]) -> Result<Self> {
        check_leaf_page(data)?;
        Ok(Self { data })
    }

    fn header(&self) -> &LeafHeader {
        LeafHeader::ref_from_bytes(&self.data[..LEAF_HEADER_SIZE]).unwrap() // INVARIANT: page validated in from_page
    }

    pub fn num_cells(&self) -> u32 {
        self.header().num_cells()
    }

    pub fn next_leaf(&self) -> u32 {
        self.header().next_leaf()
    }

    pub fn parent(&self) -> u32 {
        self.header().parent()
    }

    pub fn is_root(&self) -> bool {
        self.header().is_root != 0
    }

    pub fn key_at(&self, index: usize) -> Result<i32> {
        ensure!(
            index < self.num_cells() as usize,
            "cell index {} out of bounds (num_cells={})",
            index,
            self.num_cells()
        );
        let offset = cell_offset(index);
        let key = I32::ref_from_bytes(&self.data[offset..offset + 4])
            .map_err(|e| eyre::eyre!("failed to read key at cell {}: {:?}", index, e))?;
        Ok(key.get())
    }

    pub fn row_at(&self, index: usize) -> Result<Row> {
        ensure!(
            index < self.num_cells() as usize,
            "cell index {} out of bounds (num_cells={})",
            index,
            self.num_cells()
        );
        let offset = cell_offset(index) + 4;
        Row::read_from(&self.data[offset..offset + ROW_SIZE])
    }

    /// Binary search for `key`; on a miss the returned index is the
    /// insertion position that keeps cells sorted.
    pub fn find(&self, key: i32) -> Result<SearchResult> {
        let mut left = 0usize;
        let mut right = self.num_cells() as usize;

        while left < right {
            let mid = left + (right - left) / 2;
            let mid_key = self.key_at(mid)?;

            match mid_key.cmp(&key) {
                std::cmp::Ordering::Equal => return Ok(SearchResult::Found(mid)),
                std::cmp::Ordering::Less => left = mid + 1,
                std::cmp::Ordering::Greater => right = mid,
            }
        }

        Ok(SearchResult::NotFound(left))
    }

    /// Largest key in the leaf; `None` while the leaf is empty.
    pub fn max_key(&self) -> Result<Option<i32>> {
        let n = self.num_cells() as usize;
        if n == 0 {
            return Ok(None);
        }
        Ok(Some(self.key_at(n - 1)?))
    }
}

impl<'a> LeafNodeMut<'a> {
    pub fn from_page(data: &'a mut [u8]) -> Result<Self> {
        check_leaf_page(data)?;
        Ok(Self { data })
    }

    /// Initializes the page as an empty, non-root, parentless leaf.
    pub fn init(data: &'a mut [u8]) -> Result<Self> {
        ensure!(
            data.len() == PAGE_SIZE,
            "invalid page size: {} != {}",
            data.len(),
            PAGE_SIZE
        );

        let header = LeafHeader {
            node_type: NodeType::Leaf as u8,
            is_root: 0,
            parent: U32::new(0),
            num_cells: U32::new(0),
            next_leaf: U32::new(0),
        };
        data[..LEAF_HEADER_SIZE].copy_from_slice(header.as_bytes());

        Ok(Self { data })
    }

    fn header(&self) -> &LeafHeader {
        LeafHeader::ref_from_bytes(&self.data[..LEAF_HEADER_SIZE]).unwrap() // INVARIANT: page validated in from_page/init
    }

    fn header_mut(&mut self) -> &mut LeafHeader {
        LeafHeader::mut_from_bytes(&mut self.data[..LEAF_HEADER_SIZE]).unwrap() // INVARIANT: page validated in from_page/init
    }

    pub fn num_cells(&self) -> u32 {
        self.header().num_cells()
    }

    pub fn next_leaf(&self) -> u32 {
        self.header().next_leaf()
    }

    pub fn set_next_leaf(&mut self, page_num: u32) {
        self.header_mut().set_next_leaf(page_num);
    }

    pub fn parent(&self) -> u32 {
        self.header().parent()
    }

    pub fn set_parent(&mut self, page_num: u32) {
        self.header_mut().set_parent(page_num);
    }

    pub fn is_root(&self) -> bool {
        self.header().is_root != 0
    }

    pub fn set_root(&mut self, is_root: bool) {
        self.header_mut().is_root = is_root as u8;
    }

    pub fn key_at(&self, index: usize) -> Result<i32> {
        ensure!(
            index < self.num_cells() as usize,
            "cell index {} out of bounds (num_cells={})",
            index,
            self.num_cells()
        );
        let offset = cell_offset(index);
        let key = I32::ref_from_bytes(&self.data[offset..offset + 4])
            .map_err(|e| eyre::eyre!("failed to read key at cell {}: {:?}", index, e))?;
        Ok(key.get())
    }

    pub fn row_at(&self, index: usize) -> Result<Row> {
        ensure!(
            index < self.num_cells() as usize,
            "cell index {} out of bounds (num_cells={})",
            index,
            self.num_cells()
        );
        let offset = cell_offset(index) + 4;
        Row::read_from(&self.data[offset..offset + ROW_SIZE])
    }

    fn write_cell(&mut self, index: usize, key: i32, row: &Row) -> Result<()> {
        let offset = cell_offset(index);
        self.data[offset..offset + 4].copy_from_slice(I32::new(key).as_bytes());
        row.write_to(&mut self.data[offset + 4..offset + LEAF_CELL_SIZE])
    }

    /// Inserts a cell at `index`, shifting later cells one slot right.
    pub fn insert_at(&mut self, index: usize, key: i32, row: &Row) -> Result<()> {
        let n = self.num_cells() as usize;
        ensure!(
            n < LEAF_MAX_CELLS,
            "leaf full: {} cells (max {})",
            n,
            LEAF_MAX_CELLS
        );
        ensure!(
            index <= n,
            "insert index {} out of bounds (num_cells={})",
            index,
            n
        );

        if index < n {
            self.data.copy_within(cell_offset(index)..cell_offset(n), cell_offset(index + 1));
        }
        self.write_cell(index, key, row)?;
        self.header_mut().set_num_cells(n as u32 + 1);

        Ok(())
    }

    /// Removes the cell at `index`, shifting later cells one slot left.
    pub fn remove_at(&mut self, index: usize) -> Result<()> {
        let n = self.num_cells() as usize;
        ensure!(
            index < n,
            "remove index {} out of bounds (num_cells={})",
            index,
            n
        );

        if index + 1 < n {
            self.data.copy_within(cell_offset(index + 1)..cell_offset(n), cell_offset(index));
        }
        self.header_mut().set_num_cells(n as u32 - 1);

        Ok(())
    }
}
