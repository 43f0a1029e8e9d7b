//! # B+Tree Operations
//!
//! This module implements the tree state machines on top of the node views:
//! descent and cursors, insertion with splits, and deletion with
//! borrow/merge rebalancing up to root collapse.
//!
//! ## Insert Algorithm
//!
//! ```text
//! 1. Descend from the root comparing against separator keys
//! 2. Binary search the leaf for the insertion position
//! 3. Duplicate key: fail before touching anything
//! 4. Room in the leaf: shift cells right, write, done
//! 5. Leaf full: split in half, splice the new leaf into the sibling
//!    chain, hand the new page to the parent
//! 6. Parent overflow: collect children, sort by subtree max key,
//!    rebuild as two halves, recurse upward
//! 7. Root split: move the root's bytes to a fresh page and rebuild the
//!    root page as an internal node over both halves, so the header's
//!    root page number never changes on the way up
//! ```
//!
//! ## Delete Algorithm
//!
//! ```text
//! 1. Descend and search as for insert; missing key fails untouched
//! 2. Shift cells left over the removed cell
//! 3. Leaf under minimum (non-root): borrow from the left sibling, else
//!    from the right, else merge (left preferred)
//! 4. A merge removes a child from the parent; an underfull parent
//!    rebalances the same way, shuffling child lists and rebuilding
//! 5. An internal root left with a single child collapses: the child
//!    becomes the root, and the header's root page number moves
//! ```
//!
//! ## Rebuild as the Choke Point
//!
//! Structural surgery on internal nodes funnels through
//! `rebuild_internal`, which rewrites a node from a sorted child list,
//! regenerates every separator from the actual subtree max keys, and
//! re-parents all children. Borrow and merge for internals reduce to
//! "move a child between lists, rebuild both nodes", which keeps the
//! separator and parent invariants intact by construction.
//!
//! ## Cursors
//!
//! A cursor is a plain (page, cell, end-of-table) value over the leaf
//! chain. Any insert or delete may relocate cells, so a cursor is a
//! single-use position: consumers re-find after mutating.
//!
//! ## Validation
//!
//! In debug builds every successful insert/delete re-checks the tree-wide
//! invariants (uniform depth, occupancy bands, separator = subtree max,
//! sibling chain = in-order traversal, row count). Release builds skip
//! this entirely.

use eyre::{bail, ensure, Result};
use smallvec::{smallvec, SmallVec};

use crate::record::Row;
use crate::storage::{DbHeader, Pager, TABLE_MAX_PAGES};

use super::internal::{
    InternalNode, InternalNodeMut, INTERNAL_MAX_CHILDREN, INTERNAL_MAX_KEYS, INTERNAL_MIN_KEYS,
};
use super::leaf::{LeafNode, LeafNodeMut, SearchResult, LEAF_MAX_CELLS, LEAF_MIN_CELLS};
use super::node::{NodeHeader, NodeType};

/// Child-page scratch list; splits and merges stay small except on the
/// widest internal nodes, where it spills to the heap.
type ChildList = SmallVec<[u32; 16]>;

/// A position in the leaf chain. Held by value; invalidated by any
/// structural change to the tree.
#[derive(Debug, Clone, Copy)]
pub struct Cursor {
    pub page_num: u32,
    pub cell_num: u32,
    pub end_of_table: bool,
}

/// One tree operation's view of the database: the pager for page access
/// and the in-memory header for root/allocator/row-count updates.
pub struct BTree<'a> {
    pager: &'a mut Pager,
    header: &'a mut DbHeader,
}

impl<'a> BTree<'a> {
    pub fn new(pager: &'a mut Pager, header: &'a mut DbHeader) -> Self {
        Self { pager, header }
    }

    /// Bootstraps a fresh database: page 1 becomes an empty leaf root and
    /// the allocator cursor starts past it.
    pub fn init_empty(&mut self) -> Result<()> {
        self.header.set_num_rows(0);
        self.header.set_root_page_num(1);
        self.header.set_next_free_page(2);

        let data = self.pager.page_mut(1)?;
        let mut root = LeafNodeMut::init(data)?;
        root.set_root(true);

        Ok(())
    }

    fn node_type(&mut self, page: u32) -> Result<NodeType> {
        NodeHeader::from_page(self.pager.page(page)?)?.node_type()
    }

    /// Descends from the root to the leaf that does or would hold `key`.
    fn find_leaf(&mut self, key: i32) -> Result<u32> {
        let mut page = self.header.root_page_num();

        loop {
            let next = {
                let data = self.pager.page(page)?;
                match NodeHeader::from_page(data)?.node_type()? {
                    NodeType::Leaf => return Ok(page),
                    NodeType::Internal => {
                        let node = InternalNode::from_page(data)?;
                        let index = node.find_child_index(key)?;
                        node.child_page_at(index)?
                    }
                }
            };
            page = next;
        }
    }

    /// Returns a cursor at the cell holding `key`, or at the position where
    /// it would be inserted.
    pub fn find(&mut self, key: i32) -> Result<Cursor> {
        let page_num = self.find_leaf(key)?;
        let leaf = LeafNode::from_page(self.pager.page(page_num)?)?;
        let num_cells = leaf.num_cells();

        Ok(match leaf.find(key)? {
            SearchResult::Found(index) => Cursor {
                page_num,
                cell_num: index as u32,
                end_of_table: false,
            },
            SearchResult::NotFound(index) => Cursor {
                page_num,
                cell_num: index as u32,
                end_of_table: index as u32 >= num_cells,
            },
        })
    }

    /// Cursor at the first cell of the leftmost leaf.
    pub fn scan_start(&mut self) -> Result<Cursor> {
        let mut page = self.header.root_page_num();

        loop {
            let next = {
                let data = self.pager.page(page)?;
                match NodeHeader::from_page(data)?.node_type()? {
                    NodeType::Leaf => break,
                    NodeType::Internal => {
                        let node = InternalNode::from_page(data)?;
                        ensure!(node.num_keys() > 0, "corrupt internal node {}: no keys", page);
                        node.child_at(0)?
                    }
                }
            };
            page = next;
        }

        let leaf = LeafNode::from_page(self.pager.page(page)?)?;
        Ok(Cursor {
            page_num: page,
            cell_num: 0,
            end_of_table: leaf.num_cells() == 0,
        })
    }

    /// Steps the cursor one cell forward, following the sibling chain
    /// across leaf boundaries.
    pub fn advance(&mut self, cursor: &mut Cursor) -> Result<()> {
        let (num_cells, next_leaf) = {
            let leaf = LeafNode::from_page(self.pager.page(cursor.page_num)?)?;
            (leaf.num_cells(), leaf.next_leaf())
        };

        cursor.cell_num += 1;
        if cursor.cell_num < num_cells {
            return Ok(());
        }

        if next_leaf == 0 {
            cursor.end_of_table = true;
            return Ok(());
        }

        cursor.page_num = next_leaf;
        cursor.cell_num = 0;

        let leaf = LeafNode::from_page(self.pager.page(next_leaf)?)?;
        cursor.end_of_table = leaf.num_cells() == 0;

        Ok(())
    }

    /// Row under the cursor.
    pub fn row(&mut self, cursor: &Cursor) -> Result<Row> {
        ensure!(!cursor.end_of_table, "cursor is past the last row");
        let leaf = LeafNode::from_page(self.pager.page(cursor.page_num)?)?;
        leaf.row_at(cursor.cell_num as usize)
    }

    pub fn insert(&mut self, row: &Row) -> Result<()> {
        let key = row.id();
        let cursor = self.find(key)?;

        let (num_cells, existing) = {
            let leaf = LeafNode::from_page(self.pager.page(cursor.page_num)?)?;
            let n = leaf.num_cells();
            let existing = if cursor.cell_num < n {
                Some(leaf.key_at(cursor.cell_num as usize)?)
            } else {
                None
            };
            (n, existing)
        };

        if existing == Some(key) {
            bail!("duplicate key: {}", key);
        }

        if (num_cells as usize) < LEAF_MAX_CELLS {
            let mut leaf = LeafNodeMut::from_page(self.pager.page_mut(cursor.page_num)?)?;
            leaf.insert_at(cursor.cell_num as usize, key, row)?;
        } else {
            self.split_leaf_and_insert(&cursor, key, row)?;
        }

        self.header.set_num_rows(self.header.num_rows() + 1);
        self.debug_validate()
    }

    /// Splits a full leaf around the insertion position: lower half stays,
    /// upper half moves to a fresh leaf spliced into the sibling chain.
    fn split_leaf_and_insert(&mut self, cursor: &Cursor, key: i32, row: &Row) -> Result<()> {
        let old_page = cursor.page_num;
        let new_page = self.allocate_page()?;

        let (mut cells, old_next, old_parent) = {
            let leaf = LeafNode::from_page(self.pager.page(old_page)?)?;
            let n = leaf.num_cells() as usize;
            let mut cells: Vec<(i32, Row)> = Vec::with_capacity(n + 1);
            for i in 0..n {
                cells.push((leaf.key_at(i)?, leaf.row_at(i)?));
            }
            (cells, leaf.next_leaf(), leaf.parent())
        };

        let insert_pos = (cursor.cell_num as usize).min(cells.len());
        cells.insert(insert_pos, (key, *row));
        let left_count = cells.len() / 2;

        {
            let data = self.pager.page_mut(old_page)?;
            let was_root = NodeHeader::from_page(data)?.is_root();
            let mut leaf = LeafNodeMut::init(data)?;
            leaf.set_root(was_root);
            leaf.set_parent(old_parent);
            leaf.set_next_leaf(new_page);
            for (i, (cell_key, cell_row)) in cells[..left_count].iter().enumerate() {
                leaf.insert_at(i, *cell_key, cell_row)?;
            }
        }

        {
            let data = self.pager.page_mut(new_page)?;
            let mut leaf = LeafNodeMut::init(data)?;
            leaf.set_parent(old_parent);
            leaf.set_next_leaf(old_next);
            for (i, (cell_key, cell_row)) in cells[left_count..].iter().enumerate() {
                leaf.insert_at(i, *cell_key, cell_row)?;
            }
        }

        self.insert_into_parent(old_page, new_page)
    }

    /// Hands a freshly split-off right sibling to the parent of `left_page`,
    /// creating a new root level when `left_page` was the root.
    fn insert_into_parent(&mut self, left_page: u32, right_page: u32) -> Result<()> {
        let (left_is_root, left_parent) = {
            let header = NodeHeader::from_page(self.pager.page(left_page)?)?;
            (header.is_root(), header.parent())
        };

        if left_is_root {
            return self.create_new_root(right_page);
        }

        // the left node kept the lower half, so its stored max key shrank
        self.update_parent_key(left_parent, left_page)?;
        self.insert_child_into_internal(left_parent, right_page)
    }

    /// Refreshes the separator key the parent stores for `child_page`.
    /// The right child carries no key, so nothing to do there.
    fn update_parent_key(&mut self, parent_page: u32, child_page: u32) -> Result<()> {
        let (slot, num_keys) = {
            let node = InternalNode::from_page(self.pager.page(parent_page)?)?;
            (node.child_slot(child_page)?, node.num_keys() as usize)
        };

        let Some(slot) = slot else {
            bail!("child {} not listed in parent {}", child_page, parent_page);
        };
        if slot == num_keys {
            return Ok(());
        }

        let max_key = self.node_max_key(child_page)?;
        let mut node = InternalNodeMut::from_page(self.pager.page_mut(parent_page)?)?;
        node.set_key(slot, max_key)
    }

    /// Adds a child to an internal node, splitting it when it already
    /// addresses `INTERNAL_MAX_CHILDREN` children.
    fn insert_child_into_internal(&mut self, parent_page: u32, new_child: u32) -> Result<()> {
        ensure!(
            self.node_type(parent_page)? == NodeType::Internal,
            "page {} is not an internal node",
            parent_page
        );

        let mut children: ChildList = {
            let node = InternalNode::from_page(self.pager.page(parent_page)?)?;
            node.children()?.into_iter().collect()
        };
        children.push(new_child);
        self.sort_children_by_max_key(&mut children)?;

        if children.len() <= INTERNAL_MAX_CHILDREN {
            return self.rebuild_internal(parent_page, &children);
        }

        let new_internal = self.allocate_page()?;
        {
            let data = self.pager.page_mut(new_internal)?;
            InternalNodeMut::init(data)?;
        }

        let (was_root, grandparent) = {
            let header = NodeHeader::from_page(self.pager.page(parent_page)?)?;
            (header.is_root(), header.parent())
        };

        let left_count = children.len() / 2;
        let left: ChildList = SmallVec::from_slice(&children[..left_count]);
        let right: ChildList = SmallVec::from_slice(&children[left_count..]);
        self.rebuild_internal(parent_page, &left)?;
        self.rebuild_internal(new_internal, &right)?;

        if was_root {
            return self.create_new_root(new_internal);
        }

        ensure!(
            grandparent != 0,
            "non-root internal {} without parent",
            parent_page
        );
        self.update_parent_key(grandparent, parent_page)?;
        self.insert_child_into_internal(grandparent, new_internal)
    }

    /// Grows the tree by one level while keeping the root page number
    /// stable: the old root's bytes move to a fresh page and the root page
    /// is rebuilt as an internal node over both halves.
    fn create_new_root(&mut self, right_child_page: u32) -> Result<()> {
        let root_page = self.header.root_page_num();
        let left_page = self.allocate_page()?;

        let old_root = self.pager.page(root_page)?.to_vec();
        {
            let data = self.pager.page_mut(left_page)?;
            data.copy_from_slice(&old_root);
            let header = NodeHeader::from_page_mut(data)?;
            header.set_root(false);
            header.set_parent(root_page);
        }

        // the moved node's children still point at the root page
        let moved_children = {
            let data = self.pager.page(left_page)?;
            match NodeHeader::from_page(data)?.node_type()? {
                NodeType::Internal => InternalNode::from_page(data)?.children()?,
                NodeType::Leaf => Vec::new(),
            }
        };
        for child in moved_children {
            let data = self.pager.page_mut(child)?;
            NodeHeader::from_page_mut(data)?.set_parent(left_page);
        }

        {
            let data = self.pager.page_mut(root_page)?;
            let mut root = InternalNodeMut::init(data)?;
            root.set_root(true);
        }

        let mut children: ChildList = smallvec![left_page, right_child_page];
        self.sort_children_by_max_key(&mut children)?;
        self.rebuild_internal(root_page, &children)
    }

    /// Rewrites an internal node from a sorted child list: separators are
    /// regenerated from subtree max keys and every child is re-parented.
    /// All internal-node surgery funnels through here.
    fn rebuild_internal(&mut self, page: u32, children: &[u32]) -> Result<()> {
        ensure!(
            children.len() >= 2,
            "internal rebuild needs >= 2 children (page {})",
            page
        );
        ensure!(
            children.len() <= INTERNAL_MAX_CHILDREN,
            "internal rebuild with too many children: {} (max {})",
            children.len(),
            INTERNAL_MAX_CHILDREN
        );

        let num_keys = children.len() - 1;
        let mut keys: SmallVec<[i32; 16]> = SmallVec::with_capacity(num_keys);
        for &child in &children[..num_keys] {
            keys.push(self.node_max_key(child)?);
        }

        let (was_root, parent) = {
            let header = NodeHeader::from_page(self.pager.page(page)?)?;
            (header.is_root(), header.parent())
        };

        {
            let data = self.pager.page_mut(page)?;
            let mut node = InternalNodeMut::init(data)?;
            node.set_root(was_root);
            node.set_parent(parent);
            for (i, (&child, &key)) in children[..num_keys].iter().zip(keys.iter()).enumerate() {
                node.set_cell(i, child, key)?;
            }
            node.set_num_keys(num_keys as u32);
            node.set_right_child(children[num_keys]);
        }

        for &child in children {
            let data = self.pager.page_mut(child)?;
            let header = NodeHeader::from_page_mut(data)?;
            header.set_parent(page);
            header.set_root(false);
        }

        Ok(())
    }

    /// Max key reachable through `page`: the last key of its rightmost leaf
    /// descendant. Zero only for an empty leaf, which no completed
    /// operation leaves behind (except an empty root).
    fn node_max_key(&mut self, page: u32) -> Result<i32> {
        let mut page = page;
        loop {
            let data = self.pager.page(page)?;
            match NodeHeader::from_page(data)?.node_type()? {
                NodeType::Leaf => {
                    let leaf = LeafNode::from_page(data)?;
                    return Ok(leaf.max_key()?.unwrap_or(0));
                }
                NodeType::Internal => {
                    page = InternalNode::from_page(data)?.right_child();
                }
            }
        }
    }

    fn sort_children_by_max_key(&mut self, children: &mut ChildList) -> Result<()> {
        let mut keyed: SmallVec<[(i32, u32); 16]> = SmallVec::with_capacity(children.len());
        for &child in children.iter() {
            keyed.push((self.node_max_key(child)?, child));
        }
        keyed.sort_by_key(|&(key, _)| key);
        for (slot, &(_, child)) in children.iter_mut().zip(keyed.iter()) {
            *slot = child;
        }
        Ok(())
    }

    fn allocate_page(&mut self) -> Result<u32> {
        let page = self.header.next_free_page();
        ensure!(
            (page as usize) < TABLE_MAX_PAGES,
            "out of pages: allocator at {} (max {})",
            page,
            TABLE_MAX_PAGES
        );
        self.header.set_next_free_page(page + 1);

        // bring the page into the resident set zero-filled
        self.pager.page_mut(page)?;
        Ok(page)
    }

    pub fn delete(&mut self, key: i32) -> Result<()> {
        let cursor = self.find(key)?;

        let found = {
            let leaf = LeafNode::from_page(self.pager.page(cursor.page_num)?)?;
            cursor.cell_num < leaf.num_cells() && leaf.key_at(cursor.cell_num as usize)? == key
        };
        if !found {
            bail!("key not found: {}", key);
        }

        let (remaining, is_root) = {
            let mut leaf = LeafNodeMut::from_page(self.pager.page_mut(cursor.page_num)?)?;
            leaf.remove_at(cursor.cell_num as usize)?;
            (leaf.num_cells() as usize, leaf.is_root())
        };
        self.header.set_num_rows(self.header.num_rows() - 1);

        if !is_root && remaining < LEAF_MIN_CELLS {
            self.rebalance_leaf(cursor.page_num)?;
        }

        self.debug_validate()
    }

    /// Restores the occupancy band of an underfull non-root leaf: borrow
    /// from the left sibling, else from the right, else merge (left
    /// preferred).
    fn rebalance_leaf(&mut self, page: u32) -> Result<()> {
        let parent = {
            let leaf = LeafNode::from_page(self.pager.page(page)?)?;
            leaf.parent()
        };
        ensure!(parent != 0, "underfull non-root leaf {} without parent", page);

        let (slot, num_keys) = {
            let node = InternalNode::from_page(self.pager.page(parent)?)?;
            (node.child_slot(page)?, node.num_keys() as usize)
        };
        let Some(slot) = slot else {
            bail!("leaf {} not listed in parent {}", page, parent);
        };

        let left_sibling = if slot > 0 {
            Some(self.child_page(parent, slot - 1)?)
        } else {
            None
        };
        let right_sibling = if slot < num_keys {
            Some(self.child_page(parent, slot + 1)?)
        } else {
            None
        };

        if let Some(left) = left_sibling {
            let left_cells = self.leaf_cell_count(left)? as usize;
            if left_cells > LEAF_MIN_CELLS {
                let (moved_key, moved_row) = {
                    let node = LeafNode::from_page(self.pager.page(left)?)?;
                    (node.key_at(left_cells - 1)?, node.row_at(left_cells - 1)?)
                };
                {
                    let mut node = LeafNodeMut::from_page(self.pager.page_mut(page)?)?;
                    node.insert_at(0, moved_key, &moved_row)?;
                }
                {
                    let mut node = LeafNodeMut::from_page(self.pager.page_mut(left)?)?;
                    node.remove_at(left_cells - 1)?;
                }
                // the left sibling's max key shrank
                return self.update_parent_key(parent, left);
            }
        }

        if let Some(right) = right_sibling {
            let right_cells = self.leaf_cell_count(right)? as usize;
            if right_cells > LEAF_MIN_CELLS {
                let (moved_key, moved_row) = {
                    let node = LeafNode::from_page(self.pager.page(right)?)?;
                    (node.key_at(0)?, node.row_at(0)?)
                };
                {
                    let mut node = LeafNodeMut::from_page(self.pager.page_mut(page)?)?;
                    let n = node.num_cells() as usize;
                    node.insert_at(n, moved_key, &moved_row)?;
                }
                {
                    let mut node = LeafNodeMut::from_page(self.pager.page_mut(right)?)?;
                    node.remove_at(0)?;
                }
                // this leaf's max key grew
                return self.update_parent_key(parent, page);
            }
        }

        if let Some(left) = left_sibling {
            self.merge_leaves(parent, left, page)?;
            return self.maybe_shrink_root();
        }

        if let Some(right) = right_sibling {
            self.merge_leaves(parent, page, right)?;
            return self.maybe_shrink_root();
        }

        bail!("leaf {} has no siblings to rebalance with", page)
    }

    /// Appends every cell of `src` to `dst`, unlinks `src` from the sibling
    /// chain, and drops it from the parent. The `src` page itself is not
    /// reclaimed (the allocator is monotonic within a session).
    fn merge_leaves(&mut self, parent: u32, dst: u32, src: u32) -> Result<()> {
        let (cells, src_next) = {
            let node = LeafNode::from_page(self.pager.page(src)?)?;
            let n = node.num_cells() as usize;
            let mut cells: Vec<(i32, Row)> = Vec::with_capacity(n);
            for i in 0..n {
                cells.push((node.key_at(i)?, node.row_at(i)?));
            }
            (cells, node.next_leaf())
        };

        {
            let mut node = LeafNodeMut::from_page(self.pager.page_mut(dst)?)?;
            let base = node.num_cells() as usize;
            for (i, (cell_key, cell_row)) in cells.iter().enumerate() {
                node.insert_at(base + i, *cell_key, cell_row)?;
            }
            node.set_next_leaf(src_next);
        }

        self.remove_child_from_internal(parent, src)
    }

    /// Drops `child` from `parent`, leaving the one-child transient only
    /// for the root (cleaned up by root collapse) and rebalancing the
    /// parent when it falls under its minimum.
    fn remove_child_from_internal(&mut self, parent: u32, child: u32) -> Result<()> {
        let mut children: ChildList = {
            let node = InternalNode::from_page(self.pager.page(parent)?)?;
            node.children()?.into_iter().collect()
        };
        let before = children.len();
        children.retain(|c| *c != child);
        ensure!(
            children.len() + 1 == before,
            "child {} not listed in parent {}",
            child,
            parent
        );

        match children.len() {
            0 => bail!("internal node {} lost every child", parent),
            1 => {
                let mut node = InternalNodeMut::from_page(self.pager.page_mut(parent)?)?;
                node.set_num_keys(0);
                node.set_right_child(children[0]);
            }
            _ => self.rebuild_internal(parent, &children)?,
        }

        let (num_keys, is_root) = {
            let node = InternalNode::from_page(self.pager.page(parent)?)?;
            (node.num_keys() as usize, node.is_root())
        };
        let min_keys = if is_root { 0 } else { INTERNAL_MIN_KEYS };
        if num_keys < min_keys {
            self.rebalance_internal(parent)?;
        }

        Ok(())
    }

    /// Mirrors leaf rebalancing for internal nodes, but moves whole child
    /// subtrees between lists and rebuilds both nodes, which regenerates
    /// separators and parent pointers in one stroke.
    fn rebalance_internal(&mut self, page: u32) -> Result<()> {
        let (parent, is_root) = {
            let node = InternalNode::from_page(self.pager.page(page)?)?;
            (node.parent(), node.is_root())
        };
        ensure!(!is_root, "rebalance requested for root internal {}", page);
        ensure!(
            parent != 0,
            "underfull non-root internal {} without parent",
            page
        );

        let (slot, num_keys) = {
            let node = InternalNode::from_page(self.pager.page(parent)?)?;
            (node.child_slot(page)?, node.num_keys() as usize)
        };
        let Some(slot) = slot else {
            bail!("internal {} not listed in parent {}", page, parent);
        };

        let left_sibling = if slot > 0 {
            Some(self.child_page(parent, slot - 1)?)
        } else {
            None
        };
        let right_sibling = if slot < num_keys {
            Some(self.child_page(parent, slot + 1)?)
        } else {
            None
        };

        if let Some(left) = left_sibling {
            let left_keys = self.internal_key_count(left)? as usize;
            if left_keys > INTERNAL_MIN_KEYS {
                let mut left_children = self.collect_children(left)?;
                let mut my_children = self.collect_children(page)?;
                let Some(moved) = left_children.pop() else {
                    bail!("internal node {} has no children to lend", left);
                };
                my_children.insert(0, moved);
                self.rebuild_internal(left, &left_children)?;
                self.rebuild_internal(page, &my_children)?;
                self.update_parent_key(parent, left)?;
                return self.update_parent_key(parent, page);
            }
        }

        if let Some(right) = right_sibling {
            let right_keys = self.internal_key_count(right)? as usize;
            if right_keys > INTERNAL_MIN_KEYS {
                let mut right_children = self.collect_children(right)?;
                let mut my_children = self.collect_children(page)?;
                ensure!(
                    !right_children.is_empty(),
                    "internal node {} has no children to lend",
                    right
                );
                my_children.push(right_children.remove(0));
                self.rebuild_internal(right, &right_children)?;
                self.rebuild_internal(page, &my_children)?;
                self.update_parent_key(parent, page)?;
                return self.update_parent_key(parent, right);
            }
        }

        if let Some(left) = left_sibling {
            let mut merged = self.collect_children(left)?;
            merged.extend(self.collect_children(page)?);
            ensure!(
                merged.len() <= INTERNAL_MAX_CHILDREN,
                "merged internal would overflow: {} children",
                merged.len()
            );
            self.rebuild_internal(left, &merged)?;
            self.remove_child_from_internal(parent, page)?;
            return self.maybe_shrink_root();
        }

        if let Some(right) = right_sibling {
            let mut merged = self.collect_children(page)?;
            merged.extend(self.collect_children(right)?);
            ensure!(
                merged.len() <= INTERNAL_MAX_CHILDREN,
                "merged internal would overflow: {} children",
                merged.len()
            );
            self.rebuild_internal(page, &merged)?;
            self.remove_child_from_internal(parent, right)?;
            return self.maybe_shrink_root();
        }

        bail!("internal {} has no siblings to rebalance with", page)
    }

    /// Collapses an internal root that is down to a single child. This is
    /// the only operation that moves `root_page_num`.
    fn maybe_shrink_root(&mut self) -> Result<()> {
        let root = self.header.root_page_num();

        let survivor = {
            let data = self.pager.page(root)?;
            match NodeHeader::from_page(data)?.node_type()? {
                NodeType::Internal => {
                    let node = InternalNode::from_page(data)?;
                    (node.num_keys() == 0).then(|| node.right_child())
                }
                NodeType::Leaf => None,
            }
        };

        let Some(child) = survivor else {
            return Ok(());
        };
        ensure!(child != 0, "internal root {} with no surviving child", root);

        {
            let data = self.pager.page_mut(child)?;
            let header = NodeHeader::from_page_mut(data)?;
            header.set_root(true);
            header.set_parent(0);
        }
        self.header.set_root_page_num(child);

        Ok(())
    }

    fn child_page(&mut self, parent: u32, index: usize) -> Result<u32> {
        let node = InternalNode::from_page(self.pager.page(parent)?)?;
        node.child_page_at(index)
    }

    fn leaf_cell_count(&mut self, page: u32) -> Result<u32> {
        let leaf = LeafNode::from_page(self.pager.page(page)?)?;
        Ok(leaf.num_cells())
    }

    fn internal_key_count(&mut self, page: u32) -> Result<u32> {
        let node = InternalNode::from_page(self.pager.page(page)?)?;
        Ok(node.num_keys())
    }

    fn collect_children(&mut self, page: u32) -> Result<ChildList> {
        let node = InternalNode::from_page(self.pager.page(page)?)?;
        Ok(node.children()?.into_iter().collect())
    }

    /// Indented dump of the tree shape, keys included.
    pub fn structure(&mut self) -> Result<String> {
        let mut out = String::from("B-tree structure:\n");
        let root = self.header.root_page_num();
        self.format_node(root, 0, &mut out)?;
        Ok(out)
    }

    fn format_node(&mut self, page: u32, level: usize, out: &mut String) -> Result<()> {
        use std::fmt::Write;

        let indent = "  ".repeat(level);

        match self.node_type(page)? {
            NodeType::Leaf => {
                let leaf = LeafNode::from_page(self.pager.page(page)?)?;
                let n = leaf.num_cells() as usize;
                write!(out, "{}- leaf (page {}, cells {}):", indent, page, n)?;
                for i in 0..n {
                    write!(out, " {}", leaf.key_at(i)?)?;
                }
                out.push('\n');
            }
            NodeType::Internal => {
                let (num_keys, keys, children, right_child) = {
                    let node = InternalNode::from_page(self.pager.page(page)?)?;
                    let num_keys = node.num_keys() as usize;
                    let mut keys = Vec::with_capacity(num_keys);
                    let mut children = Vec::with_capacity(num_keys);
                    for i in 0..num_keys {
                        keys.push(node.key_at(i)?);
                        children.push(node.child_at(i)?);
                    }
                    (num_keys, keys, children, node.right_child())
                };

                writeln!(out, "{}- internal (page {}, keys {})", indent, page, num_keys)?;
                for i in 0..num_keys {
                    self.format_node(children[i], level + 1, out)?;
                    writeln!(out, "{}  key <= {}", indent, keys[i])?;
                }
                self.format_node(right_child, level + 1, out)?;
            }
        }

        Ok(())
    }

    fn debug_validate(&mut self) -> Result<()> {
        if cfg!(debug_assertions) {
            self.validate()?;
        }
        Ok(())
    }

    /// Checks every tree-wide invariant reachable from the root: uniform
    /// leaf depth, occupancy bands, separator = subtree max key, parent
    /// back-pointers, strictly ascending keys, sibling chain = in-order
    /// traversal, and header row count = total leaf cells.
    pub fn validate(&mut self) -> Result<()> {
        let root = self.header.root_page_num();
        let mut state = ValidationState::default();
        self.validate_node(root, 0, true, 0, &mut state)?;

        ensure!(
            state.in_order.windows(2).all(|w| w[0] < w[1]),
            "keys are not strictly ascending in in-order traversal"
        );
        ensure!(
            state.total_cells == self.header.num_rows() as u64,
            "header num_rows {} does not match leaf cell total {}",
            self.header.num_rows(),
            state.total_cells
        );

        let mut chain: Vec<i32> = Vec::with_capacity(state.in_order.len());
        let mut cursor = self.scan_start()?;
        while !cursor.end_of_table {
            let key = {
                let leaf = LeafNode::from_page(self.pager.page(cursor.page_num)?)?;
                leaf.key_at(cursor.cell_num as usize)?
            };
            chain.push(key);
            self.advance(&mut cursor)?;
        }
        ensure!(
            chain == state.in_order,
            "sibling chain disagrees with in-order traversal"
        );

        Ok(())
    }

    fn validate_node(
        &mut self,
        page: u32,
        expected_parent: u32,
        expect_root: bool,
        depth: u32,
        state: &mut ValidationState,
    ) -> Result<()> {
        match self.node_type(page)? {
            NodeType::Leaf => {
                let (num_cells, parent, is_root, keys) = {
                    let leaf = LeafNode::from_page(self.pager.page(page)?)?;
                    let n = leaf.num_cells() as usize;
                    let mut keys = Vec::with_capacity(n);
                    for i in 0..n {
                        keys.push(leaf.key_at(i)?);
                    }
                    (n, leaf.parent(), leaf.is_root(), keys)
                };

                ensure!(
                    is_root == expect_root,
                    "leaf {}: is_root flag {} does not match position",
                    page,
                    is_root
                );
                if expect_root {
                    ensure!(parent == 0, "root leaf {} has parent {}", page, parent);
                    ensure!(num_cells <= LEAF_MAX_CELLS, "root leaf {} overfull", page);
                } else {
                    ensure!(
                        parent == expected_parent,
                        "leaf {}: parent {} != actual parent {}",
                        page,
                        parent,
                        expected_parent
                    );
                    ensure!(
                        (LEAF_MIN_CELLS..=LEAF_MAX_CELLS).contains(&num_cells),
                        "leaf {}: {} cells outside [{}, {}]",
                        page,
                        num_cells,
                        LEAF_MIN_CELLS,
                        LEAF_MAX_CELLS
                    );
                }

                match state.leaf_depth {
                    None => state.leaf_depth = Some(depth),
                    Some(d) => ensure!(
                        d == depth,
                        "leaf {} at depth {} but expected depth {}",
                        page,
                        depth,
                        d
                    ),
                }

                state.in_order.extend(keys);
                state.total_cells += num_cells as u64;
            }
            NodeType::Internal => {
                let (num_keys, parent, is_root, keys, children, right_child) = {
                    let node = InternalNode::from_page(self.pager.page(page)?)?;
                    let n = node.num_keys() as usize;
                    let mut keys = Vec::with_capacity(n);
                    let mut children = Vec::with_capacity(n);
                    for i in 0..n {
                        keys.push(node.key_at(i)?);
                        children.push(node.child_at(i)?);
                    }
                    (n, node.parent(), node.is_root(), keys, children, node.right_child())
                };

                ensure!(
                    is_root == expect_root,
                    "internal {}: is_root flag {} does not match position",
                    page,
                    is_root
                );
                if expect_root {
                    ensure!(parent == 0, "root internal {} has parent {}", page, parent);
                    ensure!(
                        num_keys >= 1,
                        "root internal {} has no keys after operation",
                        page
                    );
                } else {
                    ensure!(
                        parent == expected_parent,
                        "internal {}: parent {} != actual parent {}",
                        page,
                        parent,
                        expected_parent
                    );
                    ensure!(
                        (INTERNAL_MIN_KEYS..=INTERNAL_MAX_KEYS).contains(&num_keys),
                        "internal {}: {} keys outside [{}, {}]",
                        page,
                        num_keys,
                        INTERNAL_MIN_KEYS,
                        INTERNAL_MAX_KEYS
                    );
                }

                for i in 0..num_keys {
                    self.validate_node(children[i], page, false, depth + 1, state)?;
                    let max = self.node_max_key(children[i])?;
                    ensure!(
                        keys[i] == max,
                        "internal {} cell {}: separator {} != subtree max {}",
                        page,
                        i,
                        keys[i],
                        max
                    );
                }
                self.validate_node(right_child, page, false, depth + 1, state)?;
            }
        }

        Ok(())
    }
}

#[derive(Default)]
struct ValidationState {
    leaf_depth: Option<u32>,
    in_order: Vec<i32>,
    total_cells: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{tempdir, TempDir};

    fn fresh_tree() -> (TempDir, Pager, DbHeader) {
        let dir = tempdir().unwrap();
        let mut pager = Pager::open(dir.path().join("test.db")).unwrap();
        let mut header = DbHeader::new_db();
        BTree::new(&mut pager, &mut header).init_empty().unwrap();
        (dir, pager, header)
    }

    fn row(id: i32) -> Row {
        Row::new(id, "user", "user@example.com").unwrap()
    }

    fn scan_keys(pager: &mut Pager, header: &mut DbHeader) -> Vec<i32> {
        let mut tree = BTree::new(pager, header);
        let mut keys = Vec::new();
        let mut cursor = tree.scan_start().unwrap();
        while !cursor.end_of_table {
            keys.push(tree.row(&cursor).unwrap().id());
            tree.advance(&mut cursor).unwrap();
        }
        keys
    }

    #[test]
    fn find_in_empty_tree_is_end_of_table() {
        let (_dir, mut pager, mut header) = fresh_tree();
        let mut tree = BTree::new(&mut pager, &mut header);

        let cursor = tree.find(5).unwrap();

        assert!(cursor.end_of_table);
        assert_eq!(cursor.page_num, 1);
        assert_eq!(cursor.cell_num, 0);
    }

    #[test]
    fn insert_and_read_single_row() {
        let (_dir, mut pager, mut header) = fresh_tree();
        let mut tree = BTree::new(&mut pager, &mut header);

        tree.insert(&Row::new(1, "alice", "alice@a.com").unwrap()).unwrap();

        let cursor = tree.find(1).unwrap();
        assert!(!cursor.end_of_table);
        let found = tree.row(&cursor).unwrap();
        assert_eq!(found.id(), 1);
        assert_eq!(found.username().unwrap(), "alice");
        assert_eq!(header.num_rows(), 1);
    }

    #[test]
    fn duplicate_insert_fails_and_leaves_tree_unchanged() {
        let (_dir, mut pager, mut header) = fresh_tree();
        {
            let mut tree = BTree::new(&mut pager, &mut header);
            tree.insert(&Row::new(1, "a", "a@a.com").unwrap()).unwrap();

            let result = tree.insert(&Row::new(1, "x", "x@x.com").unwrap());
            assert!(result.is_err());
            assert!(result.unwrap_err().to_string().contains("duplicate key"));
        }

        assert_eq!(header.num_rows(), 1);
        assert_eq!(scan_keys(&mut pager, &mut header), vec![1]);
        let mut tree = BTree::new(&mut pager, &mut header);
        let cursor = tree.find(1).unwrap();
        assert_eq!(tree.row(&cursor).unwrap().username().unwrap(), "a");
    }

    #[test]
    fn leaf_fills_to_capacity_without_split() {
        let (_dir, mut pager, mut header) = fresh_tree();
        {
            let mut tree = BTree::new(&mut pager, &mut header);
            for key in 1..=LEAF_MAX_CELLS as i32 {
                tree.insert(&row(key)).unwrap();
            }
        }

        assert_eq!(header.root_page_num(), 1);
        assert_eq!(header.next_free_page(), 2);
        let mut tree = BTree::new(&mut pager, &mut header);
        assert!(!tree.structure().unwrap().contains("internal"));
    }

    #[test]
    fn overflowing_insert_splits_leaf_root() {
        let (_dir, mut pager, mut header) = fresh_tree();
        {
            let mut tree = BTree::new(&mut pager, &mut header);
            for key in 1..=LEAF_MAX_CELLS as i32 + 1 {
                tree.insert(&row(key)).unwrap();
            }
        }

        // root page number is stable across splits
        assert_eq!(header.root_page_num(), 1);
        let structure = {
            let mut tree = BTree::new(&mut pager, &mut header);
            tree.structure().unwrap()
        };
        assert!(structure.contains("- internal (page 1, keys 1)"));
        assert_eq!(structure.matches("leaf").count(), 2);
        assert_eq!(
            scan_keys(&mut pager, &mut header),
            (1..=LEAF_MAX_CELLS as i32 + 1).collect::<Vec<_>>()
        );
    }

    #[test]
    fn out_of_order_inserts_scan_sorted() {
        let (_dir, mut pager, mut header) = fresh_tree();
        {
            let mut tree = BTree::new(&mut pager, &mut header);
            let mut duplicates = 0;
            for key in [3, 1, 4, 1, 5, 9, 2, 6] {
                if tree.insert(&row(key)).is_err() {
                    duplicates += 1;
                }
            }
            assert_eq!(duplicates, 1);
        }

        assert_eq!(scan_keys(&mut pager, &mut header), vec![1, 2, 3, 4, 5, 6, 9]);
    }

    #[test]
    fn negative_keys_sort_before_positive() {
        let (_dir, mut pager, mut header) = fresh_tree();
        {
            let mut tree = BTree::new(&mut pager, &mut header);
            for key in [5, -3, 0, -7, 2] {
                tree.insert(&row(key)).unwrap();
            }
        }

        assert_eq!(scan_keys(&mut pager, &mut header), vec![-7, -3, 0, 2, 5]);
    }

    #[test]
    fn delete_in_root_leaf_without_rebalance() {
        let (_dir, mut pager, mut header) = fresh_tree();
        {
            let mut tree = BTree::new(&mut pager, &mut header);
            for key in 1..=3 {
                tree.insert(&row(key)).unwrap();
            }
            tree.delete(2).unwrap();
        }

        assert_eq!(header.num_rows(), 2);
        assert_eq!(scan_keys(&mut pager, &mut header), vec![1, 3]);
    }

    #[test]
    fn delete_missing_key_fails_and_leaves_tree_unchanged() {
        let (_dir, mut pager, mut header) = fresh_tree();
        {
            let mut tree = BTree::new(&mut pager, &mut header);
            tree.insert(&row(1)).unwrap();

            let result = tree.delete(99);
            assert!(result.is_err());
            assert!(result.unwrap_err().to_string().contains("key not found"));
        }

        assert_eq!(header.num_rows(), 1);
        assert_eq!(scan_keys(&mut pager, &mut header), vec![1]);
    }

    #[test]
    fn delete_from_empty_tree_fails() {
        let (_dir, mut pager, mut header) = fresh_tree();
        let mut tree = BTree::new(&mut pager, &mut header);

        assert!(tree.delete(1).is_err());
    }

    #[test]
    fn underfull_leaf_borrows_from_right_sibling() {
        let (_dir, mut pager, mut header) = fresh_tree();
        {
            let mut tree = BTree::new(&mut pager, &mut header);
            for key in 1..=14 {
                tree.insert(&row(key)).unwrap();
            }
            // left leaf drops to 5 cells; right sibling still has 7 to lend
            tree.delete(1).unwrap();
            tree.delete(2).unwrap();
        }

        assert_eq!(scan_keys(&mut pager, &mut header), (3..=14).collect::<Vec<_>>());
        let mut tree = BTree::new(&mut pager, &mut header);
        assert!(tree.structure().unwrap().contains("internal"));
        tree.validate().unwrap();
    }

    #[test]
    fn underfull_leaf_borrows_from_left_sibling() {
        let (_dir, mut pager, mut header) = fresh_tree();
        {
            let mut tree = BTree::new(&mut pager, &mut header);
            for key in 1..=14 {
                tree.insert(&row(key)).unwrap();
            }
            tree.delete(14).unwrap();
            tree.delete(13).unwrap();
        }

        assert_eq!(scan_keys(&mut pager, &mut header), (1..=12).collect::<Vec<_>>());
        let mut tree = BTree::new(&mut pager, &mut header);
        tree.validate().unwrap();
    }

    #[test]
    fn leaf_merge_collapses_internal_root() {
        let (_dir, mut pager, mut header) = fresh_tree();
        {
            let mut tree = BTree::new(&mut pager, &mut header);
            for key in 1..=14 {
                tree.insert(&row(key)).unwrap();
            }
            // bring both leaves to the minimum, then force a merge
            tree.delete(1).unwrap();
            tree.delete(14).unwrap();
            tree.delete(2).unwrap();
        }

        // the surviving leaf was promoted to root
        assert_ne!(header.root_page_num(), 1);
        assert_eq!(scan_keys(&mut pager, &mut header), (3..=13).collect::<Vec<_>>());
        let mut tree = BTree::new(&mut pager, &mut header);
        assert!(!tree.structure().unwrap().contains("internal"));
    }

    #[test]
    fn delete_everything_then_reinsert() {
        let (_dir, mut pager, mut header) = fresh_tree();
        {
            let mut tree = BTree::new(&mut pager, &mut header);
            for key in 1..=14 {
                tree.insert(&row(key)).unwrap();
            }
            for key in 1..=14 {
                tree.delete(key).unwrap();
            }
        }

        assert_eq!(header.num_rows(), 0);
        assert_eq!(scan_keys(&mut pager, &mut header), Vec::<i32>::new());

        {
            let mut tree = BTree::new(&mut pager, &mut header);
            tree.insert(&row(7)).unwrap();
        }
        assert_eq!(scan_keys(&mut pager, &mut header), vec![7]);
    }

    #[test]
    fn scan_walks_sibling_chain_across_splits() {
        let (_dir, mut pager, mut header) = fresh_tree();
        {
            let mut tree = BTree::new(&mut pager, &mut header);
            for key in (1..=40).rev() {
                tree.insert(&row(key)).unwrap();
            }
        }

        assert_eq!(scan_keys(&mut pager, &mut header), (1..=40).collect::<Vec<_>>());
        assert_eq!(header.num_rows(), 40);
    }

    #[test]
    fn root_page_stays_stable_across_many_splits() {
        let (_dir, mut pager, mut header) = fresh_tree();
        {
            let mut tree = BTree::new(&mut pager, &mut header);
            for key in 1..=100 {
                tree.insert(&row(key)).unwrap();
            }
        }

        assert_eq!(header.root_page_num(), 1);
        let mut tree = BTree::new(&mut pager, &mut header);
        tree.validate().unwrap();
    }

    #[test]
    fn interleaved_inserts_and_deletes_keep_invariants() {
        let (_dir, mut pager, mut header) = fresh_tree();
        {
            let mut tree = BTree::new(&mut pager, &mut header);
            for key in 1..=60 {
                tree.insert(&row(key)).unwrap();
            }
            for key in (1..=60).filter(|k| k % 3 == 0) {
                tree.delete(key).unwrap();
            }
            for key in 61..=80 {
                tree.insert(&row(key)).unwrap();
            }
            tree.validate().unwrap();
        }

        let expected: Vec<i32> = (1..=60).filter(|k| k % 3 != 0).chain(61..=80).collect();
        assert_eq!(scan_keys(&mut pager, &mut header), expected);
    }

    #[test]
    fn delete_then_insert_round_trips() {
        let (_dir, mut pager, mut header) = fresh_tree();
        {
            let mut tree = BTree::new(&mut pager, &mut header);
            tree.insert(&row(5)).unwrap();
            tree.delete(5).unwrap();
            tree.insert(&row(5)).unwrap();
        }

        assert_eq!(scan_keys(&mut pager, &mut header), vec![5]);
        assert_eq!(header.num_rows(), 1);
    }
}
