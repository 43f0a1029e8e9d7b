//! # Storage Module
//!
//! This module provides the persistence layer for minidb: a buffered pager
//! over a single database file, plus the page-0 header that carries the tree
//! metadata across sessions.
//!
//! ## Architecture Overview
//!
//! The storage layer is deliberately simple. A database file is a sequence of
//! 4096-byte pages; the pager keeps a fixed-capacity table of in-memory page
//! buffers indexed by page number and loads pages lazily on first access.
//! There is no eviction: the working set is bounded by `TABLE_MAX_PAGES`, and
//! every resident page is written back unconditionally when the database is
//! closed. There is no dirty tracking and no write-ahead log; durability is
//! only at close.
//!
//! ## File Format
//!
//! ```text
//! Offset 0:       Page 0 (4096 B)   DB header, remaining bytes zero
//! Offset 4096:    Page 1 (4096 B)   B-tree node
//! Offset 8192:    Page 2 (4096 B)   B-tree node
//! ...
//! ```
//!
//! The file length must always be a whole number of pages; a partial trailing
//! page is treated as corruption at open time.
//!
//! ## Safety Model
//!
//! Page buffers are owned by the pager and handed out as slices. Loading a
//! page mutates the page table, so both `page` and `page_mut` take
//! `&mut self`; the borrow checker guarantees that no caller holds a buffer
//! across another page access. Tree code copies what it needs out of a page
//! and then writes page-at-a-time.
//!
//! ## Module Organization
//!
//! - `pager`: lazy-loading page buffer cache (`Pager`)
//! - `header`: page-0 database header (`DbHeader`)

mod header;
mod pager;

pub use header::{DbHeader, DB_HEADER_SIZE};
pub use pager::Pager;

pub const PAGE_SIZE: usize = 4096;
pub const TABLE_MAX_PAGES: usize = 1024;
