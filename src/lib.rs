//! # minidb - Single-File B+Tree Table Engine
//!
//! minidb is an embedded, single-file table engine: one table of fixed-size
//! rows keyed by a 32-bit integer, stored as a B+tree over 4096-byte pages.
//! This Rust implementation prioritizes:
//!
//! - **Byte-exact on-disk layout**: every page structure is a zerocopy view
//! - **Sorted access**: point lookup, ordered full scan over a leaf chain
//! - **Self-balancing**: splits on insert, borrow/merge rebalancing on delete
//!
//! ## Quick Start
//!
//! ```ignore
//! use minidb::{Row, Table};
//!
//! let mut table = Table::open("users.db")?;
//! table.insert(&Row::new(1, "alice", "alice@example.com")?)?;
//!
//! for row in table.scan()? {
//!     println!("{} {}", row.id(), row.username()?);
//! }
//!
//! table.close()?;
//! ```
//!
//! ## Architecture
//!
//! minidb uses a layered architecture:
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │        Public API (Table)           │
//! ├─────────────────────────────────────┤
//! │   B-Tree (search/insert/rebalance)  │
//! ├─────────────────────────────────────┤
//! │  Node Views (leaf/internal layout)  │
//! ├─────────────────────────────────────┤
//! │      Row Serialization Layer        │
//! ├─────────────────────────────────────┤
//! │     Storage Layer (Pager/Header)    │
//! └─────────────────────────────────────┘
//! ```
//!
//! ## File Layout
//!
//! A database is a single file of 4096-byte pages:
//!
//! ```text
//! users.db
//! ├── page 0    # DB header: num_rows, root_page_num, next_free_page
//! ├── page 1    # initial B-tree root (leaf)
//! └── page 2+   # further tree nodes, allocated monotonically
//! ```
//!
//! Durability is at [`Table::close`]: every resident page is written back.
//! An interrupted session yields the previous-close state.
//!
//! ## Module Overview
//!
//! - [`storage`]: buffered pager and the page-0 database header
//! - [`btree`]: node layout views and the tree state machines
//! - [`record`]: fixed-width row serialization
//! - [`database`]: the `Table` handle tying the layers together
//! - `cli`: interactive shell consuming the public API

#[macro_use]
mod macros;

pub mod btree;
pub mod cli;
pub mod database;
pub mod record;
pub mod storage;

pub use btree::Cursor;
pub use database::Table;
pub use record::Row;
