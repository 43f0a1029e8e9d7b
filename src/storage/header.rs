//! # Database Header
//!
//! Page 0 of every database file begins with a 12-byte header of three
//! little-endian `u32` fields:
//!
//! ```text
//! Offset  Size  Field           Description
//! ------  ----  --------------  ----------------------------------------
//! 0       4     num_rows        Live row count (informational)
//! 4       4     root_page_num   Page number of the B-tree root
//! 8       4     next_free_page  Next page number to allocate
//! ```
//!
//! The remaining bytes of page 0 are zero. The header is read once at open
//! and written once at close; in between, the authoritative copy lives in
//! memory on the `Table` handle.
//!
//! `root_page_num` starts at 1 and changes only on root collapse; the
//! allocator cursor `next_free_page` starts at 2 and only ever increases
//! (deleted pages are not reclaimed within a session).

use eyre::{ensure, Result};
use zerocopy::little_endian::U32;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use super::TABLE_MAX_PAGES;

pub const DB_HEADER_SIZE: usize = 12;

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct DbHeader {
    num_rows: U32,
    root_page_num: U32,
    next_free_page: U32,
}

const _: () = assert!(std::mem::size_of::<DbHeader>() == DB_HEADER_SIZE);

impl DbHeader {
    /// Header for a freshly initialized database: empty leaf root on page 1,
    /// allocator cursor past it.
    pub fn new_db() -> Self {
        Self {
            num_rows: U32::new(0),
            root_page_num: U32::new(1),
            next_free_page: U32::new(2),
        }
    }

    /// Reads and validates the header from page 0.
    pub fn read_from_page(page: &[u8]) -> Result<Self> {
        ensure!(
            page.len() >= DB_HEADER_SIZE,
            "buffer too small for DbHeader: {} < {}",
            page.len(),
            DB_HEADER_SIZE
        );

        let header = Self::read_from_bytes(&page[..DB_HEADER_SIZE])
            .map_err(|e| eyre::eyre!("failed to read DbHeader: {:?}", e))?;

        header.validate()?;

        Ok(header)
    }

    /// Writes the header to the start of page 0.
    pub fn write_to_page(&self, page: &mut [u8]) -> Result<()> {
        ensure!(
            page.len() >= DB_HEADER_SIZE,
            "buffer too small for DbHeader: {} < {}",
            page.len(),
            DB_HEADER_SIZE
        );

        page[..DB_HEADER_SIZE].copy_from_slice(self.as_bytes());
        Ok(())
    }

    /// Open-time sanity check: a root or allocator cursor that escapes the
    /// page range means the file is not one of ours (or is damaged).
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.root_page_num() >= 1 && (self.root_page_num() as usize) < TABLE_MAX_PAGES,
            "invalid header: root_page_num {} out of range",
            self.root_page_num()
        );
        ensure!(
            self.next_free_page() >= 2 && (self.next_free_page() as usize) <= TABLE_MAX_PAGES,
            "invalid header: next_free_page {} out of range",
            self.next_free_page()
        );
        Ok(())
    }

    zerocopy_accessors! {
        num_rows: u32,
        root_page_num: u32,
        next_free_page: u32,
    }
}
