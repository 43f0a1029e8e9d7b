//! # Buffered Pager
//!
//! This module implements `Pager`, the sole persistence surface of the
//! engine. It maps page numbers to in-memory 4096-byte buffers, loading each
//! page from the file the first time it is touched.
//!
//! ## Design
//!
//! The page table is a fixed-capacity array of optional buffers indexed by
//! page number:
//!
//! ```text
//! pages[0]  -> Some(buffer)   resident, possibly modified in place
//! pages[1]  -> None           never touched this session
//! ...
//! pages[n]  -> Some(buffer)
//! ```
//!
//! Accessing a page beyond the current on-disk range extends the logical
//! page count; the file itself grows when the buffer is flushed. Pages are
//! never evicted and never freed mid-session, so a returned buffer stays
//! valid (at a stable page number) for the life of the pager.
//!
//! ## Mutation Model
//!
//! All tree mutations happen in place on the returned buffer. There is no
//! dirty bit: `flush_all` writes every resident page back at
//! `page_num * PAGE_SIZE`, which makes close unconditionally durable and
//! keeps the I/O path trivial.
//!
//! ## Error Handling
//!
//! A file whose length is not a multiple of the page size is rejected at
//! open. Out-of-range page numbers, short reads, and write failures are
//! reported as `eyre` errors with file context; callers treat them as fatal.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use eyre::{ensure, Result, WrapErr};

use super::{PAGE_SIZE, TABLE_MAX_PAGES};

type PageBuf = Box<[u8; PAGE_SIZE]>;

#[derive(Debug)]
pub struct Pager {
    file: File,
    num_pages: u32,
    pages: Vec<Option<PageBuf>>,
}

impl Pager {
    /// Opens the database file for read+write, creating it empty if absent.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)
            .wrap_err_with(|| format!("failed to open database file '{}'", path.display()))?;

        let file_size = file
            .metadata()
            .wrap_err_with(|| format!("failed to get metadata for '{}'", path.display()))?
            .len();

        ensure!(
            file_size % PAGE_SIZE as u64 == 0,
            "database file '{}' size {} is not a multiple of page size {}",
            path.display(),
            file_size,
            PAGE_SIZE
        );

        let num_pages = (file_size / PAGE_SIZE as u64) as u32;

        ensure!(
            num_pages as usize <= TABLE_MAX_PAGES,
            "database file '{}' has {} pages, more than the maximum {}",
            path.display(),
            num_pages,
            TABLE_MAX_PAGES
        );

        let mut pages = Vec::with_capacity(TABLE_MAX_PAGES);
        pages.resize_with(TABLE_MAX_PAGES, || None);

        Ok(Self {
            file,
            num_pages,
            pages,
        })
    }

    /// Number of pages the database logically contains (on disk or resident).
    pub fn num_pages(&self) -> u32 {
        self.num_pages
    }

    /// Returns the buffer for `page_num`, loading it from disk on first access.
    pub fn page(&mut self, page_num: u32) -> Result<&[u8]> {
        self.ensure_loaded(page_num)?;
        Ok(&self.pages[page_num as usize].as_ref().unwrap()[..]) // INVARIANT: resident after ensure_loaded
    }

    /// Mutable variant of [`Pager::page`].
    pub fn page_mut(&mut self, page_num: u32) -> Result<&mut [u8]> {
        self.ensure_loaded(page_num)?;
        Ok(&mut self.pages[page_num as usize].as_mut().unwrap()[..]) // INVARIANT: resident after ensure_loaded
    }

    fn ensure_loaded(&mut self, page_num: u32) -> Result<()> {
        ensure!(
            (page_num as usize) < TABLE_MAX_PAGES,
            "page {} out of bounds (max {})",
            page_num,
            TABLE_MAX_PAGES
        );

        if self.pages[page_num as usize].is_some() {
            return Ok(());
        }

        let mut buf: PageBuf = Box::new([0u8; PAGE_SIZE]);

        if page_num < self.num_pages {
            self.file
                .seek(SeekFrom::Start(page_num as u64 * PAGE_SIZE as u64))
                .wrap_err_with(|| format!("failed to seek to page {}", page_num))?;
            self.file
                .read_exact(&mut buf[..])
                .wrap_err_with(|| format!("failed to read page {}", page_num))?;
        }

        self.pages[page_num as usize] = Some(buf);

        if page_num >= self.num_pages {
            self.num_pages = page_num + 1;
        }

        Ok(())
    }

    /// Writes the resident buffer for `page_num` back to its file offset.
    pub fn flush(&mut self, page_num: u32) -> Result<()> {
        let Some(buf) = self.pages[page_num as usize].as_ref() else {
            return Ok(());
        };

        self.file
            .seek(SeekFrom::Start(page_num as u64 * PAGE_SIZE as u64))
            .wrap_err_with(|| format!("failed to seek to page {}", page_num))?;
        self.file
            .write_all(&buf[..])
            .wrap_err_with(|| format!("failed to write page {}", page_num))?;

        Ok(())
    }

    /// Flushes every resident page. Called once, at close.
    pub fn flush_all(&mut self) -> Result<()> {
        for page_num in 0..self.num_pages {
            self.flush(page_num)?;
        }
        self.file.flush().wrap_err("failed to flush database file")
    }
}
