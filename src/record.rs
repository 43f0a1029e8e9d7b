//! # Row Serialization
//!
//! A `Row` is the fixed-width record stored in leaf cells: a signed 32-bit
//! id (the B-tree key), a username of up to 32 bytes, and an email of up to
//! 255 bytes. String fields are NUL-terminated within fixed-capacity byte
//! arrays, so a row serializes by raw byte copy.
//!
//! ## Layout (293 bytes)
//!
//! ```text
//! Offset  Size  Field
//! ------  ----  ---------------------------
//! 0       4     id (i32, little-endian)
//! 4       33    username (32 bytes + NUL)
//! 37      256   email (255 bytes + NUL)
//! ```
//!
//! The struct is `Unaligned`, so it can be read directly from any offset
//! within a page buffer.

use eyre::{bail, ensure, Result};
use zerocopy::little_endian::I32;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

pub const USERNAME_MAX: usize = 32;
pub const EMAIL_MAX: usize = 255;

/// Serialized size of a row; the leaf cell layout depends on it.
pub const ROW_SIZE: usize = 4 + (USERNAME_MAX + 1) + (EMAIL_MAX + 1);

#[repr(C)]
#[derive(Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct Row {
    id: I32,
    username: [u8; USERNAME_MAX + 1],
    email: [u8; EMAIL_MAX + 1],
}

const _: () = assert!(std::mem::size_of::<Row>() == ROW_SIZE);

impl Row {
    /// Builds a row, rejecting over-length or NUL-containing fields.
    pub fn new(id: i32, username: &str, email: &str) -> Result<Self> {
        ensure!(
            username.len() <= USERNAME_MAX,
            "username too long: {} > {}",
            username.len(),
            USERNAME_MAX
        );
        ensure!(
            email.len() <= EMAIL_MAX,
            "email too long: {} > {}",
            email.len(),
            EMAIL_MAX
        );
        if username.contains('\0') || email.contains('\0') {
            bail!("string fields may not contain NUL");
        }

        let mut row = Self {
            id: I32::new(id),
            username: [0u8; USERNAME_MAX + 1],
            email: [0u8; EMAIL_MAX + 1],
        };
        row.username[..username.len()].copy_from_slice(username.as_bytes());
        row.email[..email.len()].copy_from_slice(email.as_bytes());

        Ok(row)
    }

    pub fn id(&self) -> i32 {
        self.id.get()
    }

    pub fn username(&self) -> Result<&str> {
        field_str(&self.username)
    }

    pub fn email(&self) -> Result<&str> {
        field_str(&self.email)
    }

    /// Deserializes a row from the value portion of a leaf cell.
    pub fn read_from(src: &[u8]) -> Result<Self> {
        ensure!(
            src.len() >= ROW_SIZE,
            "buffer too small for Row: {} < {}",
            src.len(),
            ROW_SIZE
        );
        Self::read_from_bytes(&src[..ROW_SIZE])
            .map_err(|e| eyre::eyre!("failed to read Row: {:?}", e))
    }

    /// Serializes the row into the value portion of a leaf cell.
    pub fn write_to(&self, dst: &mut [u8]) -> Result<()> {
        ensure!(
            dst.len() >= ROW_SIZE,
            "buffer too small for Row: {} < {}",
            dst.len(),
            ROW_SIZE
        );
        dst[..ROW_SIZE].copy_from_slice(self.as_bytes());
        Ok(())
    }
}

fn field_str(field: &[u8]) -> Result<&str> {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    std::str::from_utf8(&field[..end]).map_err(|e| eyre::eyre!("invalid UTF-8 in row field: {}", e))
}

impl std::fmt::Debug for Row {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Row")
            .field("id", &self.id.get())
            .field("username", &self.username().unwrap_or("<invalid utf-8>"))
            .field("email", &self.email().unwrap_or("<invalid utf-8>"))
            .finish()
    }
}
