//! # Internal Macros
//!
//! This module provides internal macros for reducing boilerplate in minidb.
//!
//! ## zerocopy_accessors!
//!
//! Generates getter and setter methods for zerocopy struct fields that use
//! little-endian wrapper types.
//!
//! ### Usage
//!
//! ```ignore
//! use zerocopy::little_endian::U32;
//!
//! #[repr(C)]
//! struct DbHeader {
//!     num_rows: U32,
//!     root_page_num: U32,
//! }
//!
//! impl DbHeader {
//!     zerocopy_accessors! {
//!         num_rows: u32,
//!         root_page_num: u32,
//!     }
//! }
//!
//! // Generates:
//! // pub fn num_rows(&self) -> u32 { self.num_rows.get() }
//! // pub fn set_num_rows(&mut self, val: u32) { self.num_rows = U32::new(val); }
//! // pub fn root_page_num(&self) -> u32 { self.root_page_num.get() }
//! // pub fn set_root_page_num(&mut self, val: u32) { self.root_page_num = U32::new(val); }
//! ```

/// Generates getter and setter methods for zerocopy little-endian fields.
#[macro_export]
macro_rules! zerocopy_accessors {
    (@impl $field:ident, u32) => {
        ::paste::paste! {
            #[inline]
            pub fn $field(&self) -> u32 {
                self.$field.get()
            }

            #[inline]
            pub fn [<set_ $field>](&mut self, val: u32) {
                self.$field = ::zerocopy::little_endian::U32::new(val);
            }
        }
    };
    (@impl $field:ident, i32) => {
        ::paste::paste! {
            #[inline]
            pub fn $field(&self) -> i32 {
                self.$field.get()
            }

            #[inline]
            pub fn [<set_ $field>](&mut self, val: i32) {
                self.$field = ::zerocopy::little_endian::I32::new(val);
            }
        }
    };
    ($($field:ident: $ty:tt),* $(,)?) => {
        $(
            $crate::zerocopy_accessors!(@impl $field, $ty);
        )*
    };
}
