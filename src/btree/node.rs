//! # Common Node Header
//!
//! Every node page, leaf or internal, begins with the same 6-byte header:
//!
//! ```text
//! Offset  Size  Field      Description
//! ------  ----  ---------  ----------------------------------------
//! 0       1     node_type  0 = internal, 1 = leaf
//! 1       1     is_root    nonzero when this page is the tree root
//! 2       4     parent     parent page number (0 if none)
//! ```
//!
//! The parent back-pointer lets rebalancing walk upward without a search
//! stack; `rebuild_internal` in the tree layer is the single place that
//! rewrites it for a node's children.

use eyre::{ensure, Result};
use zerocopy::little_endian::U32;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

pub const NODE_HEADER_SIZE: usize = 6;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    Internal = 0,
    Leaf = 1,
}

impl NodeType {
    pub fn from_byte(b: u8) -> Result<Self> {
        match b {
            0 => Ok(NodeType::Internal),
            1 => Ok(NodeType::Leaf),
            _ => eyre::bail!("invalid node type byte: {:02x}", b),
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct NodeHeader {
    node_type: u8,
    is_root: u8,
    parent: U32,
}

const _: () = assert!(std::mem::size_of::<NodeHeader>() == NODE_HEADER_SIZE);

impl NodeHeader {
    pub fn from_page(data: &[u8]) -> Result<&Self> {
        ensure!(
            data.len() >= NODE_HEADER_SIZE,
            "buffer too small for NodeHeader: {} < {}",
            data.len(),
            NODE_HEADER_SIZE
        );
        Self::ref_from_bytes(&data[..NODE_HEADER_SIZE])
            .map_err(|e| eyre::eyre!("failed to read NodeHeader: {:?}", e))
    }

    pub fn from_page_mut(data: &mut [u8]) -> Result<&mut Self> {
        ensure!(
            data.len() >= NODE_HEADER_SIZE,
            "buffer too small for NodeHeader: {} < {}",
            data.len(),
            NODE_HEADER_SIZE
        );
        Self::mut_from_bytes(&mut data[..NODE_HEADER_SIZE])
            .map_err(|e| eyre::eyre!("failed to read NodeHeader: {:?}", e))
    }

    pub fn node_type(&self) -> Result<NodeType> {
        NodeType::from_byte(self.node_type)
    }

    pub fn set_node_type(&mut self, node_type: NodeType) {
        self.node_type = node_type as u8;
    }

    pub fn is_root(&self) -> bool {
        self.is_root != 0
    }

    pub fn set_root(&mut self, is_root: bool) {
        self.is_root = is_root as u8;
    }

    zerocopy_accessors! {
        parent: u32,
    }
}
