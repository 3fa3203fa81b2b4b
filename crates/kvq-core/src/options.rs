//! Options shared by the engine's read operations.

use serde::{Deserialize, Serialize};

/// Byte order of the value codec. Keys always use the tuple layer's own
/// encoding; this only affects values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ByteOrder {
    #[default]
    Big,
    Little,
}

impl ByteOrder {
    pub(crate) fn u64_bytes(self, v: u64) -> [u8; 8] {
        match self {
            ByteOrder::Big => v.to_be_bytes(),
            ByteOrder::Little => v.to_le_bytes(),
        }
    }

    pub(crate) fn u64_from(self, b: [u8; 8]) -> u64 {
        match self {
            ByteOrder::Big => u64::from_be_bytes(b),
            ByteOrder::Little => u64::from_le_bytes(b),
        }
    }
}

/// Options for point reads.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SingleOpts {
    pub byte_order: ByteOrder,
    /// When true (the default), a stored value that doesn't match the
    /// query's schema reads as absent. When false, it is an error.
    pub filter: bool,
}

impl Default for SingleOpts {
    fn default() -> Self {
        Self {
            byte_order: ByteOrder::default(),
            filter: true,
        }
    }
}

/// Options for range reads.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RangeOpts {
    pub byte_order: ByteOrder,
    /// Walk each directory's range in descending key order.
    pub reverse: bool,
    /// When true (the default), rows that don't fit the schema are
    /// dropped; when false, the first such row fails the read.
    pub filter: bool,
    /// Cap on rows emitted across all matched directories. Zero means
    /// unlimited.
    pub limit: usize,
}

impl Default for RangeOpts {
    fn default() -> Self {
        Self {
            byte_order: ByteOrder::default(),
            reverse: false,
            filter: true,
            limit: 0,
        }
    }
}
