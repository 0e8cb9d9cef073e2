use std::sync::Arc;

use crate::{
    cmp::{BitWiseComparator, Comparator},
    error::{Error, Result},
};

/// Files kept open by a database for purposes other than tables (log, manifest, lock...).
pub const NUM_NON_TABLE_CACHE_FILES: u64 = 10;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Compress {
    NO = 0x0,
    Snappy = 0x1,
}

impl Compress {
    pub fn as_byte(&self) -> u8 {
        *self as u8
    }
}

impl TryFrom<u8> for Compress {
    type Error = Error;

    fn try_from(v: u8) -> Result<Self> {
        match v {
            0x0 => Ok(Self::NO),
            0x1 => Ok(Self::Snappy),
            _ => Err(Error::Corruption(format!("unknown compression type {}", v))),
        }
    }
}

#[derive(Clone)]
pub struct Options {
    pub comparator: Arc<dyn Comparator>,

    pub block_restart_interval: u32,
    pub block_size: usize,
    pub compression_type: Compress,

    /// Verify every block read while opening tables, not just when a read asks for it.
    pub paranoid_checks: bool,
    pub max_open_files: u64,
}

impl Options {
    /// Number of tables a database built on these options keeps open.
    pub fn table_cache_size(&self) -> u64 {
        self.max_open_files
            .saturating_sub(NUM_NON_TABLE_CACHE_FILES)
    }
}

impl Default for Options {
    fn default() -> Self {
        Options {
            comparator: Arc::new(BitWiseComparator {}),
            block_restart_interval: 16,
            block_size: 4 * 1024,
            compression_type: Compress::Snappy,
            paranoid_checks: false,
            max_open_files: 1000,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ReadOption {
    pub verify_checksum: bool,
}

impl Default for ReadOption {
    fn default() -> Self {
        ReadOption {
            verify_checksum: false,
        }
    }
}
