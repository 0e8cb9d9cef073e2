use std::{
    cmp::{self, Ordering},
    sync::Arc,
};

use integer_encoding::{FixedIntWriter, VarIntWriter};

use crate::{cmp::Comparator, error::Result};

/// Builds a block of prefix-compressed entries followed by its restart array.
pub struct BlockBuilder {
    comparator: Arc<dyn Comparator>,
    block_restart_interval: u32,
    buffer: Vec<u8>,    // destination buffer
    restarts: Vec<u32>, // restart points
    counter: u32,       // number of entries emitted since restart
    last_key: Vec<u8>,
}

impl BlockBuilder {
    pub fn new(comparator: Arc<dyn Comparator>, block_restart_interval: u32) -> Self {
        assert!(block_restart_interval >= 1);
        BlockBuilder {
            comparator,
            block_restart_interval,
            buffer: Vec::new(),
            restarts: vec![0],
            counter: 0,
            last_key: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn current_size_estimate(&self) -> usize {
        self.buffer.len() + 4 * self.restarts.len() + 4
    }

    pub fn add(&mut self, key: &[u8], val: &[u8]) -> Result<()> {
        assert!(self.counter <= self.block_restart_interval);
        assert!(
            self.buffer.is_empty()
                || self.comparator.compare(key, &self.last_key) == Ordering::Greater
        );

        let mut shared = 0;
        if self.counter < self.block_restart_interval {
            let smallest = cmp::min(key.len(), self.last_key.len());
            while shared < smallest && self.last_key[shared] == key[shared] {
                shared += 1;
            }
        } else {
            self.restarts.push(self.buffer.len() as u32);
            self.counter = 0;
        }
        let non_shared = key.len() - shared;

        self.buffer.write_varint(shared)?;
        self.buffer.write_varint(non_shared)?;
        self.buffer.write_varint(val.len())?;
        self.buffer.extend_from_slice(&key[shared..]);
        self.buffer.extend_from_slice(val);

        self.last_key.truncate(shared);
        self.last_key.extend_from_slice(&key[shared..]);
        self.counter += 1;
        Ok(())
    }

    pub fn finish(mut self) -> Result<Vec<u8>> {
        self.buffer.reserve(self.restarts.len() * 4 + 4);
        for r in self.restarts.iter() {
            self.buffer.write_fixedint(*r)?;
        }
        self.buffer.write_fixedint(self.restarts.len() as u32)?;
        Ok(self.buffer)
    }
}
