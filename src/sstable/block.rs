use std::{cmp::Ordering, sync::Arc};

use byteorder::{ByteOrder, LittleEndian};
use integer_encoding::VarInt;

use super::format::BlockContent;
use crate::{
    cmp::Comparator,
    error::{Error, Result},
    iterator::DBIterator,
};

const RESTART_SIZE: usize = 4;

pub struct Block {
    content: Arc<BlockContent>,
    restart_offset: usize,
    num_restarts: u32,
}

impl Block {
    pub fn from_raw(content: BlockContent) -> Result<Self> {
        let n = content.len();
        if n < RESTART_SIZE {
            return Err(Error::Corruption(
                "bad block contents, size too small".into(),
            ));
        }
        let num_restarts = LittleEndian::read_u32(&content[n - RESTART_SIZE..]);
        let max_restarts_allowed = (n - RESTART_SIZE) / RESTART_SIZE;
        if num_restarts as usize > max_restarts_allowed {
            return Err(Error::Corruption("bad block contents".into()));
        }
        Ok(Block {
            restart_offset: n - (1 + num_restarts as usize) * RESTART_SIZE,
            num_restarts,
            content: Arc::new(content),
        })
    }

    pub fn iter(&self, comparator: Arc<dyn Comparator>) -> BlockIter {
        BlockIter {
            content: self.content.clone(),
            comparator,
            restarts: self.restart_offset,
            num_restarts: self.num_restarts,
            current: self.restart_offset,
            next_offset: self.restart_offset,
            restart_index: self.num_restarts,
            key: Vec::new(),
            value: (0, 0),
            err: None,
        }
    }
}

struct EntryHeader {
    shared: usize,
    non_shared: usize,
    value_len: usize,
    header_len: usize,
}

pub struct BlockIter {
    content: Arc<BlockContent>,
    comparator: Arc<dyn Comparator>,

    restarts: usize,
    num_restarts: u32,

    // offset of the current entry; `restarts` when invalid
    current: usize,
    next_offset: usize,
    restart_index: u32,
    key: Vec<u8>,
    // (offset, len) of the current value
    value: (usize, usize),
    err: Option<Error>,
}

impl BlockIter {
    fn decode_entry(&self, offset: usize) -> Option<EntryHeader> {
        if offset >= self.restarts {
            return None;
        }
        let data = &self.content[offset..self.restarts];
        let (shared, n0) = u32::decode_var(data)?;
        let (non_shared, n1) = u32::decode_var(&data[n0..])?;
        let (value_len, n2) = u32::decode_var(&data[n0 + n1..])?;
        let header_len = n0 + n1 + n2;
        if data.len() - header_len < non_shared as usize + value_len as usize {
            return None;
        }
        Some(EntryHeader {
            shared: shared as usize,
            non_shared: non_shared as usize,
            value_len: value_len as usize,
            header_len,
        })
    }

    fn get_restart_point(&self, index: u32) -> usize {
        assert!(index < self.num_restarts);
        let offset = self.restarts + RESTART_SIZE * index as usize;
        LittleEndian::read_u32(&self.content[offset..]) as usize
    }

    fn seek_to_restart_point(&mut self, index: u32) {
        self.key.clear();
        self.restart_index = index;
        self.next_offset = self.get_restart_point(index);
    }

    fn mark_invalid(&mut self) {
        self.current = self.restarts;
        self.restart_index = self.num_restarts;
    }

    fn parse_next_entry(&mut self) -> bool {
        self.current = self.next_offset;
        if self.current >= self.restarts {
            self.mark_invalid();
            return false;
        }

        match self.decode_entry(self.current) {
            Some(h) if h.shared <= self.key.len() => {
                let key_offset = self.current + h.header_len;
                self.key.truncate(h.shared);
                self.key
                    .extend_from_slice(&self.content[key_offset..key_offset + h.non_shared]);
                self.value = (key_offset + h.non_shared, h.value_len);
                self.next_offset = self.value.0 + h.value_len;
                while self.restart_index + 1 < self.num_restarts
                    && self.get_restart_point(self.restart_index + 1) < self.current
                {
                    self.restart_index += 1;
                }
                true
            }
            _ => {
                self.corruption_err();
                false
            }
        }
    }

    fn corruption_err(&mut self) {
        self.mark_invalid();
        self.key.clear();
        self.err
            .get_or_insert(Error::Corruption("bad entry in block".into()));
    }

    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        self.comparator.compare(a, b)
    }
}

impl DBIterator for BlockIter {
    fn valid(&self) -> bool {
        self.current < self.restarts
    }

    fn seek_to_first(&mut self) {
        if self.num_restarts == 0 {
            self.mark_invalid();
            return;
        }
        self.seek_to_restart_point(0);
        self.parse_next_entry();
    }

    fn seek_to_last(&mut self) {
        if self.num_restarts == 0 {
            self.mark_invalid();
            return;
        }
        self.seek_to_restart_point(self.num_restarts - 1);
        while self.parse_next_entry() && self.next_offset < self.restarts {}
    }

    fn seek(&mut self, target: &[u8]) {
        if self.num_restarts == 0 {
            self.mark_invalid();
            return;
        }
        // binary search for the last restart point with a key < target
        let (mut left, mut right) = (0, self.num_restarts - 1);
        while left < right {
            let mid = (left + right + 1) / 2;
            let region_offset = self.get_restart_point(mid);
            match self.decode_entry(region_offset) {
                Some(h) if h.shared == 0 => {
                    let key_offset = region_offset + h.header_len;
                    let key = &self.content[key_offset..key_offset + h.non_shared];
                    if self.compare(key, target) == Ordering::Less {
                        left = mid;
                    } else {
                        right = mid - 1;
                    }
                }
                _ => {
                    self.corruption_err();
                    return;
                }
            }
        }

        self.seek_to_restart_point(left);
        while self.parse_next_entry() {
            if self.compare(&self.key, target) != Ordering::Less {
                return;
            }
        }
    }

    fn next(&mut self) {
        assert!(self.valid());
        self.parse_next_entry();
    }

    fn prev(&mut self) {
        assert!(self.valid());

        // back up to a restart point before the current entry
        let original = self.current;
        while self.get_restart_point(self.restart_index) >= original {
            if self.restart_index == 0 {
                self.mark_invalid();
                return;
            }
            self.restart_index -= 1;
        }
        self.seek_to_restart_point(self.restart_index);
        while self.parse_next_entry() && self.next_offset < original {}
    }

    fn key(&self) -> &[u8] {
        assert!(self.valid());
        &self.key
    }

    fn value(&self) -> &[u8] {
        assert!(self.valid());
        let (offset, len) = self.value;
        &self.content[offset..offset + len]
    }

    fn status(&self) -> Result<()> {
        match self.err {
            Some(ref err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}
