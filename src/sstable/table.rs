use std::{cmp::Ordering, sync::Arc};

use byteorder::{ByteOrder, LittleEndian};

use crate::{
    env::{RandomAccessFile, WritableFile},
    error::{Error, Result},
    iterator::DBIterator,
    options::{Compress, Options, ReadOption},
};

use super::{
    block::{Block, BlockIter},
    block_builder::BlockBuilder,
    format::{
        block_checksum, BlockContent, BlockHandle, Footer, BLOCK_TRAILER_SIZE,
        FULL_FOOTER_LENGTH,
    },
    two_level_iterator::{BlockIterBuilder, TwoLevelIterator},
};

pub type TableIterator<R> = TwoLevelIterator<BlockIter, TableBlockIterBuilder<R>>;

/// An immutable, opened sorted table. Safe to share between threads.
pub struct Table<R: RandomAccessFile> {
    file: Arc<R>,
    size: u64,
    options: Arc<Options>,
    index_block: Block,
}

impl<R: RandomAccessFile> Table<R> {
    pub fn open(options: Arc<Options>, file: Arc<R>, size: u64) -> Result<Self> {
        if size < FULL_FOOTER_LENGTH as u64 {
            return Err(Error::Corruption("file is too short to be an sstable".into()));
        }

        let mut scratch = [0u8; FULL_FOOTER_LENGTH];
        file.read_exact_at(&mut scratch, size - FULL_FOOTER_LENGTH as u64)?;
        let footer = Footer::decode(&scratch)?;

        let index_content = BlockContent::read_block_from_file(
            file.as_ref(),
            size,
            &footer.index_handle,
            options.paranoid_checks,
        )?;
        let index_block = Block::from_raw(index_content)?;

        Ok(Table {
            file,
            size,
            options,
            index_block,
        })
    }

    fn block_iter_from_index(
        &self,
        read_option: &ReadOption,
        index_value: &[u8],
    ) -> Result<BlockIter> {
        let (block_handle, _) = BlockHandle::decode_from(index_value)?;
        let block_content = BlockContent::read_block_from_file(
            self.file.as_ref(),
            self.size,
            &block_handle,
            read_option.verify_checksum || self.options.paranoid_checks,
        )?;
        let block = Block::from_raw(block_content)?;
        Ok(block.iter(self.options.comparator.clone()))
    }

    pub fn iter(self: &Arc<Self>, option: ReadOption) -> TableIterator<R> {
        let index_iter = self.index_block.iter(self.options.comparator.clone());
        let block_iter_builder = TableBlockIterBuilder {
            table: self.clone(),
        };
        TwoLevelIterator::new(index_iter, block_iter_builder, option)
    }

    /// Returns the first entry with a key `>= key`, if any.
    pub fn internal_get(
        self: &Arc<Self>,
        option: &ReadOption,
        key: &[u8],
    ) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        let mut iter = self.iter(option.clone());
        iter.seek(key);
        let found = if iter.valid() {
            Some((iter.key().to_vec(), iter.value().to_vec()))
        } else {
            None
        };
        iter.status()?;
        Ok(found)
    }
}

pub struct TableBlockIterBuilder<R: RandomAccessFile> {
    table: Arc<Table<R>>,
}

impl<R: RandomAccessFile> BlockIterBuilder for TableBlockIterBuilder<R> {
    type Iter = BlockIter;

    fn build(&self, option: &ReadOption, index_val: &[u8]) -> Result<Self::Iter> {
        self.table.block_iter_from_index(option, index_val)
    }
}

pub struct TableBuilder<W: WritableFile> {
    options: Arc<Options>,
    file: W,

    offset: u64,
    data_block: BlockBuilder,
    index_block: BlockBuilder,

    last_key: Vec<u8>,
    num_entries: u64,

    // index entry for the last flushed data block, added once the next key is known
    pending_index_entry: bool,
    pending_handle: BlockHandle,
}

impl<W: WritableFile> TableBuilder<W> {
    pub fn new(options: Arc<Options>, file: W) -> Self {
        let data_block =
            BlockBuilder::new(options.comparator.clone(), options.block_restart_interval);
        let index_block = BlockBuilder::new(options.comparator.clone(), 1);
        TableBuilder {
            options,
            file,
            offset: 0,
            data_block,
            index_block,
            last_key: Vec::new(),
            num_entries: 0,
            pending_index_entry: false,
            pending_handle: Default::default(),
        }
    }

    pub fn num_entries(&self) -> u64 {
        self.num_entries
    }

    pub fn add(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        if self.num_entries > 0
            && self.options.comparator.compare(key, &self.last_key) != Ordering::Greater
        {
            return Err(Error::InvalidArgument(
                "keys must be added in increasing order".into(),
            ));
        }

        if self.pending_index_entry {
            self.options
                .comparator
                .find_shortest_separator(&mut self.last_key, key);
            let mut handle_encoding = Vec::new();
            self.pending_handle.encode_to(&mut handle_encoding);
            self.index_block.add(&self.last_key, &handle_encoding)?;
            self.pending_index_entry = false;
        }

        self.last_key.clear();
        self.last_key.extend_from_slice(key);
        self.num_entries += 1;
        self.data_block.add(key, value)?;

        if self.data_block.current_size_estimate() >= self.options.block_size {
            self.flush()?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        if self.data_block.is_empty() {
            return Ok(());
        }
        assert!(!self.pending_index_entry);

        let data_block = std::mem::replace(
            &mut self.data_block,
            BlockBuilder::new(
                self.options.comparator.clone(),
                self.options.block_restart_interval,
            ),
        );
        self.pending_handle = self.write_block(data_block)?;
        self.pending_index_entry = true;
        self.file.flush()
    }

    /// Writes out the remaining blocks and the footer, returning the file size.
    pub fn finish(mut self, sync: bool) -> Result<u64> {
        self.flush()?;

        let meta_index_block = BlockBuilder::new(
            self.options.comparator.clone(),
            self.options.block_restart_interval,
        );
        let meta_index_handle = self.write_block(meta_index_block)?;

        if self.pending_index_entry {
            self.options
                .comparator
                .find_shortest_successor(&mut self.last_key);
            let mut handle_encoding = Vec::new();
            self.pending_handle.encode_to(&mut handle_encoding);
            self.index_block.add(&self.last_key, &handle_encoding)?;
            self.pending_index_entry = false;
        }
        let index_block = std::mem::replace(
            &mut self.index_block,
            BlockBuilder::new(self.options.comparator.clone(), 1),
        );
        let index_handle = self.write_block(index_block)?;

        let footer = Footer::new(meta_index_handle, index_handle).encode();
        self.file.append(&footer)?;
        self.offset += footer.len() as u64;

        if sync {
            self.file.sync()?;
        }
        Ok(self.offset)
    }

    fn write_block(&mut self, block: BlockBuilder) -> Result<BlockHandle> {
        let raw = block.finish()?;
        match self.options.compression_type {
            Compress::NO => self.write_raw_block(&raw, Compress::NO),
            Compress::Snappy => {
                let compressed = snap::raw::Encoder::new()
                    .compress_vec(&raw)
                    .map_err(|e| Error::Corruption(format!("snappy compression: {}", e)))?;
                // only keep compression that saves at least 12.5%
                if compressed.len() < raw.len() - (raw.len() / 8) {
                    self.write_raw_block(&compressed, Compress::Snappy)
                } else {
                    self.write_raw_block(&raw, Compress::NO)
                }
            }
        }
    }

    fn write_raw_block(&mut self, content: &[u8], compress_type: Compress) -> Result<BlockHandle> {
        let handle = BlockHandle::new(self.offset, content.len() as u64);

        let mut trailer = [0u8; BLOCK_TRAILER_SIZE];
        trailer[0] = compress_type.as_byte();
        LittleEndian::write_u32(
            &mut trailer[1..],
            block_checksum(content, compress_type.as_byte()),
        );

        self.file.append(content)?;
        self.file.append(&trailer)?;
        self.offset += (content.len() + BLOCK_TRAILER_SIZE) as u64;
        Ok(handle)
    }
}
