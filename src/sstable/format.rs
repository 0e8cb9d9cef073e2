use std::ops::Deref;

use byteorder::{ByteOrder, LittleEndian};
use integer_encoding::VarInt;

use crate::{
    env::RandomAccessFile,
    error::{Error, Result},
    options::Compress,
};

// two varint64 block handles, padded
pub const FOOTER_LENGTH: usize = 40;
pub const FULL_FOOTER_LENGTH: usize = FOOTER_LENGTH + 8;
pub const TABLE_MAGIC_NUMBER: u64 = 0xdb4775248b80fb57;
pub const MAX_ENCODED_BLOCK_HANDLE_LENGTH: usize = 20;
// 1-byte type + 32-bit crc
pub const BLOCK_TRAILER_SIZE: usize = 5;

#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub struct BlockHandle {
    offset: u64,
    size: u64,
}

impl BlockHandle {
    pub fn new(offset: u64, size: u64) -> Self {
        BlockHandle { offset, size }
    }

    pub fn size(&self) -> u64 {
        self.size
    }
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn encode_to(&self, dst: &mut Vec<u8>) {
        let mut buf = [0u8; MAX_ENCODED_BLOCK_HANDLE_LENGTH];
        let n = self.offset.encode_var(&mut buf);
        let n = n + self.size.encode_var(&mut buf[n..]);
        dst.extend_from_slice(&buf[..n]);
    }

    /// Decodes a handle from the front of `data`, returning it and the bytes consumed.
    pub fn decode_from(data: &[u8]) -> Result<(BlockHandle, usize)> {
        let (offset, offset_len) = u64::decode_var(data)
            .ok_or_else(|| Error::Corruption("bad block handle".into()))?;
        let (size, size_len) = u64::decode_var(&data[offset_len..])
            .ok_or_else(|| Error::Corruption("bad block handle".into()))?;
        Ok((BlockHandle { offset, size }, offset_len + size_len))
    }
}

#[derive(Default, Clone, Copy, Debug)]
pub struct Footer {
    pub meta_index_handle: BlockHandle,
    pub index_handle: BlockHandle,
}

impl Footer {
    pub fn new(meta: BlockHandle, index: BlockHandle) -> Footer {
        Footer {
            meta_index_handle: meta,
            index_handle: index,
        }
    }

    pub fn encode(&self) -> [u8; FULL_FOOTER_LENGTH] {
        let mut handles = Vec::with_capacity(FOOTER_LENGTH);
        self.meta_index_handle.encode_to(&mut handles);
        self.index_handle.encode_to(&mut handles);

        let mut buf = [0u8; FULL_FOOTER_LENGTH];
        buf[..handles.len()].copy_from_slice(&handles);
        LittleEndian::write_u64(&mut buf[FOOTER_LENGTH..], TABLE_MAGIC_NUMBER);
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Footer> {
        if data.len() < FULL_FOOTER_LENGTH {
            return Err(Error::Corruption("footer too short".into()));
        }
        if LittleEndian::read_u64(&data[FOOTER_LENGTH..]) != TABLE_MAGIC_NUMBER {
            return Err(Error::Corruption("not an sstable (bad magic number)".into()));
        }

        let (meta_index_handle, n) = BlockHandle::decode_from(&data[..FOOTER_LENGTH])?;
        let (index_handle, _) = BlockHandle::decode_from(&data[n..FOOTER_LENGTH])?;
        Ok(Footer {
            meta_index_handle,
            index_handle,
        })
    }
}

#[derive(Default, Debug)]
pub struct BlockContent {
    pub data: Vec<u8>,
}

impl BlockContent {
    pub fn new(data: Vec<u8>) -> Self {
        BlockContent { data }
    }

    /// Reads the block at `handle` from a file of `file_size` bytes.
    ///
    /// Handles come from the file itself, so one that points past the end is reported as
    /// corruption before anything is allocated for it.
    pub fn read_block_from_file<R: RandomAccessFile + ?Sized>(
        file: &R,
        file_size: u64,
        handle: &BlockHandle,
        verify_checksum: bool,
    ) -> Result<Self> {
        let end = handle
            .size()
            .checked_add(BLOCK_TRAILER_SIZE as u64)
            .and_then(|len| handle.offset().checked_add(len));
        match end {
            Some(end) if end <= file_size => {}
            _ => {
                return Err(Error::Corruption(format!(
                    "block handle (offset {}, size {}) past end of file ({} bytes)",
                    handle.offset(),
                    handle.size(),
                    file_size
                )))
            }
        }

        let n = handle.size() as usize;
        let mut buf = vec![0; n + BLOCK_TRAILER_SIZE];
        file.read_exact_at(&mut buf, handle.offset())
            .map_err(|_| Error::Corruption("truncated block read".into()))?;

        if verify_checksum {
            let expected = LittleEndian::read_u32(&buf[n + 1..]);
            if expected != block_checksum(&buf[..n], buf[n]) {
                return Err(Error::Corruption("block checksum mismatch".into()));
            }
        }

        match Compress::try_from(buf[n])? {
            Compress::NO => {
                buf.truncate(n);
                Ok(BlockContent::new(buf))
            }
            Compress::Snappy => {
                let data = snap::raw::Decoder::new()
                    .decompress_vec(&buf[..n])
                    .map_err(|_| Error::Corruption("corrupted compressed block contents".into()))?;
                Ok(BlockContent::new(data))
            }
        }
    }
}

/// Checksum over a block's contents and its compression type byte.
pub fn block_checksum(content: &[u8], compress_type: u8) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(content);
    hasher.update(&[compress_type]);
    hasher.finalize()
}

impl Deref for BlockContent {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.data
    }
}
