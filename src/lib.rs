mod cmp;
mod env;
mod error;
mod filenames;
mod iterator;
mod options;
mod sstable;
mod table_cache;
mod utils;

pub use cmp::{BitWiseComparator, Comparator};
pub use env::{mem::MemEnv, Env, RandomAccessFile, WritableFile};
#[cfg(unix)]
pub use env::posix::PosixEnv;
pub use error::{Error, Result};
pub use filenames::{sst_table_file_name, table_file_name, FileNum};
pub use iterator::{CleanupIterator, DBIterator, EmptyIterator};
pub use options::{Compress, Options, ReadOption};
pub use sstable::{Table, TableBuilder};
pub use table_cache::{TableAndFile, TableCache, TableCacheIterator, TableHandle};
pub use utils::cache::{Cache, CacheHandle, Deleter, ShardLruCache};
