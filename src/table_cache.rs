//! A cache of opened tables, keyed by file number.
//!
//! Opening a table means opening its file and parsing the footer and index block, which is
//! too expensive to repeat on every read. `TableCache` keeps a bounded number of opened
//! tables and hands out iterators that pin their table until the iterator is closed or
//! dropped, so a table evicted while in use stays readable for the readers that have it.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use byteorder::{ByteOrder, LittleEndian};
use tracing::{debug, warn};

use crate::{
    env::{Env, RandomAccessFile},
    error::Result,
    filenames::{sst_table_file_name, table_file_name, FileNum},
    iterator::{CleanupIterator, DBIterator, EmptyIterator},
    options::{Options, ReadOption},
    sstable::Table,
    utils::cache::{Cache, CacheHandle, Deleter, ShardLruCache},
};

pub type CacheKey = [u8; 8];

fn file_num_to_key(num: FileNum) -> CacheKey {
    let mut key = [0u8; 8];
    LittleEndian::write_u64(&mut key, num);
    key
}

/// A cached entry: the open file and the table parsed from it.
///
/// The cache's finalizer only logs. The file is closed when the last `Arc<R>` goes away,
/// which is after the entry is finalized if a caller still holds the `Arc<Table>` returned
/// by `new_iterator_with_table`.
pub struct TableAndFile<R: RandomAccessFile> {
    file: Arc<R>,
    table: Arc<Table<R>>,
}

impl<R: RandomAccessFile> TableAndFile<R> {
    pub fn file(&self) -> &Arc<R> {
        &self.file
    }

    pub fn table(&self) -> &Arc<Table<R>> {
        &self.table
    }
}

type RandomFile<E> = <E as Env>::RandomAccessFile;
pub type TableHandle<E> = CacheHandle<CacheKey, TableAndFile<RandomFile<E>>>;
pub type TableCacheIterator = CleanupIterator<Box<dyn DBIterator + Send>>;

#[derive(Clone)]
pub struct TableCache<E: Env> {
    env: E,
    dbname: PathBuf,
    options: Arc<Options>,
    cache: Arc<ShardLruCache<CacheKey, TableAndFile<RandomFile<E>>>>,
}

impl<E: Env> TableCache<E> {
    /// Creates a cache for the tables of database `dbname`, keeping up to `entries` open.
    pub fn new<P: AsRef<Path>>(dbname: P, options: Arc<Options>, env: E, entries: u64) -> Self {
        TableCache {
            env,
            dbname: dbname.as_ref().to_path_buf(),
            options,
            cache: Arc::new(ShardLruCache::new(entries)),
        }
    }

    /// Returns a handle on the table for `file_number`, opening and caching it on a miss.
    ///
    /// Failed opens are not cached: the next call tries again.
    pub fn find_table(&self, file_number: FileNum) -> Result<TableHandle<E>> {
        let key = file_num_to_key(file_number);
        if let Some(handle) = self.cache.lookup(&key) {
            return Ok(handle);
        }

        let (file, path) = self.open_table_file(file_number).map_err(|e| {
            warn!(file_number, error = %e, "failed to open table file");
            e
        })?;
        let size = self.env.file_size(&path)?;
        let file = Arc::new(file);
        let table = Table::open(self.options.clone(), file.clone(), size).map_err(|e| {
            warn!(file_number, path = %path.display(), error = %e, "failed to parse table");
            e
        })?;
        debug!(file_number, size, "opened table");

        let deleter: Deleter<CacheKey, TableAndFile<RandomFile<E>>> =
            Box::new(|key: &CacheKey, _: &TableAndFile<RandomFile<E>>| {
                debug!(file_number = LittleEndian::read_u64(key), "closing table");
            });
        let entry = TableAndFile {
            file,
            table: Arc::new(table),
        };
        Ok(self.cache.insert(key, entry, 1, Some(deleter)))
    }

    fn open_table_file(&self, file_number: FileNum) -> Result<(RandomFile<E>, PathBuf)> {
        let path = table_file_name(&self.dbname, file_number);
        match self.env.new_random_access_file(&path) {
            Ok(file) => Ok((file, path)),
            Err(err) => {
                let old_path = sst_table_file_name(&self.dbname, file_number);
                match self.env.new_random_access_file(&old_path) {
                    Ok(file) => Ok((file, old_path)),
                    Err(_) => Err(err),
                }
            }
        }
    }

    /// Returns an iterator over the table for `file_number`.
    ///
    /// On failure the returned iterator is empty and its `status()` reports the error.
    pub fn new_iterator(&self, option: &ReadOption, file_number: FileNum) -> TableCacheIterator {
        self.new_iterator_with_table(option, file_number).0
    }

    /// Like `new_iterator`, also returning the table the iterator reads from.
    pub fn new_iterator_with_table(
        &self,
        option: &ReadOption,
        file_number: FileNum,
    ) -> (TableCacheIterator, Option<Arc<Table<RandomFile<E>>>>) {
        let handle = match self.find_table(file_number) {
            Ok(handle) => handle,
            Err(err) => {
                let iter: Box<dyn DBIterator + Send> = Box::new(EmptyIterator::with_error(err));
                return (CleanupIterator::new(iter), None);
            }
        };

        let table = handle.value().table.clone();
        let mut iter = CleanupIterator::new(
            Box::new(table.iter(option.clone())) as Box<dyn DBIterator + Send>
        );
        let cache = self.cache.clone();
        iter.register_cleanup(Box::new(move || cache.release(handle)));
        (iter, Some(table))
    }

    /// Returns the first entry at or after `key` in the table for `file_number`.
    pub fn get(
        &self,
        option: &ReadOption,
        file_number: FileNum,
        key: &[u8],
    ) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        let handle = self.find_table(file_number)?;
        let result = handle.value().table.internal_get(option, key);
        self.cache.release(handle);
        result
    }

    /// Drops the cached table for `file_number`, if any. Iterators already reading it are
    /// unaffected; the file is closed once the last of them is done.
    pub fn evict(&self, file_number: FileNum) {
        debug!(file_number, "evicting table");
        self.cache.erase(&file_num_to_key(file_number));
    }

    /// Number of tables currently available without reopening.
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    pub fn total_charge(&self) -> u64 {
        self.cache.total_charge()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use crate::{
        env::mem::{MemEnv, MemFile},
        options::Compress,
        sstable::{
            format::{BlockHandle, Footer},
            TableBuilder,
        },
    };

    use super::*;

    const DB: &str = "testdb";

    /// Counts opens and closes of random access files, and can be told to fail opens.
    #[derive(Clone, Default)]
    struct CountingEnv {
        inner: MemEnv,
        opens: Arc<AtomicUsize>,
        closes: Arc<AtomicUsize>,
        fail_opens: Arc<AtomicBool>,
    }

    struct CountingFile {
        inner: MemFile,
        closes: Arc<AtomicUsize>,
    }

    impl Drop for CountingFile {
        fn drop(&mut self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl RandomAccessFile for CountingFile {
        fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
            self.inner.read_at(buf, offset)
        }
        fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> Result<()> {
            self.inner.read_exact_at(buf, offset)
        }
    }

    impl Env for CountingEnv {
        type RandomAccessFile = CountingFile;
        type WritableFile = MemFile;

        fn new_random_access_file(&self, name: &Path) -> Result<Self::RandomAccessFile> {
            if self.fail_opens.load(Ordering::SeqCst) {
                return Err(std::io::Error::new(std::io::ErrorKind::Other, "injected").into());
            }
            let inner = self.inner.new_random_access_file(name)?;
            self.opens.fetch_add(1, Ordering::SeqCst);
            Ok(CountingFile {
                inner,
                closes: self.closes.clone(),
            })
        }
        fn new_writable_file(&self, name: &Path) -> Result<Self::WritableFile> {
            self.inner.new_writable_file(name)
        }
        fn file_size(&self, path: &Path) -> Result<u64> {
            self.inner.file_size(path)
        }
        fn file_exists(&self, path: &Path) -> bool {
            self.inner.file_exists(path)
        }
        fn delete_file(&self, path: &Path) -> Result<()> {
            self.inner.delete_file(path)
        }
        fn create_dir(&self, path: &Path) -> Result<()> {
            self.inner.create_dir(path)
        }
    }

    impl CountingEnv {
        fn opens(&self) -> usize {
            self.opens.load(Ordering::SeqCst)
        }
        fn closes(&self) -> usize {
            self.closes.load(Ordering::SeqCst)
        }
    }

    fn options() -> Arc<Options> {
        Arc::new(Options {
            block_size: 512,
            compression_type: Compress::NO,
            ..Default::default()
        })
    }

    fn write_table_at(env: &CountingEnv, path: &Path, file_number: FileNum, n: usize) {
        let file = env.new_writable_file(path).unwrap();
        let mut builder = TableBuilder::new(options(), file);
        for i in 0..n {
            let key = format!("key{:03}-{:05}", file_number, i);
            let value = format!("value{:03}-{:05}", file_number, i);
            builder.add(key.as_bytes(), value.as_bytes()).unwrap();
        }
        builder.finish(true).unwrap();
    }

    fn write_table(env: &CountingEnv, file_number: FileNum, n: usize) {
        write_table_at(env, &table_file_name(DB, file_number), file_number, n);
    }

    fn count_entries(iter: &mut impl DBIterator) -> usize {
        let mut n = 0;
        iter.seek_to_first();
        while iter.valid() {
            n += 1;
            iter.next();
        }
        assert!(iter.status().is_ok());
        n
    }

    fn new_cache(env: &CountingEnv, entries: u64) -> TableCache<CountingEnv> {
        TableCache::new(DB, options(), env.clone(), entries)
    }

    #[test]
    fn test_open_once_then_hit() {
        let env = CountingEnv::default();
        write_table(&env, 1, 200);
        let cache = new_cache(&env, 10);
        let option = ReadOption::default();

        let mut iter = cache.new_iterator(&option, 1);
        assert_eq!(env.opens(), 1);
        assert_eq!(count_entries(&mut iter), 200);
        drop(iter);

        let mut iter = cache.new_iterator(&option, 1);
        assert_eq!(env.opens(), 1);
        assert_eq!(count_entries(&mut iter), 200);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.total_charge(), 1);
    }

    #[test]
    fn test_evict_while_iterating() {
        let env = CountingEnv::default();
        write_table(&env, 7, 300);
        let cache = new_cache(&env, 10);
        let option = ReadOption::default();

        let mut old = cache.new_iterator(&option, 7);
        old.seek_to_first();
        old.next();
        cache.evict(7);
        assert_eq!(cache.len(), 0);
        assert_eq!(env.closes(), 0);

        let mut new = cache.new_iterator(&option, 7);
        assert_eq!(env.opens(), 2);

        // the old iterator keeps reading the evicted entry
        let mut n = 2;
        old.next();
        while old.valid() {
            n += 1;
            old.next();
        }
        assert_eq!(n, 300);
        assert!(old.status().is_ok());

        old.close();
        drop(old);
        assert_eq!(env.closes(), 1);

        assert_eq!(count_entries(&mut new), 300);
        drop(new);
        assert_eq!(env.closes(), 1);
    }

    #[test]
    fn test_one_close_per_open() {
        let env = CountingEnv::default();
        for n in 1..=6 {
            write_table(&env, n, 50);
        }
        let cache = new_cache(&env, 3);
        let option = ReadOption::default();

        let mut held = Vec::new();
        for round in 0..3 {
            for n in 1..=6 {
                let iter = cache.new_iterator(&option, n);
                if (n + round) % 2 == 0 {
                    held.push(iter);
                }
            }
            cache.evict(2);
        }
        assert!(env.closes() < env.opens());

        drop(held);
        for n in 1..=6 {
            cache.evict(n);
        }
        assert_eq!(cache.len(), 0);
        assert_eq!(env.closes(), env.opens());
    }

    #[test]
    fn test_capacity_two_lru() {
        let env = CountingEnv::default();
        for n in 1..=3 {
            write_table(&env, n, 10);
        }
        let cache = new_cache(&env, 2);
        let option = ReadOption::default();

        for n in 1..=3 {
            cache.new_iterator(&option, n);
        }
        assert_eq!(env.opens(), 3);
        assert_eq!(cache.len(), 2);

        cache.new_iterator(&option, 2);
        cache.new_iterator(&option, 3);
        assert_eq!(env.opens(), 3);

        cache.new_iterator(&option, 1);
        assert_eq!(env.opens(), 4);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_capacity_bounds_lookup_eligible_entries() {
        let env = CountingEnv::default();
        for n in 1..=20 {
            write_table(&env, n, 5);
        }
        let cache = new_cache(&env, 4);
        let option = ReadOption::default();

        let mut held = Vec::new();
        for n in 1..=20 {
            held.push(cache.new_iterator(&option, n));
            assert!(cache.len() <= 4);
        }
        // every table is still readable through its iterator
        for iter in held.iter_mut() {
            assert_eq!(count_entries(iter), 5);
        }
        assert_eq!(env.closes(), 0);
        drop(held);
        assert_eq!(env.closes(), 16);
    }

    #[test]
    fn test_open_failure_not_cached() {
        let env = CountingEnv::default();
        let cache = new_cache(&env, 10);
        let option = ReadOption::default();

        let (mut iter, table) = cache.new_iterator_with_table(&option, 3);
        assert!(table.is_none());
        iter.seek_to_first();
        assert!(!iter.valid());
        assert!(iter.status().unwrap_err().is_not_found());
        assert_eq!(cache.len(), 0);

        write_table(&env, 3, 20);
        env.fail_opens.store(true, Ordering::SeqCst);
        let iter = cache.new_iterator(&option, 3);
        assert!(iter.status().unwrap_err().is_io_error());
        assert_eq!(cache.len(), 0);

        env.fail_opens.store(false, Ordering::SeqCst);
        let mut iter = cache.new_iterator(&option, 3);
        assert_eq!(count_entries(&mut iter), 20);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_parse_failure_closes_file_and_retries() {
        let env = CountingEnv::default();
        let path = table_file_name(DB, 4);
        env.inner.write_file(&path, &[0x42; 200]);
        let cache = new_cache(&env, 10);
        let option = ReadOption::default();

        let iter = cache.new_iterator(&option, 4);
        assert!(iter.status().unwrap_err().is_corruption());
        assert_eq!(cache.len(), 0);
        assert_eq!(env.opens(), 1);
        assert_eq!(env.closes(), 1);

        // a repaired file is picked up on the next call
        write_table(&env, 4, 30);
        let mut iter = cache.new_iterator(&option, 4);
        assert_eq!(env.opens(), 2);
        assert_eq!(count_entries(&mut iter), 30);
    }

    #[test]
    fn test_index_handle_past_end_of_file() {
        let env = CountingEnv::default();
        let cache = new_cache(&env, 10);
        let option = ReadOption::default();

        for (n, size) in [(1, 1u64 << 40), (2, u64::MAX - 2)] {
            let footer = Footer::new(BlockHandle::new(0, 0), BlockHandle::new(0, size));
            env.inner.write_file(&table_file_name(DB, n), &footer.encode());

            let (mut iter, table) = cache.new_iterator_with_table(&option, n);
            assert!(table.is_none());
            iter.seek_to_first();
            assert!(!iter.valid());
            assert!(iter.status().unwrap_err().is_corruption());
        }
        assert_eq!(cache.len(), 0);
        assert_eq!(env.opens(), 2);
        assert_eq!(env.closes(), env.opens());
    }

    #[test]
    fn test_legacy_sst_name() {
        let env = CountingEnv::default();
        write_table_at(&env, &sst_table_file_name(DB, 9), 9, 15);
        let cache = new_cache(&env, 10);

        let mut iter = cache.new_iterator(&ReadOption::default(), 9);
        assert_eq!(count_entries(&mut iter), 15);
    }

    #[test]
    fn test_table_outlives_iterator() {
        let env = CountingEnv::default();
        write_table(&env, 5, 40);
        let cache = new_cache(&env, 10);
        let option = ReadOption::default();

        let (iter, table) = cache.new_iterator_with_table(&option, 5);
        let table = table.unwrap();
        drop(iter);
        cache.evict(5);

        let (k, v) = table.internal_get(&option, b"key005-00010").unwrap().unwrap();
        assert_eq!(k, b"key005-00010");
        assert_eq!(v, b"value005-00010");
        assert_eq!(env.closes(), 0);
        drop(table);
        assert_eq!(env.closes(), 1);
    }

    #[test]
    fn test_get() {
        let env = CountingEnv::default();
        write_table(&env, 2, 100);
        let cache = new_cache(&env, 10);
        let option = ReadOption::default();

        let (k, v) = cache.get(&option, 2, b"key002-00042").unwrap().unwrap();
        assert_eq!(k, b"key002-00042");
        assert_eq!(v, b"value002-00042");
        assert!(cache.get(&option, 2, b"key002-99999").unwrap().is_none());
        assert_eq!(env.opens(), 1);

        assert!(cache.get(&option, 8, b"key").unwrap_err().is_not_found());
    }

    #[test]
    fn test_evict_absent_is_noop() {
        let env = CountingEnv::default();
        let cache = new_cache(&env, 10);
        cache.evict(12345);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_concurrent_miss_same_file() {
        let env = CountingEnv::default();
        write_table(&env, 11, 500);
        let cache = new_cache(&env, 10);

        crossbeam::scope(|s| {
            for _ in 0..2 {
                let cache = &cache;
                s.spawn(move |_| {
                    let mut iter = cache.new_iterator(&ReadOption::default(), 11);
                    assert_eq!(count_entries(&mut iter), 500);
                    iter.close();
                });
            }
        })
        .unwrap();

        let opens = env.opens();
        assert!(opens == 1 || opens == 2);
        assert_eq!(cache.len(), 1);
        cache.evict(11);
        assert_eq!(env.closes(), opens);
    }

    #[test]
    fn test_concurrent_readers_and_evictions() {
        let env = CountingEnv::default();
        for n in 1..=8 {
            write_table(&env, n, 60);
        }
        let cache = new_cache(&env, 4);

        crossbeam::scope(|s| {
            for t in 0..4u64 {
                let cache = &cache;
                s.spawn(move |_| {
                    let option = ReadOption::default();
                    for i in 0..50u64 {
                        let n = (i + t) % 8 + 1;
                        let mut iter = cache.new_iterator(&option, n);
                        assert_eq!(count_entries(&mut iter), 60);
                        if i % 5 == 0 {
                            cache.evict(n);
                        }
                    }
                });
            }
        })
        .unwrap();

        for n in 1..=8 {
            cache.evict(n);
        }
        assert_eq!(env.closes(), env.opens());
    }

    #[test]
    fn test_sized_from_options() {
        let env = CountingEnv::default();
        let options = Arc::new(Options {
            max_open_files: 12,
            ..Default::default()
        });
        let cache = TableCache::new(DB, options.clone(), env.clone(), options.table_cache_size());
        for n in 1..=3 {
            write_table(&env, n, 3);
            cache.new_iterator(&ReadOption::default(), n);
        }
        assert_eq!(cache.len(), 2);
    }
}
