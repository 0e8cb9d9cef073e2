use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, PoisonError, RwLock},
};

use crate::error::{Error, Result};

use super::{Env, RandomAccessFile, WritableFile};

type FileData = Arc<RwLock<Vec<u8>>>;

/// A file held by `MemEnv`. Handles opened before a file is rewritten or deleted keep
/// seeing the old contents.
pub struct MemFile {
    data: FileData,
}

impl RandomAccessFile for MemFile {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        let data = self.data.read().unwrap_or_else(PoisonError::into_inner);
        let offset = offset as usize;
        if offset >= data.len() {
            return Ok(0);
        }
        let n = buf.len().min(data.len() - offset);
        buf[..n].copy_from_slice(&data[offset..offset + n]);
        Ok(n)
    }

    fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> Result<()> {
        if self.read_at(buf, offset)? < buf.len() {
            return Err(Error::IOError(Arc::new(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "read past end of file",
            ))));
        }
        Ok(())
    }
}

impl WritableFile for MemFile {
    fn append(&mut self, data: &[u8]) -> Result<()> {
        self.data
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(data);
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct MemEnv {
    files: Arc<Mutex<HashMap<PathBuf, FileData>>>,
}

impl MemEnv {
    pub fn new() -> Self {
        MemEnv::default()
    }

    fn get(&self, path: &Path) -> Result<FileData> {
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .cloned()
            .ok_or_else(|| Error::NotFound(path.display().to_string()))
    }

    /// Overwrites the contents of `path`, creating it if needed.
    pub fn write_file(&self, path: &Path, contents: &[u8]) {
        let data = Arc::new(RwLock::new(contents.to_vec()));
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.to_path_buf(), data);
    }
}

impl Env for MemEnv {
    type RandomAccessFile = MemFile;
    type WritableFile = MemFile;

    fn new_random_access_file(&self, name: &Path) -> Result<Self::RandomAccessFile> {
        Ok(MemFile {
            data: self.get(name)?,
        })
    }

    fn new_writable_file(&self, name: &Path) -> Result<Self::WritableFile> {
        let data: FileData = Default::default();
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_path_buf(), data.clone());
        Ok(MemFile { data })
    }

    fn file_size(&self, path: &Path) -> Result<u64> {
        let data = self.get(path)?;
        let len = data.read().unwrap_or_else(PoisonError::into_inner).len();
        Ok(len as u64)
    }

    fn file_exists(&self, path: &Path) -> bool {
        self.get(path).is_ok()
    }

    fn delete_file(&self, path: &Path) -> Result<()> {
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(path.display().to_string()))
    }

    fn create_dir(&self, _path: &Path) -> Result<()> {
        Ok(())
    }
}
