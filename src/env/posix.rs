use super::{Env, RandomAccessFile, WritableFile};
use crate::error::{Error, Result};
#[cfg(unix)]
use std::os::unix::fs::FileExt;
use std::{
    fs::{self, File},
    io::{self, Write},
    path::Path,
};

pub struct PosixFile(File);

fn path_error(path: &Path, err: io::Error) -> Error {
    if err.kind() == io::ErrorKind::NotFound {
        Error::NotFound(format!("{}: {}", path.display(), err))
    } else {
        err.into()
    }
}

#[cfg(unix)]
impl RandomAccessFile for PosixFile {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        Ok(self.0.read_at(buf, offset)?)
    }
    fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> Result<()> {
        Ok(self.0.read_exact_at(buf, offset)?)
    }
}

impl WritableFile for PosixFile {
    fn append(&mut self, data: &[u8]) -> Result<()> {
        Ok(self.0.write_all(data)?)
    }

    fn flush(&mut self) -> Result<()> {
        Ok(self.0.flush()?)
    }

    fn sync(&mut self) -> Result<()> {
        Ok(self.0.sync_all()?)
    }
}

#[cfg(unix)]
#[derive(Clone, Copy, Default)]
pub struct PosixEnv {}

#[cfg(unix)]
impl Env for PosixEnv {
    type RandomAccessFile = PosixFile;
    type WritableFile = PosixFile;

    fn new_random_access_file(&self, name: &Path) -> Result<Self::RandomAccessFile> {
        let file = fs::OpenOptions::new()
            .read(true)
            .open(name)
            .map_err(|e| path_error(name, e))?;
        Ok(PosixFile(file))
    }

    fn new_writable_file(&self, path: &Path) -> Result<Self::WritableFile> {
        let file = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)
            .map_err(|e| path_error(path, e))?;
        Ok(PosixFile(file))
    }

    fn file_size(&self, path: &Path) -> Result<u64> {
        let meta = fs::metadata(path).map_err(|e| path_error(path, e))?;
        Ok(meta.len())
    }

    fn file_exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn delete_file(&self, path: &Path) -> Result<()> {
        fs::remove_file(path).map_err(|e| path_error(path, e))
    }

    fn create_dir(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path).map_err(|e| path_error(path, e))
    }
}
