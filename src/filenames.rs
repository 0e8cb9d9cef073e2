use std::path::{Path, PathBuf};

pub type FileNum = u64;

pub fn table_file_name<P: AsRef<Path>>(name: P, num: FileNum) -> PathBuf {
    name.as_ref().join(format!("{:06}.ldb", num))
}

/// Name used for table files by older releases.
pub fn sst_table_file_name<P: AsRef<Path>>(name: P, num: FileNum) -> PathBuf {
    name.as_ref().join(format!("{:06}.sst", num))
}
