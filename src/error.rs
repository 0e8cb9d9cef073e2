use std::{io, result, sync::Arc};

use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("corruption: {0}")]
    Corruption(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    // io::Error is not Clone; error iterators hand the same status out repeatedly.
    #[error("io error: {0}")]
    IOError(Arc<io::Error>),
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound(_) => true,
            Error::IOError(e) => e.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }

    pub fn is_corruption(&self) -> bool {
        matches!(self, Error::Corruption(_))
    }

    pub fn is_io_error(&self) -> bool {
        matches!(self, Error::IOError(_))
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::IOError(Arc::new(e))
    }
}

pub type Result<T> = result::Result<T, Error>;
