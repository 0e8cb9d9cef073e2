use crate::{
    error::{Error, Result},
    utils::release::DropRelease,
};

pub trait DBIterator {
    fn valid(&self) -> bool;
    fn seek_to_first(&mut self);
    fn seek_to_last(&mut self);
    fn seek(&mut self, target: &[u8]);
    fn next(&mut self);
    fn prev(&mut self);
    fn key(&self) -> &[u8];
    fn value(&self) -> &[u8];
    fn status(&self) -> Result<()>;
}

impl<I: DBIterator + ?Sized> DBIterator for Box<I> {
    fn valid(&self) -> bool {
        (**self).valid()
    }
    fn seek_to_first(&mut self) {
        (**self).seek_to_first()
    }
    fn seek_to_last(&mut self) {
        (**self).seek_to_last()
    }
    fn seek(&mut self, target: &[u8]) {
        (**self).seek(target)
    }
    fn next(&mut self) {
        (**self).next()
    }
    fn prev(&mut self) {
        (**self).prev()
    }
    fn key(&self) -> &[u8] {
        (**self).key()
    }
    fn value(&self) -> &[u8] {
        (**self).value()
    }
    fn status(&self) -> Result<()> {
        (**self).status()
    }
}

/// An iterator over nothing, optionally carrying the error that prevented a real one.
#[derive(Default)]
pub struct EmptyIterator {
    err: Option<Error>,
}

impl EmptyIterator {
    pub fn new() -> Self {
        EmptyIterator { err: None }
    }

    pub fn with_error(err: Error) -> Self {
        EmptyIterator { err: Some(err) }
    }
}

impl DBIterator for EmptyIterator {
    fn valid(&self) -> bool {
        false
    }
    fn seek_to_first(&mut self) {}
    fn seek_to_last(&mut self) {}
    fn seek(&mut self, _target: &[u8]) {}
    fn next(&mut self) {
        assert!(self.valid());
    }
    fn prev(&mut self) {
        assert!(self.valid());
    }
    fn key(&self) -> &[u8] {
        assert!(self.valid());
        &[]
    }
    fn value(&self) -> &[u8] {
        assert!(self.valid());
        &[]
    }
    fn status(&self) -> Result<()> {
        match self.err {
            Some(ref err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

pub type CleanupFn = Box<dyn FnOnce() + Send>;

/// Wraps an iterator with cleanup work that must run once the iterator is no longer used.
///
/// Registered cleanups run in order on `close`, or on drop for iterators that were
/// abandoned. Each runs exactly once.
pub struct CleanupIterator<I: DBIterator> {
    inner: I,
    cleanups: Vec<DropRelease<CleanupFn>>,
}

impl<I: DBIterator> CleanupIterator<I> {
    pub fn new(inner: I) -> Self {
        CleanupIterator {
            inner,
            cleanups: Vec::new(),
        }
    }

    pub fn register_cleanup(&mut self, cleanup: CleanupFn) {
        self.cleanups.push(DropRelease::new(cleanup));
    }

    pub fn close(&mut self) {
        for cleanup in self.cleanups.iter_mut() {
            cleanup.release();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.cleanups.iter().all(|c| c.is_released())
    }
}

impl<I: DBIterator> DBIterator for CleanupIterator<I> {
    fn valid(&self) -> bool {
        self.inner.valid()
    }
    fn seek_to_first(&mut self) {
        self.inner.seek_to_first()
    }
    fn seek_to_last(&mut self) {
        self.inner.seek_to_last()
    }
    fn seek(&mut self, target: &[u8]) {
        self.inner.seek(target)
    }
    fn next(&mut self) {
        self.inner.next()
    }
    fn prev(&mut self) {
        self.inner.prev()
    }
    fn key(&self) -> &[u8] {
        self.inner.key()
    }
    fn value(&self) -> &[u8] {
        self.inner.value()
    }
    fn status(&self) -> Result<()> {
        self.inner.status()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use super::*;

    #[test]
    fn test_empty_iterator() {
        let mut iter = EmptyIterator::new();
        iter.seek_to_first();
        assert!(!iter.valid());
        assert!(iter.status().is_ok());

        let iter = EmptyIterator::with_error(Error::Corruption("bad table".into()));
        assert!(!iter.valid());
        assert!(iter.status().unwrap_err().is_corruption());
        // the error stays observable
        assert!(iter.status().is_err());
    }

    #[test]
    fn test_cleanup_runs_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = || -> CleanupFn {
            let c = count.clone();
            Box::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            })
        };

        let mut iter = CleanupIterator::new(EmptyIterator::new());
        iter.register_cleanup(counter());
        iter.register_cleanup(counter());
        assert!(!iter.is_closed());
        iter.seek_to_first();
        iter.close();
        iter.close();
        assert!(iter.is_closed());
        drop(iter);
        assert_eq!(count.load(Ordering::SeqCst), 2);

        // abandoned without close
        let mut iter = CleanupIterator::new(EmptyIterator::new());
        iter.register_cleanup(counter());
        drop(iter);
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }
}
