use crate::{
    error::{Error, Result},
    iterator::DBIterator,
    options::ReadOption,
};

/// Turns an index entry's value into an iterator over the block it points at.
pub trait BlockIterBuilder {
    type Iter: DBIterator;
    fn build(&self, option: &ReadOption, index_val: &[u8]) -> Result<Self::Iter>;
}

pub struct TwoLevelIterator<I: DBIterator, B: BlockIterBuilder> {
    block_builder: B,
    option: ReadOption,
    index_iter: I,

    data_iter: Option<B::Iter>,
    // index value `data_iter` was built from
    data_block_handle: Vec<u8>,
    status: Option<Error>,
}

impl<I: DBIterator, B: BlockIterBuilder> TwoLevelIterator<I, B> {
    pub fn new(index_iter: I, block_builder: B, option: ReadOption) -> Self {
        TwoLevelIterator {
            block_builder,
            option,
            index_iter,

            data_iter: None,
            data_block_handle: Vec::new(),
            status: None,
        }
    }

    fn init_data_block(&mut self) {
        if !self.index_iter.valid() {
            self.set_data_iterator(None);
            return;
        }
        let handle = self.index_iter.value();
        if self.data_iter.is_some() && handle == self.data_block_handle.as_slice() {
            // already positioned on this block
            return;
        }
        match self.block_builder.build(&self.option, handle) {
            Ok(data_iter) => {
                self.data_block_handle.clear();
                self.data_block_handle
                    .extend_from_slice(self.index_iter.value());
                self.set_data_iterator(Some(data_iter));
            }
            Err(err) => {
                self.set_data_iterator(None);
                self.save_err(err);
            }
        }
    }

    fn set_data_iterator(&mut self, data_iter: Option<B::Iter>) {
        if let Some(ref iter) = self.data_iter {
            if let Err(err) = iter.status() {
                self.save_err(err);
            }
        }
        self.data_iter = data_iter;
    }

    fn save_err(&mut self, err: Error) {
        if self.status.is_none() {
            self.status = Some(err)
        }
    }

    fn data_valid(&self) -> bool {
        self.data_iter.as_ref().map_or(false, |iter| iter.valid())
    }

    fn skip_empty_data_blocks_forward(&mut self) {
        while !self.data_valid() {
            if !self.index_iter.valid() {
                self.set_data_iterator(None);
                return;
            }
            self.index_iter.next();
            self.init_data_block();
            if let Some(ref mut iter) = self.data_iter {
                iter.seek_to_first();
            }
        }
    }

    fn skip_empty_data_blocks_backward(&mut self) {
        while !self.data_valid() {
            if !self.index_iter.valid() {
                self.set_data_iterator(None);
                return;
            }
            self.index_iter.prev();
            self.init_data_block();
            if let Some(ref mut iter) = self.data_iter {
                iter.seek_to_last();
            }
        }
    }
}

impl<I: DBIterator, B: BlockIterBuilder> DBIterator for TwoLevelIterator<I, B> {
    fn valid(&self) -> bool {
        self.data_valid()
    }

    fn seek_to_first(&mut self) {
        self.index_iter.seek_to_first();
        self.init_data_block();
        if let Some(ref mut iter) = self.data_iter {
            iter.seek_to_first();
        }
        self.skip_empty_data_blocks_forward();
    }

    fn seek_to_last(&mut self) {
        self.index_iter.seek_to_last();
        self.init_data_block();
        if let Some(ref mut iter) = self.data_iter {
            iter.seek_to_last();
        }
        self.skip_empty_data_blocks_backward();
    }

    fn seek(&mut self, target: &[u8]) {
        self.index_iter.seek(target);
        self.init_data_block();
        if let Some(ref mut iter) = self.data_iter {
            iter.seek(target);
        }
        self.skip_empty_data_blocks_forward();
    }

    fn next(&mut self) {
        assert!(self.valid());
        if let Some(ref mut iter) = self.data_iter {
            iter.next();
        }
        self.skip_empty_data_blocks_forward();
    }

    fn prev(&mut self) {
        assert!(self.valid());
        if let Some(ref mut iter) = self.data_iter {
            iter.prev();
        }
        self.skip_empty_data_blocks_backward();
    }

    fn key(&self) -> &[u8] {
        match self.data_iter {
            Some(ref iter) => iter.key(),
            None => panic!("key() called on an invalid iterator"),
        }
    }

    fn value(&self) -> &[u8] {
        match self.data_iter {
            Some(ref iter) => iter.value(),
            None => panic!("value() called on an invalid iterator"),
        }
    }

    fn status(&self) -> Result<()> {
        self.index_iter.status()?;
        if let Some(ref data_iter) = self.data_iter {
            data_iter.status()?;
        }
        match self.status {
            Some(ref err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}
