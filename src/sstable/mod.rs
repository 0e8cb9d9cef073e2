pub mod block;
pub mod block_builder;
pub mod format;
mod table;
pub mod two_level_iterator;

pub use table::{Table, TableBuilder};
