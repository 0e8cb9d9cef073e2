pub mod cache;
pub mod release;
