pub mod index;
pub mod kmers;

pub use index::{KmerEntry, KmerIndex};
