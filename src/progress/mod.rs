pub mod blocks;
pub mod tracker;

pub use blocks::{BlockSnapshot, BlockStatus, SentenceBlock, SentenceBlockManager};
pub use tracker::ProgressTracker;
