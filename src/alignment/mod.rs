pub mod dtw;

pub use dtw::{dtw_align, AlignmentPath};
