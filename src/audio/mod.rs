pub mod buffer;
pub mod monitor;
pub mod vad;

pub use buffer::{ChunkAssembler, StreamBuffer};
pub use monitor::{AudioSource, FileMonitor, WavFileSource};
pub use vad::has_voice;
