use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;

use crate::audio::buffer::ChunkAssembler;
use crate::error::EngineError;
use crate::types::ChunkMetadata;

/// An incrementally-growing source of mono audio samples.
///
/// Implementations report only samples appended since the previous call,
/// already downmixed to mono.
pub trait AudioSource: Send {
    fn read_new(&mut self) -> Result<Option<Vec<f32>>, EngineError>;
}

/// WAV-file source that follows a file as it grows on disk.
pub struct WavFileSource {
    path: PathBuf,
    frames_read: u32,
}

impl WavFileSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let path = path.as_ref().to_path_buf();
        let reader = hound::WavReader::open(&path)
            .map_err(|e| EngineError::runtime("open wav source", e))?;
        let spec = reader.spec();
        tracing::info!(
            path = %path.display(),
            sample_rate = spec.sample_rate,
            channels = spec.channels,
            frames = reader.duration(),
            "wav source opened"
        );
        Ok(Self {
            path,
            frames_read: 0,
        })
    }
}

impl AudioSource for WavFileSource {
    fn read_new(&mut self) -> Result<Option<Vec<f32>>, EngineError> {
        let mut reader = hound::WavReader::open(&self.path)
            .map_err(|e| EngineError::runtime("reopen wav source", e))?;
        let total_frames = reader.duration();
        if total_frames <= self.frames_read {
            return Ok(None);
        }

        reader
            .seek(self.frames_read)
            .map_err(|e| EngineError::io("seek wav source", e))?;

        let spec = reader.spec();
        let channels = spec.channels.max(1) as usize;
        let frames_to_read = (total_frames - self.frames_read) as usize;

        let interleaved: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .samples::<f32>()
                .take(frames_to_read * channels)
                .collect::<Result<_, _>>()
                .map_err(|e| EngineError::runtime("read wav samples", e))?,
            hound::SampleFormat::Int => {
                let scale = (1i64 << (spec.bits_per_sample.max(2) - 1)) as f32;
                reader
                    .samples::<i32>()
                    .take(frames_to_read * channels)
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect::<Result<_, _>>()
                    .map_err(|e| EngineError::runtime("read wav samples", e))?
            }
        };

        let mono = if channels == 1 {
            interleaved
        } else {
            interleaved
                .chunks_exact(channels)
                .map(|frame| frame.iter().sum::<f32>() / channels as f32)
                .collect()
        };

        self.frames_read = total_frames;
        Ok(Some(mono))
    }
}

pub type ChunkCallback = Box<dyn Fn(&[f32], &ChunkMetadata) + Send + Sync>;

/// Polls an [`AudioSource`] on a background thread, feeding new samples
/// into a [`ChunkAssembler`] and invoking registered callbacks for every
/// produced chunk.
///
/// Callbacks run on the monitoring thread and must not block. `stop`
/// joins the thread; no callback fires after it returns.
pub struct FileMonitor {
    polling_interval: Duration,
    assembler: Arc<ChunkAssembler>,
    callbacks: Arc<Mutex<Vec<ChunkCallback>>>,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl FileMonitor {
    pub fn new(sample_rate_hz: u32, chunk_duration_secs: f32, polling_interval_secs: f32) -> Self {
        Self {
            polling_interval: Duration::from_secs_f32(polling_interval_secs.max(0.001)),
            assembler: Arc::new(ChunkAssembler::new(sample_rate_hz, chunk_duration_secs)),
            callbacks: Arc::new(Mutex::new(Vec::new())),
            running: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }

    pub fn add_chunk_callback(
        &self,
        callback: impl Fn(&[f32], &ChunkMetadata) + Send + Sync + 'static,
    ) {
        self.callbacks.lock().push(Box::new(callback));
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn total_duration(&self) -> f32 {
        self.assembler.total_duration()
    }

    pub fn start(&mut self, mut source: Box<dyn AudioSource>) -> Result<(), EngineError> {
        if self.is_running() {
            return Err(EngineError::invalid_input("monitoring already running"));
        }

        self.running.store(true, Ordering::Release);
        let running = Arc::clone(&self.running);
        let assembler = Arc::clone(&self.assembler);
        let callbacks = Arc::clone(&self.callbacks);
        let polling_interval = self.polling_interval;

        self.handle = Some(thread::spawn(move || {
            while running.load(Ordering::Acquire) {
                match source.read_new() {
                    Ok(Some(mono)) => {
                        assembler.append(mono);
                        if let Some((chunk, metadata)) = assembler.next_chunk() {
                            for callback in callbacks.lock().iter() {
                                callback(&chunk, &metadata);
                            }
                        }
                    }
                    Ok(None) => {}
                    Err(err) => {
                        // Source hiccups (file replaced, transient I/O) are
                        // survivable; keep polling after the normal delay.
                        tracing::warn!(error = %err, "audio source poll failed");
                    }
                }
                thread::sleep(polling_interval);
            }
        }));

        tracing::info!("audio monitoring started");
        Ok(())
    }

    /// Idempotent. Joins the monitoring thread before returning.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
            tracing::info!("audio monitoring stopped");
        }
    }

    pub fn reset(&mut self) {
        self.stop();
        self.assembler.reset();
    }
}

impl Drop for FileMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}
