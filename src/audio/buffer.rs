use std::collections::VecDeque;
use std::time::SystemTime;

use parking_lot::Mutex;

use crate::audio::vad::has_voice;
use crate::types::{epoch_secs, ChunkMetadata};

pub const DEFAULT_ENERGY_THRESHOLD: f32 = 0.0005;
pub const DEFAULT_MIN_SPEECH_FRAMES: usize = 10;

const NORMALIZE_EPS: f64 = 1e-8;

/// Zero-mean unit-variance normalization over the full chunk.
pub fn normalize(samples: &mut [f32]) {
    if samples.is_empty() {
        return;
    }
    let n = samples.len() as f64;
    let mean = samples.iter().map(|&s| s as f64).sum::<f64>() / n;
    let var = samples
        .iter()
        .map(|&s| {
            let d = s as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / n;
    let std = var.sqrt();
    for s in samples.iter_mut() {
        *s = ((*s as f64 - mean) / (std + NORMALIZE_EPS)) as f32;
    }
}

/// Applies the voice activity gate, then normalization.
///
/// Returns `None` when the gate rejects the buffer; the caller treats
/// that as "no usable audio this round", not an error.
pub fn gate_and_normalize(samples: &[f32], sample_rate_hz: u32, do_normalize: bool) -> Option<Vec<f32>> {
    if !has_voice(
        samples,
        sample_rate_hz,
        DEFAULT_ENERGY_THRESHOLD,
        DEFAULT_MIN_SPEECH_FRAMES,
    ) {
        return None;
    }
    let mut out = samples.to_vec();
    if do_normalize {
        normalize(&mut out);
    }
    Some(out)
}

struct AssemblerState {
    queue: VecDeque<Vec<f32>>,
    total_duration: f32,
}

/// Accumulates mono sub-buffers from a monitored source and assembles
/// fixed-duration chunks.
///
/// The queue is written by the monitoring thread and drained by chunk
/// extraction, so every access goes through the internal lock.
pub struct ChunkAssembler {
    sample_rate_hz: u32,
    chunk_duration_secs: f32,
    chunk_samples: usize,
    inner: Mutex<AssemblerState>,
}

impl ChunkAssembler {
    pub fn new(sample_rate_hz: u32, chunk_duration_secs: f32) -> Self {
        Self {
            sample_rate_hz,
            chunk_duration_secs,
            chunk_samples: (chunk_duration_secs * sample_rate_hz as f32) as usize,
            inner: Mutex::new(AssemblerState {
                queue: VecDeque::new(),
                total_duration: 0.0,
            }),
        }
    }

    /// Appends freshly read mono samples. Buffers whose peak exceeds 1.0
    /// are rescaled to max |sample| = 1.0 before queuing.
    pub fn append(&self, mut samples: Vec<f32>) {
        if samples.is_empty() {
            return;
        }
        let peak = samples.iter().fold(0.0f32, |acc, &s| acc.max(s.abs()));
        if peak > 1.0 {
            for s in samples.iter_mut() {
                *s /= peak;
            }
        }

        let mut state = self.inner.lock();
        state.total_duration += samples.len() as f32 / self.sample_rate_hz as f32;
        state.queue.push_back(samples);
    }

    /// Concatenates the oldest sub-buffers until the chunk length is met
    /// or the queue runs dry, trimming the last contributing sub-buffer
    /// in place. Returns the raw (ungated) chunk.
    fn extract_raw(&self) -> Option<Vec<f32>> {
        let mut state = self.inner.lock();
        let mut chunk = Vec::with_capacity(self.chunk_samples);

        while chunk.len() < self.chunk_samples {
            let Some(front) = state.queue.front_mut() else {
                break;
            };
            let needed = self.chunk_samples - chunk.len();
            if front.len() <= needed {
                let full = state.queue.pop_front().expect("front just observed");
                chunk.extend_from_slice(&full);
            } else {
                chunk.extend_from_slice(&front[..needed]);
                front.drain(..needed);
            }
        }

        if chunk.is_empty() {
            None
        } else {
            Some(chunk)
        }
    }

    /// Extracts the next chunk and runs it through the gate and
    /// normalization. A gate rejection consumes the chunk and yields `None`.
    pub fn next_chunk(&self) -> Option<(Vec<f32>, ChunkMetadata)> {
        let raw = self.extract_raw()?;
        let processed = gate_and_normalize(&raw, self.sample_rate_hz, true)?;
        let metadata = ChunkMetadata {
            timestamp: epoch_secs(SystemTime::now()),
            duration: self.chunk_duration_secs,
            total_duration: self.total_duration(),
        };
        Some((processed, metadata))
    }

    pub fn total_duration(&self) -> f32 {
        self.inner.lock().total_duration
    }

    pub fn reset(&self) {
        let mut state = self.inner.lock();
        state.queue.clear();
        state.total_duration = 0.0;
    }
}

/// Rolling buffer for pushed binary audio (16-bit signed little-endian PCM).
///
/// Unlike [`ChunkAssembler`] this variant keeps a single growing window
/// capped at `max_buffer_secs` and returns the entire current content on
/// every successful push.
pub struct StreamBuffer {
    sample_rate_hz: u32,
    max_samples: usize,
    buffer: Vec<f32>,
    total_duration: f32,
}

impl StreamBuffer {
    pub fn new(sample_rate_hz: u32, max_buffer_secs: f32) -> Self {
        Self {
            sample_rate_hz,
            max_samples: (max_buffer_secs * sample_rate_hz as f32) as usize,
            buffer: Vec::new(),
            total_duration: 0.0,
        }
    }

    /// Decodes and appends PCM bytes, then gates and normalizes the whole
    /// window. A trailing odd byte is discarded.
    pub fn push_pcm16(&mut self, data: &[u8]) -> Option<(Vec<f32>, ChunkMetadata)> {
        let decoded: Vec<f32> = data
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0)
            .collect();
        if decoded.is_empty() {
            return None;
        }

        self.total_duration += decoded.len() as f32 / self.sample_rate_hz as f32;
        self.buffer.extend_from_slice(&decoded);
        if self.buffer.len() > self.max_samples {
            let excess = self.buffer.len() - self.max_samples;
            self.buffer.drain(..excess);
        }

        let processed = gate_and_normalize(&self.buffer, self.sample_rate_hz, true)?;
        let metadata = ChunkMetadata {
            timestamp: epoch_secs(SystemTime::now()),
            duration: self.buffer.len() as f32 / self.sample_rate_hz as f32,
            total_duration: self.total_duration,
        };
        Some((processed, metadata))
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.total_duration = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_RATE: u32 = 16_000;

    fn sine(seconds: f32, amplitude: f32) -> Vec<f32> {
        let len = (seconds * SAMPLE_RATE as f32) as usize;
        (0..len)
            .map(|i| {
                amplitude * (2.0 * std::f32::consts::PI * 440.0 * i as f32 / SAMPLE_RATE as f32).sin()
            })
            .collect()
    }

    fn pcm16_bytes(samples: &[f32]) -> Vec<u8> {
        samples
            .iter()
            .flat_map(|&s| (((s * 32767.0) as i16).to_le_bytes()))
            .collect()
    }

    #[test]
    fn normalize_produces_zero_mean_unit_variance() {
        let mut samples = sine(0.2, 0.5);
        normalize(&mut samples);
        let n = samples.len() as f64;
        let mean = samples.iter().map(|&s| s as f64).sum::<f64>() / n;
        let var = samples.iter().map(|&s| (s as f64 - mean).powi(2)).sum::<f64>() / n;
        assert!(mean.abs() < 1e-4);
        assert!((var - 1.0).abs() < 1e-3);
    }

    #[test]
    fn normalize_is_idempotent() {
        let mut samples = sine(0.2, 0.5);
        normalize(&mut samples);
        let once = samples.clone();
        normalize(&mut samples);
        for (a, b) in once.iter().zip(samples.iter()) {
            assert!((a - b).abs() < 1e-3, "{a} vs {b}");
        }
    }

    #[test]
    fn assembler_extracts_fixed_chunks_and_trims_in_place() {
        let assembler = ChunkAssembler::new(SAMPLE_RATE, 0.5);
        assembler.append(sine(0.3, 0.3));
        assembler.append(sine(0.3, 0.3));
        assembler.append(sine(0.3, 0.3));

        let (chunk, metadata) = assembler.next_chunk().expect("enough audio for one chunk");
        assert_eq!(chunk.len(), 8_000);
        assert!((metadata.total_duration - 0.9).abs() < 1e-3);

        // 0.4 s remain; the partial tail still comes out, gated on its own.
        let leftover = assembler.extract_raw().expect("remaining samples");
        assert_eq!(leftover.len(), 6_400);
        assert!(assembler.extract_raw().is_none());
    }

    #[test]
    fn assembler_rejects_silence() {
        let assembler = ChunkAssembler::new(SAMPLE_RATE, 0.25);
        assembler.append(vec![0.0f32; 8_000]);
        assert!(assembler.next_chunk().is_none());
    }

    #[test]
    fn assembler_rescales_clipping_input() {
        let assembler = ChunkAssembler::new(SAMPLE_RATE, 0.1);
        assembler.append(vec![4.0f32; 3_200]);
        let raw = assembler.extract_raw().expect("samples queued");
        assert!(raw.iter().all(|&s| s.abs() <= 1.0 + f32::EPSILON));
        assert_eq!(raw[0], 1.0);
    }

    #[test]
    fn stream_buffer_returns_growing_window() {
        let mut stream = StreamBuffer::new(SAMPLE_RATE, 10.0);
        let first = pcm16_bytes(&sine(0.2, 0.3));
        let second = pcm16_bytes(&sine(0.2, 0.3));

        let (window1, _) = stream.push_pcm16(&first).expect("voiced audio");
        let (window2, metadata) = stream.push_pcm16(&second).expect("voiced audio");
        assert_eq!(window1.len(), 3_200);
        assert_eq!(window2.len(), 6_400);
        assert!((metadata.total_duration - 0.4).abs() < 1e-3);
    }

    #[test]
    fn stream_buffer_caps_retention() {
        let mut stream = StreamBuffer::new(SAMPLE_RATE, 0.5);
        let bytes = pcm16_bytes(&sine(1.0, 0.3));
        let (window, metadata) = stream.push_pcm16(&bytes).expect("voiced audio");
        assert_eq!(window.len(), 8_000);
        // Total duration keeps counting even after the window is capped.
        assert!((metadata.total_duration - 1.0).abs() < 1e-3);
    }

    #[test]
    fn stream_buffer_rejects_silence_and_empty_pushes() {
        let mut stream = StreamBuffer::new(SAMPLE_RATE, 10.0);
        assert!(stream.push_pcm16(&[]).is_none());
        let silence = pcm16_bytes(&vec![0.0f32; 8_000]);
        assert!(stream.push_pcm16(&silence).is_none());
    }
}
