use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

/// Version tag stamped onto every emitted result payload.
pub const RESOURCE_VERSION: &str = "1.0.0";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PronunciationScores {
    pub pronunciation: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WordScore {
    pub word: String,
    pub scores: PronunciationScores,
}

/// Outcome of one goodness-of-pronunciation pass over an audio buffer.
///
/// Scores live in [0, 100]. A failed inference call degrades to
/// [`GopResult::zero`] rather than an error so the evaluation stream
/// stays alive.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GopResult {
    pub overall: f32,
    pub pronunciation: f32,
    pub words: Vec<WordScore>,
    pub eof: bool,
}

impl GopResult {
    pub fn zero() -> Self {
        Self {
            overall: 0.0,
            pronunciation: 0.0,
            words: Vec::new(),
            eof: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreBreakdown {
    pub min_score: f32,
    pub max_score: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionDetails {
    pub total_blocks: usize,
    /// Unix epoch seconds at which the last block was evaluated.
    pub completion_time: f64,
    pub score_breakdown: ScoreBreakdown,
}

/// Sentence-level result aggregated over all evaluated blocks.
///
/// `eof`, `final_score` and `details` are populated only once every block
/// of the sentence has been evaluated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateResult {
    pub overall: f32,
    pub pronunciation: f32,
    pub resource_version: String,
    pub words: Vec<WordScore>,
    pub eof: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_score: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<CompletionDetails>,
}

impl AggregateResult {
    pub fn empty() -> Self {
        Self {
            overall: 0.0,
            pronunciation: 0.0,
            resource_version: RESOURCE_VERSION.to_string(),
            words: Vec::new(),
            eof: false,
            final_score: None,
            details: None,
        }
    }
}

/// Metadata attached to every produced audio chunk.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ChunkMetadata {
    /// Unix epoch seconds at which the chunk was produced.
    pub timestamp: f64,
    pub duration: f32,
    pub total_duration: f32,
}

pub(crate) fn epoch_secs(at: SystemTime) -> f64 {
    at.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

pub(crate) fn round1(value: f32) -> f32 {
    (value * 10.0).round() / 10.0
}
