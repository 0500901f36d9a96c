use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Instant, SystemTime};

use serde::Serialize;

use crate::engine::traits::GopScorer;
use crate::progress::{BlockSnapshot, BlockStatus, ProgressTracker, SentenceBlockManager};
use crate::types::{
    epoch_secs, round1, AggregateResult, ChunkMetadata, CompletionDetails, GopResult,
    PronunciationScores, ScoreBreakdown, WordScore, RESOURCE_VERSION,
};

/// How many neighboring blocks feed the context-aware scoring call.
const CONTEXT_BLOCKS: usize = 2;

struct CachedEvaluation {
    score: f32,
    details: GopResult,
    at: SystemTime,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationProgress {
    pub completed: usize,
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationSummary {
    pub overall_score: f32,
    pub progress: EvaluationProgress,
    pub blocks: Vec<BlockSnapshot>,
}

/// Orchestration state machine invoked once per incoming audio chunk.
///
/// Scores every un-evaluated block of the trailing active window against
/// the chunk, commits the best match when it clears the confidence
/// threshold and the rate limit, and keeps the block manager and the
/// progress tracker synchronized through in-order, repeated and
/// skipped-ahead recognitions.
pub struct EvaluationController {
    scorer: Arc<dyn GopScorer>,
    confidence_threshold: f32,
    min_time_between_evals: f32,
    last_eval_time: Option<Instant>,
    cached_results: HashMap<usize, CachedEvaluation>,
}

impl EvaluationController {
    pub fn new(
        scorer: Arc<dyn GopScorer>,
        confidence_threshold: f32,
        min_time_between_evals: f32,
    ) -> Self {
        Self {
            scorer,
            confidence_threshold,
            min_time_between_evals,
            last_eval_time: None,
            cached_results: HashMap::new(),
        }
    }

    pub fn process_chunk(
        &mut self,
        blocks: &mut SentenceBlockManager,
        tracker: &mut ProgressTracker,
        chunk: &[f32],
        _metadata: &ChunkMetadata,
    ) -> AggregateResult {
        if chunk.is_empty() {
            return self.aggregate_result(blocks);
        }

        let mut best: Option<(usize, f32)> = None;
        for block_id in tracker.active_window() {
            let Some(block) = blocks.block(block_id) else {
                continue;
            };
            if block.status == BlockStatus::Evaluated {
                continue;
            }

            let context_before = neighbor_text(blocks, block_id.saturating_sub(CONTEXT_BLOCKS), block_id);
            let context_after =
                neighbor_text(blocks, block_id + 1, (block_id + 1 + CONTEXT_BLOCKS).min(blocks.len()));
            // With no leading context the target is by definition word 0.
            let target_index = if context_before.is_empty() { Some(0) } else { None };

            let gop = self.scorer.score_with_context(
                chunk,
                &block.text,
                &context_before,
                &context_after,
                target_index,
            );
            let score = gop.overall;
            tracing::debug!(block_id, score, "window block scored");

            if best.map_or(true, |(_, b)| score > b) {
                best = Some((block_id, score));
            }
            self.cached_results.insert(
                block_id,
                CachedEvaluation {
                    score,
                    details: gop,
                    at: SystemTime::now(),
                },
            );
        }

        if let Some((best_id, best_score)) = best {
            if best_score >= self.confidence_threshold && self.can_commit_now() {
                self.commit(blocks, tracker, best_id);
                self.last_eval_time = Some(Instant::now());
            }
        }

        self.aggregate_result(blocks)
    }

    fn can_commit_now(&self) -> bool {
        self.last_eval_time
            .map_or(true, |t| t.elapsed().as_secs_f64() >= self.min_time_between_evals as f64)
    }

    fn commit(
        &mut self,
        blocks: &mut SentenceBlockManager,
        tracker: &mut ProgressTracker,
        block_id: usize,
    ) {
        let Some(entry) = self.cached_results.get(&block_id) else {
            return;
        };
        let score = entry.score;

        if matches!(
            blocks.block(block_id).map(|b| b.status),
            Some(BlockStatus::Pending | BlockStatus::Active)
        ) {
            blocks.update_status(block_id, BlockStatus::Recognized);
        }
        blocks.set_score(block_id, score);
        blocks.update_status(block_id, BlockStatus::Evaluated);
        tracing::info!(block_id, score, "block evaluated");

        let active = blocks.active_block_id();
        if block_id == active {
            blocks.advance_active_block();
        } else if block_id < active {
            // An already-passed block matched (speaker repeated a word):
            // rewind to it, then step past it again.
            tracing::info!(block_id, active, "earlier block recognized");
            blocks.set_active_block(block_id);
            blocks.advance_active_block();
        } else {
            // Skip-ahead: jump past the recognized block when possible,
            // otherwise park on the sentence-final block.
            tracing::info!(block_id, active, "skipped block recognized");
            if block_id + 1 < blocks.len() {
                blocks.set_active_block(block_id + 1);
            } else {
                blocks.set_active_block(block_id);
            }
        }
        tracker.set_current_index(blocks.active_block_id());
    }

    /// Freshly built sentence-level aggregate over all evaluated blocks.
    pub fn aggregate_result(&self, blocks: &SentenceBlockManager) -> AggregateResult {
        let evaluated: Vec<_> = blocks
            .blocks()
            .iter()
            .filter(|b| b.status == BlockStatus::Evaluated)
            .collect();
        if evaluated.is_empty() {
            return AggregateResult::empty();
        }

        let scores: Vec<f32> = evaluated.iter().filter_map(|b| b.score).collect();
        let avg = round1(scores.iter().sum::<f32>() / evaluated.len() as f32);

        let words: Vec<WordScore> = evaluated
            .iter()
            .filter_map(|b| {
                b.score.map(|score| WordScore {
                    word: b.text.clone(),
                    scores: PronunciationScores {
                        pronunciation: round1(score),
                    },
                })
            })
            .collect();

        let all_evaluated = evaluated.len() == blocks.len();
        let mut result = AggregateResult {
            overall: avg,
            pronunciation: avg,
            resource_version: RESOURCE_VERSION.to_string(),
            words,
            eof: false,
            final_score: None,
            details: None,
        };

        if all_evaluated {
            let min = scores.iter().copied().fold(f32::INFINITY, f32::min);
            let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
            result.eof = true;
            result.final_score = Some(avg);
            result.details = Some(CompletionDetails {
                total_blocks: blocks.len(),
                completion_time: epoch_secs(SystemTime::now()),
                score_breakdown: ScoreBreakdown {
                    min_score: round1(min),
                    max_score: round1(max),
                },
            });
        }

        result
    }

    pub fn all_blocks_evaluated(&self, blocks: &SentenceBlockManager) -> bool {
        !blocks.is_empty()
            && blocks
                .blocks()
                .iter()
                .all(|b| b.status == BlockStatus::Evaluated)
    }

    pub fn evaluation_summary(&self, blocks: &SentenceBlockManager) -> EvaluationSummary {
        let evaluated: Vec<f32> = blocks
            .blocks()
            .iter()
            .filter(|b| b.status == BlockStatus::Evaluated)
            .filter_map(|b| b.score)
            .collect();
        let overall_score = if evaluated.is_empty() {
            0.0
        } else {
            round1(evaluated.iter().sum::<f32>() / evaluated.len() as f32)
        };

        EvaluationSummary {
            overall_score,
            progress: EvaluationProgress {
                completed: evaluated.len(),
                total: blocks.len(),
            },
            blocks: blocks.snapshot(),
        }
    }

    /// Last computed GOP detail for a block and when it was scored.
    pub fn cached_result(&self, block_id: usize) -> Option<(&GopResult, SystemTime)> {
        self.cached_results
            .get(&block_id)
            .map(|entry| (&entry.details, entry.at))
    }

    /// Clears the per-block caches and the commit rate-limit clock. The
    /// block manager and tracker are reset by their owner.
    pub fn reset(&mut self) {
        self.last_eval_time = None;
        self.cached_results.clear();
    }
}

fn neighbor_text(blocks: &SentenceBlockManager, start: usize, end: usize) -> String {
    (start..end)
        .filter_map(|id| blocks.block(id).map(|b| b.text.as_str()))
        .collect::<Vec<_>>()
        .join(" ")
}
