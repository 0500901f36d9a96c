use std::collections::{HashMap, HashSet};

use crate::alignment::dtw_align;
use crate::engine::traits::{GopScorer, InferenceBackend, ScoringTokenizer};
use crate::error::EngineError;
use crate::scoring::ctc::collapse_repeats;
use crate::scoring::prototype::PrototypeMatrix;
use crate::types::{round1, GopResult, PronunciationScores, WordScore};

/// CTC blank doubles as the word separator in the scoring vocabulary.
pub const BLANK_TOKEN: &str = "|";
const PAD_TOKEN: &str = "[PAD]";
const UNK_TOKEN: &str = "[UNK]";

const SCORE_EPS: f32 = 1e-8;

/// Logistic weighting applied to syllable scores before word aggregation.
#[derive(Debug, Clone, Copy)]
pub struct ScoringWeights {
    pub mid: f32,
    pub steepness: f32,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            mid: 50.0,
            steepness: 0.2,
        }
    }
}

/// Goodness-of-pronunciation engine.
///
/// Runs the acoustic model over a sample buffer, aligns the hidden-state
/// sequence against an expanded prototype sequence of the expected tokens
/// via DTW, scores each token by the model's own log-probabilities along
/// the aligned frames, and aggregates syllables into words with a
/// sigmoid-weighted average.
pub struct AcousticScorer {
    backend: Box<dyn InferenceBackend>,
    tokenizer: Box<dyn ScoringTokenizer>,
    prototypes: PrototypeMatrix,
    blank_id: u32,
    special_ids: HashSet<u32>,
    weights: ScoringWeights,
}

impl AcousticScorer {
    pub fn new(
        backend: Box<dyn InferenceBackend>,
        tokenizer: Box<dyn ScoringTokenizer>,
        prototypes: PrototypeMatrix,
    ) -> Result<Self, EngineError> {
        let blank_id = tokenizer.token_to_id(BLANK_TOKEN).ok_or_else(|| {
            EngineError::invalid_input("tokenizer exposes no blank/separator token '|'")
        })?;

        let mut special_ids = HashSet::from([blank_id]);
        for token in [PAD_TOKEN, UNK_TOKEN] {
            if let Some(id) = tokenizer.token_to_id(token) {
                special_ids.insert(id);
            }
        }

        tracing::info!(
            blank_id,
            device = %backend.device_label(),
            prototype_vocab = prototypes.vocab_size(),
            "acoustic scorer ready"
        );

        Ok(Self {
            backend,
            tokenizer,
            prototypes,
            blank_id,
            special_ids,
            weights: ScoringWeights::default(),
        })
    }

    pub fn with_weights(mut self, weights: ScoringWeights) -> Self {
        self.weights = weights;
        self
    }

    /// CTC-decodes raw per-frame token ids into text.
    pub fn transcribe(&self, raw_ids: &[u32]) -> Result<String, EngineError> {
        let collapsed = collapse_repeats(raw_ids, &self.special_ids);
        tracing::debug!(decoded_ids = collapsed.len(), "ctc collapse");
        self.tokenizer.decode(&collapsed)
    }

    fn compute_gop(&self, samples: &[f32], text: &str) -> Result<GopResult, EngineError> {
        let output = self.backend.infer(samples)?;
        let t = output.frames();
        if t == 0 {
            return Err(EngineError::invalid_input("inference produced no frames"));
        }
        if output.logits.len() != t {
            return Err(EngineError::runtime(
                "inference output",
                format!("hidden has {t} frames but logits has {}", output.logits.len()),
            ));
        }
        let vocab_size = output.logits[0].len();
        let probs = softmax_rows(&output.logits);

        // The tokenizer sees the word separator as the blank token.
        let processed = text.replace(' ', BLANK_TOKEN);
        let token_ids = self.tokenizer.encode(&processed)?;
        let safe_ids: Vec<u32> = token_ids
            .into_iter()
            .map(|id| if (id as usize) < vocab_size { id } else { self.blank_id })
            .collect();
        if safe_ids.is_empty() {
            return Err(EngineError::invalid_input("text tokenized to nothing"));
        }

        // One prototype row per token, repeated to rough-match frame rate.
        let token_count = safe_ids.len();
        let avg = (t / token_count).max(1);
        let mut expanded = Vec::with_capacity(token_count * avg);
        for &id in &safe_ids {
            let row = self.prototypes.row(id as usize);
            for _ in 0..avg {
                expanded.push(row.to_vec());
            }
        }

        let path = dtw_align(&output.hidden, &expanded);
        if path.is_empty() {
            return Err(EngineError::invalid_input("alignment produced an empty path"));
        }

        let mut frames_per_token: HashMap<usize, Vec<usize>> = HashMap::new();
        for (&frame, &expanded_idx) in path.frames.iter().zip(path.tokens.iter()) {
            frames_per_token.entry(expanded_idx / avg).or_default().push(frame);
        }

        let mut token_scores: Vec<(String, f32)> = Vec::with_capacity(token_count);
        for (idx, &id) in safe_ids.iter().enumerate() {
            let token = self
                .tokenizer
                .id_to_token(id)
                .unwrap_or_else(|| BLANK_TOKEN.to_string());
            let score = match frames_per_token.get(&idx) {
                Some(frames) if !frames.is_empty() => {
                    let sum: f32 = frames
                        .iter()
                        .map(|&f| (probs[f][id as usize] + SCORE_EPS).ln())
                        .sum();
                    sum / frames.len() as f32
                }
                // No aligned frames: unscoreable.
                _ => f32::NEG_INFINITY,
            };
            token_scores.push((token, score));
        }

        let normalized = normalize_scores(&token_scores);
        let words = group_words_sigmoid(&normalized, self.weights);

        let overall = if words.is_empty() {
            0.0
        } else {
            words.iter().map(|w| w.scores.pronunciation).sum::<f32>() / words.len() as f32
        };
        let overall = round1(overall);

        Ok(GopResult {
            overall,
            pronunciation: overall,
            words,
            eof: false,
        })
    }
}

impl GopScorer for AcousticScorer {
    fn score_text(&self, samples: &[f32], text: &str) -> GopResult {
        match self.compute_gop(samples, text) {
            Ok(result) => result,
            Err(err) => {
                tracing::error!(error = %err, "gop scoring failed, returning zero result");
                GopResult::zero()
            }
        }
    }

    fn score_with_context(
        &self,
        samples: &[f32],
        target_text: &str,
        context_before: &str,
        context_after: &str,
        target_index: Option<usize>,
    ) -> GopResult {
        let full_text = [context_before, target_text, context_after]
            .iter()
            .filter(|s| !s.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join(" ");
        let full_text = if full_text.is_empty() {
            target_text.to_string()
        } else {
            full_text
        };

        let actual_index =
            target_index.unwrap_or_else(|| context_before.split_whitespace().count());
        let target_word_count = target_text.split_whitespace().count();

        let result = self.score_text(samples, &full_text);
        if result.words.is_empty() || result.words.len() <= actual_index {
            // Context pass came back short; score the target on its own.
            return self.score_text(samples, target_text);
        }

        let end = (actual_index + target_word_count).min(result.words.len());
        let target_words: Vec<WordScore> = result.words[actual_index..end].to_vec();
        let target_score = if target_words.is_empty() {
            0.0
        } else {
            target_words
                .iter()
                .map(|w| w.scores.pronunciation)
                .sum::<f32>()
                / target_words.len() as f32
        };
        let target_score = round1(target_score);

        GopResult {
            overall: target_score,
            pronunciation: target_score,
            words: target_words,
            eof: false,
        }
    }
}

/// Numerically-stable row-wise softmax.
fn softmax_rows(logits: &[Vec<f32>]) -> Vec<Vec<f32>> {
    logits
        .iter()
        .map(|row| {
            let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
            let exps: Vec<f64> = row.iter().map(|&x| ((x - max) as f64).exp()).collect();
            let sum: f64 = exps.iter().sum();
            exps.iter().map(|&e| (e / sum) as f32).collect()
        })
        .collect()
}

/// Min-max normalization of finite token scores onto [0, 100]; non-finite
/// scores map to 0. The span floor avoids a divide-by-zero on flat input.
fn normalize_scores(token_scores: &[(String, f32)]) -> Vec<(String, f32)> {
    let finite: Vec<f32> = token_scores
        .iter()
        .map(|&(_, s)| s)
        .filter(|s| s.is_finite())
        .collect();

    if finite.is_empty() {
        return token_scores.iter().map(|(t, _)| (t.clone(), 0.0)).collect();
    }

    let min = finite.iter().copied().fold(f32::INFINITY, f32::min);
    let max = finite.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let span = if max > min { max - min } else { SCORE_EPS };

    token_scores
        .iter()
        .map(|(t, s)| {
            let normalized = if s.is_finite() { (s - min) / span * 100.0 } else { 0.0 };
            (t.clone(), normalized)
        })
        .collect()
}

fn sigmoid_weight(score: f32, weights: ScoringWeights) -> f32 {
    0.5 + 1.0 / (1.0 + (-weights.steepness * (score - weights.mid)).exp())
}

/// Confidence-weighted average over one word's syllables, capped at 100.
fn weighted_word_score(syllables: &[(String, f32)], weights: ScoringWeights) -> f32 {
    let mut weighted_sum = 0.0f32;
    let mut weight_sum = 0.0f32;
    for (syllable, score) in syllables {
        if syllable == BLANK_TOKEN {
            continue;
        }
        let weight = sigmoid_weight(*score, weights);
        weighted_sum += score * weight;
        weight_sum += weight;
    }
    let raw = if weight_sum > 0.0 { weighted_sum / weight_sum } else { 0.0 };
    raw.min(100.0)
}

/// Groups consecutive non-separator syllables into words at each separator
/// boundary, scoring each word with the sigmoid-weighted average.
pub(crate) fn group_words_sigmoid(
    syllable_scores: &[(String, f32)],
    weights: ScoringWeights,
) -> Vec<WordScore> {
    let mut words = Vec::new();
    let mut current: Vec<(String, f32)> = Vec::new();

    let flush = |current: &mut Vec<(String, f32)>, words: &mut Vec<WordScore>| {
        if current.is_empty() {
            return;
        }
        let text: String = current.iter().map(|(s, _)| s.as_str()).collect();
        let score = weighted_word_score(current, weights).round();
        words.push(WordScore {
            word: text,
            scores: PronunciationScores {
                pronunciation: score,
            },
        });
        current.clear();
    };

    for (syllable, score) in syllable_scores {
        if syllable == BLANK_TOKEN {
            flush(&mut current, &mut words);
        } else {
            current.push((syllable.clone(), *score));
        }
    }
    flush(&mut current, &mut words);

    words
}
