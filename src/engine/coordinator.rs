use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::audio::buffer::StreamBuffer;
use crate::config::EngineConfig;
use crate::engine::controller::EvaluationController;
use crate::engine::traits::GopScorer;
use crate::error::EngineError;
use crate::progress::{ProgressTracker, SentenceBlockManager};
use crate::types::{epoch_secs, AggregateResult};

/// Per-session overrides accepted at creation time.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionOptions {
    pub confidence_threshold: Option<f32>,
    pub min_time_between_evals: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionCreated {
    pub session_id: String,
    pub status: String,
    pub sentence: String,
    pub blocks: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationStatus {
    NoValidAudio,
    InProgress,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationOutcome {
    pub session_id: String,
    pub status: EvaluationStatus,
    pub result: AggregateResult,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionProgress {
    pub active_block: usize,
    pub total_blocks: usize,
    pub overall_score: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStatus {
    pub session_id: String,
    pub created_at: f64,
    pub last_activity: f64,
    pub current_progress: SessionProgress,
    pub all_completed: bool,
}

struct EvalSession {
    blocks: SentenceBlockManager,
    tracker: ProgressTracker,
    stream: StreamBuffer,
    controller: EvaluationController,
    created_at: SystemTime,
    last_activity: SystemTime,
}

/// Multi-session coordinator: an arena of independent evaluation sessions
/// sharing one scorer.
///
/// All work executes synchronously on the caller's thread. The coordinator
/// serializes nothing per session; callers must not issue concurrent
/// `evaluate_audio` calls for the same session id.
pub struct EngineCoordinator {
    scorer: Arc<dyn GopScorer>,
    config: EngineConfig,
    sessions: HashMap<String, EvalSession>,
}

impl EngineCoordinator {
    pub fn new(scorer: Arc<dyn GopScorer>, config: EngineConfig) -> Self {
        Self {
            scorer,
            config,
            sessions: HashMap::new(),
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Allocates a fresh session with its own blocks, tracker, stream
    /// buffer and controller, and starts its progress clock.
    pub fn create_session(
        &mut self,
        sentence: &str,
        options: SessionOptions,
    ) -> Result<SessionCreated, EngineError> {
        let blocks = SentenceBlockManager::new(sentence);
        if blocks.is_empty() {
            return Err(EngineError::invalid_input("sentence contains no blocks"));
        }

        let session_id = uuid::Uuid::new_v4().to_string();
        let confidence_threshold = options
            .confidence_threshold
            .unwrap_or(self.config.confidence_threshold);
        let min_time_between_evals = options
            .min_time_between_evals
            .unwrap_or(self.config.min_time_between_evals);

        let mut tracker = ProgressTracker::new(blocks.len(), self.config.window_size, false);
        tracker.start();

        let block_count = blocks.len();
        let now = SystemTime::now();
        self.sessions.insert(
            session_id.clone(),
            EvalSession {
                blocks,
                tracker,
                stream: StreamBuffer::new(self.config.sample_rate_hz, self.config.max_buffer_secs),
                controller: EvaluationController::new(
                    Arc::clone(&self.scorer),
                    confidence_threshold,
                    min_time_between_evals,
                ),
                created_at: now,
                last_activity: now,
            },
        );

        tracing::info!(%session_id, blocks = block_count, "session created");
        Ok(SessionCreated {
            session_id,
            status: "initialized".to_string(),
            sentence: sentence.to_string(),
            blocks: block_count,
        })
    }

    /// Feeds raw PCM bytes through the session's stream buffer and, when a
    /// usable window comes out, through its evaluation controller.
    pub fn evaluate_audio(
        &mut self,
        session_id: &str,
        binary_data: &[u8],
    ) -> Result<EvaluationOutcome, EngineError> {
        let session = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| EngineError::invalid_session(session_id))?;
        session.last_activity = SystemTime::now();

        let Some((chunk, metadata)) = session.stream.push_pcm16(binary_data) else {
            return Ok(EvaluationOutcome {
                session_id: session_id.to_string(),
                status: EvaluationStatus::NoValidAudio,
                result: AggregateResult::empty(),
            });
        };

        let result = session.controller.process_chunk(
            &mut session.blocks,
            &mut session.tracker,
            &chunk,
            &metadata,
        );
        let status = if session.controller.all_blocks_evaluated(&session.blocks) {
            EvaluationStatus::Completed
        } else {
            EvaluationStatus::InProgress
        };

        Ok(EvaluationOutcome {
            session_id: session_id.to_string(),
            status,
            result,
        })
    }

    pub fn close_session(&mut self, session_id: &str) -> Result<(), EngineError> {
        self.sessions
            .remove(session_id)
            .map(|_| tracing::info!(%session_id, "session closed"))
            .ok_or_else(|| EngineError::invalid_session(session_id))
    }

    pub fn session_status(&self, session_id: &str) -> Result<SessionStatus, EngineError> {
        let session = self
            .sessions
            .get(session_id)
            .ok_or_else(|| EngineError::invalid_session(session_id))?;

        let summary = session.controller.evaluation_summary(&session.blocks);
        Ok(SessionStatus {
            session_id: session_id.to_string(),
            created_at: epoch_secs(session.created_at),
            last_activity: epoch_secs(session.last_activity),
            current_progress: SessionProgress {
                active_block: session.blocks.active_block_id(),
                total_blocks: session.blocks.len(),
                overall_score: summary.overall_score,
            },
            all_completed: session.controller.all_blocks_evaluated(&session.blocks),
        })
    }

    /// Closes every session idle longer than `max_inactive_secs`; returns
    /// the number removed.
    pub fn cleanup_inactive_sessions(&mut self, max_inactive_secs: f64) -> usize {
        let now = SystemTime::now();
        let before = self.sessions.len();
        self.sessions.retain(|session_id, session| {
            let idle = now
                .duration_since(session.last_activity)
                .map(|d| d.as_secs_f64())
                .unwrap_or(0.0);
            let keep = idle <= max_inactive_secs;
            if !keep {
                tracing::info!(%session_id, idle_secs = idle, "inactive session removed");
            }
            keep
        });
        before - self.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Duration;

    use super::*;
    use crate::types::{GopResult, PronunciationScores, WordScore};

    struct FixedScorer {
        score: f32,
    }

    impl GopScorer for FixedScorer {
        fn score_text(&self, _samples: &[f32], text: &str) -> GopResult {
            self.score_with_context(_samples, text, "", "", None)
        }

        fn score_with_context(
            &self,
            _samples: &[f32],
            target_text: &str,
            _context_before: &str,
            _context_after: &str,
            _target_index: Option<usize>,
        ) -> GopResult {
            GopResult {
                overall: self.score,
                pronunciation: self.score,
                words: vec![WordScore {
                    word: target_text.to_string(),
                    scores: PronunciationScores {
                        pronunciation: self.score,
                    },
                }],
                eof: false,
            }
        }
    }

    fn coordinator(score: f32) -> EngineCoordinator {
        EngineCoordinator::new(Arc::new(FixedScorer { score }), EngineConfig::default())
    }

    fn voiced_pcm(seconds: f32) -> Vec<u8> {
        let frames = (seconds * 16_000.0) as usize;
        (0..frames)
            .flat_map(|i| {
                let v = (0.3 * (2.0 * std::f32::consts::PI * 440.0 * i as f32 / 16_000.0).sin()
                    * 32767.0) as i16;
                v.to_le_bytes()
            })
            .collect()
    }

    fn fast_options() -> SessionOptions {
        SessionOptions {
            confidence_threshold: Some(50.0),
            min_time_between_evals: Some(0.0),
        }
    }

    #[test]
    fn create_session_reports_block_count() {
        let mut coordinator = coordinator(80.0);
        let created = coordinator
            .create_session("I love Korea", SessionOptions::default())
            .unwrap();
        assert_eq!(created.status, "initialized");
        assert_eq!(created.blocks, 3);
        assert_eq!(created.sentence, "I love Korea");
        assert_eq!(coordinator.session_count(), 1);
    }

    #[test]
    fn evaluate_audio_progresses_to_completion() {
        let mut coordinator = coordinator(80.0);
        let created = coordinator.create_session("hello world", fast_options()).unwrap();
        let audio = voiced_pcm(0.5);

        let first = coordinator.evaluate_audio(&created.session_id, &audio).unwrap();
        assert_eq!(first.status, EvaluationStatus::InProgress);
        assert_eq!(first.result.words.len(), 1);

        let second = coordinator.evaluate_audio(&created.session_id, &audio).unwrap();
        assert_eq!(second.status, EvaluationStatus::Completed);
        assert!(second.result.eof);
        assert_eq!(second.result.final_score, Some(80.0));
        assert_eq!(second.result.words.len(), 2);

        let status = coordinator.session_status(&created.session_id).unwrap();
        assert!(status.all_completed);
        assert_eq!(status.current_progress.total_blocks, 2);
        assert_eq!(status.current_progress.overall_score, 80.0);
    }

    #[test]
    fn silent_audio_reports_no_valid_audio() {
        let mut coordinator = coordinator(80.0);
        let created = coordinator.create_session("hello world", fast_options()).unwrap();

        let silence = vec![0u8; 16_000];
        let outcome = coordinator.evaluate_audio(&created.session_id, &silence).unwrap();
        assert_eq!(outcome.status, EvaluationStatus::NoValidAudio);
        assert_eq!(outcome.result, AggregateResult::empty());
    }

    #[test]
    fn unknown_session_id_is_an_error() {
        let mut coordinator = coordinator(80.0);
        assert!(matches!(
            coordinator.evaluate_audio("missing", &[0, 0]),
            Err(EngineError::InvalidSession { .. })
        ));
        assert!(coordinator.session_status("missing").is_err());
        assert!(coordinator.close_session("missing").is_err());
    }

    #[test]
    fn closed_session_is_gone() {
        let mut coordinator = coordinator(80.0);
        let created = coordinator.create_session("hello", SessionOptions::default()).unwrap();
        coordinator.close_session(&created.session_id).unwrap();
        assert!(coordinator.session_status(&created.session_id).is_err());
        assert_eq!(coordinator.session_count(), 0);
    }

    #[test]
    fn cleanup_removes_only_idle_sessions() {
        let mut coordinator = coordinator(80.0);
        let idle = coordinator.create_session("old session", SessionOptions::default()).unwrap();
        thread::sleep(Duration::from_millis(50));
        let fresh = coordinator.create_session("new session", SessionOptions::default()).unwrap();
        // Touch the fresh session so only the idle one ages past the cutoff.
        let _ = coordinator.evaluate_audio(&fresh.session_id, &[0, 0]);

        let removed = coordinator.cleanup_inactive_sessions(0.04);
        assert_eq!(removed, 1);
        assert!(coordinator.session_status(&idle.session_id).is_err());
        assert!(coordinator.session_status(&fresh.session_id).is_ok());
    }

    #[test]
    fn sessions_are_independent() {
        let mut coordinator = coordinator(80.0);
        let a = coordinator.create_session("one two", fast_options()).unwrap();
        let b = coordinator.create_session("three four", fast_options()).unwrap();
        let audio = voiced_pcm(0.5);

        coordinator.evaluate_audio(&a.session_id, &audio).unwrap();
        let status_a = coordinator.session_status(&a.session_id).unwrap();
        let status_b = coordinator.session_status(&b.session_id).unwrap();
        assert_eq!(status_a.current_progress.active_block, 1);
        assert_eq!(status_b.current_progress.active_block, 0);
    }
}
