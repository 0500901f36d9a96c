use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;

use crate::audio::monitor::{FileMonitor, WavFileSource};
use crate::config::EngineConfig;
use crate::engine::controller::{EvaluationController, EvaluationSummary};
use crate::engine::traits::GopScorer;
use crate::error::EngineError;
use crate::progress::{ProgressTracker, SentenceBlockManager};

/// Callbacks reported from the background threads. All bodies run on the
/// monitoring or tick thread and must not block.
#[derive(Default)]
pub struct RecordListener {
    pub on_start: Option<Box<dyn Fn() + Send + Sync>>,
    pub on_tick: Option<Box<dyn Fn(usize, usize) + Send + Sync>>,
    pub on_start_record_fail: Option<Box<dyn Fn(&str) + Send + Sync>>,
    pub on_record_end: Option<Box<dyn Fn() + Send + Sync>>,
    pub on_score: Option<Box<dyn Fn(&str) + Send + Sync>>,
}

impl RecordListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_start(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_start = Some(Box::new(f));
        self
    }

    pub fn on_tick(mut self, f: impl Fn(usize, usize) + Send + Sync + 'static) -> Self {
        self.on_tick = Some(Box::new(f));
        self
    }

    pub fn on_start_record_fail(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_start_record_fail = Some(Box::new(f));
        self
    }

    pub fn on_record_end(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_record_end = Some(Box::new(f));
        self
    }

    pub fn on_score(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_score = Some(Box::new(f));
        self
    }

    fn notify_fail(&self, message: &str) {
        if let Some(callback) = &self.on_start_record_fail {
            callback(message);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressState {
    pub current: usize,
    pub total: usize,
}

/// Serializable snapshot of the monitor, merged from the running flag,
/// the active pointer and the evaluation summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineState {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<ProgressState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<EvaluationSummary>,
}

struct MonitorSession {
    blocks: SentenceBlockManager,
    tracker: ProgressTracker,
    controller: EvaluationController,
}

/// Single-session evaluation over a growing audio file.
///
/// One background thread polls the audio source and drives evaluation
/// through the chunk callback; a second thread reports progress ticks.
/// All session state sits behind one lock so the two threads and the
/// caller observe it consistently.
pub struct EngineMonitor {
    scorer: Arc<dyn GopScorer>,
    config: EngineConfig,
    listener: Arc<RecordListener>,
    session: Option<Arc<Mutex<MonitorSession>>>,
    audio: Option<FileMonitor>,
    running: Arc<AtomicBool>,
    tick_handle: Option<JoinHandle<()>>,
}

impl EngineMonitor {
    pub fn new(scorer: Arc<dyn GopScorer>, config: EngineConfig) -> Self {
        Self {
            scorer,
            config,
            listener: Arc::new(RecordListener::default()),
            session: None,
            audio: None,
            running: Arc::new(AtomicBool::new(false)),
            tick_handle: None,
        }
    }

    pub fn set_listener(&mut self, listener: RecordListener) {
        self.listener = Arc::new(listener);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn is_initialized(&self) -> bool {
        self.session.is_some()
    }

    /// Builds the per-sentence state and wires the audio chunk callback
    /// into the evaluation controller.
    pub fn initialize(&mut self, sentence: &str) -> Result<(), EngineError> {
        let blocks = SentenceBlockManager::new(sentence);
        if blocks.is_empty() {
            return Err(EngineError::invalid_input("sentence contains no blocks"));
        }

        let tracker = ProgressTracker::new(blocks.len(), self.config.window_size, true);
        let controller = EvaluationController::new(
            Arc::clone(&self.scorer),
            self.config.confidence_threshold,
            self.config.min_time_between_evals,
        );
        let session = Arc::new(Mutex::new(MonitorSession {
            blocks,
            tracker,
            controller,
        }));

        let audio = FileMonitor::new(
            self.config.sample_rate_hz,
            self.config.chunk_duration_secs,
            self.config.polling_interval_secs,
        );
        let cb_session = Arc::clone(&session);
        let cb_listener = Arc::clone(&self.listener);
        let cb_running = Arc::clone(&self.running);
        audio.add_chunk_callback(move |chunk, metadata| {
            if !cb_running.load(Ordering::Acquire) {
                return;
            }
            let mut state = cb_session.lock();
            let MonitorSession {
                blocks,
                tracker,
                controller,
            } = &mut *state;
            let result = controller.process_chunk(blocks, tracker, chunk, metadata);
            if let Some(on_score) = &cb_listener.on_score {
                match serde_json::to_string(&result) {
                    Ok(payload) => on_score(&payload),
                    Err(err) => tracing::warn!(error = %err, "result serialization failed"),
                }
            }
        });

        let block_count = session.lock().blocks.len();
        self.session = Some(session);
        self.audio = Some(audio);
        tracing::info!(sentence, blocks = block_count, "evaluation initialized");
        Ok(())
    }

    /// Starts monitoring the audio file and the tick thread. Failures are
    /// reported through `on_start_record_fail` as well as the return value.
    pub fn start_evaluation(&mut self, audio_path: impl AsRef<Path>) -> Result<(), EngineError> {
        if self.session.is_none() {
            let message = "cannot start evaluation before initialization";
            self.listener.notify_fail(message);
            return Err(EngineError::invalid_input(message));
        }
        if self.is_running() {
            tracing::warn!("evaluation already running");
            return Err(EngineError::invalid_input("evaluation already running"));
        }

        let source = match WavFileSource::open(audio_path.as_ref()) {
            Ok(source) => source,
            Err(err) => {
                let message = format!("audio source setup failed: {err}");
                self.listener.notify_fail(&message);
                return Err(err);
            }
        };

        let session = self.session.as_ref().expect("checked above");
        session.lock().tracker.start();

        self.running.store(true, Ordering::Release);
        if let Err(err) = self
            .audio
            .as_mut()
            .expect("initialized with session")
            .start(Box::new(source))
        {
            self.running.store(false, Ordering::Release);
            let message = format!("audio monitoring failed to start: {err}");
            self.listener.notify_fail(&message);
            return Err(err);
        }

        let tick_session = Arc::clone(session);
        let tick_listener = Arc::clone(&self.listener);
        let tick_running = Arc::clone(&self.running);
        let interval = Duration::from_secs_f32(self.config.update_interval_secs.max(0.01));
        self.tick_handle = Some(thread::spawn(move || {
            while tick_running.load(Ordering::Acquire) {
                if let Some(on_tick) = &tick_listener.on_tick {
                    let (current, total) = {
                        let state = tick_session.lock();
                        (state.blocks.active_block_id() + 1, state.blocks.len())
                    };
                    on_tick(current, total);
                }
                thread::sleep(interval);
            }
        }));

        if let Some(on_start) = &self.listener.on_start {
            on_start();
        }
        tracing::info!("evaluation started");
        Ok(())
    }

    /// Idempotent. Joins both background threads; no callback other than
    /// `on_record_end` fires after this returns.
    pub fn stop_evaluation(&mut self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(handle) = self.tick_handle.take() {
            let _ = handle.join();
        }
        if let Some(audio) = self.audio.as_mut() {
            audio.stop();
        }
        if let Some(on_record_end) = &self.listener.on_record_end {
            on_record_end();
        }
        tracing::info!("evaluation stopped");
    }

    pub fn current_state(&self) -> EngineState {
        let Some(session) = &self.session else {
            return EngineState {
                status: "not_initialized".to_string(),
                progress: None,
                summary: None,
            };
        };

        let state = session.lock();
        EngineState {
            status: if self.is_running() { "running" } else { "stopped" }.to_string(),
            progress: Some(ProgressState {
                current: state.blocks.active_block_id() + 1,
                total: state.blocks.len(),
            }),
            summary: Some(state.controller.evaluation_summary(&state.blocks)),
        }
    }

    /// Stops evaluation and returns every sub-tracker to its initial state.
    pub fn reset(&mut self) {
        self.stop_evaluation();
        if let Some(session) = &self.session {
            let mut state = session.lock();
            state.blocks.reset();
            state.tracker.reset();
            state.controller.reset();
        }
        if let Some(audio) = self.audio.as_mut() {
            audio.reset();
        }
        tracing::info!("engine reset");
    }

    /// Convenience composition of listener + initialize + start. Failures
    /// surface through the listener; the returned state reflects whatever
    /// was reached.
    pub fn evaluate_speech(
        &mut self,
        sentence: &str,
        audio_path: impl AsRef<Path>,
        listener: RecordListener,
    ) -> EngineState {
        self.set_listener(listener);

        if let Err(err) = self.initialize(sentence) {
            self.listener.notify_fail(&format!("initialization failed: {err}"));
            return self.current_state();
        }
        // start_evaluation reports its own failures via the listener.
        let _ = self.start_evaluation(audio_path);
        self.current_state()
    }
}

impl Drop for EngineMonitor {
    fn drop(&mut self) {
        self.stop_evaluation();
    }
}
