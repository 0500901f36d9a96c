pub mod alignment;
pub mod audio;
pub mod config;
pub mod engine;
pub mod error;
pub mod progress;
pub mod scoring;
pub mod types;

pub use config::EngineConfig;
pub use engine::builder::EngineBuilder;
pub use engine::coordinator::{
    EngineCoordinator, EvaluationOutcome, EvaluationStatus, SessionCreated, SessionOptions,
    SessionStatus,
};
pub use engine::monitor::{EngineMonitor, EngineState, RecordListener};
pub use engine::traits::{AcousticOutput, GopScorer, InferenceBackend, ScoringTokenizer};
pub use error::EngineError;
pub use scoring::{AcousticScorer, PrototypeMatrix, ScoringWeights};
pub use types::{AggregateResult, GopResult, WordScore};
