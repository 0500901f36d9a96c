pub mod builder;
pub mod controller;
pub mod coordinator;
pub mod monitor;
pub mod onnx;
pub mod traits;

pub use builder::EngineBuilder;
pub use controller::{EvaluationController, EvaluationSummary};
pub use coordinator::{EngineCoordinator, SessionOptions};
pub use monitor::{EngineMonitor, EngineState, RecordListener};
pub use traits::{AcousticOutput, GopScorer, InferenceBackend, ScoringTokenizer};
