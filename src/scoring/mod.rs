pub mod ctc;
pub mod prototype;
pub mod scorer;

pub use prototype::PrototypeMatrix;
pub use scorer::{AcousticScorer, ScoringWeights, BLANK_TOKEN};
