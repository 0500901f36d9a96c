use std::path::Path;
use std::sync::Arc;

use crate::config::EngineConfig;
use crate::engine::coordinator::EngineCoordinator;
use crate::engine::monitor::EngineMonitor;
use crate::engine::onnx::{HfTokenizer, OnnxInferenceBackend};
use crate::engine::traits::{InferenceBackend, ScoringTokenizer};
use crate::error::EngineError;
use crate::scoring::{AcousticScorer, PrototypeMatrix, ScoringWeights};

/// Wires configuration into a ready scorer, monitor or coordinator.
///
/// Defaults to the ONNX inference backend and the HuggingFace tokenizer;
/// both can be swapped for custom implementations of the trait seams.
pub struct EngineBuilder {
    config: EngineConfig,
    backend: Option<Box<dyn InferenceBackend>>,
    tokenizer: Option<Box<dyn ScoringTokenizer>>,
    weights: ScoringWeights,
}

impl EngineBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            backend: None,
            tokenizer: None,
            weights: ScoringWeights::default(),
        }
    }

    pub fn with_backend(mut self, backend: Box<dyn InferenceBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn with_tokenizer(mut self, tokenizer: Box<dyn ScoringTokenizer>) -> Self {
        self.tokenizer = Some(tokenizer);
        self
    }

    pub fn with_weights(mut self, weights: ScoringWeights) -> Self {
        self.weights = weights;
        self
    }

    pub fn build_scorer(self) -> Result<AcousticScorer, EngineError> {
        let tokenizer = match self.tokenizer {
            Some(tokenizer) => tokenizer,
            None => Box::new(HfTokenizer::load(&self.config.tokenizer_path)?),
        };
        let backend = match self.backend {
            Some(backend) => backend,
            None => Box::new(OnnxInferenceBackend::load(&self.config)?),
        };

        let prototypes = load_prototypes(&self.config, backend.as_ref())?;
        Ok(AcousticScorer::new(backend, tokenizer, prototypes)?.with_weights(self.weights))
    }

    pub fn build_monitor(self) -> Result<EngineMonitor, EngineError> {
        let config = self.config.clone();
        let scorer = Arc::new(self.build_scorer()?);
        Ok(EngineMonitor::new(scorer, config))
    }

    pub fn build_coordinator(self) -> Result<EngineCoordinator, EngineError> {
        let config = self.config.clone();
        let scorer = Arc::new(self.build_scorer()?);
        Ok(EngineCoordinator::new(scorer, config))
    }
}

fn load_prototypes(
    config: &EngineConfig,
    backend: &dyn InferenceBackend,
) -> Result<PrototypeMatrix, EngineError> {
    match (&config.prototype_shape_path, &config.prototype_matrix_path) {
        (Some(shape_path), Some(matrix_path)) => {
            // A configured sidecar is the production path; a corrupt file is
            // fatal rather than silently degraded.
            PrototypeMatrix::load(Path::new(shape_path), Path::new(matrix_path))
        }
        (None, None) => {
            let (hidden_dim, vocab_size) = backend.output_dims()?;
            tracing::warn!(
                vocab_size,
                hidden_dim,
                degradation = "synthetic_prototype_matrix",
                "no prototype sidecar configured; falling back to a synthetic matrix. \
                 Scoring quality is degraded — development use only"
            );
            Ok(PrototypeMatrix::synthetic(vocab_size, hidden_dim))
        }
        _ => Err(EngineError::invalid_input(
            "prototype sidecar requires both shape and matrix paths",
        )),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::engine::traits::AcousticOutput;

    struct StubBackend;

    impl InferenceBackend for StubBackend {
        fn infer(&self, _samples: &[f32]) -> Result<AcousticOutput, EngineError> {
            Ok(AcousticOutput {
                hidden: vec![vec![0.0; 4]; 10],
                logits: vec![vec![0.0; 8]; 10],
            })
        }

        fn output_dims(&self) -> Result<(usize, usize), EngineError> {
            Ok((4, 8))
        }

        fn device_label(&self) -> String {
            "stub".to_string()
        }
    }

    struct StubTokenizer {
        with_blank: bool,
    }

    impl ScoringTokenizer for StubTokenizer {
        fn encode(&self, text: &str) -> Result<Vec<u32>, EngineError> {
            Ok(text.chars().map(|_| 1).collect())
        }

        fn decode(&self, _ids: &[u32]) -> Result<String, EngineError> {
            Ok(String::new())
        }

        fn token_to_id(&self, token: &str) -> Option<u32> {
            (token == "|" && self.with_blank).then_some(0)
        }

        fn id_to_token(&self, _id: u32) -> Option<String> {
            None
        }
    }

    #[test]
    fn builds_with_synthetic_prototype_fallback() {
        let builder = EngineBuilder::new(EngineConfig::default())
            .with_backend(Box::new(StubBackend))
            .with_tokenizer(Box::new(StubTokenizer { with_blank: true }));
        assert!(builder.build_scorer().is_ok());
    }

    #[test]
    fn builds_with_sidecar_prototypes() {
        let dir = tempfile::tempdir().unwrap();
        let shape_path = dir.path().join("matrix_shape.txt");
        let matrix_path = dir.path().join("prototype_matrix.bin");
        std::fs::write(&shape_path, "8 4").unwrap();
        let mut file = std::fs::File::create(&matrix_path).unwrap();
        for _ in 0..8 * 4 {
            file.write_all(&1.0f32.to_le_bytes()).unwrap();
        }

        let config = EngineConfig {
            prototype_shape_path: Some(shape_path.to_string_lossy().into_owned()),
            prototype_matrix_path: Some(matrix_path.to_string_lossy().into_owned()),
            ..EngineConfig::default()
        };
        let builder = EngineBuilder::new(config)
            .with_backend(Box::new(StubBackend))
            .with_tokenizer(Box::new(StubTokenizer { with_blank: true }));
        assert!(builder.build_scorer().is_ok());
    }

    #[test]
    fn corrupt_sidecar_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let shape_path = dir.path().join("matrix_shape.txt");
        let matrix_path = dir.path().join("prototype_matrix.bin");
        std::fs::write(&shape_path, "8 4").unwrap();
        std::fs::write(&matrix_path, [0u8; 3]).unwrap();

        let config = EngineConfig {
            prototype_shape_path: Some(shape_path.to_string_lossy().into_owned()),
            prototype_matrix_path: Some(matrix_path.to_string_lossy().into_owned()),
            ..EngineConfig::default()
        };
        let builder = EngineBuilder::new(config)
            .with_backend(Box::new(StubBackend))
            .with_tokenizer(Box::new(StubTokenizer { with_blank: true }));
        assert!(builder.build_scorer().is_err());
    }

    #[test]
    fn partial_sidecar_config_is_rejected() {
        let config = EngineConfig {
            prototype_shape_path: Some("/tmp/shape.txt".to_string()),
            ..EngineConfig::default()
        };
        let builder = EngineBuilder::new(config)
            .with_backend(Box::new(StubBackend))
            .with_tokenizer(Box::new(StubTokenizer { with_blank: true }));
        assert!(builder.build_scorer().is_err());
    }

    #[test]
    fn tokenizer_without_blank_token_is_rejected() {
        let builder = EngineBuilder::new(EngineConfig::default())
            .with_backend(Box::new(StubBackend))
            .with_tokenizer(Box::new(StubTokenizer { with_blank: false }));
        assert!(builder.build_scorer().is_err());
    }
}
