use std::path::Path;
use std::sync::Mutex;

use crate::config::EngineConfig;
use crate::engine::traits::{AcousticOutput, InferenceBackend, ScoringTokenizer};
use crate::error::EngineError;

/// ONNX Runtime backend for the acoustic model.
///
/// Expects a model with one input (mono f32 samples, batch 1) and two
/// outputs: hidden states `[1, T, D]` and logits `[1, T, V]`.
pub struct OnnxInferenceBackend {
    session: Mutex<ort::session::Session>,
    device_label: String,
    output_dims: Option<(usize, usize)>,
}

impl OnnxInferenceBackend {
    pub fn load(config: &EngineConfig) -> Result<Self, EngineError> {
        let execution_providers = onnx_execution_providers(config.device.as_str())?;
        let session = ort::session::Session::builder()
            .map_err(|e| EngineError::runtime("onnx session builder", e))?
            .with_execution_providers(execution_providers)
            .map_err(|e| EngineError::runtime("onnx execution providers", e))?
            .commit_from_file(Path::new(&config.model_path))
            .map_err(|e| EngineError::runtime("onnx model load", e))?;

        if session.outputs().len() < 2 {
            return Err(EngineError::runtime(
                "onnx model load",
                "model must expose hidden-state and logit outputs",
            ));
        }

        let output_dims = static_output_dims(&session);
        tracing::info!(
            inputs = session.inputs().len(),
            outputs = session.outputs().len(),
            model_path = %config.model_path,
            device = %config.device,
            ?output_dims,
            "acoustic ONNX runtime loaded"
        );

        let device_label = parse_onnx_device(config.device.as_str())?;
        Ok(Self {
            session: Mutex::new(session),
            device_label: device_label.to_string(),
            output_dims,
        })
    }
}

impl InferenceBackend for OnnxInferenceBackend {
    fn infer(&self, samples: &[f32]) -> Result<AcousticOutput, EngineError> {
        let input =
            ort::value::TensorRef::from_array_view(([1usize, samples.len()], samples))
                .map_err(|e| EngineError::runtime("onnx input tensor", e))?;
        let mut session = self
            .session
            .lock()
            .map_err(|_| EngineError::runtime("onnx session lock", "session mutex poisoned"))?;
        let outputs = session
            .run(ort::inputs![input])
            .map_err(|e| EngineError::runtime("onnx forward pass", e))?;
        if outputs.len() < 2 {
            return Err(EngineError::runtime(
                "onnx forward pass",
                "model produced fewer than two outputs",
            ));
        }

        let hidden = extract_frames(&outputs[0], "hidden")?;
        let logits = extract_frames(&outputs[1], "logits")?;
        if hidden.len() != logits.len() {
            return Err(EngineError::runtime(
                "onnx forward pass",
                format!(
                    "hidden frame count {} does not match logits frame count {}",
                    hidden.len(),
                    logits.len()
                ),
            ));
        }

        Ok(AcousticOutput { hidden, logits })
    }

    fn output_dims(&self) -> Result<(usize, usize), EngineError> {
        self.output_dims.ok_or_else(|| {
            EngineError::runtime(
                "onnx model metadata",
                "model does not advertise static hidden/vocab dimensions",
            )
        })
    }

    fn device_label(&self) -> String {
        self.device_label.clone()
    }
}

fn extract_frames(
    output: &ort::value::DynValue,
    name: &'static str,
) -> Result<Vec<Vec<f32>>, EngineError> {
    let (shape, data) = output
        .try_extract_tensor::<f32>()
        .map_err(|e| EngineError::runtime("onnx extract output", e))?;
    let dims: Vec<i64> = shape.iter().copied().collect();

    let (frames, width) = match dims.as_slice() {
        [batch, t, v] if *batch == 1 && *t > 0 && *v > 0 => (*t as usize, *v as usize),
        [t, v] if *t > 0 && *v > 0 => (*t as usize, *v as usize),
        _ => {
            return Err(EngineError::invalid_input(format!(
                "unsupported {name} output shape {dims:?}; expected [1, T, W] or [T, W]"
            )));
        }
    };
    if frames * width != data.len() {
        return Err(EngineError::invalid_input(format!(
            "{name} shape/data mismatch: shape implies {} values, got {}",
            frames * width,
            data.len()
        )));
    }

    Ok(data.chunks_exact(width).map(<[f32]>::to_vec).collect())
}

/// `(hidden_dim, vocab_size)` from the session metadata when the model
/// declares static trailing dimensions.
fn static_output_dims(session: &ort::session::Session) -> Option<(usize, usize)> {
    let hidden_dim = trailing_dim(session.outputs()[0].dtype())?;
    let vocab_size = trailing_dim(session.outputs()[1].dtype())?;
    Some((hidden_dim, vocab_size))
}

fn trailing_dim(value_type: &ort::value::ValueType) -> Option<usize> {
    match value_type {
        ort::value::ValueType::Tensor { shape, .. } => shape
            .iter()
            .last()
            .copied()
            .filter(|&d| d > 0)
            .map(|d| d as usize),
        _ => None,
    }
}

fn onnx_execution_providers(
    device: &str,
) -> Result<Vec<ort::ep::ExecutionProviderDispatch>, EngineError> {
    match parse_onnx_device(device)? {
        "cpu" => Ok(vec![ort::ep::CPU::default().build()]),
        "cuda" => Ok(vec![
            ort::ep::CUDA::default()
                .with_device_id(0)
                .build()
                .error_on_failure(),
            ort::ep::CPU::default().build(),
        ]),
        _ => Err(EngineError::invalid_input(format!(
            "unsupported ONNX device '{device}', expected 'cpu' or 'cuda'"
        ))),
    }
}

fn parse_onnx_device(device: &str) -> Result<&'static str, EngineError> {
    if device.eq_ignore_ascii_case("cpu") {
        Ok("cpu")
    } else if device.eq_ignore_ascii_case("cuda") {
        Ok("cuda")
    } else {
        Err(EngineError::invalid_input(format!(
            "unsupported ONNX device '{device}', expected 'cpu' or 'cuda'"
        )))
    }
}

/// HuggingFace tokenizer adapter.
pub struct HfTokenizer {
    inner: tokenizers::Tokenizer,
}

impl HfTokenizer {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let inner = tokenizers::Tokenizer::from_file(path.as_ref())
            .map_err(|e| EngineError::runtime("load tokenizer", e))?;
        tracing::info!(path = %path.as_ref().display(), "tokenizer loaded");
        Ok(Self { inner })
    }
}

impl ScoringTokenizer for HfTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>, EngineError> {
        self.inner
            .encode(text, false)
            .map(|encoding| encoding.get_ids().to_vec())
            .map_err(|e| EngineError::runtime("tokenizer encode", e))
    }

    fn decode(&self, ids: &[u32]) -> Result<String, EngineError> {
        self.inner
            .decode(ids, true)
            .map_err(|e| EngineError::runtime("tokenizer decode", e))
    }

    fn token_to_id(&self, token: &str) -> Option<u32> {
        self.inner.token_to_id(token)
    }

    fn id_to_token(&self, id: u32) -> Option<String> {
        self.inner.id_to_token(id)
    }
}
