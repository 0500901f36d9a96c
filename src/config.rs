#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub model_path: String,
    pub tokenizer_path: String,
    /// Optional prototype-matrix sidecar: plain-text shape file and raw f32 blob.
    /// When absent a deterministic synthetic matrix is substituted (development
    /// only; scoring quality degrades and the substitution is logged).
    pub prototype_shape_path: Option<String>,
    pub prototype_matrix_path: Option<String>,
    pub device: String,
    pub sample_rate_hz: u32,
    /// Minimum per-block GOP score required to commit an evaluation.
    pub confidence_threshold: f32,
    /// Rate limit between committed evaluations, in seconds.
    pub min_time_between_evals: f32,
    /// Fixed chunk length extracted by the file-monitoring pipeline, in seconds.
    pub chunk_duration_secs: f32,
    /// Sleep between growth checks of a monitored audio source, in seconds.
    pub polling_interval_secs: f32,
    /// Sleep between progress tick callbacks, in seconds.
    pub update_interval_secs: f32,
    /// Rolling retention of the streaming (binary-push) buffer, in seconds.
    pub max_buffer_secs: f32,
    /// Number of trailing blocks eligible for matching.
    pub window_size: usize,
}

impl EngineConfig {
    pub const DEFAULT_SAMPLE_RATE_HZ: u32 = 16_000;
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            model_path: String::new(),
            tokenizer_path: String::new(),
            prototype_shape_path: None,
            prototype_matrix_path: None,
            device: "cpu".to_string(),
            sample_rate_hz: Self::DEFAULT_SAMPLE_RATE_HZ,
            confidence_threshold: 70.0,
            min_time_between_evals: 0.5,
            chunk_duration_secs: 2.0,
            polling_interval_secs: 0.1,
            update_interval_secs: 0.5,
            max_buffer_secs: 10.0,
            window_size: 3,
        }
    }
}
