/// Frame length used by the energy gate: 10 ms at the given sample rate.
fn frame_len(sample_rate_hz: u32) -> usize {
    (sample_rate_hz as usize / 100).max(1)
}

/// Energy-based voice activity gate.
///
/// Splits `samples` into 10 ms frames (a trailing partial frame is
/// discarded), computes mean-square energy per frame and reports speech
/// iff at least `min_speech_frames` frames exceed `energy_threshold`.
/// Pure function of its inputs.
pub fn has_voice(
    samples: &[f32],
    sample_rate_hz: u32,
    energy_threshold: f32,
    min_speech_frames: usize,
) -> bool {
    let frame = frame_len(sample_rate_hz);
    let mut frame_count = 0usize;
    let mut speech_frames = 0usize;
    let mut energy_sum = 0.0f64;

    for chunk in samples.chunks_exact(frame) {
        let energy =
            chunk.iter().map(|&s| (s as f64) * (s as f64)).sum::<f64>() / chunk.len() as f64;
        energy_sum += energy;
        frame_count += 1;
        if energy > energy_threshold as f64 {
            speech_frames += 1;
        }
    }

    let avg_energy = if frame_count > 0 {
        energy_sum / frame_count as f64
    } else {
        0.0
    };
    tracing::debug!(
        avg_energy = format!("{avg_energy:.6}"),
        speech_frames,
        total_frames = frame_count,
        "voice activity gate"
    );

    speech_frames >= min_speech_frames
}
