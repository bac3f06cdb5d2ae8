use base64::Engine;

/// Sample rate the realtime endpoint expects for `pcm16` input.
pub const REALTIME_PCM16_SAMPLE_RATE: u32 = 24_000;

/// Encodes little-endian PCM16 samples as base64.
pub fn encode_pcm16(samples: &[i16]) -> String {
    let bytes: Vec<u8> = samples
        .iter()
        .flat_map(|&sample| sample.to_le_bytes())
        .collect();
    base64::engine::general_purpose::STANDARD.encode(&bytes)
}

/// Inverse of [`encode_pcm16`]. Invalid input and a trailing odd byte are
/// dropped.
pub fn decode_pcm16(fragment: &str) -> Vec<i16> {
    match base64::engine::general_purpose::STANDARD.decode(fragment) {
        Ok(bytes) => bytes
            .chunks_exact(2)
            .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]))
            .collect(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to decode PCM16 fragment");
            Vec::new()
        }
    }
}
