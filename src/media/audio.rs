//! PCM level metering

/// Gain applied by the producer so speech registers visibly
pub const PRODUCER_LEVEL_GAIN: f32 = 2.5;

/// Average amplitude of 16-bit little-endian PCM as a percentage.
///
/// Computes `mean(|sample|) / 32768 * 100 * gain`, clamped to `0..=100`. A
/// trailing odd byte is ignored.
pub fn pcm_level(pcm: &[u8], gain: f32) -> u8 {
    let samples = pcm.len() / 2;
    if samples == 0 {
        return 0;
    }

    let sum: u64 = pcm
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]).unsigned_abs() as u64)
        .sum();

    let average = sum as f64 / samples as f64;
    let level = (average / 32768.0 * 100.0).floor() * gain as f64;
    level.clamp(0.0, 100.0) as u8
}

/// Silence of the same length as `pcm`
pub fn silence_like(pcm: &[u8]) -> Vec<u8> {
    vec![0u8; pcm.len()]
}
