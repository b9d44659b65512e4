//! PCM16 helpers for context clips and stream output.
//!
//! All buffers are little-endian signed 16-bit mono unless stated otherwise.

/// Extracts the sample rate from a MIME type like `audio/pcm;rate=24000`.
pub fn parse_rate_from_mime(mime_type: Option<&str>, fallback: u32) -> u32 {
    mime_type
        .and_then(|mime| {
            mime.split(';')
                .filter_map(|param| param.trim().strip_prefix("rate="))
                .find_map(|rate| rate.trim().parse::<u32>().ok())
        })
        .filter(|rate| *rate > 0)
        .unwrap_or(fallback)
}

/// Decodes little-endian PCM16 bytes. A trailing odd byte is dropped.
pub fn pcm16_le_bytes_to_samples(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// Encodes samples as little-endian PCM16 bytes.
pub fn samples_to_pcm16_le_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Simple linear interpolation resampling.
pub fn resample(samples: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
    if from_rate == to_rate || samples.is_empty() || from_rate == 0 || to_rate == 0 {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let output_len = (samples.len() as f64 / ratio).ceil() as usize;

    (0..output_len)
        .map(|i| {
            let source_pos = i as f64 * ratio;
            let source_idx = (source_pos.floor() as usize).min(samples.len() - 1);
            let fraction = source_pos - source_idx as f64;

            if source_idx + 1 >= samples.len() {
                samples[source_idx]
            } else {
                let left = samples[source_idx] as f64;
                let right = samples[source_idx + 1] as f64;
                (left + (right - left) * fraction) as i16
            }
        })
        .collect()
}

/// Resamples a PCM16 byte buffer between rates.
pub fn resample_pcm16_bytes(bytes: &[u8], from_rate: u32, to_rate: u32) -> Vec<u8> {
    samples_to_pcm16_le_bytes(&resample(
        &pcm16_le_bytes_to_samples(bytes),
        from_rate,
        to_rate,
    ))
}

/// Normalized RMS (0.0 to 1.0) of a PCM16 byte buffer.
pub fn pcm16_rms(bytes: &[u8]) -> f32 {
    let samples = pcm16_le_bytes_to_samples(bytes);
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f64 = samples
        .iter()
        .map(|&s| {
            let normalized = s as f64 / i16::MAX as f64;
            normalized * normalized
        })
        .sum();
    ((sum_squares / samples.len() as f64).sqrt() as f32).min(1.0)
}

/// Concatenates byte chunks.
pub fn concat(chunks: &[Vec<u8>]) -> Vec<u8> {
    let mut out = Vec::with_capacity(chunks.iter().map(Vec::len).sum());
    for chunk in chunks {
        out.extend_from_slice(chunk);
    }
    out
}

/// Number of bytes in `secs` seconds of mono PCM16 at `rate`.
pub fn silence_len(secs: u32, rate: u32) -> usize {
    secs as usize * rate as usize * 2
}

/// Appends `secs` seconds of digital silence.
pub fn pad_with_silence(bytes: &[u8], secs: u32, rate: u32) -> Vec<u8> {
    let mut padded = Vec::with_capacity(bytes.len() + silence_len(secs, rate));
    padded.extend_from_slice(bytes);
    padded.resize(bytes.len() + silence_len(secs, rate), 0);
    padded
}

/// Splits a buffer into `parts` roughly equal chunks (the last may be shorter, and a
/// remainder can produce one extra chunk). Never yields empty chunks.
pub fn split_chunks(bytes: &[u8], parts: usize) -> Vec<&[u8]> {
    if bytes.is_empty() {
        return Vec::new();
    }
    let size = (bytes.len() / parts.max(1)).max(1);
    bytes.chunks(size).collect()
}

/// Duration in seconds of a mono PCM16 buffer.
pub fn duration_secs(bytes: &[u8], rate: u32) -> f64 {
    if rate == 0 {
        return 0.0;
    }
    (bytes.len() / 2) as f64 / rate as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_rate_variants() {
        assert_eq!(parse_rate_from_mime(Some("audio/pcm;rate=24000"), 1), 24000);
        assert_eq!(parse_rate_from_mime(Some("audio/pcm; rate=16000"), 1), 16000);
        assert_eq!(parse_rate_from_mime(Some("audio/pcm"), 24000), 24000);
        assert_eq!(parse_rate_from_mime(Some("audio/pcm;rate=abc"), 8000), 8000);
        assert_eq!(parse_rate_from_mime(Some("audio/pcm;rate=0"), 8000), 8000);
        assert_eq!(parse_rate_from_mime(None, 24000), 24000);
    }

    #[test]
    fn le_conversion_roundtrip() {
        let samples = vec![0i16, 1, -1, i16::MAX, i16::MIN];
        let bytes = samples_to_pcm16_le_bytes(&samples);
        assert_eq!(bytes.len(), 10);
        assert_eq!(pcm16_le_bytes_to_samples(&bytes), samples);
    }

    #[test]
    fn odd_trailing_byte_is_dropped() {
        assert_eq!(pcm16_le_bytes_to_samples(&[1, 0, 7]), vec![1]);
    }

    #[test]
    fn resample_24k_to_16k_shrinks_by_two_thirds() {
        let samples = vec![100i16; 2400];
        let out = resample(&samples, 24000, 16000);
        assert_eq!(out.len(), 1600);
        assert!(out.iter().all(|&s| s == 100));
    }

    #[test]
    fn resample_same_rate_is_identity() {
        let samples = vec![1i16, 2, 3];
        assert_eq!(resample(&samples, 16000, 16000), samples);
        assert!(resample(&[], 24000, 16000).is_empty());
    }

    #[test]
    fn rms_bounds() {
        assert_eq!(pcm16_rms(&[]), 0.0);
        assert_eq!(pcm16_rms(&samples_to_pcm16_le_bytes(&[0; 100])), 0.0);
        let loud = samples_to_pcm16_le_bytes(&[i16::MAX; 100]);
        assert!((pcm16_rms(&loud) - 1.0).abs() < 0.001);
    }

    #[test]
    fn two_seconds_of_silence_at_16k() {
        assert_eq!(silence_len(2, 16000), 64000);
        let padded = pad_with_silence(&[9, 9], 2, 16000);
        assert_eq!(padded.len(), 64002);
        assert_eq!(&padded[..2], &[9, 9]);
        assert!(padded[2..].iter().all(|&b| b == 0));
    }

    #[test]
    fn split_into_five() {
        let bytes = vec![0u8; 100];
        let chunks = split_chunks(&bytes, 5);
        assert_eq!(chunks.len(), 5);
        assert!(chunks.iter().all(|c| c.len() == 20));

        let uneven = vec![0u8; 103];
        let chunks = split_chunks(&uneven, 5);
        assert_eq!(chunks.iter().map(|c| c.len()).sum::<usize>(), 103);
        assert_eq!(chunks.len(), 6);

        assert!(split_chunks(&[], 5).is_empty());
        assert_eq!(split_chunks(&[1, 2], 5).len(), 2);
    }

    #[test]
    fn duration_of_one_second() {
        assert_eq!(duration_secs(&vec![0u8; 32000], 16000), 1.0);
        assert_eq!(duration_secs(&[0u8; 4], 0), 0.0);
    }

    #[test]
    fn concat_preserves_order() {
        assert_eq!(concat(&[vec![1, 2], vec![], vec![3]]), vec![1, 2, 3]);
    }
}
