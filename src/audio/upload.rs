//! Externally supplied context clip that replaces audio history while present.

use crate::audio::history::AudioClip;
use crate::audio::pcm::{duration_secs, resample, samples_to_pcm16_le_bytes};
use crate::defaults::CONTEXT_SAMPLE_RATE;
use crate::error::{Result, RoundtableError};
use std::io::Read;
use std::path::Path;
use std::time::Duration;

/// A 16 kHz mono PCM16 clip with a known duration.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadedContext {
    pub name: String,
    pub clip: AudioClip,
    pub duration: Duration,
}

impl UploadedContext {
    /// Wraps raw 16 kHz mono PCM16 bytes.
    pub fn from_pcm16(name: &str, payload: Vec<u8>) -> Self {
        let duration = Duration::from_secs_f64(duration_secs(&payload, CONTEXT_SAMPLE_RATE));
        Self {
            name: name.to_string(),
            clip: AudioClip::context_pcm(payload),
            duration,
        }
    }

    /// Parses a 16-bit WAV stream, downmixing to mono and resampling to 16 kHz.
    pub fn from_wav_reader<R: Read>(name: &str, reader: R) -> Result<Self> {
        let mut wav_reader = hound::WavReader::new(reader)?;
        let spec = wav_reader.spec();

        if spec.sample_format != hound::SampleFormat::Int || spec.bits_per_sample != 16 {
            return Err(RoundtableError::AudioFormat {
                expected: "16-bit integer PCM".to_string(),
                actual: format!("{:?} {}-bit", spec.sample_format, spec.bits_per_sample),
            });
        }

        let raw_samples: Vec<i16> = wav_reader
            .samples::<i16>()
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let channels = spec.channels.max(1) as usize;
        let mono: Vec<i16> = if channels == 1 {
            raw_samples
        } else {
            raw_samples
                .chunks_exact(channels)
                .map(|frame| {
                    let sum: i32 = frame.iter().map(|&s| s as i32).sum();
                    (sum / channels as i32) as i16
                })
                .collect()
        };

        let samples = resample(&mono, spec.sample_rate, CONTEXT_SAMPLE_RATE);
        Ok(Self::from_pcm16(name, samples_to_pcm16_le_bytes(&samples)))
    }

    /// Reads a WAV file from disk.
    pub fn from_wav_file(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("context.wav");
        Self::from_wav_reader(name, std::io::BufReader::new(file))
    }
}
