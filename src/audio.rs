//! Per-chapter WAV output.

use hound::{SampleFormat, WavSpec, WavWriter};
use std::fs;
use std::path::Path;
use tracing::{debug, info};

use crate::error::Result;
use crate::tts::{AudioChunk, SpeechEngine, SAMPLE_RATE};
use crate::voices::Voice;

/// Synthesize `text` and write it to `output_path` as a mono 16-bit WAV.
///
/// Any file already at `output_path` is removed first, so a half-written
/// leftover is never mistaken for a finished chapter. Returns `false`, and
/// leaves no file, when the engine produced no audio.
pub fn write_chapter(
    engine: &dyn SpeechEngine,
    text: &str,
    voice: &Voice,
    speed: f32,
    output_path: &Path,
    split_pattern: &str,
) -> Result<bool> {
    if output_path.exists() {
        fs::remove_file(output_path)?;
    }

    let chunks = engine.synthesize(text, voice, speed, split_pattern)?;
    if chunks.is_empty() {
        debug!(path = %output_path.display(), "No audio produced");
        return Ok(false);
    }

    let samples = concat(chunks);
    write_wav(output_path, &samples)?;
    info!(
        path = %output_path.display(),
        seconds = samples.len() as f32 / SAMPLE_RATE as f32,
        "Chapter written"
    );
    Ok(true)
}

/// Join chunks into one buffer.
pub fn concat(chunks: Vec<AudioChunk>) -> AudioChunk {
    let total = chunks.iter().map(Vec::len).sum();
    let mut samples = Vec::with_capacity(total);
    for chunk in chunks {
        samples.extend(chunk);
    }
    samples
}

pub fn wav_spec() -> WavSpec {
    WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    }
}

/// Write `f32` samples in [-1, 1] as 16-bit PCM.
pub fn write_wav(path: &Path, samples: &[f32]) -> Result<()> {
    let mut writer = WavWriter::create(path, wav_spec())?;
    for &sample in samples {
        let scaled = (sample.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16;
        writer.write_sample(scaled)?;
    }
    writer.finalize()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tts::split_segments;

    /// One chunk of `len` samples per segment.
    struct FakeEngine;

    impl SpeechEngine for FakeEngine {
        fn synthesize(
            &self,
            text: &str,
            _voice: &Voice,
            _speed: f32,
            split_pattern: &str,
        ) -> Result<Vec<AudioChunk>> {
            Ok(split_segments(text, split_pattern)?
                .into_iter()
                .map(|segment| vec![0.5; segment.len()])
                .collect())
        }
    }

    fn voice() -> Voice {
        Voice::new("af_heart").unwrap()
    }

    #[test]
    fn empty_text_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("book_chapter_1.wav");
        let written = write_chapter(&FakeEngine, "", &voice(), 1.0, &path, r"\n\n\n").unwrap();
        assert!(!written);
        assert!(!path.exists());
    }

    #[test]
    fn stale_file_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("book_chapter_1.wav");
        fs::write(&path, b"partial").unwrap();

        assert!(!write_chapter(&FakeEngine, "  ", &voice(), 1.0, &path, "").unwrap());
        assert!(!path.exists());

        assert!(write_chapter(&FakeEngine, "abc\n\n\ndefg", &voice(), 1.0, &path, r"\n\n\n").unwrap());
        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().sample_rate, SAMPLE_RATE);
        assert_eq!(reader.spec().channels, 1);
        assert_eq!(reader.len(), 7);
    }

    #[test]
    fn concat_preserves_order() {
        assert_eq!(concat(vec![vec![1.0], vec![2.0, 3.0], vec![]]), vec![1.0, 2.0, 3.0]);
    }
}
