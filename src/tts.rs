//! Speech synthesis.
//!
//! The engine itself is an external program. [`CommandEngine`] feeds it one
//! text segment at a time on stdin and reads a WAV back from stdout, the same
//! way espeak-style tools are driven.

use encoding_rs::Encoding;
use regex::Regex;
use std::fmt;
use std::io::{Cursor, Write};
use std::process::{Command, Stdio};
use tracing::{debug, info, warn};

use crate::config::TtsConfig;
use crate::error::{Error, Result};
use crate::voices::Voice;

/// Every voice is rendered at this rate.
pub const SAMPLE_RATE: u32 = 24_000;

/// Mono `f32` samples at [`SAMPLE_RATE`].
pub type AudioChunk = Vec<f32>;

/// Split pattern that keeps the whole text in one segment.
pub const NO_SPLIT: &str = "";

/// Anything that can turn text into audio.
pub trait SpeechEngine: Send + Sync {
    /// Synthesize `text`, segmenting it with `split_pattern` first. Returns one
    /// chunk per non-blank segment; empty text yields no chunks.
    fn synthesize(
        &self,
        text: &str,
        voice: &Voice,
        speed: f32,
        split_pattern: &str,
    ) -> Result<Vec<AudioChunk>>;
}

/// Compute backend handed to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    Cpu,
    Cuda,
}

impl Device {
    /// Resolve the session's device once. Asking for the GPU on a machine
    /// without one falls back to the CPU instead of failing.
    pub fn select(gpu_requested: bool) -> Self {
        Self::resolve(gpu_requested, gpu_available())
    }

    pub fn resolve(gpu_requested: bool, gpu_available: bool) -> Self {
        match (gpu_requested, gpu_available) {
            (true, true) => {
                info!("CUDA GPU available");
                Device::Cuda
            }
            (true, false) => {
                warn!("CUDA GPU not available. Defaulting to CPU");
                Device::Cpu
            }
            (false, _) => Device::Cpu,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Device::Cpu => "cpu",
            Device::Cuda => "cuda",
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a CUDA device is usable.
pub fn gpu_available() -> bool {
    Command::new("nvidia-smi")
        .arg("-L")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

/// Break text into the segments that are synthesized one by one. Blank
/// segments are dropped; an empty pattern means no splitting.
pub fn split_segments<'a>(text: &'a str, split_pattern: &str) -> Result<Vec<&'a str>> {
    if split_pattern.is_empty() {
        return Ok(if text.trim().is_empty() { Vec::new() } else { vec![text] });
    }
    let splitter = Regex::new(split_pattern)?;
    Ok(splitter
        .split(text)
        .filter(|segment| !segment.trim().is_empty())
        .collect())
}

/// Drives an external Kokoro-style command.
pub struct CommandEngine {
    config: TtsConfig,
    device: Device,
    encoding: &'static Encoding,
}

impl CommandEngine {
    pub fn new(config: TtsConfig, device: Device, encoding: &'static Encoding) -> Self {
        Self {
            config,
            device,
            encoding,
        }
    }

    /// Build from config, resolving the text encoding label.
    pub fn from_config(config: &TtsConfig, device: Device) -> Result<Self> {
        let encoding = Encoding::for_label(config.encoding.as_bytes())
            .ok_or_else(|| Error::Config(format!("unknown text encoding {:?}", config.encoding)))?;
        Ok(Self::new(config.clone(), device, encoding))
    }

    pub fn device(&self) -> Device {
        self.device
    }

    /// Whether the configured program can be started at all.
    pub fn is_available(&self) -> bool {
        Command::new(&self.config.program)
            .arg("--help")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .is_ok()
    }

    fn args(&self, voice: &Voice, speed: f32) -> Vec<String> {
        let speed = speed.to_string();
        self.config
            .args
            .iter()
            .map(|arg| {
                arg.replace("{voice}", voice.id())
                    .replace("{speed}", &speed)
                    .replace("{lang}", voice.lang_code())
                    .replace("{device}", self.device.as_str())
            })
            .collect()
    }

    fn run(&self, segment: &str, voice: &Voice, speed: f32) -> Result<AudioChunk> {
        let (encoded, _, unmappable) = self.encoding.encode(segment);
        if unmappable {
            debug!(encoding = self.encoding.name(), "Some characters were not representable");
        }

        let mut child = Command::new(&self.config.program)
            .args(self.args(voice, speed))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                Error::Synthesis(format!("cannot start {}: {e}", self.config.program.display()))
            })?;

        // Feed stdin from a separate thread so a chatty engine cannot fill the
        // stdout pipe while we are still writing.
        let feeder = child.stdin.take().map(|mut stdin| {
            let encoded = encoded.into_owned();
            std::thread::spawn(move || stdin.write_all(&encoded))
        });

        let output = child.wait_with_output()?;
        if let Some(feeder) = feeder {
            feeder
                .join()
                .map_err(|_| Error::Synthesis("stdin writer panicked".into()))??;
        }
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Synthesis(format!(
                "{} exited with {}: {}",
                self.config.program.display(),
                output.status,
                stderr.trim()
            )));
        }

        decode_wav(&output.stdout)
    }
}

impl SpeechEngine for CommandEngine {
    fn synthesize(
        &self,
        text: &str,
        voice: &Voice,
        speed: f32,
        split_pattern: &str,
    ) -> Result<Vec<AudioChunk>> {
        let segments = split_segments(text, split_pattern)?;
        debug!(segments = segments.len(), voice = %voice, speed, "Synthesizing");
        segments
            .into_iter()
            .map(|segment| self.run(segment, voice, speed))
            .collect()
    }
}

/// Decode a mono WAV into `f32` samples.
pub fn decode_wav(bytes: &[u8]) -> Result<AudioChunk> {
    let mut reader = hound::WavReader::new(Cursor::new(bytes))?;
    let spec = reader.spec();
    if spec.sample_rate != SAMPLE_RATE {
        warn!(
            sample_rate = spec.sample_rate,
            expected = SAMPLE_RATE,
            "Engine returned an unexpected sample rate"
        );
    }

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader.samples::<f32>().collect::<std::result::Result<_, _>>()?,
        hound::SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<_, _>>()?
        }
    };

    // Keep the first channel only.
    let channels = spec.channels.max(1) as usize;
    Ok(samples.into_iter().step_by(channels).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_on_pattern_drops_blank_segments() {
        let text = "One.\n\n\nTwo.\n\n\n   \n\n\nThree.";
        assert_eq!(split_segments(text, r"\n\n\n").unwrap(), ["One.", "Two.", "Three."]);
    }

    #[test]
    fn empty_pattern_keeps_one_segment() {
        assert_eq!(split_segments("a\n\nb", NO_SPLIT).unwrap(), ["a\n\nb"]);
        assert!(split_segments("  \n", NO_SPLIT).unwrap().is_empty());
        assert!(split_segments("", r"\n+").unwrap().is_empty());
    }

    #[test]
    fn bad_pattern_is_reported() {
        assert!(split_segments("text", "(").is_err());
    }

    #[test]
    fn device_fallback() {
        assert_eq!(Device::resolve(true, true), Device::Cuda);
        assert_eq!(Device::resolve(true, false), Device::Cpu);
        assert_eq!(Device::resolve(false, true), Device::Cpu);
    }

    #[test]
    fn argument_template() {
        let engine = CommandEngine::new(TtsConfig::default(), Device::Cuda, encoding_rs::UTF_8);
        let voice = Voice::new("bf_emma").unwrap();
        let args = engine.args(&voice, 1.25);
        assert_eq!(
            args,
            [
                "--voice", "bf_emma", "--speed", "1.25", "--lang", "b", "--device", "cuda",
                "--stdin", "--stdout"
            ]
        );
    }

    #[test]
    fn decodes_int_wav() {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: SAMPLE_RATE,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            writer.write_sample(i16::MAX).unwrap();
            writer.write_sample(0i16).unwrap();
            writer.write_sample(i16::MIN).unwrap();
            writer.finalize().unwrap();
        }
        let samples = decode_wav(cursor.get_ref()).unwrap();
        assert_eq!(samples.len(), 3);
        assert!((samples[0] - 1.0).abs() < 1e-3);
        assert_eq!(samples[1], 0.0);
        assert!((samples[2] + 1.0).abs() < 1e-3);
    }
}
