//! Runtime configuration.
//!
//! Settings live in a small JSON file. Every field has a default, so a partial
//! file (or no file at all) is fine. Lookup order is an explicit path, then
//! `$AUTIOBOOKS_CONFIG`, then `./autiobooks.json`.

use crate::error::{Error, Result};
use crate::package::OutputFormat;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const CONFIG_ENV: &str = "AUTIOBOOKS_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "autiobooks.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub tts: TtsConfig,
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
    /// Bitrate handed to the chapter encoder, e.g. `64k`.
    pub bitrate: String,
    /// Upper bound on concurrent transcodes.
    pub workers: usize,
    /// Chapters whose trimmed text is shorter than this are not read.
    pub min_chapter_chars: usize,
    /// Regex used to segment full chapters before synthesis.
    pub split_pattern: String,
    pub default_voice: String,
    pub default_format: OutputFormat,
}

/// How to reach the external speech engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TtsConfig {
    pub program: PathBuf,
    /// Argument template. `{voice}`, `{speed}`, `{lang}` and `{device}` are
    /// substituted per call.
    pub args: Vec<String>,
    /// Encoding label for text written to the engine, e.g. `utf-8`.
    pub encoding: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tts: TtsConfig::default(),
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
            bitrate: "64k".to_string(),
            workers: num_cpus::get(),
            min_chapter_chars: 10,
            split_pattern: r"\n\n\n".to_string(),
            default_voice: "af_heart".to_string(),
            default_format: OutputFormat::M4b,
        }
    }
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("kokoro"),
            args: [
                "--voice", "{voice}", "--speed", "{speed}", "--lang", "{lang}", "--device",
                "{device}", "--stdin", "--stdout",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            encoding: "utf-8".to_string(),
        }
    }
}

impl Config {
    /// Resolve the config location and load it, falling back to defaults on
    /// any error.
    pub fn discover(explicit: Option<&Path>) -> Self {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => match std::env::var_os(CONFIG_ENV) {
                Some(value) => PathBuf::from(value),
                None => PathBuf::from(DEFAULT_CONFIG_FILE),
            },
        };

        if explicit.is_none() && !path.exists() {
            debug!(path = %path.display(), "No config file, using defaults");
            return Self::default();
        }

        match Self::load(&path) {
            Ok(config) => {
                info!(path = %path.display(), "Loaded config");
                config
            }
            Err(err) => {
                warn!(path = %path.display(), "Falling back to default config: {err}");
                Self::default()
            }
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let config: Config =
            serde_json::from_str(contents).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::Config("workers must be at least 1".into()));
        }
        if encoding_rs::Encoding::for_label(self.tts.encoding.as_bytes()).is_none() {
            return Err(Error::Config(format!(
                "unknown text encoding {:?}",
                self.tts.encoding
            )));
        }
        regex::Regex::new(&self.split_pattern)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let config = Config::parse(r#"{ "bitrate": "96k", "tts": { "program": "kokoro-tts" } }"#)
            .unwrap();
        assert_eq!(config.bitrate, "96k");
        assert_eq!(config.tts.program, PathBuf::from("kokoro-tts"));
        assert_eq!(config.tts.encoding, "utf-8");
        assert_eq!(config.min_chapter_chars, 10);
        assert_eq!(config.ffmpeg, PathBuf::from("ffmpeg"));
    }

    #[test]
    fn json_round_trip() {
        let config = Config::default();
        let json = config.to_json().unwrap();
        assert_eq!(Config::parse(&json).unwrap(), config);
    }

    #[test]
    fn rejects_zero_workers_and_bad_encoding() {
        assert!(Config::parse(r#"{ "workers": 0 }"#).is_err());
        assert!(Config::parse(r#"{ "tts": { "encoding": "klingon-8" } }"#).is_err());
    }

    #[test]
    fn missing_explicit_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::discover(Some(&dir.path().join("nope.json")));
        assert_eq!(config, Config::default());
    }
}
