//! Packaging chapter WAVs into one audiobook with ffmpeg.
//!
//! Chapters are transcoded in parallel, durations are read to build chapter
//! markers, and a final stream-copy concatenation muxes audio, markers, and
//! cover art into the output container.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::str::FromStr;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    M4b,
    Mp3,
    Wav,
}

impl OutputFormat {
    pub const ALL: [OutputFormat; 3] = [OutputFormat::M4b, OutputFormat::Mp3, OutputFormat::Wav];

    pub fn as_str(self) -> &'static str {
        match self {
            OutputFormat::M4b => "m4b",
            OutputFormat::Mp3 => "mp3",
            OutputFormat::Wav => "wav",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            OutputFormat::M4b => "M4B audiobook (.m4b)",
            OutputFormat::Mp3 => "MP3 (.mp3)",
            OutputFormat::Wav => "WAV per chapter (.wav)",
        }
    }

    /// Whether the format needs ffmpeg.
    pub fn needs_media_tools(self) -> bool {
        !matches!(self, OutputFormat::Wav)
    }

    /// Codec and file extension for transcoded chapters.
    fn chapter_codec(self) -> Option<(&'static str, &'static str)> {
        match self {
            OutputFormat::M4b => Some(("aac", "m4a")),
            OutputFormat::Mp3 => Some(("libmp3lame", "mp3")),
            OutputFormat::Wav => None,
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "m4b" => Ok(OutputFormat::M4b),
            "mp3" => Ok(OutputFormat::Mp3),
            "wav" => Ok(OutputFormat::Wav),
            other => Err(format!("unknown output format {other:?} (expected m4b, mp3 or wav)")),
        }
    }
}

/// A chapter span in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterMarker {
    pub start: u64,
    pub end: u64,
    pub title: String,
}

/// Lay chapters end to end: each one starts where the previous ended.
pub fn chapter_markers(durations_ms: &[u64]) -> Vec<ChapterMarker> {
    let mut start = 0u64;
    durations_ms
        .iter()
        .enumerate()
        .map(|(i, &duration)| {
            let end = start + duration;
            let marker = ChapterMarker {
                start,
                end,
                title: format!("Chapter {}", i + 1),
            };
            start = end;
            marker
        })
        .collect()
}

/// Escape a value for ffmpeg's metadata format.
fn escape_metadata(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '=' | ';' | '#' | '\\' | '\n') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Render an `;FFMETADATA1` document with one block per chapter.
pub fn render_ffmetadata(title: &str, artist: &str, markers: &[ChapterMarker]) -> String {
    let mut out = format!(
        ";FFMETADATA1\ntitle={}\nartist={}\n\n",
        escape_metadata(title),
        escape_metadata(artist)
    );
    for marker in markers {
        out.push_str(&format!(
            "[CHAPTER]\nTIMEBASE=1/1000\nSTART={}\nEND={}\ntitle={}\n\n",
            marker.start,
            marker.end,
            escape_metadata(&marker.title)
        ));
    }
    out
}

/// Render a concat-demuxer list.
pub fn render_concat_list(files: &[PathBuf]) -> String {
    let mut out = String::new();
    for file in files {
        let path = file.to_string_lossy().replace('\'', r"'\''");
        out.push_str(&format!("file '{}'\n", path));
    }
    out
}

/// Pull the first floating-point number out of ffprobe output.
pub fn parse_duration_ms(output: &str) -> Option<u64> {
    let seconds: f64 = output.trim().lines().next()?.trim().parse().ok()?;
    if !seconds.is_finite() || seconds < 0.0 {
        return None;
    }
    Some((seconds * 1000.0) as u64)
}

/// A chapter left out of the package, either because transcoding failed or
/// because its duration could not be read.
#[derive(Debug)]
pub struct TranscodeFailure {
    /// 1-based position in the package.
    pub chapter: usize,
    pub error: Error,
}

/// What the packager produced.
#[derive(Debug)]
pub struct PackageReport {
    pub output: PathBuf,
    pub metadata_file: PathBuf,
    pub chapters: usize,
    pub failures: Vec<TranscodeFailure>,
    pub missing: Vec<PathBuf>,
}

/// Everything the final container needs.
pub struct PackageRequest<'a> {
    pub chapter_files: &'a [PathBuf],
    pub title: &'a str,
    pub author: &'a str,
    pub cover: Option<&'a [u8]>,
    pub format: OutputFormat,
    /// Output path without extension, e.g. `out/book`.
    pub base: &'a Path,
}

/// ffmpeg and ffprobe, plus encoding settings.
#[derive(Debug, Clone)]
pub struct MediaTools {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
    pub bitrate: String,
    pub workers: usize,
}

impl MediaTools {
    pub fn from_config(config: &Config) -> Self {
        Self {
            ffmpeg: config.ffmpeg.clone(),
            ffprobe: config.ffprobe.clone(),
            bitrate: config.bitrate.clone(),
            workers: config.workers.max(1),
        }
    }

    /// Whether both tools start.
    pub fn available(&self) -> bool {
        tool_runs(&self.ffmpeg) && tool_runs(&self.ffprobe)
    }

    /// Transcode one WAV to the chapter codec.
    pub fn transcode(&self, input: &Path, output: &Path, format: OutputFormat) -> Result<()> {
        let Some((codec, _)) = format.chapter_codec() else {
            return Ok(());
        };
        let result = Command::new(&self.ffmpeg)
            .arg("-y")
            .arg("-loglevel")
            .arg("error")
            .arg("-i")
            .arg(input)
            .arg("-c:a")
            .arg(codec)
            .arg("-b:a")
            .arg(&self.bitrate)
            .arg(output)
            .stdin(Stdio::null())
            .output()?;

        if !result.status.success() {
            return Err(tool_error("ffmpeg", input, &result.stderr));
        }
        debug!(input = %input.display(), output = %output.display(), "Transcoded chapter");
        Ok(())
    }

    /// Transcode every file on a bounded pool. Failures are collected, not
    /// short-circuited, so one bad chapter does not sink the rest.
    ///
    /// Outputs come back paired with their 1-based chapter number.
    pub fn transcode_all(
        &self,
        inputs: &[PathBuf],
        out_dir: &Path,
        format: OutputFormat,
    ) -> Result<(Vec<(usize, PathBuf)>, Vec<TranscodeFailure>)> {
        let Some((_, extension)) = format.chapter_codec() else {
            let outputs = inputs.iter().cloned().enumerate().map(|(i, p)| (i + 1, p));
            return Ok((outputs.collect(), Vec::new()));
        };

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .build()
            .map_err(|e| Error::Synthesis(format!("cannot build worker pool: {e}")))?;

        let results: Vec<(usize, PathBuf, Result<()>)> = pool.install(|| {
            inputs
                .par_iter()
                .enumerate()
                .map(|(i, input)| {
                    let stem = input
                        .file_stem()
                        .map(|s| s.to_string_lossy().into_owned())
                        .unwrap_or_else(|| format!("chapter_{}", i + 1));
                    let output = out_dir.join(format!("{stem}.{extension}"));
                    let result = self.transcode(input, &output, format);
                    (i, output, result)
                })
                .collect()
        });

        let mut transcoded = Vec::with_capacity(results.len());
        let mut failures = Vec::new();
        for (i, output, result) in results {
            match result {
                Ok(()) => transcoded.push((i + 1, output)),
                Err(error) => {
                    warn!(chapter = i + 1, "Transcoding failed: {error}");
                    failures.push(TranscodeFailure {
                        chapter: i + 1,
                        error,
                    });
                }
            }
        }
        Ok((transcoded, failures))
    }

    /// Duration of a media file in whole milliseconds.
    pub fn probe_duration_ms(&self, file: &Path) -> Result<u64> {
        let result = Command::new(&self.ffprobe)
            .arg("-i")
            .arg(file)
            .args(["-show_entries", "format=duration", "-v", "quiet"])
            .args(["-of", "default=noprint_wrappers=1:nokey=1"])
            .stdin(Stdio::null())
            .output()?;

        if !result.status.success() {
            return Err(tool_error("ffprobe", file, &result.stderr));
        }
        let stdout = String::from_utf8_lossy(&result.stdout);
        parse_duration_ms(&stdout).ok_or_else(|| Error::Tool {
            tool: "ffprobe".into(),
            path: file.to_path_buf(),
            message: format!("unexpected duration output {:?}", stdout.trim()),
        })
    }

    /// Transcode, write markers, and mux everything into one file.
    pub fn package(&self, request: &PackageRequest<'_>) -> Result<PackageReport> {
        let extension = request.format.as_str();
        let output = request.base.with_extension(extension);
        let metadata_file = sibling(request.base, "_chapters.txt");

        let workdir = tempfile::tempdir()?;
        info!(chapters = request.chapter_files.len(), format = extension, "Transcoding chapters");
        let (transcoded, mut failures) =
            self.transcode_all(request.chapter_files, workdir.path(), request.format)?;

        let mut present = Vec::with_capacity(transcoded.len());
        let mut durations = Vec::with_capacity(transcoded.len());
        let mut missing = Vec::new();
        for (chapter, file) in transcoded {
            if !file.exists() {
                warn!(path = %file.display(), "Missing file");
                missing.push(file);
                continue;
            }
            // A file without a duration cannot get a marker, so it is left out.
            match self.probe_duration_ms(&file) {
                Ok(duration) => {
                    present.push(file);
                    durations.push(duration);
                }
                Err(error) => {
                    warn!(chapter, "Reading duration failed: {error}");
                    failures.push(TranscodeFailure { chapter, error });
                }
            }
        }
        failures.sort_by_key(|failure| failure.chapter);

        let markers = chapter_markers(&durations);
        fs::write(
            &metadata_file,
            render_ffmetadata(request.title, request.author, &markers),
        )?;
        debug!(path = %metadata_file.display(), "Wrote chapter index");

        let concat_list = workdir.path().join("concat.txt");
        fs::write(&concat_list, render_concat_list(&present))?;

        let cover_file = match request.cover {
            Some(bytes) => {
                let path = workdir.path().join("cover");
                fs::write(&path, bytes)?;
                Some(path)
            }
            None => None,
        };

        info!(output = %output.display(), "Merging chapters");
        let mut command = Command::new(&self.ffmpeg);
        command
            .args(["-y", "-loglevel", "error"])
            .args(["-safe", "0", "-f", "concat", "-i"])
            .arg(&concat_list)
            .arg("-i")
            .arg(&metadata_file);
        if let Some(cover) = &cover_file {
            command.arg("-i").arg(cover);
        }
        command.args(["-map", "0:a", "-map_metadata", "1", "-map_chapters", "1"]);
        if cover_file.is_some() {
            command.args(["-map", "2:v", "-disposition:v", "attached_pic"]);
        }
        command.args(["-c", "copy"]);
        if request.format == OutputFormat::M4b {
            command.args(["-f", "mp4"]);
        }
        let result = command.arg(&output).stdin(Stdio::null()).output()?;

        if !result.status.success() {
            return Err(tool_error("ffmpeg", &output, &result.stderr));
        }

        info!(output = %output.display(), chapters = markers.len(), "Audiobook created");
        Ok(PackageReport {
            output,
            metadata_file,
            chapters: markers.len(),
            failures,
            missing,
        })
    }
}

/// `base` with `suffix` appended to its file name.
fn sibling(base: &Path, suffix: &str) -> PathBuf {
    let mut name = base
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(suffix);
    base.with_file_name(name)
}

fn tool_runs(program: &Path) -> bool {
    Command::new(program)
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

fn tool_error(tool: &str, path: &Path, stderr: &[u8]) -> Error {
    Error::Tool {
        tool: tool.to_string(),
        path: path.to_path_buf(),
        message: String::from_utf8_lossy(stderr).trim().to_string(),
    }
}
