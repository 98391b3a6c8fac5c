//! The conversion pipeline shared by the GUI and the command line.
//!
//! Chapters are synthesized one after another in selection order. A chapter
//! whose WAV is already on disk is reused, so an interrupted run picks up
//! where it stopped. Packaging runs last and is skipped (WAV-only output)
//! when ffmpeg is not around.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Instant;
use tracing::{info, warn};

use crate::audio;
use crate::config::Config;
use crate::epub::{Book, Chapter};
use crate::error::{Error, Result};
use crate::package::{MediaTools, OutputFormat, PackageReport, PackageRequest};
use crate::select::{self, Selection};
use crate::tts::SpeechEngine;
use crate::voices::Voice;

pub const MIN_SPEED: f32 = 0.5;
pub const MAX_SPEED: f32 = 2.0;

/// A reading speed multiplier known to be in range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Speed(f32);

impl Speed {
    pub fn new(value: f32) -> Result<Self> {
        if (MIN_SPEED..=MAX_SPEED).contains(&value) {
            Ok(Self(value))
        } else {
            Err(Error::InvalidSpeed(value.to_string()))
        }
    }

    pub fn parse(input: &str) -> Result<Self> {
        let value: f32 = input
            .trim()
            .parse()
            .map_err(|_| Error::InvalidSpeed(input.to_string()))?;
        Self::new(value).map_err(|_| Error::InvalidSpeed(input.to_string()))
    }

    pub fn value(self) -> f32 {
        self.0
    }
}

impl Default for Speed {
    fn default() -> Self {
        Self(1.0)
    }
}

impl fmt::Display for Speed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Speed {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// `book.epub` becomes `book`.
pub fn output_stem(epub_path: &Path) -> String {
    epub_path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "audiobook".to_string())
}

/// `<dir>/<stem>_chapter_<n>.wav`
pub fn chapter_path(output_dir: &Path, stem: &str, n: usize) -> PathBuf {
    output_dir.join(format!("{stem}_chapter_{n}.wav"))
}

/// Spoken before the first chapter.
pub fn intro(title: &str, author: &str) -> String {
    format!("{title} by {author}.\n")
}

/// Everything one run needs to know.
#[derive(Debug, Clone)]
pub struct Job {
    pub voice: Voice,
    pub speed: Speed,
    pub gpu: bool,
    pub format: OutputFormat,
    pub output_dir: PathBuf,
    /// Base name shared by every output file.
    pub stem: String,
    /// Chapters the user picked, in order. Empty means all of them.
    pub chapters: Vec<Chapter>,
}

impl Job {
    /// A job writing next to the EPUB with default settings.
    pub fn for_epub(epub_path: &Path, voice: Voice) -> Self {
        let output_dir = epub_path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Self {
            voice,
            speed: Speed::default(),
            gpu: false,
            format: OutputFormat::M4b,
            output_dir,
            stem: output_stem(epub_path),
            chapters: Vec::new(),
        }
    }

    pub fn chapter_path(&self, n: usize) -> PathBuf {
        chapter_path(&self.output_dir, &self.stem, n)
    }

    /// Output path without extension.
    pub fn base(&self) -> PathBuf {
        self.output_dir.join(&self.stem)
    }
}

/// Receives progress from a running conversion.
pub trait Progress {
    /// Step `current` of `total` has started.
    fn step(&self, label: &str, current: usize, total: usize);

    /// Something the user should be told about.
    fn note(&self, _message: &str) {}
}

/// Ignores everything.
pub struct Silent;

impl Progress for Silent {
    fn step(&self, _label: &str, _current: usize, _total: usize) {}
}

/// What happened to one chapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChapterStatus {
    Synthesized,
    /// Its WAV was already on disk.
    Reused,
    /// Too short to read.
    Skipped,
    /// The engine returned no audio.
    Empty,
}

#[derive(Debug)]
pub struct Outcome {
    /// Status per chapter, in selection order.
    pub chapters: Vec<ChapterStatus>,
    pub wav_files: Vec<PathBuf>,
    /// True when the empty selection was replaced by every chapter.
    pub defaulted: bool,
    /// `None` for WAV-only output.
    pub package: Option<PackageReport>,
}

impl Outcome {
    /// 1-based numbers of chapters with the given status.
    pub fn numbers(&self, status: ChapterStatus) -> Vec<usize> {
        self.chapters
            .iter()
            .enumerate()
            .filter(|(_, s)| **s == status)
            .map(|(i, _)| i + 1)
            .collect()
    }
}

/// Runs jobs against one engine and one set of settings.
pub struct Converter<'a> {
    engine: &'a dyn SpeechEngine,
    config: &'a Config,
    tools: Option<MediaTools>,
}

impl<'a> Converter<'a> {
    /// Checks for ffmpeg once. Its absence is not an error.
    pub fn new(engine: &'a dyn SpeechEngine, config: &'a Config) -> Self {
        let tools = MediaTools::from_config(config);
        let tools = if tools.available() {
            Some(tools)
        } else {
            warn!("ffmpeg not found. Please install ffmpeg to create mp3 and m4b audiobook files.");
            None
        };
        Self::with_tools(engine, config, tools)
    }

    pub fn with_tools(
        engine: &'a dyn SpeechEngine,
        config: &'a Config,
        tools: Option<MediaTools>,
    ) -> Self {
        Self {
            engine,
            config,
            tools,
        }
    }

    pub fn has_media_tools(&self) -> bool {
        self.tools.is_some()
    }

    /// Convert `job` for `book`. `all` is the full chapter list used when the
    /// job's selection is empty.
    pub fn run(
        &self,
        job: &Job,
        book: &Book,
        all: &[Chapter],
        progress: &dyn Progress,
    ) -> Result<Outcome> {
        let Selection {
            chapters,
            defaulted,
        } = select::explicit(job.chapters.clone(), all);
        if defaulted {
            progress.note("No chapters were selected, defaulting to all.");
        }

        fs::create_dir_all(&job.output_dir)?;

        let count = chapters.len();
        let steps = count + 2;
        let total_chars: usize = chapters.iter().map(|c| c.text.len()).sum();
        info!(
            chapters = count,
            chars = total_chars,
            voice = %job.voice,
            speed = job.speed.value(),
            "Starting conversion"
        );

        let mut statuses = Vec::with_capacity(count);
        let mut wav_files = Vec::new();
        for (i, chapter) in chapters.iter().enumerate() {
            let n = i + 1;
            progress.step(&format!("Converting chapter {n} of {count}"), n, steps);
            let path = job.chapter_path(n);

            if path.exists() {
                info!(chapter = n, "File for chapter already exists. Skipping");
                wav_files.push(path);
                statuses.push(ChapterStatus::Reused);
                continue;
            }
            if chapter.text.trim().chars().count() < self.config.min_chapter_chars {
                info!(chapter = n, "Skipping empty chapter");
                statuses.push(ChapterStatus::Skipped);
                continue;
            }

            let text = if n == 1 {
                format!("{}{}", intro(&book.title, book.author()), chapter.text)
            } else {
                chapter.text.clone()
            };

            let started = Instant::now();
            let written = audio::write_chapter(
                self.engine,
                &text,
                &job.voice,
                job.speed.value(),
                &path,
                &self.config.split_pattern,
            )?;
            let seconds = started.elapsed().as_secs_f32();
            info!(
                chapter = n,
                chars = text.len(),
                seconds,
                chars_per_sec = text.len() as f32 / seconds.max(f32::EPSILON),
                "Chapter read"
            );

            if written {
                wav_files.push(path);
                statuses.push(ChapterStatus::Synthesized);
            } else {
                statuses.push(ChapterStatus::Empty);
            }
        }

        if wav_files.is_empty() {
            return Err(Error::NothingConverted);
        }

        let package = match (&self.tools, job.format) {
            (_, OutputFormat::Wav) => None,
            (None, _) => {
                progress.note("ffmpeg not found, keeping the chapter WAV files only.");
                None
            }
            (Some(tools), format) => {
                progress.step("Creating index file", count + 1, steps);
                let request = PackageRequest {
                    chapter_files: &wav_files,
                    title: &book.title,
                    author: book.author(),
                    cover: book.cover_bytes(),
                    format,
                    base: &job.base(),
                };
                progress.step(&format!("Creating {} file", format.as_str()), steps, steps);
                let report = tools.package(&request)?;
                if !report.failures.is_empty() {
                    let failed: Vec<String> =
                        report.failures.iter().map(|f| f.chapter.to_string()).collect();
                    progress.note(&format!(
                        "Could not transcode chapter(s) {}; they were left out.",
                        failed.join(", ")
                    ));
                }
                Some(report)
            }
        };

        progress.step("Conversion complete", steps, steps);
        Ok(Outcome {
            chapters: statuses,
            wav_files,
            defaulted,
            package,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tts::{split_segments, AudioChunk};
    use proptest::prelude::*;
    use std::io::Cursor;
    use std::sync::Mutex;

    /// Records every text it is asked to read.
    #[derive(Default)]
    struct RecordingEngine {
        texts: Mutex<Vec<String>>,
    }

    impl SpeechEngine for RecordingEngine {
        fn synthesize(
            &self,
            text: &str,
            _voice: &Voice,
            _speed: f32,
            split_pattern: &str,
        ) -> Result<Vec<AudioChunk>> {
            self.texts.lock().unwrap().push(text.to_string());
            Ok(split_segments(text, split_pattern)?
                .into_iter()
                .map(|segment| vec![0.1; segment.len()])
                .collect())
        }
    }

    #[derive(Default)]
    struct Steps(Mutex<Vec<String>>);

    impl Progress for Steps {
        fn step(&self, label: &str, current: usize, total: usize) {
            self.0.lock().unwrap().push(format!("{current}/{total} {label}"));
        }

        fn note(&self, message: &str) {
            self.0.lock().unwrap().push(message.to_string());
        }
    }

    fn chapter(name: &str, text: &str) -> Chapter {
        Chapter {
            id: name.into(),
            file_name: name.into(),
            text: text.into(),
        }
    }

    fn book() -> Book {
        // Smallest valid package; only metadata matters here.
        let mut buffer = Cursor::new(Vec::new());
        {
            use std::io::Write;
            use zip::write::SimpleFileOptions;
            let mut zip = zip::ZipWriter::new(&mut buffer);
            let options = SimpleFileOptions::default();
            zip.start_file("META-INF/container.xml", options).unwrap();
            zip.write_all(
                br#"<?xml version="1.0"?>
<container xmlns="urn:oasis:names:tc:opendocument:xmlns:container" version="1.0">
  <rootfiles><rootfile full-path="content.opf" media-type="application/oebps-package+xml"/></rootfiles>
</container>"#,
            )
            .unwrap();
            zip.start_file("content.opf", options).unwrap();
            zip.write_all(
                br#"<?xml version="1.0"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:title>Moby Dick</dc:title><dc:creator>Herman Melville</dc:creator>
  </metadata>
  <manifest/>
  <spine/>
</package>"#,
            )
            .unwrap();
            zip.finish().unwrap();
        }
        buffer.set_position(0);
        Book::from_reader(buffer).unwrap()
    }

    fn job(dir: &Path, chapters: Vec<Chapter>) -> Job {
        let mut job = Job::for_epub(&dir.join("moby.epub"), Voice::new("af_heart").unwrap());
        job.format = OutputFormat::Wav;
        job.chapters = chapters;
        job
    }

    fn chapters() -> Vec<Chapter> {
        vec![
            chapter("ch1.xhtml", "Call me Ishmael."),
            chapter("ch2.xhtml", "Some years ago, never mind how long."),
            chapter("ch3.xhtml", "There now is your insular city."),
        ]
    }

    #[test]
    fn speed_bounds() {
        assert!(Speed::parse("0.5").is_ok());
        assert!(Speed::parse("2.0").is_ok());
        assert!(Speed::parse(" 1.25 ").is_ok());
        for bad in ["0.49", "2.01", "fast", "", "NaN", "inf", "-1"] {
            assert!(Speed::parse(bad).is_err(), "{bad} accepted");
        }
        assert!(Speed::new(f32::NAN).is_err());
    }

    proptest! {
        #[test]
        fn speed_accepts_exactly_the_range(value in -10.0f32..10.0) {
            prop_assert_eq!(Speed::new(value).is_ok(), (0.5..=2.0).contains(&value));
        }
    }

    #[test]
    fn names() {
        assert_eq!(output_stem(Path::new("/books/moby.epub")), "moby");
        assert_eq!(
            chapter_path(Path::new("out"), "moby", 3),
            PathBuf::from("out/moby_chapter_3.wav")
        );
        let job = Job::for_epub(Path::new("/books/moby.epub"), Voice::new("af_heart").unwrap());
        assert_eq!(job.output_dir, PathBuf::from("/books"));
        assert_eq!(job.base(), PathBuf::from("/books/moby"));
    }

    #[test]
    fn first_chapter_gets_the_intro() {
        let dir = tempfile::tempdir().unwrap();
        let engine = RecordingEngine::default();
        let config = Config::default();
        let converter = Converter::with_tools(&engine, &config, None);

        let outcome = converter
            .run(&job(dir.path(), chapters()), &book(), &chapters(), &Silent)
            .unwrap();

        let texts = engine.texts.lock().unwrap();
        assert_eq!(texts[0], "Moby Dick by Herman Melville.\nCall me Ishmael.");
        assert_eq!(texts[1], "Some years ago, never mind how long.");
        assert_eq!(outcome.numbers(ChapterStatus::Synthesized), [1, 2, 3]);
        assert!(outcome.package.is_none());
        assert!(dir.path().join("moby_chapter_3.wav").exists());
    }

    #[test]
    fn existing_chapter_is_not_resynthesized() {
        let dir = tempfile::tempdir().unwrap();
        let existing = dir.path().join("moby_chapter_2.wav");
        fs::write(&existing, b"already here").unwrap();

        let engine = RecordingEngine::default();
        let config = Config::default();
        let converter = Converter::with_tools(&engine, &config, None);
        let outcome = converter
            .run(&job(dir.path(), chapters()), &book(), &chapters(), &Silent)
            .unwrap();

        assert_eq!(engine.texts.lock().unwrap().len(), 2);
        assert_eq!(outcome.numbers(ChapterStatus::Synthesized), [1, 3]);
        assert_eq!(outcome.numbers(ChapterStatus::Reused), [2]);
        assert_eq!(fs::read(&existing).unwrap(), b"already here");
        assert_eq!(outcome.wav_files.len(), 3);
    }

    #[test]
    fn short_chapters_are_skipped_and_empty_selection_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let all = vec![chapter("a", "   tiny   "), chapter("b", "Long enough to be read aloud.")];
        let engine = RecordingEngine::default();
        let config = Config::default();
        let converter = Converter::with_tools(&engine, &config, None);
        let steps = Steps::default();

        let outcome = converter
            .run(&job(dir.path(), Vec::new()), &book(), &all, &steps)
            .unwrap();

        assert!(outcome.defaulted);
        assert_eq!(outcome.chapters, [ChapterStatus::Skipped, ChapterStatus::Synthesized]);
        let log = steps.0.lock().unwrap();
        assert_eq!(log[0], "No chapters were selected, defaulting to all.");
        assert_eq!(log[1], "1/4 Converting chapter 1 of 2");
        assert_eq!(log.last().unwrap(), "4/4 Conversion complete");
    }

    #[test]
    fn nothing_converted_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let all = vec![chapter("a", ""), chapter("b", "short")];
        let engine = RecordingEngine::default();
        let config = Config::default();
        let converter = Converter::with_tools(&engine, &config, None);

        let err = converter
            .run(&job(dir.path(), Vec::new()), &book(), &all, &Silent)
            .unwrap_err();
        assert!(matches!(err, Error::NothingConverted));
    }

    #[test]
    fn missing_tools_degrade_to_wav_only() {
        let dir = tempfile::tempdir().unwrap();
        let engine = RecordingEngine::default();
        let config = Config::default();
        let converter = Converter::with_tools(&engine, &config, None);
        let steps = Steps::default();
        let mut job = job(dir.path(), chapters());
        job.format = OutputFormat::M4b;

        let outcome = converter.run(&job, &book(), &chapters(), &steps).unwrap();
        assert!(outcome.package.is_none());
        assert_eq!(outcome.wav_files.len(), 3);
        assert!(steps
            .0
            .lock()
            .unwrap()
            .iter()
            .any(|line| line.starts_with("ffmpeg not found")));
    }
}
