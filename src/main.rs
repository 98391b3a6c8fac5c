use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use autiobooks::convert::{ChapterStatus, Converter, Job, Progress, Speed};
use autiobooks::epub::Book;
use autiobooks::package::OutputFormat;
use autiobooks::select;
use autiobooks::tts::{CommandEngine, Device};
use autiobooks::voices::{self, Voice};
use autiobooks::Config;

const README: &str = include_str!("../README.md");
const DEFAULT_LOG_FILTER: &str = "autiobooks=info";

#[derive(Parser, Debug)]
#[command(name = "autiobooks", version, disable_help_flag = true)]
struct Cli {
    /// Print the README and exit
    #[arg(short = 'h', long)]
    help: bool,

    /// Settings file (JSON)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Convert an EPUB into an audiobook
    Convert(ConvertArgs),
    /// List the chapters of an EPUB
    Chapters {
        epub: PathBuf,
    },
    /// List the available voices
    Voices,
}

#[derive(Args, Debug)]
struct ConvertArgs {
    epub: PathBuf,

    /// Voice identifier, e.g. af_heart
    #[arg(long)]
    voice: Option<String>,

    /// Reading speed between 0.5 and 2.0
    #[arg(long, default_value = "1.0", value_parser = parse_speed)]
    speed: Speed,

    /// Use the GPU when one is available
    #[arg(long)]
    gpu: bool,

    /// m4b, mp3 or wav
    #[arg(long, value_parser = parse_format)]
    format: Option<OutputFormat>,

    /// Where to write the audio (defaults to the EPUB's folder)
    #[arg(long, value_name = "DIR")]
    output_dir: Option<PathBuf>,

    /// auto, all, or 1-based numbers such as 1,3,5
    #[arg(long, default_value = "auto", value_parser = parse_chapters)]
    chapters: ChapterChoice,
}

#[derive(Debug, Clone, PartialEq)]
enum ChapterChoice {
    Auto,
    All,
    Numbers(Vec<usize>),
}

fn parse_speed(value: &str) -> std::result::Result<Speed, String> {
    Speed::parse(value).map_err(|e| e.to_string())
}

fn parse_format(value: &str) -> std::result::Result<OutputFormat, String> {
    value.parse()
}

fn parse_chapters(value: &str) -> std::result::Result<ChapterChoice, String> {
    match value.trim() {
        "auto" => Ok(ChapterChoice::Auto),
        "all" => Ok(ChapterChoice::All),
        list => list
            .split(',')
            .map(|n| {
                n.trim()
                    .parse::<usize>()
                    .map_err(|_| format!("{n:?} is not a chapter number"))
            })
            .collect::<std::result::Result<Vec<_>, _>>()
            .map(ChapterChoice::Numbers),
    }
}

/// Drives an indicatif bar from pipeline steps.
struct BarProgress {
    bar: ProgressBar,
}

impl BarProgress {
    fn new() -> Result<Self> {
        let bar = ProgressBar::new(1);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos:>3}/{len:3} {msg}")?
                .progress_chars("█▉▊▋▌▍▎▏  "),
        );
        Ok(Self { bar })
    }
}

impl Progress for BarProgress {
    fn step(&self, label: &str, current: usize, total: usize) {
        self.bar.set_length(total as u64);
        self.bar.set_position(current as u64);
        self.bar.set_message(label.to_string());
    }

    fn note(&self, message: &str) {
        self.bar.println(format!("⚠️  {message}"));
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    if cli.help {
        print!("{README}");
        return Ok(());
    }

    let Some(command) = cli.command else {
        return launch_gui(cli.config.as_deref());
    };

    init_tracing();
    let config = Config::discover(cli.config.as_deref());
    match command {
        Command::Convert(args) => convert(args, &config),
        Command::Chapters { epub } => list_chapters(&epub),
        Command::Voices => {
            list_voices();
            Ok(())
        }
    }
}

#[cfg(feature = "gui")]
fn launch_gui(config: Option<&Path>) -> Result<()> {
    autiobooks::gui::run(config)
}

#[cfg(not(feature = "gui"))]
fn launch_gui(_config: Option<&Path>) -> Result<()> {
    print!("{README}");
    Ok(())
}

fn convert(args: ConvertArgs, config: &Config) -> Result<()> {
    let started = Instant::now();
    println!("📖 Loading {}...", args.epub.display());
    let book = Book::open(&args.epub)
        .with_context(|| format!("Failed to open {}", args.epub.display()))?;
    let all = book.chapters();
    if all.is_empty() {
        bail!("{} has no readable chapters", args.epub.display());
    }

    let chosen = match &args.chapters {
        ChapterChoice::All => all.clone(),
        ChapterChoice::Auto => select::heuristic(&all).chapters,
        ChapterChoice::Numbers(numbers) => select::by_index(numbers, &all)?.chapters,
    };
    println!("✅ {} of {} chapters selected", chosen.len(), all.len());

    let voice_label = args.voice.as_deref().unwrap_or(&config.default_voice);
    let voice = Voice::from_display(voice_label)?;

    let mut job = Job::for_epub(&args.epub, voice);
    job.speed = args.speed;
    job.gpu = args.gpu;
    job.format = args.format.unwrap_or(config.default_format);
    job.chapters = chosen;
    if let Some(dir) = args.output_dir {
        job.output_dir = dir;
    }

    let engine = CommandEngine::from_config(&config.tts, Device::select(job.gpu))?;
    if !engine.is_available() {
        warn!(program = %config.tts.program.display(), "Speech engine could not be started");
    }
    let converter = Converter::new(&engine, config);

    println!("🎤 Reading with {} at {}x on {}...", job.voice.display(), job.speed, engine.device());
    let progress = BarProgress::new()?;
    let outcome = converter.run(&job, &book, &all, &progress)?;
    progress.bar.finish_and_clear();

    let reused = outcome.numbers(ChapterStatus::Reused);
    if !reused.is_empty() {
        println!("♻️  Reused existing audio for chapter(s) {reused:?}");
    }
    let skipped = outcome.numbers(ChapterStatus::Skipped);
    if !skipped.is_empty() {
        println!("⏭️  Skipped near-empty chapter(s) {skipped:?}");
    }

    match &outcome.package {
        Some(report) => {
            for failure in &report.failures {
                println!("❌ Chapter {}: {}", failure.chapter, failure.error);
            }
            println!("📝 Chapter markers: {}", report.metadata_file.display());
            println!("📁 Audiobook saved to: {}", report.output.display());
        }
        None => println!(
            "📁 {} chapter WAV file(s) saved to: {}",
            outcome.wav_files.len(),
            job.output_dir.display()
        ),
    }
    println!("✅ Conversion completed in {:.2?}", started.elapsed());
    Ok(())
}

fn list_chapters(epub: &Path) -> Result<()> {
    let book = Book::open(epub).with_context(|| format!("Failed to open {}", epub.display()))?;
    let chapters = book.chapters();
    let picked = select::heuristic(&chapters);

    println!("{} by {}", book.title, book.author());
    for (i, chapter) in chapters.iter().enumerate() {
        let mark = if !picked.defaulted
            && picked.chapters.iter().any(|c| c.file_name == chapter.file_name)
        {
            "*"
        } else {
            " "
        };
        println!("{mark} {:>3}  {:>7} words  {}", i + 1, chapter.word_count(), chapter.file_name);
    }
    if picked.defaulted {
        println!("No chapter-like file names; `--chapters auto` will read everything.");
    } else {
        println!("* picked by `--chapters auto`");
    }
    Ok(())
}

fn list_voices() {
    for voice in voices::VOICES {
        let tag = voices::Language::from_voice(voice)
            .map(|language| language.tag())
            .unwrap_or("?");
        println!("{:<24} {}", voices::emojify(voice), tag);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chapter_choices() {
        assert_eq!(parse_chapters("auto").unwrap(), ChapterChoice::Auto);
        assert_eq!(parse_chapters("all").unwrap(), ChapterChoice::All);
        assert_eq!(parse_chapters("1, 3,5").unwrap(), ChapterChoice::Numbers(vec![1, 3, 5]));
        assert!(parse_chapters("1,x").is_err());
    }

    #[test]
    fn cli_parses_convert() {
        let cli = Cli::try_parse_from([
            "autiobooks", "convert", "book.epub", "--speed", "1.5", "--format", "mp3", "--gpu",
        ])
        .unwrap();
        let Some(Command::Convert(args)) = cli.command else {
            panic!("expected convert");
        };
        assert_eq!(args.speed.value(), 1.5);
        assert_eq!(args.format, Some(OutputFormat::Mp3));
        assert!(args.gpu);
        assert_eq!(args.chapters, ChapterChoice::Auto);
    }

    #[test]
    fn cli_rejects_bad_speed() {
        assert!(Cli::try_parse_from(["autiobooks", "convert", "b.epub", "--speed", "3"]).is_err());
    }

    #[test]
    fn help_flag_is_ours() {
        let cli = Cli::try_parse_from(["autiobooks", "--help"]).unwrap();
        assert!(cli.help);
    }
}
