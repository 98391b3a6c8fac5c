//! Background threads for conversions and previews.
//!
//! Workers never touch UI state. They report through [`WorkerEvent`]s and ask
//! egui for a repaint so the event is picked up on the next frame.

use egui::Context;
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{error, warn};

use crate::audio;
use crate::config::Config;
use crate::convert::{ChapterStatus, Converter, Job, Outcome, Progress};
use crate::epub::{Book, Chapter};
use crate::tts::{AudioChunk, CommandEngine, SpeechEngine, NO_SPLIT};
use crate::voices::Voice;

#[derive(Debug)]
pub enum WorkerEvent {
    Step {
        label: String,
        current: usize,
        total: usize,
    },
    Note(String),
    Finished(String),
    Failed(String),
    PreviewReady {
        request: u64,
        samples: AudioChunk,
    },
    PreviewFailed {
        request: u64,
        error: String,
    },
}

struct ChannelProgress {
    events: Sender<WorkerEvent>,
    ctx: Context,
}

impl ChannelProgress {
    fn send(&self, event: WorkerEvent) {
        // The receiver only goes away when the window closes.
        let _ = self.events.send(event);
        self.ctx.request_repaint();
    }
}

impl Progress for ChannelProgress {
    fn step(&self, label: &str, current: usize, total: usize) {
        self.send(WorkerEvent::Step {
            label: label.to_string(),
            current,
            total,
        });
    }

    fn note(&self, message: &str) {
        self.send(WorkerEvent::Note(message.to_string()));
    }
}

/// Everything a conversion thread takes ownership of.
pub struct ConversionTask {
    pub job: Job,
    pub book: Arc<Book>,
    pub all: Vec<Chapter>,
    pub config: Config,
    pub engine: CommandEngine,
}

pub fn spawn_conversion(
    task: ConversionTask,
    events: Sender<WorkerEvent>,
    ctx: Context,
) -> JoinHandle<()> {
    thread::spawn(move || {
        let progress = ChannelProgress { events, ctx };
        let converter = Converter::new(&task.engine, &task.config);
        let event = match converter.run(&task.job, &task.book, &task.all, &progress) {
            Ok(outcome) => WorkerEvent::Finished(summarize(&task.job, &outcome)),
            Err(err) => {
                error!("Conversion failed: {err}");
                WorkerEvent::Failed(err.to_string())
            }
        };
        progress.send(event);
    })
}

/// One status line for a finished run.
pub fn summarize(job: &Job, outcome: &Outcome) -> String {
    let mut summary = match &outcome.package {
        Some(report) => format!("Conversion complete: {}", report.output.display()),
        None => format!(
            "Conversion complete: {} WAV file(s) in {}",
            outcome.wav_files.len(),
            job.output_dir.display()
        ),
    };
    if let Some(report) = &outcome.package {
        if !report.failures.is_empty() {
            let failed: Vec<String> = report.failures.iter().map(|f| f.chapter.to_string()).collect();
            summary.push_str(&format!(" (chapter(s) {} failed)", failed.join(", ")));
        }
    }
    let reused = outcome.numbers(ChapterStatus::Reused).len();
    if reused > 0 {
        summary.push_str(&format!(", {reused} reused"));
    }
    summary
}

/// Synthesize a short preview with no splitting.
pub fn spawn_preview(
    engine: Arc<dyn SpeechEngine>,
    text: String,
    voice: Voice,
    speed: f32,
    request: u64,
    events: Sender<WorkerEvent>,
    ctx: Context,
) -> JoinHandle<()> {
    thread::spawn(move || {
        let event = match engine.synthesize(&text, &voice, speed, NO_SPLIT) {
            Ok(chunks) => WorkerEvent::PreviewReady {
                request,
                samples: audio::concat(chunks),
            },
            Err(err) => {
                warn!("Preview failed: {err}");
                WorkerEvent::PreviewFailed {
                    request,
                    error: err.to_string(),
                }
            }
        };
        let _ = events.send(event);
        ctx.request_repaint();
    })
}
