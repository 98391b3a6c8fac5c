//! Desktop front end.
//!
//! The app moves between three stages: nothing loaded, a book loaded, and a
//! conversion running. Long work happens on worker threads which report back
//! over a channel; everything on `self` is only touched from the UI thread.

mod log_pane;
mod preview;
mod worker;

use anyhow::anyhow;
use egui::{
    CentralPanel, Color32, ComboBox, ProgressBar, RichText, ScrollArea, TextEdit, TextureHandle,
    TextureOptions, TopBottomPanel,
};
use rfd::{FileDialog, MessageDialog, MessageLevel};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::Config;
use crate::convert::{Job, Speed};
use crate::epub::{cover, Book, Chapter};
use crate::package::{MediaTools, OutputFormat};
use crate::tts::{self, CommandEngine, Device};
use crate::voices::{self, Voice};
use log_pane::LogPane;
use preview::{Click, Preview};
use worker::{ConversionTask, WorkerEvent};

const DEFAULT_LOG_FILTER: &str = "autiobooks=info";

/// Install logging (terminal plus the output pane) and open the window.
pub fn run(config_path: Option<&Path>) -> anyhow::Result<()> {
    let pane = LogPane::new();
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(
            fmt::layer()
                .with_ansi(false)
                .with_target(false)
                .without_time()
                .with_writer(pane.clone()),
        )
        .init();

    let config = Config::discover(config_path);
    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1000.0, 900.0])
            .with_min_inner_size([640.0, 480.0]),
        ..Default::default()
    };

    eframe::run_native(
        "Autiobooks",
        options,
        Box::new(move |cc| Box::new(AutiobooksApp::new(cc, config, pane))),
    )
    .map_err(|e| anyhow!("GUI failed: {e}"))
}

/// What survives a restart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
struct Settings {
    voice: String,
    speed: String,
    gpu: bool,
    format: OutputFormat,
    /// `None` writes next to the EPUB.
    output_dir: Option<PathBuf>,
}

impl Settings {
    fn from_config(config: &Config) -> Self {
        Self {
            voice: config.default_voice.clone(),
            format: config.default_format,
            ..Self::default()
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            voice: "af_heart".to_string(),
            speed: "1.0".to_string(),
            gpu: false,
            format: OutputFormat::M4b,
            output_dir: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Idle,
    Loaded,
    Converting,
}

struct ChapterRow {
    chapter: Chapter,
    words: usize,
    preview: String,
    checked: bool,
}

struct LoadedBook {
    path: PathBuf,
    book: Arc<Book>,
    rows: Vec<ChapterRow>,
    cover: TextureHandle,
}

impl LoadedBook {
    fn chapters(&self) -> Vec<Chapter> {
        self.rows.iter().map(|row| row.chapter.clone()).collect()
    }

    fn checked(&self) -> Vec<Chapter> {
        self.rows
            .iter()
            .filter(|row| row.checked)
            .map(|row| row.chapter.clone())
            .collect()
    }
}

pub struct AutiobooksApp {
    config: Config,
    settings: Settings,
    gpu_available: bool,
    loaded: Option<LoadedBook>,
    placeholder: Option<TextureHandle>,
    preview: Preview,
    progress: f32,
    status: String,
    log: LogPane,
    events_tx: Sender<WorkerEvent>,
    events_rx: Receiver<WorkerEvent>,
    worker: Option<JoinHandle<()>>,
    startup_warning: Option<String>,
}

impl AutiobooksApp {
    fn new(cc: &eframe::CreationContext<'_>, config: Config, log: LogPane) -> Self {
        let settings = cc
            .storage
            .and_then(|storage| eframe::get_value(storage, eframe::APP_KEY))
            .unwrap_or_else(|| Settings::from_config(&config));

        let startup_warning = if MediaTools::from_config(&config).available() {
            None
        } else {
            warn!("ffmpeg not found");
            Some(
                "ffmpeg not found. Please install ffmpeg to create mp3 and m4b audiobook files. \
                 Chapters will be saved as WAV files only."
                    .to_string(),
            )
        };

        let (events_tx, events_rx) = mpsc::channel();
        Self {
            gpu_available: tts::gpu_available(),
            config,
            settings,
            loaded: None,
            placeholder: None,
            preview: Preview::new(),
            progress: 0.0,
            status: "---".to_string(),
            log,
            events_tx,
            events_rx,
            worker: None,
            startup_warning,
        }
    }

    fn stage(&self) -> Stage {
        match (&self.loaded, &self.worker) {
            (_, Some(_)) => Stage::Converting,
            (Some(_), None) => Stage::Loaded,
            (None, None) => Stage::Idle,
        }
    }

    fn speed(&self) -> Option<Speed> {
        Speed::parse(&self.settings.speed).ok()
    }

    fn device(&self) -> Device {
        Device::resolve(self.settings.gpu, self.gpu_available)
    }

    fn engine(&self) -> crate::Result<CommandEngine> {
        CommandEngine::from_config(&self.config.tts, self.device())
    }

    fn placeholder(&mut self, ctx: &egui::Context) -> TextureHandle {
        self.placeholder
            .get_or_insert_with(|| load_cover_texture(ctx, &cover::placeholder()))
            .clone()
    }

    fn handle_events(&mut self) {
        while let Ok(event) = self.events_rx.try_recv() {
            match event {
                WorkerEvent::Step {
                    label,
                    current,
                    total,
                } => {
                    self.progress = current as f32 / total.max(1) as f32;
                    self.status = label;
                }
                WorkerEvent::Note(message) => {
                    info!("{message}");
                    self.status = message;
                }
                WorkerEvent::Finished(summary) => {
                    self.finish_worker();
                    self.progress = 1.0;
                    self.status = summary;
                }
                WorkerEvent::Failed(message) => {
                    self.finish_worker();
                    self.status = message.clone();
                    show_dialog(MessageLevel::Error, "Error", &message);
                }
                WorkerEvent::PreviewReady { request, samples } => {
                    if let Err(err) = self.preview.ready(request, samples) {
                        warn!("Cannot play preview: {err}");
                    }
                }
                WorkerEvent::PreviewFailed { request, error } => {
                    self.preview.failed(request);
                    self.status = format!("Preview failed: {error}");
                }
            }
        }
    }

    fn finish_worker(&mut self) {
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                warn!("Conversion thread panicked");
            }
        }
    }

    fn select_file(&mut self, ctx: &egui::Context) {
        let Some(path) = FileDialog::new()
            .set_title("Select an epub file")
            .add_filter("epub files", &["epub"])
            .pick_file()
        else {
            return;
        };

        self.preview.stop();
        match Book::open(&path) {
            Ok(book) => self.loaded = Some(self.load_book(ctx, path, book)),
            Err(err) => {
                warn!(path = %path.display(), "Cannot open book: {err}");
                show_dialog(MessageLevel::Error, "Error", &format!("Cannot open {}: {err}", path.display()));
            }
        }
    }

    fn load_book(&mut self, ctx: &egui::Context, path: PathBuf, book: Book) -> LoadedBook {
        let rows = book
            .chapters()
            .into_iter()
            .filter_map(|chapter| {
                let words = chapter.word_count();
                (words > 0).then(|| ChapterRow {
                    preview: preview::preview_text(&chapter.text),
                    words,
                    checked: false,
                    chapter,
                })
            })
            .collect();

        let cover = match book.cover_bytes().map(cover::letterbox) {
            Some(Ok(image)) => load_cover_texture(ctx, &image),
            Some(Err(err)) => {
                warn!("Cannot decode cover: {err}");
                self.placeholder(ctx)
            }
            None => self.placeholder(ctx),
        };

        LoadedBook {
            path,
            book: Arc::new(book),
            rows,
            cover,
        }
    }

    fn toggle_preview(&mut self, ctx: &egui::Context, row: usize) {
        // Stopping must work even when the current settings are invalid.
        if self.preview.stop_active() {
            return;
        }
        let Some(loaded) = &self.loaded else {
            return;
        };
        let text = loaded.rows[row].preview.clone();
        if text.is_empty() {
            return;
        }
        let Some(speed) = self.speed() else {
            show_dialog(MessageLevel::Warning, "Warning", SPEED_WARNING);
            return;
        };
        let voice = match Voice::from_display(&self.settings.voice) {
            Ok(voice) => voice,
            Err(err) => {
                show_dialog(MessageLevel::Warning, "Warning", &err.to_string());
                return;
            }
        };
        let engine = match self.engine() {
            Ok(engine) => Arc::new(engine),
            Err(err) => {
                show_dialog(MessageLevel::Error, "Error", &err.to_string());
                return;
            }
        };

        if let Click::Start { request, .. } = self.preview.click(row) {
            worker::spawn_preview(
                engine,
                text,
                voice,
                speed.value(),
                request,
                self.events_tx.clone(),
                ctx.clone(),
            );
        }
    }

    fn start_conversion(&mut self, ctx: &egui::Context) {
        if self.loaded.is_none() {
            warn!("{NO_FILE_WARNING}");
            show_dialog(MessageLevel::Warning, "Warning", NO_FILE_WARNING);
            return;
        }
        let Some(speed) = self.speed() else {
            warn!("{SPEED_WARNING}");
            show_dialog(MessageLevel::Warning, "Warning", SPEED_WARNING);
            return;
        };
        let voice = match Voice::from_display(&self.settings.voice) {
            Ok(voice) => voice,
            Err(err) => {
                show_dialog(MessageLevel::Warning, "Warning", &err.to_string());
                return;
            }
        };
        let engine = match self.engine() {
            Ok(engine) => engine,
            Err(err) => {
                show_dialog(MessageLevel::Error, "Error", &err.to_string());
                return;
            }
        };
        let Some(loaded) = &mut self.loaded else {
            return;
        };

        let chosen = loaded.checked();
        if chosen.is_empty() {
            for row in &mut loaded.rows {
                row.checked = true;
            }
        }

        let mut job = Job::for_epub(&loaded.path, voice);
        job.speed = speed;
        job.gpu = self.settings.gpu;
        job.format = self.settings.format;
        job.chapters = chosen;
        if let Some(dir) = &self.settings.output_dir {
            job.output_dir = dir.clone();
        }

        let task = ConversionTask {
            job,
            book: Arc::clone(&loaded.book),
            all: loaded.chapters(),
            config: self.config.clone(),
            engine,
        };

        self.preview.stop();
        self.log.clear();
        self.progress = 0.0;
        self.status = "Starting...".to_string();
        self.worker = Some(worker::spawn_conversion(
            task,
            self.events_tx.clone(),
            ctx.clone(),
        ));
    }

    fn draw_controls(&mut self, ui: &mut egui::Ui) {
        ui.add_enabled_ui(self.stage() != Stage::Converting, |ui| {
            ui.horizontal(|ui| {
                ui.label("Reading speed:");
                let color = if self.speed().is_some() {
                    ui.visuals().text_color()
                } else {
                    Color32::RED
                };
                ui.add(
                    TextEdit::singleline(&mut self.settings.speed)
                        .desired_width(48.0)
                        .text_color(color),
                );

                if self.gpu_available {
                    ui.checkbox(&mut self.settings.gpu, "Enable GPU acceleration");
                }

                ui.label("Select Voice:");
                let selected = voices::emojify(voices::deemojify(&self.settings.voice));
                ComboBox::from_id_source("voice")
                    .selected_text(selected)
                    .show_ui(ui, |ui| {
                        for voice in voices::english_voices() {
                            ui.selectable_value(
                                &mut self.settings.voice,
                                voice.to_string(),
                                voices::emojify(voice),
                            );
                        }
                    });

                ui.label("Format:");
                ComboBox::from_id_source("format")
                    .selected_text(self.settings.format.display_name())
                    .show_ui(ui, |ui| {
                        for format in OutputFormat::ALL {
                            ui.selectable_value(&mut self.settings.format, format, format.display_name());
                        }
                    });
            });
        });
    }

    fn draw_book(&mut self, ui: &mut egui::Ui, ctx: &egui::Context) {
        let converting = self.stage() == Stage::Converting;
        let cover = match self.loaded.as_ref().map(|loaded| loaded.cover.clone()) {
            Some(cover) => cover,
            None => self.placeholder(ctx),
        };

        ui.horizontal(|ui| {
            ui.image((cover.id(), cover.size_vec2()));
            ui.vertical(|ui| {
                ui.add_enabled_ui(!converting, |ui| {
                    if ui.button("Select epub file").clicked() {
                        self.select_file(ctx);
                    }
                });
                match &self.loaded {
                    Some(loaded) => {
                        ui.label(loaded.path.display().to_string());
                        ui.label(format!("Title: {}", loaded.book.title));
                        ui.label(format!("Author: {}", loaded.book.author()));
                    }
                    None => {
                        ui.label("Title: ");
                        ui.label("Author: ");
                    }
                }

                ui.add_space(8.0);
                ui.add_enabled_ui(!converting, |ui| {
                    ui.horizontal(|ui| {
                        if ui.button("Output folder…").clicked() {
                            if let Some(dir) = FileDialog::new().pick_folder() {
                                self.settings.output_dir = Some(dir);
                            }
                        }
                        let chosen = self.settings.output_dir.as_ref().map(|dir| dir.display().to_string());
                        match chosen {
                            Some(dir) => {
                                ui.label(dir);
                                if ui.small_button("Next to the epub").clicked() {
                                    self.settings.output_dir = None;
                                }
                            }
                            None => {
                                ui.label(RichText::new("Next to the epub").color(Color32::GRAY));
                            }
                        }
                    });
                    if self.loaded.is_some() && ui.button("Tick likely chapters").clicked() {
                        self.tick_likely_chapters();
                    }
                });
            });
        });
    }

    fn tick_likely_chapters(&mut self) {
        let Some(loaded) = &mut self.loaded else {
            return;
        };
        let selection = crate::select::heuristic(&loaded.chapters());
        for row in &mut loaded.rows {
            row.checked = selection
                .chapters
                .iter()
                .any(|c| c.file_name == row.chapter.file_name);
        }
    }

    fn draw_chapters(&mut self, ui: &mut egui::Ui, ctx: &egui::Context) {
        let active = self.preview.active_row();
        let mut clicked = None;

        let Some(loaded) = &mut self.loaded else {
            ui.centered_and_justified(|ui| {
                ui.label(RichText::new("Select an epub file to see its chapters").color(Color32::GRAY));
            });
            return;
        };

        ScrollArea::vertical().auto_shrink([false, false]).show(ui, |ui| {
            for (i, row) in loaded.rows.iter_mut().enumerate() {
                ui.horizontal(|ui| {
                    ui.checkbox(&mut row.checked, "");
                    let icon = if active == Some(i) { "⏹" } else { "▶" };
                    if ui.button(icon).clicked() {
                        clicked = Some(i);
                    }
                    ui.label(&row.chapter.file_name);
                    let unit = if row.words == 1 { "word" } else { "words" };
                    ui.label(format!("({} {unit})", row.words));
                    ui.label(RichText::new(&row.preview).color(Color32::from_gray(0x66)));
                });
            }
        });

        if let Some(row) = clicked {
            self.toggle_preview(ctx, row);
        }
    }

    fn draw_progress(&mut self, ui: &mut egui::Ui, ctx: &egui::Context) {
        ui.vertical_centered(|ui| {
            let converting = self.stage() == Stage::Converting;
            let label = if converting { "Converting…" } else { "Convert epub" };
            if ui.add_enabled(!converting, egui::Button::new(label)).clicked() {
                self.start_conversion(ctx);
            }
        });
        ui.horizontal(|ui| {
            ui.add(
                ProgressBar::new(self.progress)
                    .desired_width(ui.available_width() * 0.75)
                    .show_percentage(),
            );
            ui.label(&self.status);
        });

        ui.separator();
        ScrollArea::vertical()
            .max_height(160.0)
            .stick_to_bottom(true)
            .auto_shrink([false, true])
            .show(ui, |ui| {
                ui.label(RichText::new(self.log.contents()).monospace().size(11.0));
            });
    }
}

impl eframe::App for AutiobooksApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        if let Some(message) = self.startup_warning.take() {
            show_dialog(MessageLevel::Warning, "Warning", &message);
        }

        self.handle_events();
        if self.preview.poll() {
            ctx.request_repaint_after(Duration::from_millis(100));
        }

        TopBottomPanel::top("controls").show(ctx, |ui| {
            ui.add_space(4.0);
            self.draw_controls(ui);
            ui.add_space(4.0);
            ui.separator();
            self.draw_book(ui, ctx);
            ui.add_space(4.0);
        });

        TopBottomPanel::bottom("progress").show(ctx, |ui| {
            ui.add_space(4.0);
            self.draw_progress(ui, ctx);
        });

        CentralPanel::default().show(ctx, |ui| {
            self.draw_chapters(ui, ctx);
        });
    }

    fn save(&mut self, storage: &mut dyn eframe::Storage) {
        eframe::set_value(storage, eframe::APP_KEY, &self.settings);
    }
}

const SPEED_WARNING: &str = "Please enter a speed value between 0.5 and 2.0.";
const NO_FILE_WARNING: &str = "Please select an epub file first.";

fn show_dialog(level: MessageLevel, title: &str, message: &str) {
    MessageDialog::new()
        .set_level(level)
        .set_title(title)
        .set_description(message)
        .show();
}

fn load_cover_texture(ctx: &egui::Context, image: &image::RgbImage) -> TextureHandle {
    let size = [image.width() as usize, image.height() as usize];
    let pixels = egui::ColorImage::from_rgb(size, image.as_raw());
    ctx.load_texture("cover", pixels, TextureOptions::LINEAR)
}
