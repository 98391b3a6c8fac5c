//! Chapter previews: a few words, synthesized off the UI thread and played
//! through the default output device.
//!
//! Only one preview exists at a time. Clicking any row while a preview is
//! being synthesized or played stops it; clicking with nothing going on starts
//! one for that row.

use anyhow::Result;
use rodio::buffer::SamplesBuffer;
use rodio::{OutputStream, Sink};
use tracing::debug;

use crate::tts::{AudioChunk, SAMPLE_RATE};

pub const PREVIEW_WORDS: usize = 25;
const VOLUME: f32 = 0.7;

/// The first few words of a chapter on one line.
pub fn preview_text(text: &str) -> String {
    text.split_whitespace()
        .take(PREVIEW_WORDS)
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreviewState {
    Idle,
    Synthesizing { row: usize, request: u64 },
    Playing { row: usize },
}

/// What the caller should do after a click.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Click {
    /// Synthesize a preview for `row`, tagged with `request`.
    Start { row: usize, request: u64 },
    Stopped,
}

struct Player {
    // Dropping the stream silences the sink.
    _stream: OutputStream,
    sink: Sink,
}

impl Player {
    fn play(samples: AudioChunk) -> Result<Self> {
        let (stream, handle) = OutputStream::try_default()?;
        let sink = Sink::try_new(&handle)?;
        sink.set_volume(VOLUME);
        sink.append(SamplesBuffer::new(1, SAMPLE_RATE, samples));
        Ok(Self {
            _stream: stream,
            sink,
        })
    }
}

pub struct Preview {
    state: PreviewState,
    last_request: u64,
    player: Option<Player>,
}

impl Default for Preview {
    fn default() -> Self {
        Self::new()
    }
}

impl Preview {
    pub fn new() -> Self {
        Self {
            state: PreviewState::Idle,
            last_request: 0,
            player: None,
        }
    }

    pub fn state(&self) -> PreviewState {
        self.state
    }

    /// The row showing a stop button, if any.
    pub fn active_row(&self) -> Option<usize> {
        match self.state {
            PreviewState::Idle => None,
            PreviewState::Synthesizing { row, .. } | PreviewState::Playing { row } => Some(row),
        }
    }

    /// Stop a running or pending preview. Returns false when nothing was
    /// active.
    pub fn stop_active(&mut self) -> bool {
        if self.state == PreviewState::Idle {
            return false;
        }
        self.stop();
        true
    }

    pub fn click(&mut self, row: usize) -> Click {
        if self.stop_active() {
            return Click::Stopped;
        }
        self.last_request += 1;
        let request = self.last_request;
        self.state = PreviewState::Synthesizing { row, request };
        Click::Start { row, request }
    }

    /// Audio for `request` arrived. Stale requests are dropped.
    pub fn ready(&mut self, request: u64, samples: AudioChunk) -> Result<()> {
        let PreviewState::Synthesizing { row, request: pending } = self.state else {
            debug!(request, "Dropping preview audio nobody waits for");
            return Ok(());
        };
        if pending != request {
            debug!(request, pending, "Dropping stale preview audio");
            return Ok(());
        }
        match Player::play(samples) {
            Ok(player) => {
                self.player = Some(player);
                self.state = PreviewState::Playing { row };
                Ok(())
            }
            Err(err) => {
                self.state = PreviewState::Idle;
                Err(err)
            }
        }
    }

    /// Synthesis for `request` failed.
    pub fn failed(&mut self, request: u64) {
        if matches!(self.state, PreviewState::Synthesizing { request: pending, .. } if pending == request)
        {
            self.state = PreviewState::Idle;
        }
    }

    /// Move back to idle once playback has drained. Returns true while a
    /// preview is still going.
    pub fn poll(&mut self) -> bool {
        if let PreviewState::Playing { .. } = self.state {
            let finished = self.player.as_ref().map_or(true, |p| p.sink.empty());
            if finished {
                self.player = None;
                self.state = PreviewState::Idle;
            }
        }
        self.state != PreviewState::Idle
    }

    pub fn stop(&mut self) {
        if let Some(player) = self.player.take() {
            player.sink.stop();
        }
        self.state = PreviewState::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_is_limited_and_flattened() {
        let text = (1..=40).map(|i| format!("w{i}")).collect::<Vec<_>>().join("\n");
        let preview = preview_text(&text);
        assert_eq!(preview.split(' ').count(), PREVIEW_WORDS);
        assert!(preview.starts_with("w1 w2 w3"));
        assert!(!preview.contains('\n'));
        assert_eq!(preview_text("Short\nline"), "Short line");
    }

    #[test]
    fn second_click_stops() {
        let mut preview = Preview::new();
        assert_eq!(preview.click(3), Click::Start { row: 3, request: 1 });
        assert_eq!(preview.active_row(), Some(3));

        assert_eq!(preview.click(5), Click::Stopped);
        assert_eq!(preview.state(), PreviewState::Idle);

        assert_eq!(preview.click(5), Click::Start { row: 5, request: 2 });
    }

    #[test]
    fn stop_needs_nothing_but_an_active_preview() {
        let mut preview = Preview::new();
        assert!(!preview.stop_active());

        preview.click(2);
        assert!(preview.stop_active());
        assert_eq!(preview.active_row(), None);
        assert!(!preview.stop_active());
    }

    #[test]
    fn stale_audio_is_ignored() {
        let mut preview = Preview::new();
        let Click::Start { request: first, .. } = preview.click(0) else {
            panic!("expected a start");
        };
        preview.click(0);
        let Click::Start { request: second, .. } = preview.click(1) else {
            panic!("expected a start");
        };

        preview.ready(first, vec![0.0; 10]).unwrap();
        assert_eq!(preview.state(), PreviewState::Synthesizing { row: 1, request: second });

        preview.failed(first);
        assert_eq!(preview.active_row(), Some(1));
        preview.failed(second);
        assert_eq!(preview.state(), PreviewState::Idle);
        assert!(!preview.poll());
    }
}
