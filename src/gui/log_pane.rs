//! Log lines for the output pane.

use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing_subscriber::fmt::MakeWriter;

/// Oldest output is dropped past this many bytes.
const MAX_BYTES: usize = 256 * 1024;

/// A shared text buffer that a `tracing` fmt layer can write into.
#[derive(Clone, Default)]
pub struct LogPane {
    buffer: Arc<Mutex<String>>,
}

impl LogPane {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        self.lock().clone()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn append(&self, text: &str) {
        let mut buffer = self.lock();
        buffer.push_str(text);
        if buffer.len() > MAX_BYTES {
            let mut excess = buffer.len() - MAX_BYTES;
            while !buffer.is_char_boundary(excess) {
                excess += 1;
            }
            // Cut after the next line break so the pane starts on a full line.
            let cut = buffer[excess..]
                .find('\n')
                .map(|i| excess + i + 1)
                .unwrap_or(buffer.len());
            buffer.drain(..cut);
        }
    }

    fn lock(&self) -> MutexGuard<'_, String> {
        self.buffer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub struct PaneWriter {
    pane: LogPane,
}

impl io::Write for PaneWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pane.append(&String::from_utf8_lossy(buf));
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogPane {
    type Writer = PaneWriter;

    fn make_writer(&'a self) -> Self::Writer {
        PaneWriter { pane: self.clone() }
    }
}
