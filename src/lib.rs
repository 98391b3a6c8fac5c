//! Turn EPUB e-books into chaptered audiobooks.
//!
//! The pipeline reads the book ([`epub`]), picks chapters ([`select`]), speaks
//! each one through an external engine ([`tts`]) into a WAV file ([`audio`]),
//! and packages the result with chapter markers and cover art ([`package`]).
//! [`convert`] ties the steps together for both front ends.

pub mod audio;
pub mod config;
pub mod convert;
pub mod epub;
pub mod error;
#[cfg(feature = "gui")]
pub mod gui;
pub mod package;
pub mod select;
pub mod tts;
pub mod voices;

pub use config::Config;
pub use convert::{Converter, Job, Progress, Speed};
pub use epub::{Book, Chapter};
pub use error::{Error, Result};
pub use package::OutputFormat;
pub use tts::{CommandEngine, Device, SpeechEngine};
pub use voices::Voice;
