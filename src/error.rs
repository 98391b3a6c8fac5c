//! Error types for audiobook conversion.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while reading a book, synthesizing speech, or
/// packaging the result.
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("EPUB error: {0}")]
    Epub(#[from] ::epub::doc::DocError),

    #[error("XML parsing error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Invalid EPUB: {0}")]
    InvalidEpub(String),

    #[error("Invalid config: {0}")]
    Config(String),

    #[error("Speed must be a number between 0.5 and 2.0, got {0:?}")]
    InvalidSpeed(String),

    #[error("Voice not recognized: {0}")]
    UnknownVoice(String),

    #[error("Invalid split pattern: {0}")]
    SplitPattern(#[from] regex::Error),

    #[error("Speech synthesis failed: {0}")]
    Synthesis(String),

    #[error("{tool} failed for {}: {message}", path.display())]
    Tool {
        tool: String,
        path: PathBuf,
        message: String,
    },

    #[error("No chapters were converted.")]
    NothingConverted,

    #[error("UTF-8 decoding error: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

pub type Result<T> = std::result::Result<T, Error>;
