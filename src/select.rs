//! Deciding which chapters end up in the audiobook.

use regex::Regex;
use std::sync::OnceLock;
use tracing::info;

use crate::epub::Chapter;
use crate::error::{Error, Result};

fn chapter_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"part\d{1,3}|ch\d{1,3}|chap\d{1,3}|chapter").expect("static regex")
    })
}

/// Whether an internal file name looks like a chapter.
pub fn looks_like_chapter(file_name: &str) -> bool {
    chapter_name_pattern().is_match(&file_name.to_lowercase())
}

/// The outcome of a selection pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub chapters: Vec<Chapter>,
    /// True when nothing matched (or nothing was chosen) and every chapter
    /// was substituted.
    pub defaulted: bool,
}

/// Pick chapters by file name. Falls back to every chapter when no name
/// matches.
pub fn heuristic(chapters: &[Chapter]) -> Selection {
    let matched: Vec<Chapter> = chapters
        .iter()
        .filter(|c| looks_like_chapter(&c.file_name))
        .cloned()
        .collect();

    if matched.is_empty() {
        info!("Not easy to find the chapters, defaulting to all available documents.");
        return Selection {
            chapters: chapters.to_vec(),
            defaulted: true,
        };
    }

    Selection {
        chapters: matched,
        defaulted: false,
    }
}

/// Use the caller's choice as is, or every chapter when the choice is empty.
pub fn explicit(selected: Vec<Chapter>, all: &[Chapter]) -> Selection {
    if selected.is_empty() {
        info!("No chapters were selected, defaulting to all.");
        return Selection {
            chapters: all.to_vec(),
            defaulted: true,
        };
    }
    Selection {
        chapters: selected,
        defaulted: false,
    }
}

/// Select by 1-based positions in `all`.
pub fn by_index(indices: &[usize], all: &[Chapter]) -> Result<Selection> {
    let mut selected = Vec::with_capacity(indices.len());
    for &index in indices {
        let chapter = index
            .checked_sub(1)
            .and_then(|i| all.get(i))
            .ok_or_else(|| Error::InvalidEpub(format!("no chapter number {index}")))?;
        selected.push(chapter.clone());
    }
    Ok(explicit(selected, all))
}
