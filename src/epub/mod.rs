//! EPUB loading.
//!
//! The container, package document and resources come from the `epub` crate.
//! Items are ordered by the spine, with everything outside it following by
//! path, and document items are turned into [`Chapter`]s carrying their plain
//! text.

pub mod cover;
pub mod text;

use ::epub::doc::EpubDoc;
use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// What a manifest item holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    Document,
    Navigation,
    Image,
    Cover,
    Style,
    Font,
    Unknown,
}

impl ItemKind {
    fn classify(media_type: &str, properties: Option<&str>, declared_cover: bool) -> Self {
        let has_property = |wanted: &str| {
            properties.is_some_and(|props| props.split_ascii_whitespace().any(|p| p == wanted))
        };
        match media_type {
            "application/xhtml+xml" if has_property("nav") => ItemKind::Navigation,
            "application/xhtml+xml" => ItemKind::Document,
            "application/x-dtbncx+xml" => ItemKind::Navigation,
            "text/css" => ItemKind::Style,
            m if m.starts_with("image/") => {
                if declared_cover || has_property("cover-image") {
                    ItemKind::Cover
                } else {
                    ItemKind::Image
                }
            }
            m if m.starts_with("font/") || m.contains("opentype") || m.contains("font-") => {
                ItemKind::Font
            }
            _ => ItemKind::Unknown,
        }
    }
}

/// One manifest entry plus its bytes, if the archive actually had them.
#[derive(Debug, Clone)]
pub struct Item {
    pub id: String,
    /// Path of the item relative to the package document.
    pub href: String,
    pub media_type: String,
    pub kind: ItemKind,
    data: Option<Vec<u8>>,
}

impl Item {
    /// The item's internal file name.
    pub fn name(&self) -> &str {
        &self.href
    }

    pub fn is_document(&self) -> bool {
        self.kind == ItemKind::Document
    }

    /// Documents plus loosely typed `text/html` items.
    pub fn is_readable(&self) -> bool {
        self.is_document() || (self.kind == ItemKind::Unknown && self.media_type == "text/html")
    }

    /// Raw bytes of the item.
    pub fn data(&self) -> Result<&[u8]> {
        self.data
            .as_deref()
            .ok_or_else(|| Error::InvalidEpub(format!("{} is missing from the archive", self.href)))
    }

    /// Markup inside `<body>`, requiring valid UTF-8 and well-formed XML.
    pub fn body_content(&self) -> Result<String> {
        let data = self.data()?;
        let data = data.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(data);
        let document = std::str::from_utf8(data)
            .map_err(|e| Error::InvalidEpub(format!("{} is not UTF-8: {e}", self.href)))?;
        Ok(text::body_content(document)?.to_string())
    }

    /// The whole document, decoded leniently.
    pub fn content(&self) -> Result<String> {
        let data = self.data()?;
        let (decoded, _, had_errors) = encoding_rs::UTF_8.decode(data);
        if had_errors {
            debug!(href = %self.href, "Replaced invalid UTF-8 sequences");
        }
        Ok(decoded.into_owned())
    }
}

/// A document item with its extracted text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chapter {
    pub id: String,
    /// Internal file name; identifies the chapter.
    pub file_name: String,
    pub text: String,
}

impl Chapter {
    pub fn word_count(&self) -> usize {
        self.text.split_whitespace().count()
    }
}

/// A parsed EPUB.
#[derive(Debug, Clone)]
pub struct Book {
    pub title: String,
    pub authors: Vec<String>,
    pub language: String,
    items: Vec<Item>,
    spine: Vec<String>,
}

impl Book {
    /// Read an EPUB file from disk.
    pub fn open(path: &Path) -> Result<Self> {
        info!(path = %path.display(), "Loading EPUB");
        let file = File::open(path)?;
        Self::from_reader(BufReader::new(file))
    }

    /// Read an EPUB from any seekable source.
    pub fn from_reader<R: Read + Seek>(reader: R) -> Result<Self> {
        let mut doc = EpubDoc::from_reader(reader)?;

        let title = doc.mdata("title").map(|m| m.value.clone()).unwrap_or_default();
        let authors: Vec<String> = doc
            .metadata
            .iter()
            .filter(|m| m.property == "creator")
            .map(|m| m.value.clone())
            .collect();
        let language = doc.mdata("language").map(|m| m.value.clone()).unwrap_or_default();
        let spine: Vec<String> = doc.spine.iter().map(|s| s.idref.clone()).collect();
        let cover_id = doc.get_cover_id();

        let mut entries: Vec<(String, PathBuf, String, Option<String>)> = doc
            .resources
            .iter()
            .map(|(id, r)| (id.clone(), r.path.clone(), r.mime.clone(), r.properties.clone()))
            .collect();
        // Spine first, in reading order, then the rest by path.
        let position = |id: &str| spine.iter().position(|s| s == id).unwrap_or(usize::MAX);
        entries.sort_by(|a, b| position(&a.0).cmp(&position(&b.0)).then_with(|| a.1.cmp(&b.1)));

        let root_base = doc.root_base.clone();
        let mut items = Vec::with_capacity(entries.len());
        for (id, path, media_type, properties) in entries {
            let data = fetch(&mut doc, &id, &path);
            if data.is_none() {
                warn!(id = %id, path = %path.display(), "Manifest item is missing from the archive");
            }
            let declared_cover = cover_id.as_deref() == Some(id.as_str());
            items.push(Item {
                kind: ItemKind::classify(&media_type, properties.as_deref(), declared_cover),
                href: archive_name(path.strip_prefix(&root_base).unwrap_or(&path)),
                id,
                media_type,
                data,
            });
        }

        let book = Self {
            title,
            authors,
            language,
            items,
            spine,
        };
        info!(
            title = %book.title,
            items = book.items.len(),
            documents = book.documents().count(),
            "Loaded EPUB"
        );
        Ok(book)
    }

    /// Every manifest item: spine items in reading order, then the rest.
    pub fn items(&self) -> &[Item] {
        &self.items
    }

    /// Reading order as manifest ids.
    pub fn spine(&self) -> &[String] {
        &self.spine
    }

    pub fn documents(&self) -> impl Iterator<Item = &Item> {
        self.items.iter().filter(|item| item.is_document())
    }

    /// The first listed author, or an empty string.
    pub fn author(&self) -> &str {
        self.authors.first().map(String::as_str).unwrap_or("")
    }

    /// Extract text from every readable item.
    ///
    /// A chapter whose body cannot be read falls back to its whole content;
    /// one that cannot be read either way is skipped.
    pub fn chapters(&self) -> Vec<Chapter> {
        let mut chapters = Vec::new();
        for item in self.items.iter().filter(|item| item.is_readable()) {
            let markup = match item.body_content() {
                Ok(body) => body,
                Err(body_err) => match item.content() {
                    Ok(content) => {
                        debug!(href = %item.href, "Body unreadable, using whole document: {body_err}");
                        content
                    }
                    Err(err) => {
                        warn!(href = %item.href, "Skipping unreadable chapter: {err}");
                        continue;
                    }
                },
            };
            let text = text::extract_text(&markup);
            debug!(href = %item.href, chars = text.len(), "Extracted chapter text");
            chapters.push(Chapter {
                id: item.id.clone(),
                file_name: item.href.clone(),
                text,
            });
        }
        chapters
    }

    /// The declared cover, or else the first image whose name mentions
    /// "cover".
    pub fn cover(&self) -> Option<&Item> {
        self.items
            .iter()
            .find(|item| item.kind == ItemKind::Cover)
            .or_else(|| {
                self.items.iter().find(|item| {
                    item.kind == ItemKind::Image && item.href.to_lowercase().contains("cover")
                })
            })
    }

    /// Raw cover bytes, ready to be attached to the audiobook.
    pub fn cover_bytes(&self) -> Option<&[u8]> {
        self.cover().and_then(|item| item.data().ok())
    }
}

/// Item bytes by id, retrying with `.` and `..` collapsed for hrefs that
/// climb out of the package directory.
fn fetch<R: Read + Seek>(doc: &mut EpubDoc<R>, id: &str, path: &Path) -> Option<Vec<u8>> {
    if let Some((data, _mime)) = doc.get_resource(id) {
        return Some(data);
    }
    let normalized = normalize(path);
    if normalized.as_path() == path {
        return None;
    }
    doc.get_resource_by_path(&normalized)
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

/// Archive paths always use forward slashes.
fn archive_name(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
