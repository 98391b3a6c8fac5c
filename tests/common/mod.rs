//! In-memory EPUB fixtures.

#![allow(dead_code)]

use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use autiobooks::error::Result;
use autiobooks::tts::{split_segments, AudioChunk, SpeechEngine};
use autiobooks::voices::Voice;
use zip::write::SimpleFileOptions;

pub struct Entry {
    id: String,
    href: String,
    media_type: String,
    properties: Option<String>,
    /// `None` lists the item in the manifest without storing it.
    data: Option<Vec<u8>>,
}

pub struct EpubBuilder {
    title: String,
    creator: String,
    cover_meta: Option<String>,
    entries: Vec<Entry>,
    /// Archive members stored by path, outside the manifest.
    files: Vec<(String, Vec<u8>)>,
}

impl EpubBuilder {
    pub fn new(title: &str, creator: &str) -> Self {
        Self {
            title: title.to_string(),
            creator: creator.to_string(),
            cover_meta: None,
            entries: Vec::new(),
            files: Vec::new(),
        }
    }

    pub fn chapter(self, id: &str, href: &str, body: &str) -> Self {
        let document = xhtml(id, body);
        self.item(id, href, "application/xhtml+xml", None, Some(document.into_bytes()))
    }

    pub fn item(
        mut self,
        id: &str,
        href: &str,
        media_type: &str,
        properties: Option<&str>,
        data: Option<Vec<u8>>,
    ) -> Self {
        self.entries.push(Entry {
            id: id.to_string(),
            href: href.to_string(),
            media_type: media_type.to_string(),
            properties: properties.map(str::to_string),
            data,
        });
        self
    }

    /// Declare an EPUB2 `<meta name="cover">`.
    pub fn cover_meta(mut self, id: &str) -> Self {
        self.cover_meta = Some(id.to_string());
        self
    }

    /// Store a member at an archive path, bypassing `OEBPS/`.
    pub fn file(mut self, path: &str, data: Vec<u8>) -> Self {
        self.files.push((path.to_string(), data));
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut buffer = Cursor::new(Vec::new());
        {
            let mut zip = zip::ZipWriter::new(&mut buffer);
            let stored =
                SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
            let deflated =
                SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

            zip.start_file("mimetype", stored).unwrap();
            zip.write_all(b"application/epub+zip").unwrap();

            zip.start_file("META-INF/container.xml", deflated).unwrap();
            zip.write_all(CONTAINER.as_bytes()).unwrap();

            zip.start_file("OEBPS/content.opf", deflated).unwrap();
            zip.write_all(self.opf().as_bytes()).unwrap();

            for entry in &self.entries {
                if let Some(data) = &entry.data {
                    zip.start_file(format!("OEBPS/{}", entry.href), deflated).unwrap();
                    zip.write_all(data).unwrap();
                }
            }
            for (path, data) in &self.files {
                zip.start_file(path.as_str(), deflated).unwrap();
                zip.write_all(data).unwrap();
            }
            zip.finish().unwrap();
        }
        buffer.into_inner()
    }

    pub fn write_to(&self, dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, self.build()).unwrap();
        path
    }

    fn opf(&self) -> String {
        let mut manifest = String::new();
        let mut spine = String::new();
        for entry in &self.entries {
            let properties = entry
                .properties
                .as_ref()
                .map(|p| format!(r#" properties="{p}""#))
                .unwrap_or_default();
            manifest.push_str(&format!(
                r#"    <item id="{}" href="{}" media-type="{}"{}/>"#,
                entry.id, entry.href, entry.media_type, properties
            ));
            manifest.push('\n');
            if entry.media_type == "application/xhtml+xml" {
                spine.push_str(&format!(r#"    <itemref idref="{}"/>"#, entry.id));
                spine.push('\n');
            }
        }
        let cover = self
            .cover_meta
            .as_ref()
            .map(|id| format!(r#"<meta name="cover" content="{id}"/>"#))
            .unwrap_or_default();

        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0" unique-identifier="id">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:identifier id="id">urn:test</dc:identifier>
    <dc:title>{}</dc:title>
    <dc:creator>{}</dc:creator>
    <dc:language>en</dc:language>
    {cover}
  </metadata>
  <manifest>
{manifest}  </manifest>
  <spine>
{spine}  </spine>
</package>"#,
            self.title, self.creator
        )
    }
}

const CONTAINER: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>"#;

pub fn xhtml(title: &str, body: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml">
<head><title>{title}</title></head>
<body>
{body}
</body>
</html>"#
    )
}

/// A tiny solid PNG.
pub fn png(width: u32, height: u32) -> Vec<u8> {
    let image = image::RgbImage::from_pixel(width, height, image::Rgb([0, 0, 255]));
    let mut out = Cursor::new(Vec::new());
    image.write_to(&mut out, image::ImageFormat::Png).unwrap();
    out.into_inner()
}

/// Produces one chunk per segment and remembers what it read.
#[derive(Default)]
pub struct FakeEngine {
    pub texts: Mutex<Vec<String>>,
}

impl FakeEngine {
    pub fn texts(&self) -> Vec<String> {
        self.texts.lock().unwrap().clone()
    }
}

impl SpeechEngine for FakeEngine {
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
            .map(|segment| vec![0.2; segment.len() * 10])
            .collect())
    }
}
