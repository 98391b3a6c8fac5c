//! Markup stripping.
//!
//! Only the text of a handful of content tags survives. Inline markup inside
//! those tags is flattened; everything outside them (tables, asides, scripts)
//! is dropped.

use html5ever::tendril::StrTendril;
use html5ever::tokenizer::states::RawKind;
use html5ever::tokenizer::{
    BufferQueue, Tag, TagKind, Token, TokenSink, TokenSinkResult, Tokenizer, TokenizerOpts,
};
use quick_xml::events::Event;
use quick_xml::Reader;
use std::cell::RefCell;

use crate::error::{Error, Result};

/// Tags whose inner text is kept.
pub const CONTENT_TAGS: [&str; 7] = ["title", "p", "h1", "h2", "h3", "h4", "li"];

const SKIPPED_TAGS: [&str; 2] = ["script", "style"];

const VOID_TAGS: [&str; 14] = [
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

/// Block starts that end an open `<p>`.
const CLOSES_P: [&str; 22] = [
    "address", "article", "aside", "blockquote", "div", "dl", "fieldset", "figure", "footer",
    "form", "h1", "h2", "h3", "h4", "h5", "h6", "header", "hr", "ol", "p", "table", "ul",
];

/// An implied close never reaches past these.
const P_SCOPE: [&str; 6] = ["button", "caption", "table", "td", "th", "template"];
const LI_SCOPE: [&str; 5] = ["ol", "ul", "table", "td", "th"];

/// Strip any namespace prefix from a qualified XML name.
fn local_name(name: &[u8]) -> &[u8] {
    match name.iter().rposition(|&b| b == b':') {
        Some(i) => &name[i + 1..],
        None => name,
    }
}

/// Return the markup between `<body>` and `</body>`.
///
/// This is the strict accessor: the document must be well-formed XML up to
/// the closing body tag.
pub fn body_content(document: &str) -> Result<&str> {
    let mut reader = Reader::from_str(document);
    let mut start = None;

    loop {
        let before = reader.buffer_position() as usize;
        match reader.read_event() {
            Ok(Event::Start(e)) if start.is_none() && local_name(e.name().as_ref()) == b"body" => {
                start = Some(reader.buffer_position() as usize);
            }
            Ok(Event::Empty(e)) if start.is_none() && local_name(e.name().as_ref()) == b"body" => {
                return Ok("");
            }
            Ok(Event::End(e)) if local_name(e.name().as_ref()) == b"body" => {
                if let Some(start) = start {
                    return document
                        .get(start..before)
                        .ok_or_else(|| Error::InvalidEpub("body span out of range".into()));
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(Error::Xml(e)),
            _ => {}
        }
    }

    Err(Error::InvalidEpub("document has no <body>".into()))
}

struct Open {
    name: String,
    slot: Option<usize>,
}

/// Open elements and the text gathered for each content tag.
#[derive(Default)]
struct Walk {
    stack: Vec<Open>,
    slots: Vec<String>,
    skipping: usize,
}

impl Walk {
    fn start(&mut self, tag: &Tag) {
        let name: &str = &tag.name;
        if CLOSES_P.contains(&name) {
            self.close_implied("p", &P_SCOPE);
        }
        if name == "li" {
            self.close_implied("li", &LI_SCOPE);
        }
        if tag.self_closing || VOID_TAGS.contains(&name) {
            return;
        }

        if SKIPPED_TAGS.contains(&name) {
            self.skipping += 1;
        }
        let slot = CONTENT_TAGS.contains(&name).then(|| {
            self.slots.push(String::new());
            self.slots.len() - 1
        });
        self.stack.push(Open {
            name: name.to_string(),
            slot,
        });
    }

    fn end(&mut self, name: &str) {
        if let Some(pos) = self.stack.iter().rposition(|open| open.name == name) {
            self.close_from(pos);
        }
    }

    fn close_implied(&mut self, name: &str, scope: &[&str]) {
        let Some(pos) = self.stack.iter().rposition(|open| open.name == name) else {
            return;
        };
        if self.stack[pos + 1..]
            .iter()
            .all(|open| !scope.contains(&open.name.as_str()))
        {
            self.close_from(pos);
        }
    }

    fn close_from(&mut self, pos: usize) {
        for open in self.stack.drain(pos..) {
            if SKIPPED_TAGS.contains(&open.name.as_str()) {
                self.skipping = self.skipping.saturating_sub(1);
            }
        }
    }

    fn text(&mut self, text: &str) {
        if self.skipping > 0 {
            return;
        }
        for open in &self.stack {
            if let Some(slot) = open.slot {
                self.slots[slot].push_str(text);
            }
        }
    }

    fn finish(self) -> String {
        let mut text = String::new();
        for slot in self.slots {
            let trimmed = slot.trim();
            if !trimmed.is_empty() {
                text.push_str(trimmed);
                text.push('\n');
            }
        }
        text
    }
}

/// Token sink feeding a [`Walk`].
#[derive(Default)]
struct Collector {
    walk: RefCell<Walk>,
}

impl TokenSink for Collector {
    type Handle = ();

    fn process_token(&self, token: Token, _line_number: u64) -> TokenSinkResult<()> {
        let mut walk = self.walk.borrow_mut();
        match token {
            Token::TagToken(tag) => match tag.kind {
                TagKind::StartTag => {
                    walk.start(&tag);
                    if !tag.self_closing {
                        // Same content models the tree builder would switch to.
                        match &*tag.name {
                            "script" => return TokenSinkResult::RawData(RawKind::ScriptData),
                            "style" => return TokenSinkResult::RawData(RawKind::Rawtext),
                            "title" | "textarea" => {
                                return TokenSinkResult::RawData(RawKind::Rcdata)
                            }
                            _ => {}
                        }
                    }
                }
                TagKind::EndTag => walk.end(&tag.name),
            },
            Token::CharacterTokens(text) => walk.text(&text),
            _ => {}
        }
        TokenSinkResult::Continue
    }
}

/// Concatenate the trimmed text of every content tag in start-tag order, one
/// line each.
///
/// The markup is tokenized as HTML, so named and numeric character references
/// are resolved, stray ampersands stay literal, and unclosed or mismatched
/// tags are tolerated.
pub fn extract_text(markup: &str) -> String {
    let input = BufferQueue::default();
    input.push_back(StrTendril::from_slice(markup));

    let tokenizer = Tokenizer::new(Collector::default(), TokenizerOpts::default());
    let _ = tokenizer.feed(&input);
    tokenizer.end();
    tokenizer.sink.walk.take().finish()
}
