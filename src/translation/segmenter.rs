/*!
 * Document segmentation.
 *
 * Splits a chapter's markup into ordered, identifiable block fragments.
 * Each fragment keeps its surrounding tags so a translator can carry inline
 * markup through untouched, and the original spans are remembered so the
 * translated fragments can be spliced back into the source document.
 */

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::ops::Range;

use super::prompts::is_marker_safe;
use crate::errors::SegmentError;

/// Opening or closing tag of a translatable block element
static BLOCK_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)<(/?)(p|h[1-6]|blockquote|li|pre|figcaption|dt|dd|td|th)(\s[^>]*)?>").unwrap()
});

static SEGMENT_ID_ATTR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\bdata-segment-id\s*=\s*["']([^"']*)["']"#).unwrap()
});

static ID_ATTR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)(?:^|\s)id\s*=\s*["']([^"']*)["']"#).unwrap()
});

static ANY_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").unwrap());

static BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\r?\n[ \t]*\r?\n\s*").unwrap());

/// One translatable unit of a document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    /// Stable identifier within a document revision
    pub id: String,
    /// Block markup including its own tags
    pub markup: String,
}

impl Segment {
    pub fn new(id: impl Into<String>, markup: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            markup: markup.into(),
        }
    }
}

/// Result of segmenting one document
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentedDocument {
    /// SHA-256 of the source markup
    pub revision: String,
    pub segments: Vec<Segment>,
    spans: Vec<Range<usize>>,
}

impl SegmentedDocument {
    pub fn ids(&self) -> Vec<&str> {
        self.segments.iter().map(|s| s.id.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

/// Stateless block segmenter
#[derive(Debug, Clone, Copy, Default)]
pub struct DocumentSegmenter;

impl DocumentSegmenter {
    pub fn new() -> Self {
        Self
    }

    /// Lowercase hex SHA-256 of the source markup
    pub fn revision(source: &str) -> String {
        format!("{:x}", Sha256::digest(source.as_bytes()))
    }

    /// Split a document into segments.
    ///
    /// Block elements become segments; a document with no block elements at
    /// all is split on blank lines instead. Fails when nothing translatable
    /// remains or an explicit id repeats.
    pub fn segment(&self, source: &str) -> Result<SegmentedDocument, SegmentError> {
        let blocks = find_blocks(source);

        let candidates: Vec<(Range<usize>, Option<String>)> = if blocks.is_empty() {
            split_paragraphs(source).into_iter().map(|span| (span, None)).collect()
        } else {
            blocks
        };

        let candidates: Vec<(Range<usize>, Option<String>)> = candidates
            .into_iter()
            .filter(|(span, _)| !visible_text(&source[span.clone()]).is_empty())
            .collect();
        // Positional ids must not take an id some other block asks for explicitly
        let reserved: HashSet<&str> = candidates
            .iter()
            .filter_map(|(_, id)| id.as_deref())
            .collect();

        let mut segments = Vec::with_capacity(candidates.len());
        let mut spans = Vec::with_capacity(candidates.len());
        let mut seen: HashSet<String> = HashSet::new();

        for (index, (span, explicit_id)) in candidates.iter().enumerate() {
            let id = match explicit_id {
                Some(id) => id.clone(),
                None => {
                    let mut position = index + 1;
                    let mut id = positional_id(position);
                    while reserved.contains(id.as_str()) || seen.contains(&id) {
                        position += 1;
                        id = positional_id(position);
                    }
                    id
                }
            };
            if !seen.insert(id.clone()) {
                return Err(SegmentError::DuplicateId(id));
            }

            segments.push(Segment::new(id, &source[span.clone()]));
            spans.push(span.clone());
        }

        if segments.is_empty() {
            return Err(SegmentError::NoSegments);
        }

        Ok(SegmentedDocument {
            revision: Self::revision(source),
            segments,
            spans,
        })
    }

    /// Splice translated fragments back into the source document.
    ///
    /// Everything outside the segment spans is copied verbatim.
    pub fn reassemble(&self, source: &str, translated: &[Segment]) -> Result<String, SegmentError> {
        let document = self.segment(source)?;
        let by_id: HashMap<&str, &str> = translated
            .iter()
            .map(|s| (s.id.as_str(), s.markup.as_str()))
            .collect();

        let mut output = String::with_capacity(source.len());
        let mut cursor = 0;

        for (segment, span) in document.segments.iter().zip(&document.spans) {
            let replacement = by_id
                .get(segment.id.as_str())
                .ok_or_else(|| SegmentError::MissingSegment(segment.id.clone()))?;
            output.push_str(&source[cursor..span.start]);
            output.push_str(replacement);
            cursor = span.end;
        }
        output.push_str(&source[cursor..]);

        Ok(output)
    }
}

/// Outermost block elements with any explicit id found on the opening tag.
///
/// Blocks nested inside another block travel inside the outer fragment.
/// An unclosed block runs to the end of the document.
fn find_blocks(source: &str) -> Vec<(Range<usize>, Option<String>)> {
    let mut blocks = Vec::new();
    // (tag name, start offset, same-name nesting depth, explicit id)
    let mut open: Option<(String, usize, usize, Option<String>)> = None;

    for caps in BLOCK_TAG.captures_iter(source) {
        let Some(whole) = caps.get(0) else { continue };
        let closing = caps.get(1).is_some_and(|m| !m.as_str().is_empty());
        let name = caps
            .get(2)
            .map(|m| m.as_str().to_lowercase())
            .unwrap_or_default();

        if let Some((open_name, _, depth, _)) = open.as_mut() {
            if *open_name != name {
                continue;
            }
            if !closing {
                *depth += 1;
                continue;
            }
            if *depth > 0 {
                *depth -= 1;
                continue;
            }
            if let Some((_, start, _, id)) = open.take() {
                blocks.push((start..whole.end(), id));
            }
        } else if !closing {
            let attrs = caps.get(3).map(|m| m.as_str()).unwrap_or("");
            open = Some((name, whole.start(), 0, explicit_id(attrs)));
        }
    }

    if let Some((_, start, _, id)) = open {
        blocks.push((start..source.len(), id));
    }

    blocks
}

fn positional_id(position: usize) -> String {
    format!("seg-{:04}", position)
}

/// Explicit id of a block; ids a marker cannot carry are ignored
fn explicit_id(attrs: &str) -> Option<String> {
    SEGMENT_ID_ATTR
        .captures(attrs)
        .or_else(|| ID_ATTR.captures(attrs))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|id| is_marker_safe(id))
}

/// Blank-line separated paragraphs, trimmed
fn split_paragraphs(source: &str) -> Vec<Range<usize>> {
    let mut spans = Vec::new();
    let mut last = 0;

    let mut push = |start: usize, end: usize| {
        let slice = &source[start..end];
        let lead = slice.len() - slice.trim_start().len();
        let trail = slice.len() - slice.trim_end().len();
        if lead + trail < slice.len() {
            spans.push(start + lead..end - trail);
        }
    };

    for sep in BLANK_LINES.find_iter(source) {
        push(last, sep.start());
        last = sep.end();
    }
    push(last, source.len());

    spans
}

/// Text content with tags removed and whitespace trimmed
pub fn visible_text(markup: &str) -> String {
    ANY_TAG
        .replace_all(markup, " ")
        .replace("&nbsp;", " ")
        .trim()
        .to_string()
}
