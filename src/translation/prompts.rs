/*!
 * Prompt construction and marker reconciliation.
 *
 * Segments travel to the model as one payload in which every fragment is
 * preceded by a `<<SEG:{id}>>` marker and the whole payload ends with
 * `<<END>>`. The model must echo the markers; `reconcile` recovers the
 * translated fragments by id and reports the ids it could not find.
 */

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

use super::segmenter::Segment;

/// Terminates a segment payload
pub const END_MARKER: &str = "<<END>>";

static SEGMENT_MARKER: Lazy<Regex> = Lazy::new(|| Regex::new(r"<<SEG:([^>\s]+)>>").unwrap());

/// Format the marker that introduces a segment
pub fn segment_marker(id: &str) -> String {
    format!("<<SEG:{}>>", id)
}

/// Whether an id can be read back out of its marker
pub fn is_marker_safe(id: &str) -> bool {
    !id.is_empty() && !id.chars().any(|c| c.is_whitespace() || c == '>')
}

/// Rules appended to every system prompt, whatever the configured wording
pub const MARKER_RULES: &str = r#"

## Format Rules
- The input is a list of fragments, each introduced by a marker line such as <<SEG:seg-0001>>
- Reproduce every marker exactly, on its own line, followed by the translation of its fragment
- Translate only human-readable text; keep every HTML tag and attribute verbatim
- Do not merge, split, reorder or drop fragments
- Finish your answer with <<END>> and add nothing else"#;

/// System prompt template for chapter translation.
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    template: String,
}

impl PromptTemplate {
    pub fn new(template: &str) -> Self {
        Self {
            template: template.to_string(),
        }
    }

    /// Render with language names; the marker rules are always appended
    pub fn render(&self, source_language: &str, target_language: &str) -> String {
        let mut prompt = self
            .template
            .replace("{source_language}", source_language)
            .replace("{target_language}", target_language);
        prompt.push_str(MARKER_RULES);
        prompt
    }
}

/// Build the user message for a set of segments
pub fn build_payload(segments: &[Segment]) -> String {
    let mut payload = String::new();
    for segment in segments {
        payload.push_str(&segment_marker(&segment.id));
        payload.push('\n');
        payload.push_str(segment.markup.trim());
        payload.push('\n');
    }
    payload.push_str(END_MARKER);
    payload
}

/// Fragments recovered from a model response
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
    /// Recovered fragments, in the order of the requested segments
    pub segments: Vec<Segment>,
    /// Requested ids with no (or an empty) fragment in the response
    pub missing: Vec<String>,
}

impl Reconciliation {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }
}

/// Match a response against the requested segments.
///
/// Unknown ids are ignored; when an id is echoed twice the first fragment
/// wins. Text after `<<END>>` is discarded.
pub fn reconcile(response: &str, requested: &[Segment]) -> Reconciliation {
    let body = match response.find(END_MARKER) {
        Some(end) => &response[..end],
        None => response,
    };

    let markers: Vec<(String, usize, usize)> = SEGMENT_MARKER
        .captures_iter(body)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let id = caps.get(1)?.as_str().to_string();
            Some((id, whole.start(), whole.end()))
        })
        .collect();

    let mut fragments: HashMap<&str, &str> = HashMap::new();
    for (idx, (id, _, content_start)) in markers.iter().enumerate() {
        let content_end = markers
            .get(idx + 1)
            .map(|(_, next_start, _)| *next_start)
            .unwrap_or(body.len());
        let fragment = body[*content_start..content_end].trim();
        if !fragment.is_empty() {
            fragments.entry(id.as_str()).or_insert(fragment);
        }
    }

    let mut segments = Vec::with_capacity(requested.len());
    let mut missing = Vec::new();
    for segment in requested {
        match fragments.get(segment.id.as_str()) {
            Some(fragment) => segments.push(Segment::new(segment.id.clone(), *fragment)),
            None => missing.push(segment.id.clone()),
        }
    }

    Reconciliation { segments, missing }
}
