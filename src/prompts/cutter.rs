//! Cut-specification prompt.
//!
//! The model sees full article text but answers only with start and end
//! phrases; the quote itself is extracted locally.

use crate::agents::types::{SearchResult, SourceRecord};

/// Characters of each source shown to the model.
pub const MAX_SOURCE_CHARS: usize = 8000;

const CUT_TEMPLATE: &str = r#"You are cutting evidence cards for debate.

ARGUMENT TO SUPPORT: {argument}
SEARCH INTENT: {intent}
EVIDENCE TYPE: {kind}

SOURCES:{sources}

Identify 1-3 quotable passages that support the argument.

For EACH card, output a JSON object with:
- source_index: which source (1-based)
- start_phrase: the first 5-8 words of the quote, copied exactly
- end_phrase: the last 5-8 words of the quote, copied exactly
- tag: what this evidence proves (5-12 words)
- author: author name or organization
- year: publication year
- semantic_hint: short category for grouping similar cards

Do NOT copy the quote text itself.

Output a JSON array:
[
  {
    "source_index": 1,
    "start_phrase": "According to the 2024 study",
    "end_phrase": "significant economic impact",
    "tag": "Tariffs cost US households $1,300 a year",
    "author": "Smith",
    "year": "2024",
    "semantic_hint": "economic costs"
  }
]

Only output the JSON array."#;

/// Builds the cut prompt for one result and its fetched sources.
///
/// Sources are numbered from 1 in the order given; `source_index` in the
/// response refers to that numbering.
pub fn build_cut_prompt(result: &SearchResult, sources: &[&SourceRecord]) -> String {
    let mut rendered = String::new();
    for (i, source) in sources.iter().enumerate() {
        let title = if source.title.is_empty() { "Untitled" } else { &source.title };
        let text: String = source
            .text
            .as_deref()
            .unwrap_or_default()
            .chars()
            .take(MAX_SOURCE_CHARS)
            .collect();
        rendered.push_str(&format!(
            "\n\n=== SOURCE {}: {} ===\nURL: {}\n\n{}",
            i + 1,
            title,
            source.url,
            text
        ));
    }

    CUT_TEMPLATE
        .replace("{argument}", &result.argument)
        .replace("{intent}", &result.search_intent)
        .replace("{kind}", result.kind.as_str())
        .replace("{sources}", &rendered)
}
