//! Cutter stage: cuts evidence cards out of staged search results.
//!
//! The LLM only names where each quote starts and ends; the quote text is
//! located and extracted locally with [`fuzzy_find`], which keeps the
//! model's output small and the card text verbatim.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::consumer::{Stage, StageContext};
use super::error::AgentResult;
use super::types::{Card, SearchResult, SourceRecord};
use crate::external::{offload, TextGenerator};
use crate::prompts::build_cut_prompt;
use crate::store::{PrepSession, TaskQueue};
use crate::utils::parse_json_array;

/// Quotes shorter than this are rejected.
pub const MIN_CARD_CHARS: usize = 50;
/// Quotes longer than this are truncated.
pub const MAX_CARD_CHARS: usize = 2000;

/// Where to cut one card, as returned by the model.
#[derive(Debug, Clone, PartialEq)]
pub struct CutSpec {
    /// 1-based index into the fetched sources.
    pub source_index: usize,
    pub start_phrase: String,
    pub end_phrase: String,
    pub tag: String,
    pub author: String,
    pub year: String,
    pub semantic_hint: String,
}

fn string_field(entry: &Value, key: &str) -> String {
    match entry.get(key) {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

impl CutSpec {
    /// Reads a spec from one response entry. Returns None if either phrase is missing.
    pub fn from_value(entry: &Value) -> Option<Self> {
        let source_index = match entry.get("source_index") {
            Some(Value::Number(n)) => n.as_u64()? as usize,
            Some(Value::String(s)) => s.trim().parse().ok()?,
            _ => 1,
        };
        let start_phrase = string_field(entry, "start_phrase");
        let end_phrase = string_field(entry, "end_phrase");
        if start_phrase.is_empty() || end_phrase.is_empty() {
            return None;
        }

        let author = string_field(entry, "author");
        let year = string_field(entry, "year");
        Some(Self {
            source_index,
            start_phrase,
            end_phrase,
            tag: string_field(entry, "tag"),
            author: if author.is_empty() { "Unknown".to_string() } else { author },
            year: if year.is_empty() { "n.d.".to_string() } else { year },
            semantic_hint: string_field(entry, "semantic_hint"),
        })
    }
}

fn floor_char_boundary(s: &str, mut idx: usize) -> usize {
    idx = idx.min(s.len());
    while !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

/// Locates `phrase` in `text`, returning the byte range of the match.
///
/// Tries a case-insensitive exact match, then a match with runs of
/// whitespace collapsed, then the first three words of the phrase. The
/// last fallback returns a range as long as the phrase from where the
/// words were found.
pub fn fuzzy_find(text: &str, phrase: &str) -> Option<(usize, usize)> {
    let phrase = phrase.trim().to_ascii_lowercase();
    if phrase.is_empty() {
        return None;
    }
    // ASCII lowercasing keeps byte offsets aligned with `text`.
    let lower = text.to_ascii_lowercase();

    if let Some(idx) = lower.find(&phrase) {
        return Some((idx, idx + phrase.len()));
    }

    // Whitespace-normalized text, with each normalized byte mapped back to
    // the original char it came from.
    let mut normalized = String::with_capacity(lower.len());
    let mut starts = Vec::with_capacity(lower.len());
    let mut ends = Vec::with_capacity(lower.len());
    let mut in_space = false;
    for (idx, ch) in lower.char_indices() {
        let end = idx + ch.len_utf8();
        if ch.is_whitespace() {
            if in_space {
                if let Some(last) = ends.last_mut() {
                    *last = end;
                }
                continue;
            }
            in_space = true;
            normalized.push(' ');
            starts.push(idx);
            ends.push(end);
        } else {
            in_space = false;
            normalized.push(ch);
            for _ in 0..ch.len_utf8() {
                starts.push(idx);
                ends.push(end);
            }
        }
    }
    let words: Vec<&str> = phrase.split_whitespace().collect();
    let normalized_phrase = words.join(" ");
    if let Some(idx) = normalized.find(&normalized_phrase) {
        let last = idx + normalized_phrase.len() - 1;
        return Some((starts[idx], ends[last]));
    }

    if words.len() >= 3 {
        let pattern = format!(
            r"\b{}",
            words[..3].iter().map(|w| regex::escape(w)).collect::<Vec<_>>().join(r"\s+")
        );
        if let Ok(re) = Regex::new(&pattern) {
            if let Some(m) = re.find(&lower) {
                let end = floor_char_boundary(text, m.start() + phrase.len()).max(m.end());
                return Some((m.start(), end));
            }
        }
    }

    None
}

/// Extracts the quote for `spec` and builds the card.
///
/// Returns None if the source index is out of range, either phrase cannot
/// be located, or the quote is shorter than [`MIN_CARD_CHARS`].
pub fn extract_card(spec: &CutSpec, index: usize, sources: &[&SourceRecord], result: &SearchResult) -> Option<Card> {
    let source = sources.get(spec.source_index.checked_sub(1)?)?;
    let text = source.text.as_deref()?;

    let (start, _) = fuzzy_find(text, &spec.start_phrase)?;
    let (_, end_offset) = fuzzy_find(&text[start..], &spec.end_phrase)?;
    let quote = text[start..start + end_offset].trim();

    if quote.chars().count() < MIN_CARD_CHARS {
        return None;
    }
    let quote = if quote.chars().count() > MAX_CARD_CHARS {
        let mut cut: String = quote.chars().take(MAX_CARD_CHARS).collect();
        cut.push_str("...");
        cut
    } else {
        quote.to_string()
    };

    Some(Card {
        id: Card::id_for(&result.id, index),
        result_id: result.id.clone(),
        task_id: result.task_id.clone(),
        argument: result.argument.clone(),
        kind: result.kind,
        class: result.class,
        tag: spec.tag.clone(),
        author: spec.author.clone(),
        year: spec.year.clone(),
        source_title: source.title.clone(),
        url: source.url.clone(),
        text: quote,
        semantic_hint: spec.semantic_hint.clone(),
        created_at: Utc::now(),
    })
}

/// The cutter stage.
pub struct CutterStage {
    generator: Arc<dyn TextGenerator>,
}

impl CutterStage {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator }
    }
}

#[async_trait]
impl Stage for CutterStage {
    type Input = SearchResult;

    fn name(&self) -> &str {
        "cutter"
    }

    fn input_queue(&self, session: &PrepSession) -> Arc<TaskQueue<SearchResult>> {
        session.results().clone()
    }

    fn describe(&self, result: &SearchResult) -> String {
        result.argument.clone()
    }

    async fn process(&self, result: &SearchResult, ctx: &StageContext<'_>) -> AgentResult<()> {
        ctx.state.set_direction(format!("Cutting: {}", result.argument));
        let sources = result.fetched_sources();
        if sources.is_empty() {
            debug!(result_id = %result.id, "No fetched text to cut");
            ctx.state.push_action(format!("No content: {}", result.argument));
            ctx.session.log_event("cutter", "no_content", json!({"result_id": result.id}));
            return Ok(());
        }

        let prompt = build_cut_prompt(result, &sources);
        let generator = self.generator.clone();
        let response = offload(move || generator.generate(&prompt)).await??;
        let entries: Vec<Value> = parse_json_array(&response)?;

        let mut created = 0u64;
        let mut located = 0usize;
        for (index, entry) in entries.iter().enumerate() {
            let Some(spec) = CutSpec::from_value(entry) else {
                warn!(result_id = %result.id, index, "Cut spec missing phrases");
                continue;
            };
            let Some(card) = extract_card(&spec, index, &sources, result) else {
                debug!(result_id = %result.id, index, start = %spec.start_phrase, "Could not cut card");
                continue;
            };
            located += 1;
            if ctx.session.cards().enqueue_if_absent(&card)? {
                created += 1;
                ctx.session.log_event(
                    "cutter",
                    "card_cut",
                    json!({"card_id": card.id, "result_id": result.id, "tag": card.tag}),
                );
            }
        }

        if located == 0 {
            ctx.session.log_event("cutter", "no_cuts", json!({"result_id": result.id, "specs": entries.len()}));
        }
        ctx.state.record_created(created);
        ctx.state.push_action(format!("Cut {} cards: {}", located, result.argument));
        info!(result_id = %result.id, specs = entries.len(), cards = located, "Result cut");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::state::AgentStateHandle;
    use crate::agents::types::Side;
    use crate::error::ExternalError;
    use crate::scheduler::{TaskClass, TaskKind};
    use std::sync::Mutex;
    use tempfile::TempDir;

    const ARTICLE: &str = "Economists agree on little. According to the 2019 study, tariffs \
        passed   through almost entirely to domestic prices, costing the average \
        household hundreds of dollars a year. Other findings were mixed.";

    fn result(sources: Vec<SourceRecord>) -> SearchResult {
        SearchResult {
            id: "res-t1".into(),
            task_id: "t1".into(),
            argument: "Tariffs raise consumer prices".into(),
            search_intent: "pass-through".into(),
            kind: TaskKind::Support,
            class: TaskClass::Creative,
            query: "tariff pass-through".into(),
            sources,
            created_at: Utc::now(),
        }
    }

    fn spec(start: &str, end: &str) -> CutSpec {
        CutSpec::from_value(&json!({
            "source_index": 1,
            "start_phrase": start,
            "end_phrase": end,
            "tag": "Tariffs cost households",
            "author": "Amiti",
            "year": 2019,
            "semantic_hint": "consumer costs"
        }))
        .unwrap()
    }

    struct CannedGenerator(String, Mutex<u32>);

    impl TextGenerator for CannedGenerator {
        fn generate(&self, _prompt: &str) -> Result<String, ExternalError> {
            *self.1.lock().unwrap() += 1;
            Ok(self.0.clone())
        }
    }

    #[test]
    fn test_fuzzy_find_exact_case_insensitive() {
        let (start, end) = fuzzy_find(ARTICLE, "ACCORDING TO THE 2019").unwrap();
        assert_eq!(&ARTICLE[start..end], "According to the 2019");
    }

    #[test]
    fn test_fuzzy_find_whitespace_normalized() {
        let (start, end) = fuzzy_find(ARTICLE, "passed through almost").unwrap();
        assert_eq!(&ARTICLE[start..end], "passed   through almost");
    }

    #[test]
    fn test_fuzzy_find_first_three_words() {
        let (start, _) = fuzzy_find(ARTICLE, "costing the average family thousands").unwrap();
        assert!(ARTICLE[start..].starts_with("costing the average"));
        assert!(fuzzy_find(ARTICLE, "nothing like this").is_none());
        assert!(fuzzy_find(ARTICLE, "  ").is_none());
    }

    #[test]
    fn test_spec_defaults() {
        let spec = CutSpec::from_value(&json!({"start_phrase": "a", "end_phrase": "b"})).unwrap();
        assert_eq!(spec.source_index, 1);
        assert_eq!(spec.author, "Unknown");
        assert_eq!(spec.year, "n.d.");
        assert!(CutSpec::from_value(&json!({"start_phrase": "a"})).is_none());
        assert_eq!(self::spec("a", "b").year, "2019");
    }

    #[test]
    fn test_extract_card() {
        let source = SourceRecord::fetched("https://nber.org/w", "NBER", ARTICLE);
        let result = result(vec![source.clone()]);
        let card = extract_card(
            &spec("According to the 2019 study", "hundreds of dollars a year."),
            0,
            &[&source],
            &result,
        )
        .unwrap();
        assert_eq!(card.id, "res-t1-c1");
        assert!(card.text.starts_with("According to the 2019 study"));
        assert!(card.text.ends_with("a year."));
        assert_eq!(card.class, TaskClass::Creative);
        assert_eq!(card.source_title, "NBER");
    }

    #[test]
    fn test_extract_card_length_limits() {
        let source = SourceRecord::fetched("https://nber.org/w", "NBER", ARTICLE);
        let result = result(vec![source.clone()]);
        // Too short.
        assert!(extract_card(&spec("According to", "the 2019 study"), 0, &[&source], &result).is_none());
        // Bad index.
        let mut bad = spec("According to", "a year.");
        bad.source_index = 2;
        assert!(extract_card(&bad, 0, &[&source], &result).is_none());

        let long_text = format!("START {} END", "word ".repeat(600));
        let long = SourceRecord::fetched("https://x.org", "X", long_text);
        let card = extract_card(&spec("START", "END"), 1, &[&long], &result).unwrap();
        assert_eq!(card.text.chars().count(), MAX_CARD_CHARS + 3);
        assert!(card.text.ends_with("..."));
    }

    #[tokio::test]
    async fn test_process_writes_cards_idempotently() {
        let dir = TempDir::new().unwrap();
        let session = PrepSession::create(dir.path(), "Resolved: tariffs", Side::Pro).unwrap();
        let generator = Arc::new(CannedGenerator(
            r#"[{"source_index": 1, "start_phrase": "According to the 2019 study", "end_phrase": "dollars a year", "tag": "Tariffs cost households"},
               {"source_index": 1, "start_phrase": "never appears anywhere", "end_phrase": "x"},
               {"source_index": 1}]"#
                .to_string(),
            Mutex::new(0),
        ));
        let stage = CutterStage::new(generator.clone());
        let state = AgentStateHandle::new("cutter");
        let ctx = StageContext {
            session: &session,
            state: &state,
            attempt: 0,
        };
        let result = result(vec![
            SourceRecord::failed("https://paywalled.com", "paywall"),
            SourceRecord::fetched("https://nber.org/w", "NBER", ARTICLE),
        ]);

        stage.process(&result, &ctx).await.unwrap();
        stage.process(&result, &ctx).await.unwrap();

        let cards = session.cards().all_items().unwrap();
        assert_eq!(cards.len(), 1);
        assert_eq!(cards[0].url, "https://nber.org/w");
        assert_eq!(state.snapshot().items_created, 1);
    }

    #[tokio::test]
    async fn test_result_without_text_completes_empty() {
        let dir = TempDir::new().unwrap();
        let session = PrepSession::create(dir.path(), "Resolved: tariffs", Side::Pro).unwrap();
        let generator = Arc::new(CannedGenerator("[]".to_string(), Mutex::new(0)));
        let stage = CutterStage::new(generator.clone());
        let state = AgentStateHandle::new("cutter");
        let ctx = StageContext {
            session: &session,
            state: &state,
            attempt: 0,
        };

        stage
            .process(&result(vec![SourceRecord::failed("https://a.org", "timeout")]), &ctx)
            .await
            .unwrap();
        assert_eq!(*generator.1.lock().unwrap(), 0);
        assert_eq!(session.cards().counts().total, 0);
    }
}
