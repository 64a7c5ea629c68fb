//! Search query prompt.

use crate::scheduler::TaskKind;

const QUERY_TEMPLATE: &str = r#"Write ONE web search query to find evidence for a debate argument.

Argument: {argument}
Evidence wanted: {intent}
Evidence type: {kind}

Prefer queries that surface studies, reports, statistics, and expert analysis
from credible outlets. Use 4-10 words. Do not use quotes or search operators.{retry}

Output only the query, nothing else."#;

/// Extra guidance appended once a task has failed before.
pub fn retry_instructions(attempt: u32) -> &'static str {
    match attempt {
        0 => "",
        1 => "\nIMPORTANT: Previous search failed. Try broader terms or alternative phrasing.",
        _ => "\nIMPORTANT: Multiple attempts failed. Use very different keywords or approach the topic from a different angle.",
    }
}

/// Builds the query prompt for one task.
///
/// # Arguments
///
/// * `argument` - The claim to research
/// * `intent` - What evidence to look for; the argument is used when empty
/// * `kind` - Kind of evidence wanted
/// * `attempt` - Failed attempts so far, which escalates the retry guidance
pub fn build_query_prompt(argument: &str, intent: &str, kind: TaskKind, attempt: u32) -> String {
    let intent = if intent.trim().is_empty() { argument } else { intent };
    QUERY_TEMPLATE
        .replace("{argument}", argument)
        .replace("{intent}", intent)
        .replace("{kind}", kind.as_str())
        .replace("{retry}", retry_instructions(attempt))
}
