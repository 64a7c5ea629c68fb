//! Prompts for the strategy agent's generation phases.

use super::format_existing;
use crate::agents::types::Side;

const ARGUMENTS_TEMPLATE: &str = r#"You are a debate strategist for Public Forum debate.

Resolution: {resolution}
Side: {side}

Already researched arguments: {existing}

Generate 2-3 NEW arguments to research. Do not repeat or rephrase existing ones.
Keep every field CONCISE (3-10 words):
- argument: a specific, provable claim
- search_intent: what evidence would prove it
- kind: "support"
- class: one of "stock", "creative", "niche", "opportunistic", "second_order"

Output a JSON array:
[
  {
    "argument": "Concise specific claim",
    "search_intent": "What evidence to find",
    "kind": "support",
    "class": "stock"
  }
]

Only output the JSON array."#;

const ANSWERS_TEMPLATE: &str = r#"You are a debate strategist preparing ANSWERS to opponent arguments.

Resolution: {resolution}
Your side: {side}
Opponent side: {opponent}

Already prepared answers: {existing}

Generate 2-3 answers to claims the opponent is likely to make.
Keep every field CONCISE (3-10 words):
- argument: "AT: " followed by the opponent claim
- search_intent: evidence that refutes or mitigates it
- kind: "answer"
- class: one of "stock", "creative", "niche", "opportunistic", "second_order"

Output a JSON array:
[
  {
    "argument": "AT: Concise opponent claim",
    "search_intent": "Evidence that refutes this",
    "kind": "answer",
    "class": "stock"
  }
]

Only output the JSON array."#;

const IMPACTS_TEMPLATE: &str = r#"You are building IMPACT CHAINS for debate arguments.

Resolution: {resolution}
Side: {side}

Current arguments: {existing}

For the existing arguments, identify the TERMINAL IMPACT evidence still needed.
An impact chain reads: [internal link] -> [impact].
Keep every field CONCISE (3-10 words):
- argument: "Impact: " followed by the terminal impact
- search_intent: evidence that X leads to Y
- kind: "impact"
- class: "stock" or "second_order"

Generate 2 impact research tasks:
[
  {
    "argument": "Impact: Concise terminal impact",
    "search_intent": "Evidence linking to terminal harm",
    "kind": "impact",
    "class": "second_order"
  }
]

Only output the JSON array."#;

fn fill(template: &str, resolution: &str, side: Side, existing: &[&str]) -> String {
    template
        .replace("{resolution}", resolution)
        .replace("{side}", &side.as_str().to_uppercase())
        .replace("{opponent}", &side.opponent().as_str().to_uppercase())
        .replace("{existing}", &format_existing(existing))
}

/// Prompt for the `initial_arguments` phase.
///
/// # Arguments
///
/// * `resolution` - The resolution being debated
/// * `side` - The side being prepared
/// * `existing` - Arguments already in the task queue, so the model avoids them
pub fn build_arguments_prompt(resolution: &str, side: Side, existing: &[&str]) -> String {
    fill(ARGUMENTS_TEMPLATE, resolution, side, existing)
}

/// Prompt for the `opponent_answers` phase.
pub fn build_answers_prompt(resolution: &str, side: Side, existing: &[&str]) -> String {
    fill(ANSWERS_TEMPLATE, resolution, side, existing)
}

/// Prompt for the `impact_chains` phase.
pub fn build_impacts_prompt(resolution: &str, side: Side, existing: &[&str]) -> String {
    fill(IMPACTS_TEMPLATE, resolution, side, existing)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arguments_prompt_fills_placeholders() {
        let prompt = build_arguments_prompt("Resolved: X", Side::Con, &["Jobs lost"]);
        assert!(prompt.contains("Resolution: Resolved: X"));
        assert!(prompt.contains("Side: CON"));
        assert!(prompt.contains("Jobs lost"));
        assert!(!prompt.contains("{existing}"));
    }

    #[test]
    fn test_answers_prompt_names_opponent() {
        let prompt = build_answers_prompt("Resolved: X", Side::Pro, &[]);
        assert!(prompt.contains("Opponent side: CON"));
        assert!(prompt.contains("(none yet)"));
    }

    #[test]
    fn test_impacts_prompt_requests_impact_kind() {
        let prompt = build_impacts_prompt("Resolved: X", Side::Pro, &[]);
        assert!(prompt.contains("\"kind\": \"impact\""));
    }
}
