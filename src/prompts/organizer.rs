//! Brief analysis prompt used by the organizer to steer the strategy agent.

use crate::agents::types::Side;

const ANALYSIS_TEMPLATE: &str = r#"Analyze this debate prep brief for gaps and opportunities.

Resolution: {resolution}
Side: {side}

CURRENT BRIEF:
{outline}

Identify at most 2 items of:
1. GAPS: arguments that need more evidence
2. OPPORTUNITIES: new arguments suggested by existing evidence
3. LINK CHAINS: impact scenarios that need connecting evidence

Output a JSON array of feedback items:
[
  {
    "type": "gap",
    "message": "Brief description of the gap",
    "suggested_intent": "What to search for"
  }
]

"type" is one of "gap", "opportunity", "link_chain".
If the brief is well covered, output an empty array: []
Only output the JSON array."#;

pub fn build_analysis_prompt(resolution: &str, side: Side, outline: &str) -> String {
    let outline = if outline.trim().is_empty() { "(empty)" } else { outline };
    ANALYSIS_TEMPLATE
        .replace("{resolution}", resolution)
        .replace("{side}", &side.as_str().to_uppercase())
        .replace("{outline}", outline)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_outline_marked() {
        let prompt = build_analysis_prompt("Resolved: X", Side::Pro, "  ");
        assert!(prompt.contains("CURRENT BRIEF:\n(empty)"));
        assert!(prompt.contains("Side: PRO"));
    }
}
