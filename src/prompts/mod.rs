//! LLM prompts for each research agent.
//!
//! Templates are plain `const` strings with `{placeholder}` markers; the
//! `build_*` functions fill them in. Every prompt asks for bare JSON (or a
//! bare query line) so responses can go straight through
//! [`crate::utils::json_extraction`].
//!
//! - [`strategy`] - argument, answer, and impact generation
//! - [`search`] - one search query per task, with retry escalation
//! - [`cutter`] - cut specifications for quoting evidence
//! - [`organizer`] - gap and opportunity analysis of the brief
//!
//! # Usage
//!
//! ```
//! use prep_forge::agents::types::Side;
//! use prep_forge::prompts::build_arguments_prompt;
//!
//! let prompt = build_arguments_prompt("Resolved: tariffs do more harm than good", Side::Pro, &[]);
//! assert!(prompt.contains("(none yet)"));
//! ```

pub mod cutter;
pub mod organizer;
pub mod search;
pub mod strategy;

pub use cutter::{build_cut_prompt, MAX_SOURCE_CHARS};
pub use organizer::build_analysis_prompt;
pub use search::{build_query_prompt, retry_instructions};
pub use strategy::{build_answers_prompt, build_arguments_prompt, build_impacts_prompt};

/// Renders a list of prior items for inclusion in a prompt.
pub(crate) fn format_existing(items: &[&str]) -> String {
    if items.is_empty() {
        return "(none yet)".to_string();
    }
    items.join("; ")
}
