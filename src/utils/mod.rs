//! Shared utility functions for prep-forge.
//!
//! Currently JSON extraction from LLM responses, used by every agent that
//! parses model output.

pub mod json_extraction;

pub use json_extraction::{
    extract_from_code_block, extract_json_array, extract_json_object, find_matching,
    parse_json_array, JsonExtractionError,
};
