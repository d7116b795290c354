//! LLM prompt templates.

pub mod extract_items;

pub use extract_items::{render_extract_items_prompt, EXTRACT_ITEMS_SYSTEM_PROMPT};
