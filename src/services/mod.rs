pub mod llm_service;

pub use llm_service::{html_to_text, parse_json_reply, ExtractionAgent, LlmService};
