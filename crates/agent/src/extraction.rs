use std::sync::{Arc, LazyLock};
use std::time::Duration;

use autostream_core::domain::LeadField;
use regex::Regex;
use tracing::{debug, warn};

use crate::llm::{complete_within, CompletionRequest, LlmClient};
use crate::prompts::{self, NOT_FOUND};

// constant pattern, compiled once and covered by `email_pattern_finds_address_inside_sentence`
static EMAIL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Z|a-z]{2,}\b")
        .expect("email pattern is a valid regex") // ubs:ignore
});

/// First email-shaped substring of `text`.
pub fn find_email(text: &str) -> Option<&str> {
    EMAIL_PATTERN.find(text).map(|found| found.as_str())
}

/// Fills one lead field from a user message. Failures are logged and read as "not found".
pub struct SlotExtractor {
    llm: Arc<dyn LlmClient>,
    temperature: f32,
    timeout: Duration,
}

impl SlotExtractor {
    pub fn new(llm: Arc<dyn LlmClient>, temperature: f32, timeout: Duration) -> Self {
        Self { llm, temperature, timeout }
    }

    pub async fn extract(&self, field: LeadField, text: &str) -> Option<String> {
        if field == LeadField::Email {
            if let Some(email) = find_email(text) {
                debug!(field = %field, "email matched by pattern");
                return Some(email.to_string());
            }
        }

        let prompt = match field {
            LeadField::Name => prompts::name_extraction(text),
            LeadField::Email => prompts::email_extraction(text),
            LeadField::Platform => prompts::platform_extraction(text),
        };
        let request = CompletionRequest::new(prompt, self.temperature);

        match complete_within(self.llm.as_ref(), request, self.timeout).await {
            Ok(raw) => accept(field, &raw),
            Err(err) => {
                warn!(
                    event_name = "agent.lead.extraction_failed",
                    field = %field,
                    error = %format!("{err:#}"),
                    "slot extraction failed, treating as not found"
                );
                None
            }
        }
    }
}

fn accept(field: LeadField, raw: &str) -> Option<String> {
    let value = raw.trim();
    if value.is_empty() || value == NOT_FOUND {
        return None;
    }
    if field == LeadField::Email && !value.contains('@') {
        return None;
    }
    Some(value.to_string())
}
