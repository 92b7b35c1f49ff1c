use std::sync::Arc;
use std::time::Duration;

use autostream_core::domain::Intent;
use autostream_core::errors::TurnError;
use tracing::debug;

use crate::llm::{complete_within, CompletionRequest, LlmClient};
use crate::prompts;

/// Markers that make a message read as a question while a lead is being collected.
pub const QUESTION_MARKERS: [&str; 8] =
    ["?", "what", "how", "why", "when", "where", "tell me", "explain"];

pub fn looks_like_question(text: &str) -> bool {
    let lowered = text.to_lowercase();
    QUESTION_MARKERS.iter().any(|marker| lowered.contains(marker))
}

pub struct IntentClassifier {
    llm: Arc<dyn LlmClient>,
    temperature: f32,
    timeout: Duration,
}

impl IntentClassifier {
    pub fn new(llm: Arc<dyn LlmClient>, temperature: f32, timeout: Duration) -> Self {
        Self { llm, temperature, timeout }
    }

    /// While collecting, questions detour to `Inquiry` and anything else continues the
    /// collection; no completion call is made in that mode.
    pub async fn classify(&self, text: &str, collecting_lead: bool) -> Result<Intent, TurnError> {
        if collecting_lead {
            let intent =
                if looks_like_question(text) { Intent::Inquiry } else { Intent::HighIntent };
            debug!(intent = %intent, "collection in progress, classifier overridden");
            return Ok(intent);
        }

        let request = CompletionRequest::new(prompts::classification(text), self.temperature);
        let raw = complete_within(self.llm.as_ref(), request, self.timeout)
            .await
            .map_err(|err| TurnError::Classification(format!("{err:#}")))?;

        let intent = Intent::from_label(&raw).unwrap_or(Intent::Inquiry);
        debug!(label = %raw.trim(), intent = %intent, "intent classified");
        Ok(intent)
    }
}
