//! Response nodes. Each returns the [`StateDelta`] it wants applied; none mutates state.

use std::time::Duration;

use autostream_core::config::SinkFailurePolicy;
use autostream_core::domain::{CompletedLead, ConversationState, LeadField, StateDelta};
use autostream_core::errors::TurnError;
use tracing::{info, warn};

use crate::capture::LeadCaptureSink;
use crate::extraction::SlotExtractor;
use crate::guard::{ActionDecision, ActionGuard};
use crate::llm::{complete_within, CompletionRequest, LlmClient};
use crate::prompts;
use crate::retrieval::Retriever;

pub const GREETING_REPLY: &str = "Hello! I'm here to help you with AutoStream, your AI-powered video editing assistant. How can I assist you today?";
pub const LEAD_FIRST_PROMPT: &str =
    "That's great! I'd love to help you get started with AutoStream. May I have your name?";
pub const ASK_NAME_REPLY: &str = "May I have your name?";
pub const ASK_PLATFORM_REPLY: &str =
    "Great! Which social media platform do you primarily create content for?";
pub const CAPTURE_CONFIRMATION: &str = "Thank you! Your information has been captured. Our team will reach out to you soon to help you get started with AutoStream!";
pub const CAPTURE_RETRY_REPLY: &str = "Sorry, I couldn't submit your details just now. I'll try again the next time we continue your sign-up.";

pub fn ask_email_reply(name: &str) -> String {
    format!("Thanks, {name}! What's your email address?")
}

pub fn collection_complete_reply(name: &str) -> String {
    format!("Perfect! I have all your information. Let me get you set up, {name}!")
}

pub fn greeting() -> StateDelta {
    StateDelta::reply(GREETING_REPLY)
}

pub struct AnswerSettings {
    pub top_k: usize,
    pub temperature: f32,
    pub timeout: Duration,
}

pub async fn answer(
    question: &str,
    retriever: &dyn Retriever,
    llm: &dyn LlmClient,
    settings: &AnswerSettings,
) -> Result<StateDelta, TurnError> {
    let passages =
        match tokio::time::timeout(settings.timeout, retriever.retrieve(question, settings.top_k))
            .await
        {
            Ok(result) => result.map_err(|err| TurnError::Retrieval(err.to_string()))?,
            Err(_) => {
                return Err(TurnError::Retrieval(format!(
                    "retrieval timed out after {}ms",
                    settings.timeout.as_millis()
                )))
            }
        };

    let context = passages.join("\n\n");
    let request = CompletionRequest::new(prompts::answer(&context, question), settings.temperature);
    let reply = complete_within(llm, request, settings.timeout)
        .await
        .map_err(|err| TurnError::Generation(format!("{err:#}")))?;

    Ok(StateDelta::reply(reply))
}

/// One slot-filling step: at most one field is extracted, always the first missing one.
pub async fn lead_collect(
    state: &ConversationState,
    text: &str,
    extractor: &SlotExtractor,
) -> StateDelta {
    let current = state.lead_info();
    if !current.has_any() && !state.collecting_lead() {
        return StateDelta::reply(LEAD_FIRST_PROMPT).collecting(true);
    }

    let mut lead = current.clone();
    let mut captured = None;
    if let Some(field) = current.next_missing() {
        if let Some(value) = extractor.extract(field, text).await {
            info!(
                event_name = "agent.lead.field_captured",
                field = %field,
                filled = current.filled_count() + 1,
                "lead field captured"
            );
            lead = lead.with(field, value.clone());
            captured = Some((field, value));
        }
    }

    let name = lead.get(LeadField::Name).unwrap_or_default();
    let mut delta = match lead.next_missing() {
        Some(LeadField::Name) => StateDelta::reply(ASK_NAME_REPLY),
        Some(LeadField::Email) => StateDelta::reply(ask_email_reply(name)),
        Some(LeadField::Platform) => StateDelta::reply(ASK_PLATFORM_REPLY),
        None => StateDelta::reply(collection_complete_reply(name)).collecting(false),
    };
    delta.captured = captured;
    delta
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CaptureOutcome {
    Captured(CompletedLead),
    Failed { lead: CompletedLead, error: String },
    Skipped { reason_code: &'static str },
}

/// Fires the lead capture at most once. `None` means the guard refused and nothing changes.
pub async fn execute(
    state: &ConversationState,
    guard: &ActionGuard,
    sink: &dyn LeadCaptureSink,
    policy: SinkFailurePolicy,
    timeout: Duration,
) -> (Option<StateDelta>, CaptureOutcome) {
    let lead = match guard.evaluate(state) {
        ActionDecision::Fire(lead) => lead,
        ActionDecision::Skip { reason_code } => {
            info!(reason_code, "lead capture skipped");
            return (None, CaptureOutcome::Skipped { reason_code });
        }
    };

    let result = match tokio::time::timeout(timeout, sink.capture(&lead)).await {
        Ok(result) => result.map_err(|err| format!("{err:#}")),
        Err(_) => Err(format!("lead sink timed out after {}ms", timeout.as_millis())),
    };

    match result {
        Ok(()) => {
            info!(event_name = "agent.lead.capture_fired", sink = sink.name(), "lead capture fired");
            let delta = StateDelta::reply(CAPTURE_CONFIRMATION).marking_tool_called();
            (Some(delta), CaptureOutcome::Captured(lead))
        }
        Err(error) => {
            warn!(
                event_name = "agent.lead.capture_failed",
                sink = sink.name(),
                policy = policy.as_str(),
                error = %error,
                "lead capture failed"
            );
            let delta = match policy {
                SinkFailurePolicy::MarkAttempted => {
                    StateDelta::reply(CAPTURE_CONFIRMATION).marking_tool_called()
                }
                SinkFailurePolicy::AllowRetry => StateDelta::reply(CAPTURE_RETRY_REPLY),
            };
            (Some(delta), CaptureOutcome::Failed { lead, error })
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use autostream_core::config::SinkFailurePolicy;
    use autostream_core::domain::{CompletedLead, ConversationState, Intent, LeadField, LeadInfo};
    use autostream_core::errors::TurnError;

    use super::{
        answer, execute, lead_collect, AnswerSettings, CaptureOutcome, ASK_NAME_REPLY,
        ASK_PLATFORM_REPLY, CAPTURE_CONFIRMATION, CAPTURE_RETRY_REPLY, LEAD_FIRST_PROMPT,
    };
    use crate::capture::{InMemoryLeadCapture, LeadCaptureSink};
    use crate::extraction::SlotExtractor;
    use crate::guard::ActionGuard;
    use crate::llm::ScriptedLlmClient;
    use crate::retrieval::{LazyKnowledgeRetriever, RetrievalError, Retriever};

    struct UnavailableRetriever;

    #[async_trait]
    impl Retriever for UnavailableRetriever {
        async fn retrieve(&self, _query: &str, _top_k: usize) -> Result<Vec<String>, RetrievalError> {
            Err(RetrievalError::Empty)
        }
    }

    fn settings() -> AnswerSettings {
        AnswerSettings { top_k: 2, temperature: 0.3, timeout: Duration::from_secs(1) }
    }

    fn extractor(client: ScriptedLlmClient) -> (SlotExtractor, Arc<ScriptedLlmClient>) {
        let client = Arc::new(client);
        (SlotExtractor::new(client.clone(), 0.0, Duration::from_secs(1)), client)
    }

    fn collecting(lead: LeadInfo) -> ConversationState {
        ConversationState::restore(Vec::new(), Intent::HighIntent, lead, false, true)
    }

    #[tokio::test]
    async fn answer_passes_joined_context_and_returns_raw_output() {
        let client = ScriptedLlmClient::new().with_fallback("The Pro plan costs $79/month.");
        let retriever = LazyKnowledgeRetriever::builtin();

        let delta = answer("How much is the Pro plan?", &retriever, &client, &settings())
            .await
            .expect("answer succeeds");

        assert_eq!(delta.reply, "The Pro plan costs $79/month.");
        assert!(delta.captured.is_none());
        let prompt = &client.prompts()[0];
        assert!(prompt.contains("User question: How much is the Pro plan?"));
        assert!(prompt.contains("Pro Plan: $79/month."));
    }

    #[tokio::test]
    async fn answer_failures_map_to_turn_errors() {
        let client = ScriptedLlmClient::new().with_fallback("unused");
        let retrieval = answer("pricing?", &UnavailableRetriever, &client, &settings()).await;
        assert!(matches!(retrieval, Err(TurnError::Retrieval(_))));
        assert_eq!(client.call_count(), 0);

        let failing = ScriptedLlmClient::new().fail_on("AutoStream", "quota exceeded");
        let generation =
            answer("pricing?", &LazyKnowledgeRetriever::builtin(), &failing, &settings()).await;
        assert!(matches!(generation, Err(TurnError::Generation(ref m)) if m.contains("quota")));
    }

    #[tokio::test]
    async fn first_entry_asks_for_name_without_extracting() {
        let (extractor, client) = extractor(ScriptedLlmClient::new().with_fallback("Sam"));
        let delta = lead_collect(&ConversationState::new(), "I want to sign up", &extractor).await;

        assert_eq!(delta.reply, LEAD_FIRST_PROMPT);
        assert_eq!(delta.collecting_lead, Some(true));
        assert!(delta.captured.is_none());
        assert_eq!(client.call_count(), 0);
    }

    #[tokio::test]
    async fn name_then_email_prompt_addresses_user() {
        let (extractor, _) = extractor(ScriptedLlmClient::new().on("person's name", "Sam"));
        let delta = lead_collect(&collecting(LeadInfo::default()), "I'm Sam", &extractor).await;

        assert_eq!(delta.captured, Some((LeadField::Name, "Sam".to_string())));
        assert_eq!(delta.reply, "Thanks, Sam! What's your email address?");
    }

    #[tokio::test]
    async fn missing_name_is_asked_again() {
        let (extractor, _) = extractor(ScriptedLlmClient::new().with_fallback("NOT_FOUND"));
        let delta = lead_collect(&collecting(LeadInfo::default()), "hmm", &extractor).await;

        assert!(delta.captured.is_none());
        assert_eq!(delta.reply, ASK_NAME_REPLY);
        assert_eq!(delta.collecting_lead, None);
    }

    #[tokio::test]
    async fn only_the_next_missing_field_is_extracted() {
        // the message carries a name, an email and a platform; only the email may be taken
        let (extractor, client) = extractor(ScriptedLlmClient::new().with_fallback("Instagram"));
        let lead = LeadInfo::default().with(LeadField::Name, "Sam");
        let delta =
            lead_collect(&collecting(lead), "Alex here, sam@x.com, on Instagram", &extractor).await;

        assert_eq!(delta.captured, Some((LeadField::Email, "sam@x.com".to_string())));
        assert_eq!(delta.reply, ASK_PLATFORM_REPLY);
        assert_eq!(client.call_count(), 0);
    }

    #[tokio::test]
    async fn last_field_completes_collection() {
        let (extractor, _) =
            extractor(ScriptedLlmClient::new().on("social media platform", "Instagram"));
        let lead =
            LeadInfo::default().with(LeadField::Name, "Sam").with(LeadField::Email, "sam@x.com");
        let delta = lead_collect(&collecting(lead), "Instagram mostly", &extractor).await;

        assert_eq!(delta.captured, Some((LeadField::Platform, "Instagram".to_string())));
        assert_eq!(delta.collecting_lead, Some(false));
        assert_eq!(delta.reply, "Perfect! I have all your information. Let me get you set up, Sam!");
    }

    fn ready_state(tool_called: bool) -> ConversationState {
        let lead = LeadInfo::default()
            .with(LeadField::Name, "Sam")
            .with(LeadField::Email, "sam@x.com")
            .with(LeadField::Platform, "Instagram");
        ConversationState::restore(Vec::new(), Intent::HighIntent, lead, tool_called, false)
    }

    #[tokio::test]
    async fn execute_fires_once_and_marks_tool_called() {
        let sink = InMemoryLeadCapture::default();
        let (delta, outcome) = execute(
            &ready_state(false),
            &ActionGuard,
            &sink,
            SinkFailurePolicy::MarkAttempted,
            Duration::from_secs(1),
        )
        .await;

        let delta = delta.expect("capture delta");
        assert!(delta.mark_tool_called);
        assert_eq!(delta.reply, CAPTURE_CONFIRMATION);
        assert!(matches!(outcome, CaptureOutcome::Captured(_)));
        assert_eq!(sink.captured().len(), 1);

        let (second, outcome) = execute(
            &ready_state(true),
            &ActionGuard,
            &sink,
            SinkFailurePolicy::MarkAttempted,
            Duration::from_secs(1),
        )
        .await;
        assert!(second.is_none());
        assert_eq!(outcome, CaptureOutcome::Skipped { reason_code: "already_fired" });
        assert_eq!(sink.attempts(), 1);
    }

    #[tokio::test]
    async fn sink_failure_follows_policy() {
        let sink = InMemoryLeadCapture::failing();

        let (attempted, outcome) = execute(
            &ready_state(false),
            &ActionGuard,
            &sink,
            SinkFailurePolicy::MarkAttempted,
            Duration::from_secs(1),
        )
        .await;
        let attempted = attempted.expect("delta under mark_attempted");
        assert!(attempted.mark_tool_called);
        assert_eq!(attempted.reply, CAPTURE_CONFIRMATION);
        assert!(matches!(outcome, CaptureOutcome::Failed { .. }));

        let (retry, _) = execute(
            &ready_state(false),
            &ActionGuard,
            &sink,
            SinkFailurePolicy::AllowRetry,
            Duration::from_secs(1),
        )
        .await;
        let retry = retry.expect("delta under allow_retry");
        assert!(!retry.mark_tool_called);
        assert_eq!(retry.reply, CAPTURE_RETRY_REPLY);
    }

    struct StalledSink;

    #[async_trait]
    impl LeadCaptureSink for StalledSink {
        fn name(&self) -> &'static str {
            "stalled"
        }

        async fn capture(&self, _lead: &CompletedLead) -> anyhow::Result<()> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn stalled_sink_times_out_and_follows_policy() {
        let (attempted, outcome) = execute(
            &ready_state(false),
            &ActionGuard,
            &StalledSink,
            SinkFailurePolicy::MarkAttempted,
            Duration::from_millis(20),
        )
        .await;
        let attempted = attempted.expect("delta under mark_attempted");
        assert!(attempted.mark_tool_called);
        assert_eq!(attempted.reply, CAPTURE_CONFIRMATION);
        match outcome {
            CaptureOutcome::Failed { error, .. } => {
                assert!(error.contains("lead sink timed out after 20ms"), "{error}");
            }
            other => panic!("expected a failed capture, got {other:?}"),
        }

        let (retry, outcome) = execute(
            &ready_state(false),
            &ActionGuard,
            &StalledSink,
            SinkFailurePolicy::AllowRetry,
            Duration::from_millis(20),
        )
        .await;
        let retry = retry.expect("delta under allow_retry");
        assert!(!retry.mark_tool_called);
        assert_eq!(retry.reply, CAPTURE_RETRY_REPLY);
        assert!(matches!(outcome, CaptureOutcome::Failed { .. }));
    }
}
