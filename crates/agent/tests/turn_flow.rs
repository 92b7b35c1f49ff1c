use std::sync::Arc;
use std::time::Duration;

use autostream_agent::nodes::{
    ASK_PLATFORM_REPLY, CAPTURE_CONFIRMATION, CAPTURE_RETRY_REPLY, GREETING_REPLY,
    LEAD_FIRST_PROMPT,
};
use autostream_agent::prompts;
use autostream_agent::{AgentRuntime, InMemoryLeadCapture, RuntimeSettings, ScriptedLlmClient};
use autostream_core::audit::{AuditOutcome, InMemoryAuditSink};
use autostream_core::config::SinkFailurePolicy;
use autostream_core::domain::{ConversationState, Intent, LeadField, LeadInfo};
use autostream_core::errors::TurnError;
use autostream_core::flows::TurnNode;

const PLANS_ANSWER: &str = "We offer the Basic plan at $29/month and the Pro plan at $79/month.";

fn scripted() -> ScriptedLlmClient {
    ScriptedLlmClient::new()
        .on(prompts::classification("Hi there"), "greeting")
        .on(prompts::classification("I want to sign up"), "high_intent")
        .on(prompts::classification("I'm ready to get started"), "high_intent")
        .on(prompts::classification("What plans do you offer?"), "inquiry")
        .on(prompts::classification("maybe"), "maybe")
        .on("Extract the person's name", "Sam")
        .on("Extract the social media platform", "Instagram")
        .on("User question:", PLANS_ANSWER)
}

struct Harness {
    runtime: AgentRuntime,
    llm: Arc<ScriptedLlmClient>,
    sink: Arc<InMemoryLeadCapture>,
    audit: InMemoryAuditSink,
}

fn harness_with(llm: ScriptedLlmClient, settings: RuntimeSettings) -> Harness {
    let llm = Arc::new(llm);
    let sink = Arc::new(InMemoryLeadCapture::default());
    let audit = InMemoryAuditSink::default();
    let runtime = AgentRuntime::builder()
        .llm(llm.clone())
        .lead_sink(sink.clone())
        .audit_sink(Arc::new(audit.clone()))
        .settings(settings)
        .build()
        .expect("runtime");
    Harness { runtime, llm, sink, audit }
}

fn harness() -> Harness {
    harness_with(scripted(), RuntimeSettings::default())
}

fn lead(fields: &[(LeadField, &str)]) -> LeadInfo {
    fields.iter().fold(LeadInfo::default(), |lead, (field, value)| lead.with(*field, *value))
}

fn collecting(fields: &[(LeadField, &str)]) -> ConversationState {
    ConversationState::restore(Vec::new(), Intent::HighIntent, lead(fields), false, true)
}

#[tokio::test]
async fn sign_up_request_asks_for_name_and_starts_collection() {
    let h = harness();
    let mut state = ConversationState::new();

    let outcome = h.runtime.process_turn(&mut state, "I want to sign up").await.expect("turn");

    assert_eq!(outcome.intent, Intent::HighIntent);
    assert_eq!(outcome.reply, LEAD_FIRST_PROMPT);
    assert!(state.collecting_lead());
    assert!(!state.lead_info().has_any());
    assert_eq!(outcome.trace.render(), "start -> classify -> lead_collect -> done");
}

#[tokio::test]
async fn email_is_matched_by_pattern_and_platform_is_asked() {
    let h = harness();
    let mut state = collecting(&[(LeadField::Name, "Sam")]);

    let outcome = h.runtime.process_turn(&mut state, "sam@x.com").await.expect("turn");

    assert_eq!(state.lead_info().get(LeadField::Email), Some("sam@x.com"));
    assert_eq!(outcome.reply, ASK_PLATFORM_REPLY);
    assert_eq!(h.llm.call_count(), 0, "neither classification nor extraction reached the service");
}

#[tokio::test]
async fn final_field_completes_collection_and_fires_capture_in_the_same_turn() {
    let h = harness();
    let mut state = collecting(&[(LeadField::Name, "Sam"), (LeadField::Email, "sam@x.com")]);

    let outcome = h.runtime.process_turn(&mut state, "Mostly Instagram").await.expect("turn");

    assert!(state.tool_called());
    assert!(!state.collecting_lead());
    assert!(outcome.lead_captured);
    assert_eq!(outcome.reply, CAPTURE_CONFIRMATION);
    assert_eq!(outcome.trace.render(), "start -> lead_collect -> execute -> done");

    let agent_replies: Vec<_> =
        state.history().iter().skip(1).map(|turn| turn.text.as_str()).collect();
    assert_eq!(
        agent_replies,
        vec!["Perfect! I have all your information. Let me get you set up, Sam!", CAPTURE_CONFIRMATION]
    );

    let captured = h.sink.captured();
    assert_eq!(captured.len(), 1);
    assert_eq!(captured[0].platform, "Instagram");

    let attempts = h.audit.events_of_type("agent.lead.capture_attempted");
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].outcome, AuditOutcome::Success);
}

#[tokio::test]
async fn complete_unfired_lead_fires_when_user_reconfirms() {
    let h = harness();
    let full = lead(&[
        (LeadField::Name, "Sam"),
        (LeadField::Email, "sam@x.com"),
        (LeadField::Platform, "Instagram"),
    ]);
    let mut state = ConversationState::restore(Vec::new(), Intent::HighIntent, full, false, false);

    let outcome =
        h.runtime.process_turn(&mut state, "I'm ready to get started").await.expect("turn");

    assert!(state.tool_called());
    assert!(outcome.lead_captured);
    assert!(outcome.trace.visited(TurnNode::Execute));
    assert_eq!(h.sink.attempts(), 1);
}

#[tokio::test]
async fn partial_lead_always_routes_to_lead_collection() {
    // the classifier would call this a greeting; it must never be consulted
    let llm = ScriptedLlmClient::new()
        .on("Classify the user's intent", "greeting")
        .on("Extract the person's name", "NOT_FOUND")
        .on("Extract the email address", "NOT_FOUND")
        .on("Extract the social media platform", "NOT_FOUND");
    let h = harness_with(llm, RuntimeSettings::default());

    for fields in [
        vec![(LeadField::Name, "Sam")],
        vec![(LeadField::Email, "sam@x.com")],
        vec![(LeadField::Name, "Sam"), (LeadField::Email, "sam@x.com")],
    ] {
        for collecting_lead in [true, false] {
            let mut state = ConversationState::restore(
                Vec::new(),
                Intent::HighIntent,
                lead(&fields),
                false,
                collecting_lead,
            );
            let outcome = h.runtime.process_turn(&mut state, "Hi there").await.expect("turn");
            assert_eq!(outcome.trace.dispatched(), Some(TurnNode::LeadCollect));
            assert!(!outcome.trace.visited(TurnNode::Classify));
        }
    }

    assert!(h.llm.prompts().iter().all(|prompt| !prompt.contains("Classify the user's intent")));
}

#[tokio::test]
async fn fields_are_extracted_in_order_and_never_overwritten() {
    let h = harness();
    let mut state = ConversationState::new();
    let mut snapshots = Vec::new();

    for text in ["I want to sign up", "I'm Sam", "sam@x.com", "Instagram", "Hi there"] {
        h.runtime.process_turn(&mut state, text).await.expect("turn");
        snapshots.push(state.lead_info().clone());
    }

    for pair in snapshots.windows(2) {
        for field in LeadField::ORDER {
            if let Some(before) = pair[0].get(field) {
                assert_eq!(pair[1].get(field), Some(before), "field {field} changed");
            }
        }
    }

    let extraction_order: Vec<_> = h
        .llm
        .prompts()
        .into_iter()
        .filter_map(|prompt| {
            if prompt.starts_with("Extract the person's name") {
                Some(LeadField::Name)
            } else if prompt.starts_with("Extract the email address") {
                Some(LeadField::Email)
            } else if prompt.starts_with("Extract the social media platform") {
                Some(LeadField::Platform)
            } else {
                None
            }
        })
        .collect();
    assert_eq!(extraction_order, vec![LeadField::Name, LeadField::Platform]);
    assert!(state.lead_info().has_all());
    assert_eq!(h.sink.attempts(), 1);
}

#[tokio::test]
async fn capture_fires_at_most_once_per_conversation() {
    let h = harness();
    let mut state = collecting(&[(LeadField::Name, "Sam"), (LeadField::Email, "sam@x.com")]);

    h.runtime.process_turn(&mut state, "Instagram").await.expect("capture turn");
    let again =
        h.runtime.process_turn(&mut state, "I'm ready to get started").await.expect("turn");

    assert!(!again.lead_captured);
    assert!(!again.trace.visited(TurnNode::Execute));
    assert_eq!(h.sink.attempts(), 1);
}

#[tokio::test]
async fn question_mid_collection_detours_and_resumes_at_the_same_field() {
    let h = harness();
    let mut state = ConversationState::new();
    h.runtime.process_turn(&mut state, "I want to sign up").await.expect("first turn");
    let before = state.lead_info().clone();

    let detour =
        h.runtime.process_turn(&mut state, "What plans do you offer?").await.expect("detour");

    assert_eq!(detour.intent, Intent::Inquiry);
    assert_eq!(detour.trace.dispatched(), Some(TurnNode::Answer));
    assert_eq!(detour.reply, PLANS_ANSWER);
    assert_eq!(state.lead_info(), &before);
    assert!(state.collecting_lead());

    let resumed = h.runtime.process_turn(&mut state, "I'm Sam").await.expect("resume");
    assert_eq!(resumed.trace.dispatched(), Some(TurnNode::LeadCollect));
    assert_eq!(state.lead_info().get(LeadField::Name), Some("Sam"));
    assert_eq!(resumed.reply, "Thanks, Sam! What's your email address?");
}

#[tokio::test]
async fn out_of_taxonomy_label_is_answered_as_an_inquiry() {
    let h = harness();
    let mut state = ConversationState::new();

    let outcome = h.runtime.process_turn(&mut state, "maybe").await.expect("turn");

    assert_eq!(outcome.intent, Intent::Inquiry);
    assert_eq!(outcome.trace.dispatched(), Some(TurnNode::Answer));
}

#[tokio::test]
async fn greeting_is_fixed_text() {
    let h = harness();
    let mut state = ConversationState::new();

    let outcome = h.runtime.process_turn(&mut state, "Hi there").await.expect("turn");

    assert_eq!(outcome.reply, GREETING_REPLY);
    assert_eq!(state.intent(), Intent::Greeting);
}

#[tokio::test]
async fn failed_turn_leaves_state_untouched() {
    let llm = ScriptedLlmClient::new()
        .on(prompts::classification("What plans do you offer?"), "inquiry")
        .fail_on("User question:", "upstream 503")
        .fail_on("Classify the user's intent", "connection refused");
    let h = harness_with(llm, RuntimeSettings::default());
    let mut state = ConversationState::new();
    let before = state.clone();

    let generation = h.runtime.process_turn(&mut state, "What plans do you offer?").await;
    assert!(matches!(generation, Err(TurnError::Generation(_))));
    assert_eq!(state, before);

    let classification = h.runtime.process_turn(&mut state, "hello").await;
    assert!(matches!(classification, Err(TurnError::Classification(_))));
    assert_eq!(state, before);

    assert_eq!(h.audit.events_of_type("agent.turn.failed").len(), 2);
    assert!(h.audit.events_of_type("agent.turn.routed").is_empty());
}

#[tokio::test]
async fn timed_out_or_cancelled_turn_leaves_state_untouched() {
    let slow = ScriptedLlmClient::new().with_fallback("greeting").with_delay(Duration::from_secs(5));
    let settings =
        RuntimeSettings { call_timeout: Duration::from_millis(50), ..RuntimeSettings::default() };
    let h = harness_with(slow, settings);
    let mut state = ConversationState::new();

    let timed_out = h.runtime.process_turn(&mut state, "Hi there").await;
    assert!(matches!(timed_out, Err(TurnError::Classification(ref m)) if m.contains("timed out")));
    assert!(state.history().is_empty());

    let patient = harness_with(
        ScriptedLlmClient::new().with_fallback("greeting").with_delay(Duration::from_secs(5)),
        RuntimeSettings::default(),
    );
    let cancelled = tokio::time::timeout(
        Duration::from_millis(20),
        patient.runtime.process_turn(&mut state, "Hi there"),
    )
    .await;
    assert!(cancelled.is_err());
    assert!(state.history().is_empty());
}

#[tokio::test]
async fn sink_failure_marks_attempted_by_default() {
    let h = harness();
    h.sink.set_failing(true);
    let mut state = collecting(&[(LeadField::Name, "Sam"), (LeadField::Email, "sam@x.com")]);

    let outcome = h.runtime.process_turn(&mut state, "Instagram").await.expect("turn");

    assert!(state.tool_called());
    assert!(!outcome.lead_captured);
    assert_eq!(outcome.reply, CAPTURE_CONFIRMATION);
    let attempts = h.audit.events_of_type("agent.lead.capture_attempted");
    assert_eq!(attempts[0].outcome, AuditOutcome::Failed);
}

#[tokio::test]
async fn sink_failure_can_be_retried_when_configured() {
    let settings = RuntimeSettings {
        sink_failure_policy: SinkFailurePolicy::AllowRetry,
        ..RuntimeSettings::default()
    };
    let h = harness_with(scripted(), settings);
    h.sink.set_failing(true);
    let mut state = collecting(&[(LeadField::Name, "Sam"), (LeadField::Email, "sam@x.com")]);

    let failed = h.runtime.process_turn(&mut state, "Instagram").await.expect("turn");
    assert_eq!(failed.reply, CAPTURE_RETRY_REPLY);
    assert!(!state.tool_called());

    h.sink.set_failing(false);
    let retried =
        h.runtime.process_turn(&mut state, "I'm ready to get started").await.expect("retry");
    assert!(retried.lead_captured);
    assert!(state.tool_called());
    assert_eq!(h.sink.attempts(), 2);
    assert_eq!(h.sink.captured().len(), 1);
}
