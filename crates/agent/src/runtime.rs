use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use autostream_core::audit::{
    AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink, InMemoryAuditSink,
    TracingAuditSink,
};
use autostream_core::config::{AppConfig, SinkFailurePolicy};
use autostream_core::domain::{ConversationState, Intent, SessionId};
use autostream_core::errors::{DomainError, TurnError};
use autostream_core::flows::{LeadQualificationFlow, TurnEngine, TurnEvent, TurnNode, TurnTrace};
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::capture::{sink_from_config, LeadCaptureSink, LogLeadCapture};
use crate::extraction::SlotExtractor;
use crate::guard::ActionGuard;
use crate::intent::IntentClassifier;
use crate::llm::{HttpLlmClient, LlmClient};
use crate::nodes::{self, AnswerSettings, CaptureOutcome};
use crate::retrieval::{KnowledgeSource, LazyKnowledgeRetriever, Retriever};

const AUDIT_ACTOR: &str = "agent";

#[derive(Clone, Debug, PartialEq)]
pub struct RuntimeSettings {
    pub top_k: usize,
    pub classification_temperature: f32,
    pub answer_temperature: f32,
    pub call_timeout: Duration,
    pub sink_failure_policy: SinkFailurePolicy,
}

impl RuntimeSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            top_k: config.retrieval.top_k,
            classification_temperature: config.llm.classification_temperature,
            answer_temperature: config.llm.answer_temperature,
            call_timeout: Duration::from_secs(config.llm.timeout_secs),
            sink_failure_policy: config.lead_capture.on_failure,
        }
    }
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TurnOutcome {
    pub reply: String,
    pub intent: Intent,
    pub trace: TurnTrace,
    /// True when the lead sink acknowledged a capture during this turn.
    pub lead_captured: bool,
}

/// Drives one conversation turn through the routing table and the response nodes.
pub struct AgentRuntime {
    engine: TurnEngine<LeadQualificationFlow>,
    llm: Arc<dyn LlmClient>,
    classifier: IntentClassifier,
    extractor: SlotExtractor,
    retriever: Arc<dyn Retriever>,
    lead_sink: Arc<dyn LeadCaptureSink>,
    audit: Arc<dyn AuditSink>,
    guard: ActionGuard,
    settings: RuntimeSettings,
}

#[derive(Default)]
pub struct AgentRuntimeBuilder {
    llm: Option<Arc<dyn LlmClient>>,
    retriever: Option<Arc<dyn Retriever>>,
    lead_sink: Option<Arc<dyn LeadCaptureSink>>,
    audit: Option<Arc<dyn AuditSink>>,
    settings: Option<RuntimeSettings>,
}

impl AgentRuntimeBuilder {
    pub fn llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn retriever(mut self, retriever: Arc<dyn Retriever>) -> Self {
        self.retriever = Some(retriever);
        self
    }

    pub fn lead_sink(mut self, lead_sink: Arc<dyn LeadCaptureSink>) -> Self {
        self.lead_sink = Some(lead_sink);
        self
    }

    pub fn audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn settings(mut self, settings: RuntimeSettings) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn build(self) -> Result<AgentRuntime> {
        let llm = self.llm.ok_or_else(|| anyhow!("agent runtime requires a completion client"))?;
        let settings = self.settings.unwrap_or_default();

        Ok(AgentRuntime {
            engine: TurnEngine::default(),
            classifier: IntentClassifier::new(
                llm.clone(),
                settings.classification_temperature,
                settings.call_timeout,
            ),
            extractor: SlotExtractor::new(
                llm.clone(),
                settings.classification_temperature,
                settings.call_timeout,
            ),
            llm,
            retriever: self
                .retriever
                .unwrap_or_else(|| Arc::new(LazyKnowledgeRetriever::builtin())),
            lead_sink: self.lead_sink.unwrap_or_else(|| Arc::new(LogLeadCapture)),
            audit: self.audit.unwrap_or_else(|| Arc::new(TracingAuditSink)),
            guard: ActionGuard,
            settings,
        })
    }
}

impl AgentRuntime {
    pub fn builder() -> AgentRuntimeBuilder {
        AgentRuntimeBuilder::default()
    }

    /// Wires the HTTP completion client, the configured knowledge base and lead sink.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let settings = RuntimeSettings::from_config(config);
        let retriever = LazyKnowledgeRetriever::new(
            KnowledgeSource::from_path(config.retrieval.knowledge_base_path.as_deref()),
            config.retrieval.embedding_dimensions,
        );
        let lead_sink = sink_from_config(&config.lead_capture, settings.call_timeout)?;

        Self::builder()
            .llm(Arc::new(HttpLlmClient::from_config(&config.llm)?))
            .retriever(Arc::new(retriever))
            .lead_sink(lead_sink)
            .settings(settings)
            .build()
    }

    pub fn settings(&self) -> &RuntimeSettings {
        &self.settings
    }

    pub async fn process_turn(
        &self,
        state: &mut ConversationState,
        text: &str,
    ) -> Result<TurnOutcome, TurnError> {
        self.run(None, state, text).await
    }

    pub async fn process_session_turn(
        &self,
        session_id: &SessionId,
        state: &mut ConversationState,
        text: &str,
    ) -> Result<TurnOutcome, TurnError> {
        self.run(Some(session_id), state, text).await
    }

    /// The caller's state is replaced only after the whole turn succeeded.
    async fn run(
        &self,
        session_id: Option<&SessionId>,
        state: &mut ConversationState,
        text: &str,
    ) -> Result<TurnOutcome, TurnError> {
        let correlation_id = Uuid::new_v4().to_string();
        let span = info_span!(
            "turn",
            session_id = session_id.map(|id| id.0.as_str()).unwrap_or("-"),
            correlation_id = %correlation_id,
        );
        let context = AuditContext::new(session_id.cloned(), correlation_id, AUDIT_ACTOR);
        let buffered = InMemoryAuditSink::default();

        let result =
            self.drive(state.clone(), text, &buffered, &context).instrument(span.clone()).await;
        for event in buffered.events() {
            self.audit.emit(event);
        }

        let _entered = span.enter();
        match result {
            Ok((next, outcome, capture)) => {
                *state = next;
                self.record_committed(&context, &outcome, capture.as_ref());
                Ok(outcome)
            }
            Err(error) => {
                warn!(
                    event_name = "agent.turn.failed",
                    error_class = error.error_class(),
                    error = %error,
                    "turn failed, conversation left unchanged"
                );
                self.audit.emit(
                    AuditEvent::new(
                        &context,
                        "agent.turn.failed",
                        AuditCategory::System,
                        AuditOutcome::Failed,
                    )
                    .with_metadata("error_class", error.error_class()),
                );
                Err(error)
            }
        }
    }

    async fn drive(
        &self,
        mut working: ConversationState,
        text: &str,
        audit: &InMemoryAuditSink,
        context: &AuditContext,
    ) -> Result<(ConversationState, TurnOutcome, Option<CaptureOutcome>), TurnError> {
        working.push_user_text(text);

        let mut trace = TurnTrace::default();
        let mut node = self.engine.initial_node();
        let mut event = TurnEvent::UserTextAppended;
        let mut capture = None;
        trace.push(node);

        loop {
            let transition = self
                .engine
                .apply_with_audit(&node, &event, &working, audit, context)
                .map_err(DomainError::from)?;
            node = transition.to;
            trace.push(node);

            event = match node {
                TurnNode::Classify => {
                    let intent = self.classifier.classify(text, working.collecting_lead()).await?;
                    working.set_intent(intent);
                    TurnEvent::IntentClassified(intent)
                }
                TurnNode::Greeting => {
                    working.apply(nodes::greeting())?;
                    TurnEvent::NodeCompleted
                }
                TurnNode::Answer => {
                    let settings = AnswerSettings {
                        top_k: self.settings.top_k,
                        temperature: self.settings.answer_temperature,
                        timeout: self.settings.call_timeout,
                    };
                    let delta = nodes::answer(
                        text,
                        self.retriever.as_ref(),
                        self.llm.as_ref(),
                        &settings,
                    )
                    .await?;
                    working.apply(delta)?;
                    TurnEvent::NodeCompleted
                }
                TurnNode::LeadCollect => {
                    let delta = nodes::lead_collect(&working, text, &self.extractor).await;
                    working.apply(delta)?;
                    TurnEvent::NodeCompleted
                }
                TurnNode::Execute => {
                    let (delta, outcome) = nodes::execute(
                        &working,
                        &self.guard,
                        self.lead_sink.as_ref(),
                        self.settings.sink_failure_policy,
                        self.settings.call_timeout,
                    )
                    .await;
                    if let Some(delta) = delta {
                        working.apply(delta)?;
                    }
                    capture = Some(outcome);
                    TurnEvent::NodeCompleted
                }
                TurnNode::Done => break,
                TurnNode::Start => {
                    return Err(DomainError::InvariantViolation(
                        "routing re-entered the start node".to_owned(),
                    )
                    .into());
                }
            };
        }

        let reply = working.last_agent_reply().unwrap_or_default().to_owned();
        let outcome = TurnOutcome {
            reply,
            intent: working.intent(),
            lead_captured: matches!(capture, Some(CaptureOutcome::Captured(_))),
            trace,
        };
        Ok((working, outcome, capture))
    }

    fn record_committed(
        &self,
        context: &AuditContext,
        outcome: &TurnOutcome,
        capture: Option<&CaptureOutcome>,
    ) {
        let dispatched = outcome.trace.dispatched().map_or("none", |node| node.as_str());
        info!(
            event_name = "agent.turn.routed",
            intent = outcome.intent.as_str(),
            node = dispatched,
            trace = %outcome.trace.render(),
            "turn routed"
        );
        self.audit.emit(
            AuditEvent::new(context, "agent.turn.routed", AuditCategory::Routing, AuditOutcome::Success)
                .with_metadata("intent", outcome.intent.as_str())
                .with_metadata("node", dispatched)
                .with_metadata("trace", outcome.trace.render()),
        );

        let Some(capture) = capture else {
            return;
        };
        let event = match capture {
            CaptureOutcome::Captured(lead) => AuditEvent::new(
                context,
                "agent.lead.capture_attempted",
                AuditCategory::Lead,
                AuditOutcome::Success,
            )
            .with_metadata("email", lead.email.as_str()),
            CaptureOutcome::Failed { lead, error } => AuditEvent::new(
                context,
                "agent.lead.capture_attempted",
                AuditCategory::Lead,
                AuditOutcome::Failed,
            )
            .with_metadata("email", lead.email.as_str())
            .with_metadata("error", error.as_str())
            .with_metadata("policy", self.settings.sink_failure_policy.as_str()),
            CaptureOutcome::Skipped { reason_code } => AuditEvent::new(
                context,
                "agent.lead.capture_attempted",
                AuditCategory::Lead,
                AuditOutcome::Rejected,
            )
            .with_metadata("reason_code", *reason_code),
        };
        self.audit.emit(event);
    }
}
