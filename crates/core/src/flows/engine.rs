use thiserror::Error;

use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::domain::{ConversationState, Intent};
use crate::flows::states::{TransitionOutcome, TurnEvent, TurnNode};

pub trait FlowDefinition {
    fn initial_node(&self) -> TurnNode;
    fn transition(
        &self,
        current: &TurnNode,
        event: &TurnEvent,
        state: &ConversationState,
    ) -> Result<TransitionOutcome, FlowTransitionError>;
}

/// Greeting / answer / lead-qualification routing used for every turn.
#[derive(Clone, Debug, Default)]
pub struct LeadQualificationFlow;

impl FlowDefinition for LeadQualificationFlow {
    fn initial_node(&self) -> TurnNode {
        TurnNode::Start
    }

    fn transition(
        &self,
        current: &TurnNode,
        event: &TurnEvent,
        state: &ConversationState,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        transition_lead_qualification(current, event, state)
    }
}

pub struct TurnEngine<F> {
    flow: F,
}

impl<F> TurnEngine<F>
where
    F: FlowDefinition,
{
    pub fn new(flow: F) -> Self {
        Self { flow }
    }

    pub fn initial_node(&self) -> TurnNode {
        self.flow.initial_node()
    }

    pub fn apply(
        &self,
        current: &TurnNode,
        event: &TurnEvent,
        state: &ConversationState,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        self.flow.transition(current, event, state)
    }

    pub fn apply_with_audit<S>(
        &self,
        current: &TurnNode,
        event: &TurnEvent,
        state: &ConversationState,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<TransitionOutcome, FlowTransitionError>
    where
        S: AuditSink + ?Sized,
    {
        let result = self.apply(current, event, state);
        match &result {
            Ok(outcome) => {
                sink.emit(
                    AuditEvent::new(
                        audit,
                        "turn.transition_applied",
                        AuditCategory::Routing,
                        AuditOutcome::Success,
                    )
                    .with_metadata("from", outcome.from.as_str())
                    .with_metadata("to", outcome.to.as_str())
                    .with_metadata("event", format!("{:?}", outcome.event)),
                );
            }
            Err(error) => {
                sink.emit(
                    AuditEvent::new(
                        audit,
                        "turn.transition_rejected",
                        AuditCategory::Routing,
                        AuditOutcome::Rejected,
                    )
                    .with_metadata("error", error.to_string()),
                );
            }
        }
        result
    }
}

impl Default for TurnEngine<LeadQualificationFlow> {
    fn default() -> Self {
        Self::new(LeadQualificationFlow)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FlowTransitionError {
    #[error("invalid transition from {node:?} using event {event:?}")]
    InvalidTransition { node: TurnNode, event: TurnEvent },
}

/// Entry decision: an in-progress collection always wins over classification.
pub fn entry_route(state: &ConversationState) -> TurnNode {
    let lead_info = state.lead_info();
    if lead_info.has_any() && !lead_info.has_all() {
        TurnNode::LeadCollect
    } else {
        TurnNode::Classify
    }
}

pub fn route_for_intent(intent: Intent) -> TurnNode {
    match intent {
        Intent::Greeting => TurnNode::Greeting,
        Intent::Inquiry => TurnNode::Answer,
        Intent::HighIntent => TurnNode::LeadCollect,
        Intent::Unset => TurnNode::Answer,
    }
}

/// Post-collection decision: fire the action once every field is known and it never fired.
pub fn after_lead_collect(state: &ConversationState) -> TurnNode {
    if state.lead_info().has_all() && !state.tool_called() {
        TurnNode::Execute
    } else {
        TurnNode::Done
    }
}

fn transition_lead_qualification(
    current: &TurnNode,
    event: &TurnEvent,
    state: &ConversationState,
) -> Result<TransitionOutcome, FlowTransitionError> {
    use TurnEvent::{IntentClassified, NodeCompleted, UserTextAppended};
    use TurnNode::{Answer, Classify, Done, Execute, Greeting, LeadCollect, Start};

    let to = match (current, event) {
        (Start, UserTextAppended) => entry_route(state),
        (Classify, IntentClassified(intent)) => route_for_intent(*intent),
        (Greeting, NodeCompleted) | (Answer, NodeCompleted) | (Execute, NodeCompleted) => Done,
        (LeadCollect, NodeCompleted) => after_lead_collect(state),
        _ => {
            return Err(FlowTransitionError::InvalidTransition {
                node: *current,
                event: event.clone(),
            });
        }
    };

    Ok(TransitionOutcome { from: *current, to, event: event.clone() })
}
