use autostream_core::domain::{CompletedLead, ConversationState};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ActionDecision {
    Fire(CompletedLead),
    Skip { reason_code: &'static str },
}

/// Precondition check in front of the lead capture action.
#[derive(Clone, Copy, Debug, Default)]
pub struct ActionGuard;

impl ActionGuard {
    pub fn evaluate(&self, state: &ConversationState) -> ActionDecision {
        if state.tool_called() {
            return ActionDecision::Skip { reason_code: "already_fired" };
        }
        match state.lead_info().complete() {
            Some(lead) => ActionDecision::Fire(lead),
            None => ActionDecision::Skip { reason_code: "lead_incomplete" },
        }
    }
}
