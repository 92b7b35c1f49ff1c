pub mod engine;
pub mod states;

pub use engine::{
    after_lead_collect, entry_route, route_for_intent, FlowDefinition, FlowTransitionError,
    LeadQualificationFlow, TurnEngine,
};
pub use states::{TransitionOutcome, TurnEvent, TurnNode, TurnTrace};
