pub mod analytics;
pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod flows;

pub use analytics::{SessionRecord, SessionStats};
pub use audit::{AuditContext, AuditEvent, AuditSink, InMemoryAuditSink, TracingAuditSink};
pub use domain::{
    CompletedLead, ConversationState, Intent, LeadField, LeadInfo, Role, SessionId, StateDelta,
    Turn,
};
pub use errors::{DomainError, InterfaceError, TurnError};
pub use flows::{TurnEngine, TurnNode, TurnTrace};
