pub mod conversation;
pub mod lead;

pub use conversation::{ConversationState, Intent, Role, SessionId, StateDelta, Turn};
pub use lead::{CompletedLead, LeadField, LeadInfo};
