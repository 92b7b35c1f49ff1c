use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::lead::{LeadField, LeadInfo};
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Agent,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self { role: Role::User, text: text.into() }
    }

    pub fn agent(text: impl Into<String>) -> Self {
        Self { role: Role::Agent, text: text.into() }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Greeting,
    Inquiry,
    HighIntent,
    #[default]
    Unset,
}

impl Intent {
    /// Parses a classifier label. Only the three taxonomy labels are accepted.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "greeting" => Some(Self::Greeting),
            "inquiry" => Some(Self::Inquiry),
            "high_intent" => Some(Self::HighIntent),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Greeting => "greeting",
            Self::Inquiry => "inquiry",
            Self::HighIntent => "high_intent",
            Self::Unset => "unset",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "unset" | "" => Some(Self::Unset),
            other => Self::from_label(other),
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Change produced by one response node. Every delta carries exactly one agent reply.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StateDelta {
    pub reply: String,
    pub captured: Option<(LeadField, String)>,
    pub collecting_lead: Option<bool>,
    pub mark_tool_called: bool,
}

impl StateDelta {
    pub fn reply(reply: impl Into<String>) -> Self {
        Self { reply: reply.into(), captured: None, collecting_lead: None, mark_tool_called: false }
    }

    pub fn capturing(mut self, field: LeadField, value: impl Into<String>) -> Self {
        self.captured = Some((field, value.into()));
        self
    }

    pub fn collecting(mut self, collecting_lead: bool) -> Self {
        self.collecting_lead = Some(collecting_lead);
        self
    }

    pub fn marking_tool_called(mut self) -> Self {
        self.mark_tool_called = true;
        self
    }
}

/// Record carried between turns of a single conversation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationState {
    history: Vec<Turn>,
    intent: Intent,
    lead_info: LeadInfo,
    tool_called: bool,
    collecting_lead: bool,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a state from previously captured parts, e.g. a stored snapshot.
    pub fn restore(
        history: Vec<Turn>,
        intent: Intent,
        lead_info: LeadInfo,
        tool_called: bool,
        collecting_lead: bool,
    ) -> Self {
        Self { history, intent, lead_info, tool_called, collecting_lead }
    }

    pub fn history(&self) -> &[Turn] {
        &self.history
    }

    pub fn intent(&self) -> Intent {
        self.intent
    }

    pub fn lead_info(&self) -> &LeadInfo {
        &self.lead_info
    }

    pub fn tool_called(&self) -> bool {
        self.tool_called
    }

    pub fn collecting_lead(&self) -> bool {
        self.collecting_lead
    }

    pub fn last_user_text(&self) -> Option<&str> {
        self.last_text_for(Role::User)
    }

    pub fn last_agent_reply(&self) -> Option<&str> {
        self.last_text_for(Role::Agent)
    }

    pub fn user_turns(&self) -> usize {
        self.history.iter().filter(|turn| turn.role == Role::User).count()
    }

    pub fn push_user_text(&mut self, text: impl Into<String>) {
        self.history.push(Turn::user(text));
    }

    pub fn set_intent(&mut self, intent: Intent) {
        self.intent = intent;
    }

    /// Applies a node delta. The state is left untouched when the delta is rejected.
    pub fn apply(&mut self, delta: StateDelta) -> Result<(), DomainError> {
        if let Some((field, value)) = &delta.captured {
            if value.trim().is_empty() {
                return Err(DomainError::InvariantViolation(format!(
                    "lead field `{field}` cannot be filled with an empty value"
                )));
            }
            if let Some(existing) = self.lead_info.get(*field) {
                if existing != value {
                    return Err(DomainError::InvariantViolation(format!(
                        "lead field `{field}` is already set and cannot be overwritten"
                    )));
                }
            }
        }

        if let Some((field, value)) = delta.captured {
            let slot = self.lead_info.slot_mut(field);
            if slot.as_deref().map_or(true, str::is_empty) {
                *slot = Some(value);
            }
        }
        if let Some(collecting_lead) = delta.collecting_lead {
            self.collecting_lead = collecting_lead;
        }
        if delta.mark_tool_called {
            self.tool_called = true;
        }
        self.history.push(Turn::agent(delta.reply));

        Ok(())
    }

    fn last_text_for(&self, role: Role) -> Option<&str> {
        self.history.iter().rev().find(|turn| turn.role == role).map(|turn| turn.text.as_str())
    }
}
