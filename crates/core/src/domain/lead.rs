use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadField {
    Name,
    Email,
    Platform,
}

impl LeadField {
    /// Collection order of the slot-filling protocol.
    pub const ORDER: [LeadField; 3] = [LeadField::Name, LeadField::Email, LeadField::Platform];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::Email => "email",
            Self::Platform => "platform",
        }
    }
}

impl fmt::Display for LeadField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Partially collected contact details of a prospective customer.
///
/// Fields are filled at most once each; see [`crate::domain::ConversationState::apply`]
/// for the place where that rule is enforced.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeadInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
}

impl LeadInfo {
    pub fn get(&self, field: LeadField) -> Option<&str> {
        let value = match field {
            LeadField::Name => self.name.as_deref(),
            LeadField::Email => self.email.as_deref(),
            LeadField::Platform => self.platform.as_deref(),
        };
        value.filter(|value| !value.is_empty())
    }

    pub fn is_set(&self, field: LeadField) -> bool {
        self.get(field).is_some()
    }

    pub fn has_any(&self) -> bool {
        LeadField::ORDER.iter().any(|field| self.is_set(*field))
    }

    pub fn has_all(&self) -> bool {
        LeadField::ORDER.iter().all(|field| self.is_set(*field))
    }

    pub fn filled_count(&self) -> usize {
        LeadField::ORDER.iter().filter(|field| self.is_set(**field)).count()
    }

    /// First field in collection order that is still empty.
    pub fn next_missing(&self) -> Option<LeadField> {
        LeadField::ORDER.into_iter().find(|field| !self.is_set(*field))
    }

    pub fn complete(&self) -> Option<CompletedLead> {
        Some(CompletedLead {
            name: self.get(LeadField::Name)?.to_string(),
            email: self.get(LeadField::Email)?.to_string(),
            platform: self.get(LeadField::Platform)?.to_string(),
        })
    }

    pub fn with(mut self, field: LeadField, value: impl Into<String>) -> Self {
        self.slot_mut(field).replace(value.into());
        self
    }

    pub(crate) fn slot_mut(&mut self, field: LeadField) -> &mut Option<String> {
        match field {
            LeadField::Name => &mut self.name,
            LeadField::Email => &mut self.email,
            LeadField::Platform => &mut self.platform,
        }
    }
}

/// Payload handed to the lead capture sink once every field is known.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedLead {
    pub name: String,
    pub email: String,
    pub platform: String,
}
