use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{ConversationState, Intent, LeadInfo, SessionId};

/// One finished chat session as written to the session log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: SessionId,
    pub recorded_at: DateTime<Utc>,
    pub turns: u32,
    pub lead_captured: bool,
    pub lead_info: LeadInfo,
    pub final_intent: Intent,
    pub completed: bool,
}

impl SessionRecord {
    /// A session counts as completed when the user left before the turn ceiling.
    ///
    /// `lead_captured` is whether the lead sink acknowledged a capture. `tool_called` on the
    /// state is not used for it because a failed capture can still mark the action attempted.
    pub fn from_state(
        session_id: SessionId,
        state: &ConversationState,
        turns: u32,
        max_turns: u32,
        lead_captured: bool,
    ) -> Self {
        Self {
            session_id,
            recorded_at: Utc::now(),
            turns,
            lead_captured,
            lead_info: state.lead_info().clone(),
            final_intent: state.intent(),
            completed: turns < max_turns,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionStats {
    pub total_conversations: usize,
    pub leads_captured: usize,
    pub conversion_rate: f64,
    pub completion_rate: f64,
    pub avg_turns_to_conversion: f64,
}

impl SessionStats {
    pub fn from_records(records: &[SessionRecord]) -> Self {
        if records.is_empty() {
            return Self::default();
        }

        let total = records.len();
        let captured: Vec<&SessionRecord> =
            records.iter().filter(|record| record.lead_captured).collect();
        let completed = records.iter().filter(|record| record.completed).count();

        let avg_turns = if captured.is_empty() {
            0.0
        } else {
            let sum: u64 = captured.iter().map(|record| u64::from(record.turns)).sum();
            sum as f64 / captured.len() as f64
        };

        Self {
            total_conversations: total,
            leads_captured: captured.len(),
            conversion_rate: round_one_decimal(captured.len() as f64 / total as f64 * 100.0),
            completion_rate: round_one_decimal(completed as f64 / total as f64 * 100.0),
            avg_turns_to_conversion: round_one_decimal(avg_turns),
        }
    }

    pub fn render_report(&self) -> String {
        let rule = "=".repeat(50);
        [
            rule.clone(),
            "CONVERSATION ANALYTICS REPORT".to_string(),
            rule.clone(),
            format!("Total Conversations:     {}", self.total_conversations),
            format!("Leads Captured:          {}", self.leads_captured),
            format!("Conversion Rate:         {:.1}%", self.conversion_rate),
            format!("Avg Turns (Success):     {:.1}", self.avg_turns_to_conversion),
            format!("Completion Rate:         {:.1}%", self.completion_rate),
            rule,
        ]
        .join("\n")
    }
}

fn round_one_decimal(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
