use serde::{Deserialize, Serialize};

use crate::domain::Intent;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnNode {
    Start,
    Classify,
    Greeting,
    Answer,
    LeadCollect,
    Execute,
    Done,
}

impl TurnNode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Classify => "classify",
            Self::Greeting => "greeting",
            Self::Answer => "answer",
            Self::LeadCollect => "lead_collect",
            Self::Execute => "execute",
            Self::Done => "done",
        }
    }

    /// Nodes that append an agent reply when they run.
    pub fn is_response_node(&self) -> bool {
        matches!(self, Self::Greeting | Self::Answer | Self::LeadCollect | Self::Execute)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TurnEvent {
    UserTextAppended,
    IntentClassified(Intent),
    NodeCompleted,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: TurnNode,
    pub to: TurnNode,
    pub event: TurnEvent,
}

/// Nodes visited during one turn, in order, starting at `Start`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnTrace {
    nodes: Vec<TurnNode>,
}

impl TurnTrace {
    pub fn push(&mut self, node: TurnNode) {
        self.nodes.push(node);
    }

    pub fn nodes(&self) -> &[TurnNode] {
        &self.nodes
    }

    pub fn visited(&self, node: TurnNode) -> bool {
        self.nodes.contains(&node)
    }

    /// First response node the turn dispatched to.
    pub fn dispatched(&self) -> Option<TurnNode> {
        self.nodes.iter().copied().find(TurnNode::is_response_node)
    }

    pub fn render(&self) -> String {
        self.nodes.iter().map(TurnNode::as_str).collect::<Vec<_>>().join(" -> ")
    }
}
