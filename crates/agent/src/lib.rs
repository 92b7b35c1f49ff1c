//! Agent runtime for the AutoStream sales assistant.
//!
//! One call to [`AgentRuntime::process_turn`] takes a user message through the
//! routing table in `autostream-core`:
//! 1. **Classification** (`intent`) unless a partially collected lead forces lead collection
//! 2. **Response node** (`nodes`): greeting, retrieval-backed answer, or slot filling
//! 3. **Lead capture** (`guard`, `capture`) chained once every lead field is known
//!
//! External collaborators sit behind traits: [`LlmClient`] for completions,
//! [`Retriever`] for knowledge passages, [`LeadCaptureSink`] for the capture action.
//!
//! The completion service only classifies, extracts and phrases answers. Routing,
//! field ordering and the at-most-once capture are decided here, deterministically.

pub mod capture;
pub mod extraction;
pub mod guard;
pub mod intent;
pub mod llm;
pub mod nodes;
pub mod prompts;
pub mod retrieval;
pub mod runtime;

pub use capture::{InMemoryLeadCapture, LeadCaptureSink, LogLeadCapture, WebhookLeadCapture};
pub use guard::{ActionDecision, ActionGuard};
pub use intent::IntentClassifier;
pub use llm::{CompletionRequest, HttpLlmClient, LlmClient, ScriptedLlmClient};
pub use retrieval::{KnowledgeSource, LazyKnowledgeRetriever, Retriever};
pub use runtime::{AgentRuntime, AgentRuntimeBuilder, RuntimeSettings, TurnOutcome};
