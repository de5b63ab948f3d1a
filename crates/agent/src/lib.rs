//! The orchestration loop of ferrocall.
//!
//! Each user turn follows a **Query → Extract → Execute → Follow up** cycle:
//!
//! 1. **Query** the model with a snapshot of the conversation
//! 2. **Extract** tool calls from the assembled free-text reply
//! 3. **Execute** each call through the tool registry, strictly in order
//! 4. **Follow up**: append the result and query again
//!
//! A reply with no tool calls ends the turn. When a call was expected but
//! none was found, a single directed query asks for structured JSON.

pub mod extractor;
pub mod feedback;
pub mod gateway;
pub mod json_repair;
pub mod loop_runner;
pub mod prompt;
pub mod stream_event;

#[cfg(test)]
mod test_helpers;

pub use extractor::{Extractor, ParseStrategy, Region, RegionKind};
pub use gateway::{QueryGateway, QueryStream};
pub use loop_runner::{LoopSettings, LoopState, Orchestrator, TurnOutcome};
pub use stream_event::AgentStreamEvent;
