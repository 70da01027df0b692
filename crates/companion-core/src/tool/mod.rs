//! Tool capabilities and the dispatch agent that drives them.
//!
//! Tools are local capabilities the generator may call while preparing a
//! reply (current time, profile updates). The pre-filter decides cheaply
//! whether a message needs them at all; the dispatch agent runs the bounded
//! tool loop and condenses the results into a context blob for the
//! response agent.

pub mod builtin;
pub mod dispatch;
pub mod prefilter;
pub mod registry;

pub use dispatch::{ToolDispatchAgent, ToolDispatchSettings, ToolOutcome, ToolSession, ToolStep};
pub use prefilter::{ToolDecision, decide};
pub use registry::{Tool, ToolError, ToolRegistry};
