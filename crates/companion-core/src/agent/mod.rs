//! Generation agents: prompt assembly, the response agent, summarization,
//! profile extraction and the retry policy.

pub mod profile;
pub mod prompt;
pub mod response;
pub mod retry;
pub mod summarizer;

pub use profile::ProfileExtractor;
pub use prompt::{ResponseContext, TurnInput};
pub use response::{FragmentStream, ResponseAgent, ResponseSettings};
pub use retry::{AttemptError, RetryPolicy};
pub use summarizer::ContextSummarizer;
