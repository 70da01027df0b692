//! Generator abstraction: the RPITIT provider trait and its boxed form.

pub mod box_provider;
pub mod provider;

pub use box_provider::BoxLlmProvider;
pub use provider::LlmProvider;
