//! Iterative web research: plan a report, research each section through
//! search and reflection passes, then assemble a Markdown document.

pub mod agent;
pub mod config;
pub mod error;
pub mod llm;
pub mod nodes;
pub mod output;
pub mod recovery;
pub mod search;
pub mod sources;
pub mod state;
pub mod text;

#[cfg(test)]
mod testing;

pub use agent::{Degradation, ResearchAgent, ResearchOutcome, SectionPhase, Stages};
pub use config::Config;
pub use error::{Error, LlmError, Result, SearchError};
pub use llm::{GenerationOptions, LlmClient, Provider, TextGenerator};
pub use nodes::{Outcome, Stage};
pub use search::{SearchHit, SearchProvider, TavilyClient};
pub use state::{Progress, ReportState};
