//! Stage nodes: single-purpose units that turn a typed request into a typed
//! outcome by prompting the text generator and recovering its output.
//!
//! Stages never touch [`ReportState`](crate::state::ReportState) themselves.
//! Each module exposes an `apply_*` function that writes a stage's result
//! into the state, so the orchestrator decides when state changes.

pub mod formatting;
pub mod prompts;
pub mod query;
pub mod structure;
pub mod summary;

use async_trait::async_trait;

use crate::error::Result;

pub use formatting::{apply_final_report, FormatRequest, FormatSection, ReportFormatter};
pub use query::{QueryMode, QueryRequest, SearchPlan, SearchQueryGenerator, DEFAULT_SEARCH_QUERY};
pub use structure::{apply_plan, PlanRequest, StructurePlanner};
pub use summary::{
    apply_initial_summary, apply_reflection_summary, SummaryMode, SummaryRequest, Summarizer,
};

/// Result of a stage that ran to completion.
///
/// `Degraded` means the stage substituted a deterministic fallback for malformed
/// model output. The pipeline keeps going; the reason is kept for diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Complete(T),
    Degraded { value: T, reason: String },
}

impl<T> Outcome<T> {
    pub fn degraded(value: T, reason: impl Into<String>) -> Self {
        Outcome::Degraded {
            value,
            reason: reason.into(),
        }
    }

    pub fn value(&self) -> &T {
        match self {
            Outcome::Complete(v) | Outcome::Degraded { value: v, .. } => v,
        }
    }

    pub fn into_value(self) -> T {
        match self {
            Outcome::Complete(v) | Outcome::Degraded { value: v, .. } => v,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Outcome::Degraded { .. })
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Outcome::Complete(_) => None,
            Outcome::Degraded { reason, .. } => Some(reason),
        }
    }

    /// Split into the value and the degradation reason, if any.
    pub fn into_parts(self) -> (T, Option<String>) {
        match self {
            Outcome::Complete(v) => (v, None),
            Outcome::Degraded { value, reason } => (value, Some(reason)),
        }
    }
}

/// Capability contract shared by every stage.
///
/// `Err` is reserved for structural failures (bad input, provider errors);
/// malformed model output always resolves to an [`Outcome`].
#[async_trait]
pub trait Stage: Send + Sync {
    type Input: Send + 'static;
    type Output: Send + 'static;

    fn name(&self) -> &'static str;

    async fn run(&self, input: Self::Input) -> Result<Outcome<Self::Output>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_accessors() {
        let ok: Outcome<u32> = Outcome::Complete(1);
        assert_eq!(*ok.value(), 1);
        assert!(!ok.is_degraded());
        assert_eq!(ok.reason(), None);

        let degraded = Outcome::degraded(2u32, "fallback");
        assert!(degraded.is_degraded());
        assert_eq!(degraded.reason(), Some("fallback"));
        assert_eq!(degraded.into_parts(), (2, Some("fallback".to_string())));
    }
}
