use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};

use super::{prompts, Outcome, Stage};
use crate::error::{Error, Result};
use crate::llm::{GenerationOptions, TextGenerator};
use crate::recovery::Recovered;

/// Query used when the model gives us nothing to search for.
pub const DEFAULT_SEARCH_QUERY: &str = "Research on the related topic";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryMode {
    /// First search for a section, from its title and scope.
    Initial,
    /// Gap-filling search, driven by the section's current summary.
    Reflective,
}

#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub title: String,
    pub scope: String,
    /// Required in reflective mode.
    pub latest_summary: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchPlan {
    pub search_query: String,
    pub reasoning: String,
}

#[derive(Serialize)]
struct QueryPayload<'a> {
    title: &'a str,
    content: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    paragraph_latest_state: Option<&'a str>,
}

/// Produces the next web search query for a section.
pub struct SearchQueryGenerator {
    llm: Arc<dyn TextGenerator>,
    mode: QueryMode,
    options: GenerationOptions,
}

impl SearchQueryGenerator {
    pub fn new(llm: Arc<dyn TextGenerator>, mode: QueryMode) -> Self {
        Self {
            llm,
            mode,
            options: GenerationOptions::default(),
        }
    }

    pub fn initial(llm: Arc<dyn TextGenerator>) -> Self {
        Self::new(llm, QueryMode::Initial)
    }

    pub fn reflective(llm: Arc<dyn TextGenerator>) -> Self {
        Self::new(llm, QueryMode::Reflective)
    }

    fn fallback_reasoning(&self) -> &'static str {
        match self.mode {
            QueryMode::Initial => "Query output could not be parsed; using the default search query",
            QueryMode::Reflective => {
                "Reflection output could not be parsed; using the default search query"
            }
        }
    }
}

#[async_trait]
impl Stage for SearchQueryGenerator {
    type Input = QueryRequest;
    type Output = SearchPlan;

    fn name(&self) -> &'static str {
        match self.mode {
            QueryMode::Initial => "first_search",
            QueryMode::Reflective => "reflection_search",
        }
    }

    async fn run(&self, input: QueryRequest) -> Result<Outcome<SearchPlan>> {
        if input.title.trim().is_empty() {
            return Err(Error::invalid_input(self.name(), "section title is empty"));
        }

        let (system_prompt, latest) = match self.mode {
            QueryMode::Initial => (prompts::FIRST_SEARCH, None),
            QueryMode::Reflective => {
                let summary = input
                    .latest_summary
                    .as_deref()
                    .filter(|s| !s.trim().is_empty())
                    .ok_or_else(|| {
                        Error::invalid_input(self.name(), "reflection needs the latest summary")
                    })?;
                (prompts::REFLECTION_SEARCH, Some(summary))
            }
        };

        let payload = serde_json::to_string(&QueryPayload {
            title: &input.title,
            content: &input.scope,
            paragraph_latest_state: latest,
        })?;
        let raw = self.llm.invoke(system_prompt, &payload, &self.options).await?;

        let recovered = Recovered::parse(&raw);
        match recovered.field_str("search_query") {
            Some(query) => {
                let plan = SearchPlan {
                    search_query: query.to_string(),
                    reasoning: recovered.field_str("reasoning").unwrap_or_default().to_string(),
                };
                debug!(stage = self.name(), query = %plan.search_query, "Search query generated");
                Ok(Outcome::Complete(plan))
            }
            None => {
                warn!(stage = self.name(), section = %input.title, "No search query in output, using default");
                Ok(Outcome::degraded(
                    SearchPlan {
                        search_query: DEFAULT_SEARCH_QUERY.to_string(),
                        reasoning: self.fallback_reasoning().to_string(),
                    },
                    "search_query missing from model output",
                ))
            }
        }
    }
}
