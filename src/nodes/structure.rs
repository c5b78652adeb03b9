use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{info, warn};

use super::{prompts, Outcome, Stage};
use crate::error::{Error, Result};
use crate::llm::{GenerationOptions, TextGenerator};
use crate::recovery::Recovered;
use crate::state::{ReportState, SectionSpec};

const STAGE: &str = "structure_planner";

/// Keys under which a model sometimes nests the section list.
const LIST_KEYS: [&str; 3] = ["paragraphs", "sections", "report_structure"];

#[derive(Debug, Clone)]
pub struct PlanRequest {
    pub query: String,
}

impl PlanRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
        }
    }
}

/// Plans the ordered list of report sections for a query.
pub struct StructurePlanner {
    llm: Arc<dyn TextGenerator>,
    max_sections: usize,
    options: GenerationOptions,
}

impl StructurePlanner {
    pub fn new(llm: Arc<dyn TextGenerator>, max_sections: usize) -> Self {
        Self {
            llm,
            max_sections: max_sections.max(1),
            options: GenerationOptions::default(),
        }
    }
}

#[async_trait]
impl Stage for StructurePlanner {
    type Input = PlanRequest;
    type Output = Vec<SectionSpec>;

    fn name(&self) -> &'static str {
        STAGE
    }

    async fn run(&self, input: PlanRequest) -> Result<Outcome<Vec<SectionSpec>>> {
        let query = input.query.trim();
        if query.is_empty() {
            return Err(Error::invalid_input(STAGE, "query is empty"));
        }

        let raw = self
            .llm
            .invoke(&prompts::report_structure(self.max_sections), query, &self.options)
            .await?;

        let planned = match Recovered::parse(&raw).value() {
            Some(value) => sections_from_value(value, query),
            None => Err("no JSON found in planner output".to_string()),
        };

        match planned {
            Ok(mut specs) => {
                if specs.len() > self.max_sections {
                    warn!(
                        planned = specs.len(),
                        max = self.max_sections,
                        "Planner exceeded section cap, truncating"
                    );
                    specs.truncate(self.max_sections);
                }
                info!(sections = specs.len(), "Report structure planned");
                Ok(Outcome::Complete(specs))
            }
            Err(reason) => {
                warn!(%reason, "Planner output unusable, using default structure");
                let mut specs = default_structure(query);
                specs.truncate(self.max_sections);
                Ok(Outcome::degraded(specs, reason))
            }
        }
    }
}

/// Two-section skeleton used when the planner output cannot be used.
pub fn default_structure(query: &str) -> Vec<SectionSpec> {
    vec![
        SectionSpec::new(
            "Overview",
            format!("The overall overview and background introduction of '{}'", query),
        ),
        SectionSpec::new(
            "Detailed Analysis",
            format!("Deep analysis of the related content of '{}'", query),
        ),
    ]
}

/// Create the planned sections in the state and give the report its title.
pub fn apply_plan(state: &mut ReportState, specs: &[SectionSpec]) -> Result<usize> {
    let count = state.add_sections(specs)?;
    if state.title().is_empty() {
        let title = ReportState::default_title(state.query());
        state.set_title(title);
    }
    Ok(count)
}

fn sections_from_value(value: &Value, query: &str) -> std::result::Result<Vec<SectionSpec>, String> {
    let entries = match value {
        Value::Array(items) => items,
        Value::Object(map) => LIST_KEYS
            .iter()
            .find_map(|key| map.get(*key).and_then(Value::as_array))
            .ok_or_else(|| "planner returned an object without a section list".to_string())?,
        _ => return Err("planner output is not a list".to_string()),
    };

    let mut specs = Vec::with_capacity(entries.len());
    for entry in entries {
        let Some(obj) = entry.as_object() else {
            continue;
        };
        let title = str_field(obj, "title");
        let content = str_field(obj, "content").or_else(|| str_field(obj, "description"));
        if title.is_none() && content.is_none() {
            continue;
        }
        let title = title.unwrap_or_else(|| format!("Section {}", specs.len() + 1));
        let content =
            content.unwrap_or_else(|| format!("Research on {} in the context of '{}'", title, query));
        specs.push(SectionSpec::new(title, content));
    }

    if specs.is_empty() {
        return Err("planner returned no usable sections".to_string());
    }
    Ok(specs)
}

fn str_field(obj: &Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedGenerator;

    async fn plan(response: &str, max: usize) -> Outcome<Vec<SectionSpec>> {
        let llm = ScriptedGenerator::new([response]);
        StructurePlanner::new(llm, max)
            .run(PlanRequest::new("solar power"))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_plans_from_fenced_array() {
        let out = plan(
            "```json\n[{\"title\": \"Background\", \"content\": \"History of PV\"},\n {\"title\": \"Market\", \"content\": \"Prices\"}]\n```",
            5,
        )
        .await;
        assert!(!out.is_degraded());
        let specs = out.into_value();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].title, "Background");
        assert_eq!(specs[1].content, "Prices");
    }

    #[tokio::test]
    async fn test_accepts_wrapped_list_and_fills_gaps() {
        let out = plan(
            r#"{"paragraphs": [{"title": "Costs"}, {"content": "Grid storage"}, "junk", {}]}"#,
            5,
        )
        .await;
        let specs = out.into_value();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].title, "Costs");
        assert!(specs[0].content.contains("solar power"));
        assert_eq!(specs[1].title, "Section 2");
        assert_eq!(specs[1].content, "Grid storage");
    }

    #[tokio::test]
    async fn test_truncates_to_cap() {
        let items: Vec<String> = (1..=7)
            .map(|i| format!(r#"{{"title": "T{}", "content": "C{}"}}"#, i, i))
            .collect();
        let out = plan(&format!("[{}]", items.join(",")), 3).await;
        assert!(!out.is_degraded());
        let specs = out.into_value();
        assert_eq!(specs.len(), 3);
        assert_eq!(specs[2].title, "T3");
    }

    #[tokio::test]
    async fn test_unparseable_output_degrades_to_skeleton() {
        let out = plan("I cannot plan this.", 5).await;
        assert!(out.is_degraded());
        let specs = out.into_value();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].title, "Overview");
        assert_eq!(specs[1].title, "Detailed Analysis");
        assert!(specs[1].content.contains("'solar power'"));

        let single = plan("[]", 1).await;
        assert!(single.is_degraded());
        assert_eq!(single.into_value().len(), 1);
    }

    #[tokio::test]
    async fn test_prompt_carries_cap_and_query() {
        let llm = ScriptedGenerator::new([r#"[{"title": "A", "content": "B"}]"#]);
        StructurePlanner::new(llm.clone(), 4)
            .run(PlanRequest::new("  wind  "))
            .await
            .unwrap();
        let calls = llm.calls();
        assert!(calls[0].0.contains("at most 4 paragraphs"));
        assert_eq!(calls[0].1, "wind");
    }

    #[tokio::test]
    async fn test_empty_query_is_invalid() {
        let llm = ScriptedGenerator::new(Vec::<String>::new());
        let err = StructurePlanner::new(llm.clone(), 5)
            .run(PlanRequest::new("   "))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput { stage: STAGE, .. }));
        assert!(llm.calls().is_empty());
    }

    #[tokio::test]
    async fn test_provider_error_propagates() {
        let llm = ScriptedGenerator::failing("connection reset");
        let err = StructurePlanner::new(llm, 5)
            .run(PlanRequest::new("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Llm(_)));
    }

    #[test]
    fn test_apply_plan_sets_default_title() {
        let mut state = ReportState::new("tidal energy");
        apply_plan(&mut state, &default_structure("tidal energy")).unwrap();
        assert_eq!(state.sections().len(), 2);
        assert_eq!(state.title(), "Research Report of 'tidal energy'");
        assert!(apply_plan(&mut state, &default_structure("again")).is_err());
    }
}
