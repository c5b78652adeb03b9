use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};

use super::{prompts, Outcome, Stage};
use crate::error::{Error, Result};
use crate::llm::{GenerationOptions, TextGenerator};
use crate::recovery::{cleaned_text, Recovered};
use crate::search::SearchHit;
use crate::state::ReportState;
use crate::text::truncate_content;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummaryMode {
    /// Draft the first summary of a section from one batch of evidence.
    Initial,
    /// Merge new evidence into the existing summary.
    Reflective,
}

#[derive(Debug, Clone)]
pub struct SummaryRequest {
    pub title: String,
    pub scope: String,
    pub search_query: String,
    /// Truncated result snippets, in result order.
    pub evidence: Vec<String>,
    /// Required in reflective mode.
    pub latest_summary: Option<String>,
}

#[derive(Serialize)]
struct SummaryPayload<'a> {
    title: &'a str,
    content: &'a str,
    search_query: &'a str,
    search_results: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    paragraph_latest_state: Option<&'a str>,
}

/// Drafts or extends a section summary from search evidence.
pub struct Summarizer {
    llm: Arc<dyn TextGenerator>,
    mode: SummaryMode,
    min_retention: f64,
    options: GenerationOptions,
}

impl Summarizer {
    pub fn new(llm: Arc<dyn TextGenerator>, mode: SummaryMode) -> Self {
        Self {
            llm,
            mode,
            min_retention: 0.0,
            options: GenerationOptions::default(),
        }
    }

    pub fn initial(llm: Arc<dyn TextGenerator>) -> Self {
        Self::new(llm, SummaryMode::Initial)
    }

    /// Reflective summarizer that rejects merges keeping less than
    /// `min_retention` of the previous summary's content words.
    pub fn reflective(llm: Arc<dyn TextGenerator>, min_retention: f64) -> Self {
        Self {
            min_retention: min_retention.clamp(0.0, 1.0),
            ..Self::new(llm, SummaryMode::Reflective)
        }
    }

    fn output_keys(&self) -> &'static [&'static str] {
        match self.mode {
            SummaryMode::Initial => &["paragraph_latest_state"],
            SummaryMode::Reflective => &["updated_paragraph_latest_state", "paragraph_latest_state"],
        }
    }
}

#[async_trait]
impl Stage for Summarizer {
    type Input = SummaryRequest;
    type Output = String;

    fn name(&self) -> &'static str {
        match self.mode {
            SummaryMode::Initial => "first_summary",
            SummaryMode::Reflective => "reflection_summary",
        }
    }

    async fn run(&self, input: SummaryRequest) -> Result<Outcome<String>> {
        if input.title.trim().is_empty() {
            return Err(Error::invalid_input(self.name(), "section title is empty"));
        }

        let (system_prompt, previous) = match self.mode {
            SummaryMode::Initial => (prompts::FIRST_SUMMARY, None),
            SummaryMode::Reflective => {
                let previous = input
                    .latest_summary
                    .as_deref()
                    .filter(|s| !s.trim().is_empty())
                    .ok_or_else(|| {
                        Error::invalid_input(self.name(), "reflection needs the latest summary")
                    })?;
                (prompts::REFLECTION_SUMMARY, Some(previous))
            }
        };

        let payload = serde_json::to_string(&SummaryPayload {
            title: &input.title,
            content: &input.scope,
            search_query: &input.search_query,
            search_results: &input.evidence,
            paragraph_latest_state: previous,
        })?;
        let raw = self.llm.invoke(system_prompt, &payload, &self.options).await?;

        let recovered = Recovered::parse(&raw);
        let extracted = self
            .output_keys()
            .iter()
            .find_map(|key| recovered.field_str(key))
            .map(str::to_string);

        // An expected key holding a blank value is an empty answer, not a shape mismatch.
        let answered_blank = extracted.is_none()
            && self.output_keys().iter().any(|key| {
                recovered
                    .value()
                    .and_then(|v| v.get(*key))
                    .is_some_and(|v| v.is_string() || v.is_null())
            });

        let outcome = match (extracted, previous) {
            (Some(text), _) => Outcome::Complete(text),
            (None, previous) => {
                let cleaned = if answered_blank {
                    String::new()
                } else {
                    cleaned_text(&raw)
                };
                if !cleaned.is_empty() {
                    warn!(stage = self.name(), section = %input.title, "Summary key missing, keeping raw text");
                    Outcome::degraded(cleaned, "summary output did not match the expected shape")
                } else if let Some(previous) = previous {
                    warn!(stage = self.name(), section = %input.title, "Empty merge output, keeping previous summary");
                    Outcome::degraded(previous.to_string(), "model returned an empty summary")
                } else {
                    warn!(stage = self.name(), section = %input.title, "Empty summary output, using placeholder");
                    Outcome::degraded(
                        format!("No summary could be drafted for '{}'.", input.title),
                        "model returned an empty summary",
                    )
                }
            }
        };

        let outcome = match previous {
            Some(previous) => self.enforce_retention(previous, outcome),
            None => outcome,
        };
        debug!(
            stage = self.name(),
            section = %input.title,
            summary_len = outcome.value().len(),
            degraded = outcome.is_degraded(),
            "Summary produced"
        );
        Ok(outcome)
    }
}

impl Summarizer {
    /// A merge that drops too much of the previous summary is replaced by the
    /// previous summary followed by the new text.
    fn enforce_retention(&self, previous: &str, outcome: Outcome<String>) -> Outcome<String> {
        if self.min_retention <= 0.0 {
            return outcome;
        }
        let kept = retention(previous, outcome.value());
        if kept >= self.min_retention {
            return outcome;
        }
        warn!(
            stage = self.name(),
            retention = kept,
            min = self.min_retention,
            "Merged summary dropped earlier findings, appending instead"
        );
        let shortfall = format!(
            "merge kept {:.0}% of the previous summary, below the {:.0}% minimum",
            kept * 100.0,
            self.min_retention * 100.0
        );
        let (merged, earlier) = outcome.into_parts();
        let reason = match earlier {
            Some(earlier) => format!("{}; {}", earlier, shortfall),
            None => shortfall,
        };
        Outcome::degraded(
            format!("{}\n\n{}", previous.trim_end(), merged.trim()),
            reason,
        )
    }
}

/// Share of `previous`'s distinct content words (longer than three chars,
/// case-insensitive) that still appear in `merged`. `1.0` when `previous` has none.
pub fn retention(previous: &str, merged: &str) -> f64 {
    let before = content_words(previous);
    if before.is_empty() {
        return 1.0;
    }
    let after = content_words(merged);
    let kept = before.iter().filter(|w| after.contains(*w)).count();
    kept as f64 / before.len() as f64
}

fn content_words(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() > 3)
        .map(str::to_lowercase)
        .collect()
}

/// Snippets handed to a summarizer: each hit's content, truncated.
pub fn evidence_from_hits(hits: &[SearchHit], max_len: usize) -> Vec<String> {
    hits.iter()
        .map(|hit| truncate_content(&hit.content, max_len))
        .collect()
}

pub fn apply_initial_summary(state: &mut ReportState, index: usize, summary: &str) -> Result<()> {
    state.set_initial_summary(index, summary)
}

/// Store a merged summary, returning the section's new reflection count.
pub fn apply_reflection_summary(
    state: &mut ReportState,
    index: usize,
    summary: &str,
    max_reflections: u32,
) -> Result<u32> {
    state.apply_reflection(index, summary, max_reflections)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::SectionSpec;
    use crate::testing::{hits, ScriptedGenerator};

    fn request(previous: Option<&str>) -> SummaryRequest {
        SummaryRequest {
            title: "Costs".to_string(),
            scope: "Module and installation prices".to_string(),
            search_query: "solar module prices".to_string(),
            evidence: vec!["Prices fell 80% in a decade.".to_string()],
            latest_summary: previous.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_initial_summary_from_json() {
        let llm = ScriptedGenerator::new([
            "<think>let me see</think>```json\n{\"paragraph_latest_state\": \"Module prices fell sharply.\"}\n```",
        ]);
        let out = Summarizer::initial(llm.clone()).run(request(None)).await.unwrap();
        assert_eq!(out, Outcome::Complete("Module prices fell sharply.".to_string()));

        let payload: serde_json::Value = serde_json::from_str(&llm.calls()[0].1).unwrap();
        assert_eq!(payload["search_query"], "solar module prices");
        assert_eq!(payload["search_results"][0], "Prices fell 80% in a decade.");
    }

    #[tokio::test]
    async fn test_unrecognized_shape_keeps_raw_text() {
        let llm = ScriptedGenerator::new(["Prices fell sharply across all markets."]);
        let out = Summarizer::initial(llm).run(request(None)).await.unwrap();
        assert!(out.is_degraded());
        assert_eq!(out.value(), "Prices fell sharply across all markets.");
    }

    #[tokio::test]
    async fn test_empty_initial_output_uses_placeholder() {
        let llm = ScriptedGenerator::new(["<think>nothing</think>"]);
        let out = Summarizer::initial(llm).run(request(None)).await.unwrap();
        assert!(out.is_degraded());
        assert!(out.value().contains("'Costs'"));
    }

    #[tokio::test]
    async fn test_reflective_accepts_either_key() {
        let previous = "Module prices fell sharply.";
        let llm = ScriptedGenerator::new([
            r#"{"updated_paragraph_latest_state": "Module prices fell sharply. Installation costs lag behind."}"#,
            r#"{"paragraph_latest_state": "Module prices fell sharply, and inverters got cheaper."}"#,
        ]);
        let summarizer = Summarizer::reflective(llm, 0.6);
        let first = summarizer.run(request(Some(previous))).await.unwrap();
        assert_eq!(
            first,
            Outcome::Complete("Module prices fell sharply. Installation costs lag behind.".to_string())
        );
        let second = summarizer.run(request(Some(previous))).await.unwrap();
        assert!(!second.is_degraded());
    }

    #[tokio::test]
    async fn test_empty_merge_keeps_previous() {
        let llm = ScriptedGenerator::new(["   "]);
        let out = Summarizer::reflective(llm, 0.6)
            .run(request(Some("Module prices fell sharply.")))
            .await
            .unwrap();
        assert!(out.is_degraded());
        assert_eq!(out.value(), "Module prices fell sharply.");
    }

    #[tokio::test]
    async fn test_blank_initial_value_uses_placeholder() {
        let llm = ScriptedGenerator::new([r#"{"paragraph_latest_state": ""}"#]);
        let out = Summarizer::initial(llm).run(request(None)).await.unwrap();
        assert!(out.is_degraded());
        assert_eq!(out.value(), "No summary could be drafted for 'Costs'.");
        assert_eq!(out.reason(), Some("model returned an empty summary"));
    }

    #[tokio::test]
    async fn test_blank_merge_value_keeps_previous() {
        let llm = ScriptedGenerator::new([r#"{"updated_paragraph_latest_state": "   "}"#]);
        let out = Summarizer::reflective(llm, 0.6)
            .run(request(Some("Module prices fell sharply.")))
            .await
            .unwrap();
        assert_eq!(
            out,
            Outcome::degraded(
                "Module prices fell sharply.".to_string(),
                "model returned an empty summary"
            )
        );
    }

    #[tokio::test]
    async fn test_lossy_fallback_keeps_both_reasons() {
        let llm = ScriptedGenerator::new(["Inverters are cheap."]);
        let out = Summarizer::reflective(llm, 0.6)
            .run(request(Some("Module prices fell sharply.")))
            .await
            .unwrap();
        assert_eq!(out.value(), "Module prices fell sharply.\n\nInverters are cheap.");
        let reason = out.reason().unwrap();
        assert!(reason.starts_with("summary output did not match the expected shape; merge kept 0%"));
    }

    #[tokio::test]
    async fn test_lossy_merge_is_appended() {
        let previous = "Module prices fell eighty percent between 2010 and 2020.";
        let llm = ScriptedGenerator::new([r#"{"updated_paragraph_latest_state": "Inverters are cheap."}"#]);
        let out = Summarizer::reflective(llm, 0.6)
            .run(request(Some(previous)))
            .await
            .unwrap();
        assert!(out.is_degraded());
        assert_eq!(out.value(), &format!("{}\n\nInverters are cheap.", previous));
        assert!(out.reason().unwrap().contains("minimum"));
    }

    #[tokio::test]
    async fn test_retention_check_can_be_disabled() {
        let llm = ScriptedGenerator::new([r#"{"updated_paragraph_latest_state": "Inverters are cheap."}"#]);
        let out = Summarizer::reflective(llm, 0.0)
            .run(request(Some("Module prices fell sharply.")))
            .await
            .unwrap();
        assert_eq!(out, Outcome::Complete("Inverters are cheap.".to_string()));
    }

    #[tokio::test]
    async fn test_reflective_without_summary_is_invalid() {
        let llm = ScriptedGenerator::new(Vec::<String>::new());
        let err = Summarizer::reflective(llm, 0.6)
            .run(request(None))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput { stage: "reflection_summary", .. }));
    }

    #[test]
    fn test_retention_ratio() {
        assert_eq!(retention("", "anything"), 1.0);
        assert_eq!(retention("the cat sat", "dog"), 1.0);
        assert_eq!(retention("Solar prices", "solar PRICES rose"), 1.0);
        assert_eq!(retention("solar prices", "solar only"), 0.5);
    }

    #[test]
    fn test_evidence_is_truncated() {
        let mut hits = hits(2);
        hits[1].content = "word ".repeat(50);
        let evidence = evidence_from_hits(&hits, 20);
        assert_eq!(evidence[0], hits[0].content.chars().take(20).collect::<String>() + "...");
        assert!(evidence[1].chars().count() <= 23);
    }

    #[test]
    fn test_apply_functions_drive_state() {
        let mut state = ReportState::new("q");
        state.add_sections(&[SectionSpec::new("A", "a")]).unwrap();
        apply_initial_summary(&mut state, 0, "draft").unwrap();
        assert_eq!(apply_reflection_summary(&mut state, 0, "draft plus", 2).unwrap(), 1);
        assert_eq!(state.sections()[0].research().latest_summary(), "draft plus");
    }
}
