use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{info, warn};

use super::{prompts, Outcome, Stage};
use crate::error::{Error, Result};
use crate::llm::{GenerationOptions, TextGenerator};
use crate::state::ReportState;
use crate::text::{strip_reasoning, truncate_content, unwrap_markdown_fence};

const STAGE: &str = "report_formatter";

const CONCLUSION_MARKERS: [&str; 5] = [
    "conclusion",
    "concluding",
    "final thoughts",
    "closing remarks",
    "takeaways",
];

/// Longest per-section excerpt quoted in a synthesized conclusion.
const CONCLUSION_EXCERPT_LEN: usize = 200;

#[derive(Debug, Clone, PartialEq)]
pub struct FormatSection {
    pub title: String,
    pub scope: String,
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FormatRequest {
    pub report_title: String,
    pub sections: Vec<FormatSection>,
}

impl FormatRequest {
    /// Build from the finished sections of a report, in order.
    pub fn from_state(state: &ReportState) -> Self {
        let report_title = if state.title().is_empty() {
            ReportState::default_title(state.query())
        } else {
            state.title().to_string()
        };
        Self {
            report_title,
            sections: state
                .sections()
                .iter()
                .map(|section| FormatSection {
                    title: section.title().to_string(),
                    scope: section.expected_scope().to_string(),
                    summary: section.final_content().to_string(),
                })
                .collect(),
        }
    }

    fn has_conclusion_section(&self) -> bool {
        self.sections.iter().any(|s| is_conclusion(&s.title))
    }
}

#[derive(Serialize)]
struct FormatPayload<'a> {
    title: &'a str,
    paragraph_latest_state: &'a str,
}

/// Assembles the final Markdown document from the finished sections.
pub struct ReportFormatter {
    llm: Arc<dyn TextGenerator>,
    options: GenerationOptions,
}

impl ReportFormatter {
    pub fn new(llm: Arc<dyn TextGenerator>) -> Self {
        Self {
            llm,
            options: GenerationOptions::default().with_temperature(0.3),
        }
    }
}

#[async_trait]
impl Stage for ReportFormatter {
    type Input = FormatRequest;
    type Output = String;

    fn name(&self) -> &'static str {
        STAGE
    }

    async fn run(&self, input: FormatRequest) -> Result<Outcome<String>> {
        if input.sections.is_empty() {
            return Err(Error::invalid_input(STAGE, "no sections to format"));
        }
        if let Some(empty) = input.sections.iter().find(|s| s.summary.trim().is_empty()) {
            return Err(Error::invalid_input(
                STAGE,
                format!("section '{}' has no summary", empty.title),
            ));
        }

        let payload: Vec<FormatPayload<'_>> = input
            .sections
            .iter()
            .map(|s| FormatPayload {
                title: &s.title,
                paragraph_latest_state: &s.summary,
            })
            .collect();
        let payload = serde_json::to_string(&payload)?;

        let raw = self
            .llm
            .invoke(prompts::REPORT_FORMATTING, &payload, &self.options)
            .await?;
        let document = unwrap_markdown_fence(&strip_reasoning(&raw));

        if document.is_empty() {
            warn!("Formatter returned an empty document, assembling manually");
            return Ok(Outcome::degraded(
                format_manually(&input),
                "model returned an empty document",
            ));
        }

        let missing = missing_headings(&document, &input.sections);
        if !missing.is_empty() {
            warn!(missing = ?missing, "Formatter dropped section headings, assembling manually");
            return Ok(Outcome::degraded(
                format_manually(&input),
                format!("model document is missing section headings: {}", missing.join(", ")),
            ));
        }

        let document = finish_document(document, &input);
        info!(report_len = document.len(), "Report formatted");
        Ok(Outcome::Complete(document))
    }
}

/// Deterministic Markdown rendering, used when the model cannot format the report.
pub fn format_manually(request: &FormatRequest) -> String {
    let mut out = format!("# {}\n\n---\n\n", request.report_title);
    for section in &request.sections {
        out.push_str(&format!("## {}\n\n", section.title));
        if !section.scope.trim().is_empty() {
            out.push_str(&format!("*{}*\n\n", section.scope.trim()));
        }
        out.push_str(section.summary.trim());
        out.push_str("\n\n---\n\n");
    }
    if request.sections.len() > 1 && !request.has_conclusion_section() {
        out.push_str("## Conclusion\n\n");
        out.push_str(&synthesize_conclusion(&request.sections));
        out.push('\n');
    }
    out
}

pub fn apply_final_report(state: &mut ReportState, report: &str) -> Result<()> {
    state.finalize(report)
}

/// Give a model-written document a title heading and a conclusion if it lacks them.
fn finish_document(document: String, request: &FormatRequest) -> String {
    let mut document = if has_title_heading(&document) {
        document
    } else {
        format!("# {}\n\n{}", request.report_title, document)
    };

    if !request.has_conclusion_section() && !has_conclusion_heading(&document) {
        document.push_str("\n\n## Conclusion\n\n");
        document.push_str(&synthesize_conclusion(&request.sections));
        document.push('\n');
    }
    document
}

fn has_title_heading(document: &str) -> bool {
    document
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .is_some_and(|line| line.starts_with("# "))
}

/// Section titles with no matching heading line in the document.
fn missing_headings<'a>(document: &str, sections: &'a [FormatSection]) -> Vec<&'a str> {
    let headings: Vec<String> = document
        .lines()
        .map(str::trim_start)
        .filter(|line| line.starts_with('#'))
        .map(|line| line.trim_start_matches('#').trim().to_lowercase())
        .collect();
    sections
        .iter()
        .map(|s| s.title.as_str())
        .filter(|title| !headings.iter().any(|h| *h == title.trim().to_lowercase()))
        .collect()
}

fn is_conclusion(title: &str) -> bool {
    let title = title.to_lowercase();
    CONCLUSION_MARKERS.iter().any(|m| title.contains(m))
}

fn has_conclusion_heading(document: &str) -> bool {
    document
        .lines()
        .map(str::trim_start)
        .filter(|line| line.starts_with('#'))
        .any(|line| is_conclusion(line.trim_start_matches('#')))
}

fn synthesize_conclusion(sections: &[FormatSection]) -> String {
    let titles: Vec<&str> = sections.iter().map(|s| s.title.as_str()).collect();
    let mut out = format!(
        "This report covered {} {}: {}.\n",
        sections.len(),
        if sections.len() == 1 { "area" } else { "areas" },
        join_titles(&titles)
    );
    for section in sections {
        out.push_str(&format!(
            "\n- **{}**: {}",
            section.title,
            lead_sentence(&section.summary)
        ));
    }
    out
}

fn join_titles(titles: &[&str]) -> String {
    match titles {
        [] => String::new(),
        [one] => one.to_string(),
        [init @ .., last] => format!("{} and {}", init.join(", "), last),
    }
}

/// First sentence or line of a summary, capped for quoting.
fn lead_sentence(summary: &str) -> String {
    let summary = summary.trim();
    let line = summary.lines().next().unwrap_or_default();
    let sentence = match line.find(". ") {
        Some(end) => &line[..=end],
        None => line,
    };
    truncate_content(sentence, CONCLUSION_EXCERPT_LEN)
}
