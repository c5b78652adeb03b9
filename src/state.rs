//! Mutable report state for one research session.
//!
//! Every mutation goes through a [`ReportState`] method so that `updated_at`
//! is bumped and the section lifecycle can't be driven out of order.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::search::SearchHit;

/// Planned unit of the report: a title and the content it is expected to cover.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionSpec {
    pub title: String,
    pub content: String,
}

impl SectionSpec {
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
        }
    }
}

/// One search result kept for provenance. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRecord {
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default = "Utc::now", with = "timestamp")]
    pub timestamp: DateTime<Utc>,
}

/// Research progress of a single section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Research {
    search_history: Vec<SearchRecord>,
    latest_summary: String,
    reflection_iteration: u32,
    is_finished: bool,
}

impl Research {
    pub fn search_history(&self) -> &[SearchRecord] {
        &self.search_history
    }

    pub fn search_count(&self) -> usize {
        self.search_history.len()
    }

    pub fn latest_summary(&self) -> &str {
        &self.latest_summary
    }

    pub fn reflection_iteration(&self) -> u32 {
        self.reflection_iteration
    }

    pub fn is_finished(&self) -> bool {
        self.is_finished
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    #[serde(default)]
    title: String,
    #[serde(default, rename = "content")]
    expected_scope: String,
    #[serde(default)]
    research: Research,
    #[serde(default)]
    order: usize,
}

impl Section {
    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn expected_scope(&self) -> &str {
        &self.expected_scope
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub fn research(&self) -> &Research {
        &self.research
    }

    /// Finished and carrying a drafted summary.
    pub fn is_finished(&self) -> bool {
        self.research.is_finished && !self.research.latest_summary.is_empty()
    }

    /// Drafted text, or the planned scope if nothing has been drafted yet.
    pub fn final_content(&self) -> &str {
        if self.research.latest_summary.is_empty() {
            &self.expected_scope
        } else {
            &self.research.latest_summary
        }
    }
}

/// Snapshot of session progress.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Progress {
    pub total_sections: usize,
    pub completed_sections: usize,
    pub progress_percentage: f64,
    pub is_completed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportState {
    #[serde(default)]
    query: String,
    #[serde(default, rename = "report_title")]
    title: String,
    #[serde(default, rename = "paragraphs")]
    sections: Vec<Section>,
    #[serde(default)]
    final_report: String,
    #[serde(default, rename = "is_completed")]
    completed: bool,
    #[serde(default = "Utc::now", with = "timestamp")]
    created_at: DateTime<Utc>,
    #[serde(default = "Utc::now", with = "timestamp")]
    updated_at: DateTime<Utc>,
}

impl ReportState {
    pub fn new(query: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            query: query.into(),
            title: String::new(),
            sections: Vec::new(),
            final_report: String::new(),
            completed: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Title used when the planner leaves the report untitled.
    pub fn default_title(query: &str) -> String {
        format!("Research Report of '{}'", query)
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn section(&self, index: usize) -> Result<&Section> {
        let len = self.sections.len();
        self.sections
            .get(index)
            .ok_or(Error::SectionIndex { index, len })
    }

    pub fn final_report(&self) -> &str {
        &self.final_report
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn all_sections_finished(&self) -> bool {
        !self.sections.is_empty() && self.sections.iter().all(Section::is_finished)
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = title.into();
        self.touch();
    }

    /// Create every section in one batch. Sections are never added afterwards.
    pub fn add_sections(&mut self, specs: &[SectionSpec]) -> Result<usize> {
        if !self.sections.is_empty() {
            return Err(Error::Transition(format!(
                "report already has {} sections",
                self.sections.len()
            )));
        }
        if specs.is_empty() {
            return Err(Error::invalid_input("state", "no sections to add"));
        }

        self.sections = specs
            .iter()
            .enumerate()
            .map(|(order, spec)| Section {
                title: spec.title.clone(),
                expected_scope: spec.content.clone(),
                research: Research::default(),
                order,
            })
            .collect();
        self.touch();
        Ok(self.sections.len())
    }

    /// Append one record per hit to the section's search history.
    pub fn record_search(&mut self, index: usize, query: &str, hits: &[SearchHit]) -> Result<usize> {
        let section = self.open_section_mut(index)?;
        let now = Utc::now();
        section
            .research
            .search_history
            .extend(hits.iter().map(|hit| SearchRecord {
                query: query.to_string(),
                url: hit.url.clone(),
                title: hit.title.clone(),
                content: hit.content.clone(),
                score: hit.score,
                timestamp: now,
            }));
        let count = section.research.search_history.len();
        self.touch();
        Ok(count)
    }

    /// Store the first draft of a section.
    pub fn set_initial_summary(&mut self, index: usize, summary: impl Into<String>) -> Result<()> {
        let section = self.open_section_mut(index)?;
        if section.research.reflection_iteration > 0 {
            return Err(Error::Transition(format!(
                "section {} is already in reflection pass {}",
                index, section.research.reflection_iteration
            )));
        }
        section.research.latest_summary = summary.into();
        self.touch();
        Ok(())
    }

    /// Store a merged summary and count one completed reflection pass.
    /// Returns the new iteration count.
    pub fn apply_reflection(
        &mut self,
        index: usize,
        summary: impl Into<String>,
        max_reflections: u32,
    ) -> Result<u32> {
        let section = self.open_section_mut(index)?;
        if section.research.latest_summary.is_empty() {
            return Err(Error::Transition(format!(
                "section {} has no initial summary to reflect on",
                index
            )));
        }
        if section.research.reflection_iteration >= max_reflections {
            return Err(Error::Transition(format!(
                "section {} already completed {} of {} reflections",
                index, section.research.reflection_iteration, max_reflections
            )));
        }
        section.research.latest_summary = summary.into();
        section.research.reflection_iteration += 1;
        let iteration = section.research.reflection_iteration;
        self.touch();
        Ok(iteration)
    }

    /// Mark a section finished. Allowed once, after its reflection loop is exhausted.
    pub fn finish_section(&mut self, index: usize, max_reflections: u32) -> Result<()> {
        let section = self.open_section_mut(index)?;
        if section.research.latest_summary.is_empty() {
            return Err(Error::Transition(format!(
                "section {} has no drafted summary",
                index
            )));
        }
        if section.research.reflection_iteration < max_reflections {
            return Err(Error::Transition(format!(
                "section {} finished after {} of {} reflections",
                index, section.research.reflection_iteration, max_reflections
            )));
        }
        section.research.is_finished = true;
        self.touch();
        Ok(())
    }

    /// Store the formatted report and close the session.
    pub fn finalize(&mut self, report: impl Into<String>) -> Result<()> {
        if self.completed {
            return Err(Error::Transition("report is already completed".to_string()));
        }
        if !self.all_sections_finished() {
            return Err(Error::Transition(
                "cannot finalize before every section is finished".to_string(),
            ));
        }
        let report = report.into();
        if report.trim().is_empty() {
            return Err(Error::invalid_input("state", "final report is empty"));
        }
        self.final_report = report;
        self.completed = true;
        self.touch();
        Ok(())
    }

    pub fn progress(&self) -> Progress {
        let total = self.sections.len();
        let completed = self.sections.iter().filter(|s| s.is_finished()).count();
        Progress {
            total_sections: total,
            completed_sections: completed,
            progress_percentage: if total > 0 {
                completed as f64 / total as f64 * 100.0
            } else {
                0.0
            },
            is_completed: self.completed,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let state: ReportState = serde_json::from_str(json)?;
        state.check_order()?;
        Ok(state)
    }

    pub async fn save_to_file(&self, path: &Path) -> Result<()> {
        let json = self.to_json()?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::persistence(parent, e))?;
        }
        tokio::fs::write(path, json)
            .await
            .map_err(|e| Error::persistence(path, e))?;
        debug!(path = %path.display(), sections = self.sections.len(), "State saved");
        Ok(())
    }

    pub async fn load_from_file(path: &Path) -> Result<Self> {
        let json = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| Error::persistence(path, e))?;
        let state = Self::from_json(&json)?;
        debug!(path = %path.display(), sections = state.sections.len(), "State loaded");
        Ok(state)
    }

    fn open_section_mut(&mut self, index: usize) -> Result<&mut Section> {
        let len = self.sections.len();
        let section = self
            .sections
            .get_mut(index)
            .ok_or(Error::SectionIndex { index, len })?;
        if section.research.is_finished {
            return Err(Error::Transition(format!("section {} is already finished", index)));
        }
        Ok(section)
    }

    fn check_order(&self) -> Result<()> {
        for (position, section) in self.sections.iter().enumerate() {
            if section.order != position {
                return Err(Error::invalid_input(
                    "state document",
                    format!(
                        "section '{}' has order {} at position {}",
                        section.title, section.order, position
                    ),
                ));
            }
        }
        Ok(())
    }

    fn touch(&mut self) {
        self.updated_at = self.updated_at.max(Utc::now());
    }
}

/// RFC 3339 on write; RFC 3339 or naive ISO-8601 on load.
///
/// A naive timestamp carries no offset, so it is taken as UTC. State files
/// written with local naive times will shift by the writer's offset and are
/// re-emitted with a `Z` suffix on the next save.
mod timestamp {
    use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::AutoSi, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).map_err(de::Error::custom)
    }

    pub fn parse(raw: &str) -> Result<DateTime<Utc>, String> {
        if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
            return Ok(ts.with_timezone(&Utc));
        }
        raw.parse::<NaiveDateTime>()
            .map(|naive| naive.and_utc())
            .map_err(|e| format!("invalid timestamp '{}': {}", raw, e))
    }
}
