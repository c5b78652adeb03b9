//! Research orchestrator: plans the report, drives every section through its
//! search/summarize/reflect loop, then formats the final document.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Local;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::llm::TextGenerator;
use crate::nodes::summary::evidence_from_hits;
use crate::nodes::{
    apply_final_report, apply_initial_summary, apply_plan, apply_reflection_summary,
    FormatRequest, Outcome, PlanRequest, QueryRequest, ReportFormatter, SearchPlan,
    SearchQueryGenerator, Stage, StructurePlanner, SummaryRequest, Summarizer,
};
use crate::output::{write_report, SessionFiles};
use crate::search::{SearchHit, SearchProvider};
use crate::state::{Progress, ReportState, Section, SectionSpec};
use crate::text::preview;

pub type PlanStage = Arc<dyn Stage<Input = PlanRequest, Output = Vec<SectionSpec>>>;
pub type QueryStage = Arc<dyn Stage<Input = QueryRequest, Output = SearchPlan>>;
pub type SummaryStage = Arc<dyn Stage<Input = SummaryRequest, Output = String>>;
pub type FormatStage = Arc<dyn Stage<Input = FormatRequest, Output = String>>;

/// The six stage slots the orchestrator runs. Any slot can hold a substitute.
pub struct Stages {
    pub planner: PlanStage,
    pub first_query: QueryStage,
    pub reflection_query: QueryStage,
    pub first_summary: SummaryStage,
    pub reflection_summary: SummaryStage,
    pub formatter: FormatStage,
}

impl Stages {
    /// Standard model-backed stages sharing one text generator.
    pub fn from_llm(llm: Arc<dyn TextGenerator>, config: &Config) -> Self {
        Self {
            planner: Arc::new(StructurePlanner::new(llm.clone(), config.max_sections)),
            first_query: Arc::new(SearchQueryGenerator::initial(llm.clone())),
            reflection_query: Arc::new(SearchQueryGenerator::reflective(llm.clone())),
            first_summary: Arc::new(Summarizer::initial(llm.clone())),
            reflection_summary: Arc::new(Summarizer::reflective(
                llm.clone(),
                config.min_summary_retention,
            )),
            formatter: Arc::new(ReportFormatter::new(llm)),
        }
    }
}

/// Where a section is in its research loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionPhase {
    Planned,
    InitialSearch,
    InitialSummarized,
    /// Running reflection pass `k`, 1-based.
    Reflecting(u32),
    Completed,
}

impl SectionPhase {
    /// Phase to re-enter a section at, derived from its research record.
    /// `None` for sections that are already finished.
    pub fn resume_point(section: &Section, max_reflections: u32) -> Option<Self> {
        let research = section.research();
        if research.is_finished() {
            return None;
        }
        if research.latest_summary().is_empty() {
            return Some(if research.search_history().is_empty() {
                SectionPhase::Planned
            } else {
                SectionPhase::InitialSearch
            });
        }
        Some(next_reflection(research.reflection_iteration(), max_reflections))
    }
}

/// Phase after `done` completed reflection passes.
fn next_reflection(done: u32, max_reflections: u32) -> SectionPhase {
    if done < max_reflections {
        SectionPhase::Reflecting(done + 1)
    } else {
        SectionPhase::Completed
    }
}

/// A stage that fell back to deterministic output.
#[derive(Debug, Clone, PartialEq)]
pub struct Degradation {
    pub stage: &'static str,
    pub section: Option<usize>,
    pub reason: String,
}

impl fmt::Display for Degradation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.section {
            Some(index) => write!(f, "{} (section {}): {}", self.stage, index, self.reason),
            None => write!(f, "{}: {}", self.stage, self.reason),
        }
    }
}

#[derive(Debug)]
pub struct ResearchOutcome {
    pub report: String,
    pub degradations: Vec<Degradation>,
    /// Set when the report was written to disk.
    pub report_path: Option<PathBuf>,
    /// Set when intermediate state checkpoints are enabled.
    pub state_path: Option<PathBuf>,
}

pub struct ResearchAgent {
    stages: Stages,
    search: Arc<dyn SearchProvider>,
    config: Config,
    state: ReportState,
    files: Option<SessionFiles>,
    degradations: Vec<Degradation>,
}

impl ResearchAgent {
    pub fn new(config: Config, llm: Arc<dyn TextGenerator>, search: Arc<dyn SearchProvider>) -> Self {
        let stages = Stages::from_llm(llm, &config);
        Self::with_stages(config, stages, search)
    }

    pub fn with_stages(config: Config, stages: Stages, search: Arc<dyn SearchProvider>) -> Self {
        Self {
            stages,
            search,
            config,
            state: ReportState::new(""),
            files: None,
            degradations: Vec::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn state(&self) -> &ReportState {
        &self.state
    }

    pub fn progress(&self) -> Progress {
        self.state.progress()
    }

    /// Run a fresh research session for `query`.
    pub async fn research(&mut self, query: &str, save_report: bool) -> Result<ResearchOutcome> {
        let query = query.trim();
        if query.is_empty() {
            return Err(Error::invalid_input("agent", "query is empty"));
        }
        info!(query, "Starting research");
        let files = SessionFiles::new(&self.config.output_dir, query, Local::now());
        self.start(ReportState::new(query), files);
        self.run(save_report).await
    }

    /// Continue the session checkpointed at `path`. Later checkpoints overwrite that file.
    pub async fn resume_from(&mut self, path: &Path, save_report: bool) -> Result<ResearchOutcome> {
        let state = ReportState::load_from_file(path).await?;
        info!(path = %path.display(), query = state.query(), "Resuming research");
        let files = SessionFiles::resumed(&self.config.output_dir, state.query(), path);
        self.resume_with(state, files, save_report).await
    }

    /// Continue an in-memory state from wherever its sections stopped.
    pub async fn resume(&mut self, state: ReportState, save_report: bool) -> Result<ResearchOutcome> {
        let files = SessionFiles::new(&self.config.output_dir, state.query(), Local::now());
        self.resume_with(state, files, save_report).await
    }

    async fn resume_with(
        &mut self,
        state: ReportState,
        files: SessionFiles,
        save_report: bool,
    ) -> Result<ResearchOutcome> {
        if state.query().trim().is_empty() {
            return Err(Error::invalid_input("agent", "state has no query"));
        }
        self.start(state, files);
        self.run(save_report).await
    }

    fn start(&mut self, state: ReportState, files: SessionFiles) {
        self.state = state;
        self.files = Some(files);
        self.degradations.clear();
    }

    async fn run(&mut self, save_report: bool) -> Result<ResearchOutcome> {
        if self.state.sections().is_empty() {
            self.plan().await?;
        }

        let total = self.state.sections().len();
        for index in 0..total {
            if self.research_section(index).await? {
                self.checkpoint().await?;
            }
            info!(
                completed = self.progress().completed_sections,
                total,
                "Section progress"
            );
        }

        if !self.state.is_completed() {
            self.format_report().await?;
            self.checkpoint().await?;
        }

        let report_path = match (&self.files, save_report) {
            (Some(files), true) => {
                write_report(&files.report, self.state.final_report()).await?;
                Some(files.report.clone())
            }
            _ => None,
        };
        let state_path = self
            .files
            .as_ref()
            .filter(|_| self.config.save_intermediate_states)
            .map(|files| files.state.clone());

        info!(
            sections = total,
            degraded = self.degradations.len(),
            "Research complete"
        );
        Ok(ResearchOutcome {
            report: self.state.final_report().to_string(),
            degradations: std::mem::take(&mut self.degradations),
            report_path,
            state_path,
        })
    }

    async fn plan(&mut self) -> Result<()> {
        let request = PlanRequest::new(self.state.query());
        let specs = run_stage(
            self.stages.planner.as_ref(),
            None,
            request,
            &mut self.degradations,
        )
        .await?;
        let count = apply_plan(&mut self.state, &specs)?;
        info!(sections = count, title = self.state.title(), "Report planned");
        for spec in &specs {
            debug!(title = %spec.title, scope = preview(&spec.content, 80), "Planned section");
        }
        Ok(())
    }

    /// Drive one section to completion. Returns false when it was already finished.
    async fn research_section(&mut self, index: usize) -> Result<bool> {
        let max = self.config.max_reflections;
        let section = self.state.section(index)?;
        let Some(mut phase) = SectionPhase::resume_point(section, max) else {
            debug!(section = index, "Section already finished, skipping");
            return Ok(false);
        };
        info!(section = index, title = section.title(), ?phase, "Researching section");

        loop {
            phase = match phase {
                SectionPhase::Planned => SectionPhase::InitialSearch,
                SectionPhase::InitialSearch => {
                    self.initial_pass(index).await?;
                    SectionPhase::InitialSummarized
                }
                SectionPhase::InitialSummarized => next_reflection(0, max),
                SectionPhase::Reflecting(pass) => {
                    let done = self.reflection_pass(index, pass).await?;
                    next_reflection(done, max)
                }
                SectionPhase::Completed => {
                    self.state.finish_section(index, max)?;
                    info!(section = index, "Section completed");
                    return Ok(true);
                }
            };
        }
    }

    async fn initial_pass(&mut self, index: usize) -> Result<()> {
        let (title, scope) = self.section_brief(index)?;

        let request = QueryRequest {
            title: title.clone(),
            scope: scope.clone(),
            latest_summary: None,
        };
        let plan = run_stage(
            self.stages.first_query.as_ref(),
            Some(index),
            request,
            &mut self.degradations,
        )
        .await?;

        let hits = self.search_and_record(index, &plan.search_query).await?;
        let request = SummaryRequest {
            title,
            scope,
            evidence: evidence_from_hits(&hits, self.config.max_content_length),
            search_query: plan.search_query,
            latest_summary: None,
        };
        let summary = run_stage(
            self.stages.first_summary.as_ref(),
            Some(index),
            request,
            &mut self.degradations,
        )
        .await?;

        apply_initial_summary(&mut self.state, index, &summary)?;
        debug!(section = index, summary = preview(&summary, 120), "Initial summary stored");
        Ok(())
    }

    async fn reflection_pass(&mut self, index: usize, pass: u32) -> Result<u32> {
        let (title, scope) = self.section_brief(index)?;
        let latest = self.state.section(index)?.research().latest_summary().to_string();

        let request = QueryRequest {
            title: title.clone(),
            scope: scope.clone(),
            latest_summary: Some(latest.clone()),
        };
        let plan = run_stage(
            self.stages.reflection_query.as_ref(),
            Some(index),
            request,
            &mut self.degradations,
        )
        .await?;

        let hits = self.search_and_record(index, &plan.search_query).await?;
        let request = SummaryRequest {
            title,
            scope,
            evidence: evidence_from_hits(&hits, self.config.max_content_length),
            search_query: plan.search_query,
            latest_summary: Some(latest),
        };
        let merged = run_stage(
            self.stages.reflection_summary.as_ref(),
            Some(index),
            request,
            &mut self.degradations,
        )
        .await?;

        let done = apply_reflection_summary(
            &mut self.state,
            index,
            &merged,
            self.config.max_reflections,
        )?;
        info!(section = index, iteration = done, pass, "Reflection complete");
        Ok(done)
    }

    async fn format_report(&mut self) -> Result<()> {
        let request = FormatRequest::from_state(&self.state);
        let document = run_stage(
            self.stages.formatter.as_ref(),
            None,
            request,
            &mut self.degradations,
        )
        .await?;
        apply_final_report(&mut self.state, &document)?;
        Ok(())
    }

    async fn search_and_record(&mut self, index: usize, query: &str) -> Result<Vec<SearchHit>> {
        let hits = self
            .search
            .search(query, self.config.max_search_results, self.config.search_timeout_secs)
            .await?;
        let total = self.state.record_search(index, query, &hits)?;
        info!(section = index, query, results = hits.len(), total, "Search recorded");
        Ok(hits)
    }

    fn section_brief(&self, index: usize) -> Result<(String, String)> {
        let section = self.state.section(index)?;
        Ok((
            section.title().to_string(),
            section.expected_scope().to_string(),
        ))
    }

    async fn checkpoint(&self) -> Result<()> {
        if !self.config.save_intermediate_states {
            return Ok(());
        }
        if let Some(files) = &self.files {
            self.state.save_to_file(&files.state).await?;
        }
        Ok(())
    }
}

/// Run one stage and record a degraded outcome.
async fn run_stage<I, O>(
    stage: &dyn Stage<Input = I, Output = O>,
    section: Option<usize>,
    input: I,
    degradations: &mut Vec<Degradation>,
) -> Result<O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    match stage.run(input).await? {
        Outcome::Complete(value) => Ok(value),
        Outcome::Degraded { value, reason } => {
            warn!(stage = stage.name(), ?section, %reason, "Stage degraded");
            degradations.push(Degradation {
                stage: stage.name(),
                section,
                reason,
            });
            Ok(value)
        }
    }
}
