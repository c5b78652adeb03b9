use std::collections::HashSet;

use crate::state::ReportState;

/// A distinct web source consulted while researching a report.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRef {
    pub url: String,
    pub title: String,
    /// Title of the first section whose search returned this URL.
    pub section: String,
}

/// Walk every search history in section order and keep the first record per URL.
/// Records without a URL are skipped.
pub fn collect_sources(state: &ReportState) -> Vec<SourceRef> {
    let mut seen = HashSet::new();
    let mut sources = Vec::new();

    for section in state.sections() {
        for record in section.research().search_history() {
            let url = record.url.trim();
            if url.is_empty() || !seen.insert(url.to_string()) {
                continue;
            }
            sources.push(SourceRef {
                url: url.to_string(),
                title: record.title.trim().to_string(),
                section: section.title().to_string(),
            });
        }
    }

    sources
}

/// Sources the report text does not already link to.
pub fn uncited<'a>(sources: &'a [SourceRef], report: &str) -> Vec<&'a SourceRef> {
    sources
        .iter()
        .filter(|s| !report.contains(s.url.trim_end_matches('/')))
        .collect()
}

/// Markdown bullet list, one line per source.
pub fn render_sources(sources: &[SourceRef]) -> String {
    sources
        .iter()
        .map(|s| {
            if s.title.is_empty() {
                format!("- <{}>", s.url)
            } else {
                format!("- [{}]({})", s.title, s.url)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}
