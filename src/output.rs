//! Where a session's artifacts land on disk.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use tracing::info;

use crate::error::{Error, Result};
use crate::text::query_slug;

const STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Report and state file paths for one research session.
///
/// Both names share the query slug and the session start time, so a
/// checkpointed state can always be matched with its report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionFiles {
    pub report: PathBuf,
    pub state: PathBuf,
}

impl SessionFiles {
    pub fn new(output_dir: &Path, query: &str, started: DateTime<Local>) -> Self {
        let slug = query_slug(query);
        let stamp = started.format(STAMP_FORMAT);
        Self {
            report: output_dir.join(format!("deep_search_report_{}_{}.md", slug, stamp)),
            state: output_dir.join(format!("state_{}_{}.json", slug, stamp)),
        }
    }

    /// Files for a resumed session: keep checkpointing to the loaded state file.
    pub fn resumed(output_dir: &Path, query: &str, state_path: &Path) -> Self {
        Self {
            state: state_path.to_path_buf(),
            ..Self::new(output_dir, query, Local::now())
        }
    }
}

/// Write the final markdown document, creating the output directory if needed.
pub async fn write_report(path: &Path, document: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| Error::persistence(parent, e))?;
    }
    tokio::fs::write(path, document)
        .await
        .map_err(|e| Error::persistence(path, e))?;
    info!(path = %path.display(), bytes = document.len(), "Report saved");
    Ok(())
}
