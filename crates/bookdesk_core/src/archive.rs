use std::path::Path;

use anyhow::Result;
use serde::Serialize;

use crate::book::remove_build_output;
use crate::helpcenter::HelpCenterApi;
use crate::ledger::{read_ledger, truncate_ledger};

const ARCHIVED_STATUS: u16 = 204;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArchiveWarning {
    pub article_id: i64,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ArchiveReport {
    pub archived: Vec<i64>,
    pub warnings: Vec<ArchiveWarning>,
    pub ledger_truncated: bool,
    pub build_removed: bool,
    pub request_count: usize,
}

/// Archive every article in the ledger, then truncate the ledger and remove
/// `build_dir`. Per-article failures are warnings.
pub fn archive_book<A: HelpCenterApi>(
    api: &mut A,
    ledger_path: &Path,
    build_dir: &Path,
) -> Result<ArchiveReport> {
    let ledger = read_ledger(ledger_path);
    let mut report = ArchiveReport::default();
    if ledger.is_empty() {
        tracing::info!(ledger = %ledger_path.display(), "nothing to archive");
    }

    for entry in &ledger.articles {
        match api.archive_article(entry.article_id) {
            Ok(ARCHIVED_STATUS) => {
                tracing::info!(id = entry.article_id, path = %entry.html_file_path, "archived article");
                report.archived.push(entry.article_id);
            }
            Ok(status) => {
                tracing::warn!(id = entry.article_id, status, "archive not confirmed");
                report.warnings.push(ArchiveWarning {
                    article_id: entry.article_id,
                    message: format!("unexpected HTTP {status}"),
                });
            }
            Err(error) => {
                let message = format!("{error:#}");
                tracing::warn!(id = entry.article_id, error = %message, "archive failed");
                report.warnings.push(ArchiveWarning {
                    article_id: entry.article_id,
                    message,
                });
            }
        }
    }

    if ledger_path.exists() {
        truncate_ledger(ledger_path)?;
        report.ledger_truncated = true;
    }
    report.build_removed = remove_build_output(build_dir)?;
    report.request_count = api.request_count();
    Ok(report)
}
