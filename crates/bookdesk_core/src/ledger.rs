use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const LEDGER_FILENAME: &str = "zendesk.json";
const TIMESTAMP_FORMAT: &str = "%m-%d-%Y:%H:%M:%SZ";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerEntry {
    pub section_name: String,
    pub section_id: i64,
    pub html_file_path: String,
    pub article_id: i64,
    pub article_html_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Ledger {
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub articles: Vec<LedgerEntry>,
}

impl Ledger {
    /// A ledger for `articles` stamped with the current UTC time.
    pub fn stamped(articles: Vec<LedgerEntry>) -> Self {
        Self {
            timestamp: chrono::Utc::now().format(TIMESTAMP_FORMAT).to_string(),
            articles,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.articles.is_empty()
    }

    pub fn find_by_path(&self, html_file_path: &str) -> Option<&LedgerEntry> {
        self.articles
            .iter()
            .find(|entry| entry.html_file_path == html_file_path)
    }
}

pub fn ledger_path(state_dir: &Path) -> PathBuf {
    state_dir.join(LEDGER_FILENAME)
}

/// Missing, empty or unparsable ledgers all read as "no prior state".
pub fn read_ledger(path: &Path) -> Ledger {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(error) => {
            if path.exists() {
                tracing::warn!(path = %path.display(), %error, "ledger unreadable; starting empty");
            }
            return Ledger::default();
        }
    };
    if content.trim().is_empty() {
        return Ledger::default();
    }
    match serde_json::from_str(&content) {
        Ok(ledger) => ledger,
        Err(error) => {
            tracing::warn!(path = %path.display(), %error, "ledger is not valid JSON; starting empty");
            Ledger::default()
        }
    }
}

/// Replace the ledger file via a sibling temp file and rename.
pub fn write_ledger(path: &Path, ledger: &Ledger) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let rendered = serde_json::to_string_pretty(ledger).context("failed to serialize ledger")?;
    let temp_path = path.with_extension("json.tmp");
    fs::write(&temp_path, rendered)
        .with_context(|| format!("failed to write {}", temp_path.display()))?;
    fs::rename(&temp_path, path).with_context(|| {
        format!(
            "failed to move {} into place at {}",
            temp_path.display(),
            path.display()
        )
    })?;
    Ok(())
}

/// Zero the ledger without deleting it.
pub fn truncate_ledger(path: &Path) -> Result<()> {
    fs::write(path, b"").with_context(|| format!("failed to truncate {}", path.display()))
}
