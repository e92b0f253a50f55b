use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_yaml::Value;

use crate::error::SyncError;

pub const TOC_FILENAME: &str = "_toc.yml";
pub const INTRODUCTION_SECTION: &str = "Introduction";

const LEGACY_SCHEMA_MESSAGE: &str = "legacy _toc.yml schema (top-level list of `part`/`chapters`) is not supported; \
move each `- part: NAME` entry under a top-level `parts:` key as `- caption: NAME` and keep its `chapters:` list";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TocEntry {
    pub section_name: String,
    pub source_file: String,
}

#[derive(Debug, Deserialize)]
struct TocDocument {
    root: Option<String>,
    parts: Option<Vec<TocPart>>,
}

#[derive(Debug, Deserialize)]
struct TocPart {
    caption: Option<String>,
    #[serde(default)]
    chapters: Vec<TocChapter>,
}

#[derive(Debug, Deserialize)]
struct TocChapter {
    file: Option<String>,
    url: Option<String>,
    glob: Option<String>,
    #[serde(default)]
    sections: Vec<TocChapter>,
}

pub fn toc_path(source_dir: &Path) -> PathBuf {
    source_dir.join(TOC_FILENAME)
}

/// Read `_toc.yml` under `source_dir` into ordered entries.
pub fn read_toc(source_dir: &Path, include_root: bool) -> Result<Vec<TocEntry>> {
    let path = toc_path(source_dir);
    if !path.exists() {
        return Err(SyncError::Config(format!("TOC file not found: {}", path.display())).into());
    }
    let content = fs::read_to_string(&path)
        .map_err(|error| SyncError::Config(format!("{}: {error}", path.display())))
        .with_context(|| format!("failed to read {}", path.display()))?;
    parse_toc(&content, include_root).with_context(|| format!("invalid TOC {}", path.display()))
}

pub fn parse_toc(content: &str, include_root: bool) -> Result<Vec<TocEntry>> {
    let raw: Value = serde_yaml::from_str(content)
        .map_err(|error| SyncError::Config(format!("malformed YAML: {error}")))?;
    if is_legacy_schema(&raw) {
        return Err(SyncError::Config(LEGACY_SCHEMA_MESSAGE.to_string()).into());
    }
    let has_parts = raw
        .as_mapping()
        .is_some_and(|mapping| mapping.contains_key("parts"));
    if !has_parts {
        return Err(SyncError::Config("TOC has no `parts` key".to_string()).into());
    }
    let document: TocDocument = serde_yaml::from_value(raw)
        .map_err(|error| SyncError::Config(format!("unexpected TOC structure: {error}")))?;

    let mut entries = Vec::new();
    if include_root
        && let Some(root) = document.root.as_deref().map(str::trim)
        && !root.is_empty()
    {
        entries.push(TocEntry {
            section_name: INTRODUCTION_SECTION.to_string(),
            source_file: root.to_string(),
        });
    }

    for (index, part) in document.parts.unwrap_or_default().into_iter().enumerate() {
        let caption = part
            .caption
            .as_deref()
            .map(str::trim)
            .filter(|caption| !caption.is_empty())
            .ok_or_else(|| SyncError::Config(format!("part #{} has no caption", index + 1)))?
            .to_string();
        for chapter in &part.chapters {
            collect_chapter(&caption, chapter, &mut entries);
        }
    }

    let mut seen = BTreeSet::new();
    for entry in &entries {
        let key = strip_extension(&entry.source_file);
        if !seen.insert(key.to_string()) {
            return Err(SyncError::Config(format!(
                "file `{}` appears more than once in the TOC",
                entry.source_file
            ))
            .into());
        }
    }

    Ok(entries)
}

fn collect_chapter(section_name: &str, chapter: &TocChapter, entries: &mut Vec<TocEntry>) {
    match chapter.file.as_deref().map(str::trim) {
        Some(file) if !file.is_empty() => entries.push(TocEntry {
            section_name: section_name.to_string(),
            source_file: file.to_string(),
        }),
        _ => tracing::debug!(
            url = chapter.url.as_deref().unwrap_or(""),
            glob = chapter.glob.as_deref().unwrap_or(""),
            "skipping TOC entry without a file"
        ),
    }
    for nested in &chapter.sections {
        collect_chapter(section_name, nested, entries);
    }
}

fn is_legacy_schema(raw: &Value) -> bool {
    raw.as_sequence().is_some_and(|items| {
        items.iter().any(|item| {
            item.as_mapping()
                .is_some_and(|mapping| mapping.contains_key("part"))
        })
    })
}

/// `intro/setup.md` under `_build/html` becomes `_build/html/intro/setup.html`.
pub fn html_path_for(html_dir: &Path, source_file: &str) -> PathBuf {
    html_dir.join(format!("{}.html", strip_extension(source_file)))
}

fn strip_extension(source_file: &str) -> &str {
    let trimmed = source_file.trim_start_matches("./");
    let name_start = trimmed.rfind('/').map(|index| index + 1).unwrap_or(0);
    match trimmed[name_start..].rfind('.') {
        Some(dot) if dot > 0 => &trimmed[..name_start + dot],
        _ => trimmed,
    }
}
