use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::html;
use crate::ledger::LedgerEntry;

pub const UNRESOLVED_PLACEHOLDER: &str = "#";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RewrittenLink {
    pub href: String,
    pub url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LinkReport {
    pub rewritten: Vec<RewrittenLink>,
    pub unresolved: Vec<String>,
    pub changed: bool,
}

/// Anchors left alone: other sites, mail links and in-page fragments.
pub fn is_passthrough_href(href: &str) -> bool {
    let lowered = href.trim().to_ascii_lowercase();
    lowered.is_empty()
        || lowered.starts_with('#')
        || lowered.starts_with("http://")
        || lowered.starts_with("https://")
        || lowered.starts_with("//")
        || lowered.starts_with("mailto:")
}

/// Remote URL (plus fragment) of the published page `href` points at.
pub fn find_matching_url(href: &str, entries: &[LedgerEntry]) -> Option<String> {
    let (path_part, fragment) = match href.find('#') {
        Some(index) => (&href[..index], &href[index..]),
        None => (href, ""),
    };
    let mut relative = path_part.trim();
    loop {
        if let Some(rest) = relative.strip_prefix("./") {
            relative = rest;
        } else if let Some(rest) = relative.strip_prefix("../") {
            relative = rest;
        } else {
            break;
        }
    }
    if relative.is_empty() {
        return None;
    }

    let name_start = relative.rfind('/').map(|index| index + 1).unwrap_or(0);
    let stem = match relative[name_start..].rfind('.') {
        Some(dot) if dot > 0 => &relative[..name_start + dot],
        _ => relative,
    };
    let target = format!("{stem}.html");
    let boundary_target = format!("/{target}");

    entries
        .iter()
        .find(|entry| {
            let path = entry.html_file_path.replace('\\', "/");
            path == target || path.ends_with(&boundary_target)
        })
        .map(|entry| format!("{}{fragment}", entry.article_html_url))
}

/// Point every internal anchor in the main content of `path` at its remote
/// article, or at the placeholder when no published page matches.
pub fn rewrite_links(
    path: &Path,
    entries: &[LedgerEntry],
    main_content_id: &str,
) -> Result<LinkReport> {
    let source =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let tags = html::scan_tags(&source);
    let mut report = LinkReport::default();
    let Some(main) = html::find_by_id(&tags, main_content_id) else {
        return Ok(report);
    };

    let mut splices = Vec::new();
    for tag in html::tags_within(&tags, "a", &main) {
        let Some(href) = tag.attr("href") else {
            continue;
        };
        if is_passthrough_href(href) {
            continue;
        }
        let replacement = match find_matching_url(href, entries) {
            Some(url) => {
                report.rewritten.push(RewrittenLink {
                    href: href.to_string(),
                    url: url.clone(),
                });
                url
            }
            None => {
                tracing::warn!(path = %path.display(), href, "link target not published; using placeholder");
                report.unresolved.push(href.to_string());
                UNRESOLVED_PLACEHOLDER.to_string()
            }
        };
        if let Some(splice) = html::replace_attribute(tag, "href", &replacement) {
            splices.push(splice);
        }
    }

    if !splices.is_empty() {
        fs::write(path, html::apply_splices(&source, splices))
            .with_context(|| format!("failed to write {}", path.display()))?;
        report.changed = true;
    }
    Ok(report)
}
