use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::html;
use crate::storage::ObjectStore;

const REMOTE_PREFIXES: &[&str] = &["http://", "https://", "//", "data:"];

#[derive(Debug, Clone, Copy)]
pub struct AssetSettings<'a> {
    pub main_content_id: &'a str,
    pub key_prefix: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadedAsset {
    pub src: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssetFailure {
    pub src: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AssetReport {
    pub uploaded: Vec<UploadedAsset>,
    pub skipped_remote: usize,
    pub failures: Vec<AssetFailure>,
    pub rewritten: bool,
}

pub fn is_remote_src(src: &str) -> bool {
    let lowered = src.trim().to_ascii_lowercase();
    REMOTE_PREFIXES
        .iter()
        .any(|prefix| lowered.starts_with(prefix))
}

/// Upload local images referenced from the main content of `path` and point
/// their `src` at the uploaded copies. Failed uploads leave `src` unchanged.
pub fn relocate_images<S: ObjectStore>(
    path: &Path,
    store: &mut S,
    settings: AssetSettings<'_>,
) -> Result<AssetReport> {
    let source =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let tags = html::scan_tags(&source);
    let mut report = AssetReport::default();
    let Some(main) = html::find_by_id(&tags, settings.main_content_id) else {
        tracing::warn!(path = %path.display(), "no main content; images left in place");
        return Ok(report);
    };

    let base_dir = path.parent().unwrap_or_else(|| Path::new(""));
    let mut uploaded_by_src: BTreeMap<String, Option<String>> = BTreeMap::new();
    let mut splices = Vec::new();

    for tag in html::tags_within(&tags, "img", &main) {
        let Some(src) = tag.attr("src").map(str::trim) else {
            continue;
        };
        if src.is_empty() {
            continue;
        }
        if is_remote_src(src) {
            report.skipped_remote += 1;
            continue;
        }

        let url = match uploaded_by_src.get(src) {
            Some(previous) => previous.clone(),
            None => {
                let result = upload(store, base_dir, src, settings.key_prefix);
                let url = match result {
                    Ok(url) => {
                        report.uploaded.push(UploadedAsset {
                            src: src.to_string(),
                            url: url.clone(),
                        });
                        Some(url)
                    }
                    Err(error) => {
                        let message = format!("{error:#}");
                        tracing::warn!(path = %path.display(), src, error = %message, "image upload failed");
                        report.failures.push(AssetFailure {
                            src: src.to_string(),
                            message,
                        });
                        None
                    }
                };
                uploaded_by_src.insert(src.to_string(), url.clone());
                url
            }
        };
        if let Some(url) = url
            && let Some(splice) = html::replace_attribute(tag, "src", &url)
        {
            splices.push(splice);
        }
    }

    if !splices.is_empty() {
        let rewritten = html::apply_splices(&source, splices);
        fs::write(path, rewritten)
            .with_context(|| format!("failed to write {}", path.display()))?;
        report.rewritten = true;
    }
    Ok(report)
}

fn upload<S: ObjectStore>(
    store: &mut S,
    base_dir: &Path,
    src: &str,
    key_prefix: &str,
) -> Result<String> {
    let relative = src
        .split(['?', '#'])
        .next()
        .unwrap_or(src)
        .trim_start_matches("./");
    let local = base_dir.join(relative);
    let basename = local
        .file_name()
        .and_then(|name| name.to_str())
        .with_context(|| format!("image src `{src}` has no file name"))?;
    let key = format!("{key_prefix}{basename}");
    store.put_public(&local, &key)
}
