use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result};
use walkdir::WalkDir;

use crate::catalog::SectionMapping;
use crate::error::SyncError;

pub const BUILD_DIRNAME: &str = "_build";
/// Pages the generator emits for every book that are never published.
pub const EXCLUDED_PAGE_STEMS: &[&str] = &["index", "genindex", "search"];

pub fn build_dir(source_dir: &Path) -> PathBuf {
    source_dir.join(BUILD_DIRNAME)
}

pub fn html_dir(source_dir: &Path) -> PathBuf {
    build_dir(source_dir).join("html")
}

/// Run `command... <source_dir>`; output streams to the terminal.
pub fn build_book(command: &[String], source_dir: &Path) -> Result<()> {
    let Some((program, args)) = command.split_first() else {
        return Err(SyncError::Config("book build command is empty".to_string()).into());
    };
    tracing::info!(program, source = %source_dir.display(), "building book");
    let status = Command::new(program)
        .args(args)
        .arg(source_dir)
        .status()
        .map_err(|error| SyncError::Config(format!("failed to execute {program}: {error}")))?;
    if !status.success() {
        return Err(SyncError::Config(format!(
            "book build `{} {}` exited with {}",
            command.join(" "),
            source_dir.display(),
            status
                .code()
                .map_or_else(|| "a signal".to_string(), |code| format!("status {code}"))
        ))
        .into());
    }
    Ok(())
}

/// Delete a build directory. Returns whether anything was removed.
pub fn remove_build_output(build_dir: &Path) -> Result<bool> {
    if !build_dir.exists() {
        return Ok(false);
    }
    fs::remove_dir_all(build_dir)
        .with_context(|| format!("failed to remove {}", build_dir.display()))?;
    tracing::info!(path = %build_dir.display(), "removed local build output");
    Ok(true)
}

pub fn verify_html_outputs(mappings: &[SectionMapping]) -> Result<()> {
    let missing = mappings
        .iter()
        .filter(|mapping| !mapping.html_file_path.is_file())
        .map(|mapping| mapping.html_file_path.display().to_string())
        .collect::<Vec<_>>();
    if missing.is_empty() {
        return Ok(());
    }
    Err(SyncError::Config(format!(
        "HTML output missing after build: {}",
        missing.join(", ")
    ))
    .into())
}

/// Publishable pages under `html_dir`, sorted. Generator support
/// directories (`_static`, `_sources`, ...) and index/search pages are skipped.
pub fn list_generated_pages(html_dir: &Path) -> Result<Vec<PathBuf>> {
    if !html_dir.exists() {
        return Ok(Vec::new());
    }
    let mut pages = Vec::new();
    let walker = WalkDir::new(html_dir)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| {
            entry.depth() == 0
                || !entry.file_type().is_dir()
                || !entry.file_name().to_string_lossy().starts_with('_')
        });
    for entry in walker {
        let entry = entry.with_context(|| format!("failed to walk {}", html_dir.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("html") {
            continue;
        }
        let stem = path.file_stem().and_then(|stem| stem.to_str()).unwrap_or("");
        if entry.depth() == 1 && EXCLUDED_PAGE_STEMS.contains(&stem) {
            continue;
        }
        pages.push(path.to_path_buf());
    }
    pages.sort();
    Ok(pages)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::{build_book, html_dir, list_generated_pages, remove_build_output, verify_html_outputs};
    use crate::catalog::SectionMapping;
    use crate::error::sync_error_of;

    #[test]
    fn generated_pages_skip_support_files() {
        let temp = tempdir().expect("tempdir");
        let html = html_dir(temp.path());
        fs::create_dir_all(html.join("_static")).expect("static");
        fs::create_dir_all(html.join("usage")).expect("usage");
        for path in [
            "index.html",
            "genindex.html",
            "search.html",
            "install.html",
            "usage/advanced.html",
            "usage/index.html",
            "_static/theme.html",
            "objects.inv",
        ] {
            fs::write(html.join(path), "<html></html>").expect("write");
        }

        let pages = list_generated_pages(&html).expect("pages");
        let relative = pages
            .iter()
            .map(|page| page.strip_prefix(&html).expect("prefix").to_string_lossy().replace('\\', "/"))
            .collect::<Vec<_>>();
        assert_eq!(relative, vec!["install.html", "usage/advanced.html", "usage/index.html"]);
    }

    #[test]
    fn missing_outputs_are_listed() {
        let temp = tempdir().expect("tempdir");
        let present = temp.path().join("present.html");
        fs::write(&present, "x").expect("write");
        let mappings = vec![
            SectionMapping {
                section_name: "A".to_string(),
                section_id: 1,
                html_file_path: present,
            },
            SectionMapping {
                section_name: "A".to_string(),
                section_id: 1,
                html_file_path: temp.path().join("absent.html"),
            },
        ];

        let error = verify_html_outputs(&mappings).expect_err("must fail");
        assert!(error.to_string().contains("absent.html"));
        assert!(!error.to_string().contains("present.html"));
        assert_eq!(sync_error_of(&error).map(|e| e.kind()), Some("config"));
        assert!(verify_html_outputs(&mappings[..1]).is_ok());
    }

    #[test]
    fn remove_build_output_is_idempotent() {
        let temp = tempdir().expect("tempdir");
        fs::create_dir_all(html_dir(temp.path())).expect("html dir");
        let build = temp.path().join("_build");
        assert!(remove_build_output(&build).expect("remove"));
        assert!(!build.exists());
        assert!(!remove_build_output(&build).expect("remove again"));
    }

    #[test]
    fn build_failures_are_config_errors() {
        let temp = tempdir().expect("tempdir");
        let error = build_book(&[], temp.path()).expect_err("empty command");
        assert_eq!(sync_error_of(&error).map(|e| e.kind()), Some("config"));

        let error = build_book(
            &["bookdesk-definitely-missing-binary".to_string()],
            temp.path(),
        )
        .expect_err("missing binary");
        assert_eq!(sync_error_of(&error).map(|e| e.kind()), Some("config"));
    }
}
