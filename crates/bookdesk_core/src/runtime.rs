use std::collections::HashSet;
use std::env;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};

use crate::book::{build_dir, html_dir};
use crate::config::DEFAULT_CONFIG_FILENAME;
use crate::ledger::ledger_path;
use crate::toc::{TOC_FILENAME, toc_path};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSource {
    Flag,
    Env,
    Heuristic,
    Default,
}

impl ValueSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Flag => "flag",
            Self::Env => "env",
            Self::Heuristic => "heuristic",
            Self::Default => "default",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PathOverrides {
    pub source_dir: Option<PathBuf>,
    pub state_dir: Option<PathBuf>,
    pub config: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ResolutionContext {
    pub cwd: PathBuf,
}

impl ResolutionContext {
    pub fn from_process() -> Result<Self> {
        let cwd = env::current_dir().context("failed to read current directory")?;
        Ok(Self { cwd })
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedPaths {
    pub source_dir: PathBuf,
    pub toc_path: PathBuf,
    pub build_dir: PathBuf,
    pub html_dir: PathBuf,
    pub state_dir: PathBuf,
    pub ledger_path: PathBuf,
    pub config_path: PathBuf,
    pub source_source: ValueSource,
    pub state_source: ValueSource,
    pub config_source: ValueSource,
}

impl ResolvedPaths {
    pub fn diagnostics(&self) -> String {
        format!(
            "source_dir={} ({})\ntoc_path={}\nhtml_dir={}\nstate_dir={} ({})\nledger_path={}\nconfig_path={} ({})",
            normalize_for_display(&self.source_dir),
            self.source_source.as_str(),
            normalize_for_display(&self.toc_path),
            normalize_for_display(&self.html_dir),
            normalize_for_display(&self.state_dir),
            self.state_source.as_str(),
            normalize_for_display(&self.ledger_path),
            normalize_for_display(&self.config_path),
            self.config_source.as_str(),
        )
    }
}

#[derive(Debug, Clone)]
pub struct RuntimeStatus {
    pub toc_exists: bool,
    pub html_dir_exists: bool,
    pub ledger_exists: bool,
    pub config_exists: bool,
    pub warnings: Vec<String>,
}

pub fn inspect_runtime(paths: &ResolvedPaths) -> RuntimeStatus {
    let toc_exists = paths.toc_path.exists();
    let html_dir_exists = paths.html_dir.exists();
    let ledger_exists = paths.ledger_path.exists();
    let config_exists = paths.config_path.exists();

    let mut warnings = Vec::new();
    if !toc_exists {
        warnings.push(format!(
            "{TOC_FILENAME} is missing; pass --source-dir pointing at the book sources"
        ));
    }
    if !html_dir_exists {
        warnings.push("_build/html is missing; run `bookdesk build` or `bookdesk sync`".to_string());
    }

    RuntimeStatus {
        toc_exists,
        html_dir_exists,
        ledger_exists,
        config_exists,
        warnings,
    }
}

pub fn resolve_paths(
    context: &ResolutionContext,
    overrides: &PathOverrides,
) -> Result<ResolvedPaths> {
    Ok(resolve_paths_with_lookup(context, overrides, |key| {
        env::var(key).ok()
    }))
}

pub(crate) fn resolve_paths_with_lookup<F>(
    context: &ResolutionContext,
    overrides: &PathOverrides,
    lookup_env: F,
) -> ResolvedPaths
where
    F: Fn(&str) -> Option<String>,
{
    let env_path = |key: &str| {
        lookup_env(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .map(PathBuf::from)
    };

    let (source_dir, source_source) = if let Some(path) = overrides.source_dir.as_deref() {
        (absolutize(path, &context.cwd), ValueSource::Flag)
    } else if let Some(path) = env_path("BOOKDESK_SOURCE_DIR") {
        (absolutize(&path, &context.cwd), ValueSource::Env)
    } else {
        (detect_source_dir(&context.cwd), ValueSource::Heuristic)
    };

    let (state_dir, state_source) = if let Some(path) = overrides.state_dir.as_deref() {
        (absolutize(path, &context.cwd), ValueSource::Flag)
    } else if let Some(path) = env_path("BOOKDESK_STATE_DIR") {
        (absolutize(&path, &context.cwd), ValueSource::Env)
    } else {
        (source_dir.clone(), ValueSource::Default)
    };

    let (config_path, config_source) = if let Some(path) = overrides.config.as_deref() {
        (absolutize(path, &context.cwd), ValueSource::Flag)
    } else if let Some(path) = env_path("BOOKDESK_CONFIG") {
        (absolutize(&path, &context.cwd), ValueSource::Env)
    } else {
        (source_dir.join(DEFAULT_CONFIG_FILENAME), ValueSource::Default)
    };

    ResolvedPaths {
        toc_path: toc_path(&source_dir),
        build_dir: build_dir(&source_dir),
        html_dir: html_dir(&source_dir),
        ledger_path: ledger_path(&state_dir),
        source_dir,
        state_dir,
        config_path,
        source_source,
        state_source,
        config_source,
    }
}

/// Nearest ancestor of `cwd` holding a `_toc.yml`, else `cwd` itself.
fn detect_source_dir(cwd: &Path) -> PathBuf {
    let mut seen = HashSet::new();
    for candidate in cwd.ancestors() {
        if !seen.insert(normalize_for_display(candidate)) {
            continue;
        }
        if candidate.join(TOC_FILENAME).is_file() {
            return candidate.to_path_buf();
        }
    }
    cwd.to_path_buf()
}

fn absolutize(path: &Path, base: &Path) -> PathBuf {
    if path.is_absolute() {
        normalize_lexically(path)
    } else {
        normalize_lexically(&base.join(path))
    }
}

/// Drop `.` and resolve `..` without touching the filesystem, so one file
/// always yields one ledger key however the directory was spelled.
pub fn normalize_lexically(path: &Path) -> PathBuf {
    let mut output = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let last_is_normal =
                    matches!(output.components().next_back(), Some(Component::Normal(_)));
                if last_is_normal {
                    output.pop();
                } else if !output.has_root() {
                    output.push("..");
                }
            }
            other => output.push(other.as_os_str()),
        }
    }
    output
}

pub fn normalize_for_display(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::fs;
    use std::path::{Path, PathBuf};

    use tempfile::tempdir;

    use super::{
        PathOverrides, ResolutionContext, ValueSource, inspect_runtime, normalize_lexically,
        resolve_paths_with_lookup,
    };

    #[test]
    fn flags_win_over_env() {
        let temp = tempdir().expect("tempdir");
        let context = ResolutionContext {
            cwd: temp.path().to_path_buf(),
        };
        let overrides = PathOverrides {
            source_dir: Some("book".into()),
            ..PathOverrides::default()
        };
        let env = HashMap::from([
            ("BOOKDESK_SOURCE_DIR".to_string(), "/elsewhere".to_string()),
            ("BOOKDESK_STATE_DIR".to_string(), "state".to_string()),
        ]);

        let resolved = resolve_paths_with_lookup(&context, &overrides, |key| env.get(key).cloned());
        assert_eq!(resolved.source_dir, temp.path().join("book"));
        assert_eq!(resolved.source_source, ValueSource::Flag);
        assert_eq!(resolved.state_dir, temp.path().join("state"));
        assert_eq!(resolved.state_source, ValueSource::Env);
        assert_eq!(resolved.ledger_path, temp.path().join("state").join("zendesk.json"));
        assert_eq!(
            resolved.config_path,
            temp.path().join("book").join("bookdesk.toml")
        );
        assert_eq!(
            resolved.html_dir,
            temp.path().join("book").join("_build").join("html")
        );
    }

    #[test]
    fn source_dir_is_found_from_a_nested_cwd() {
        let temp = tempdir().expect("tempdir");
        let nested = temp.path().join("chapters").join("deep");
        fs::create_dir_all(&nested).expect("nested");
        fs::write(temp.path().join("_toc.yml"), "parts: []\n").expect("toc");

        let resolved = resolve_paths_with_lookup(
            &ResolutionContext { cwd: nested },
            &PathOverrides::default(),
            |_| None,
        );
        assert_eq!(resolved.source_dir, temp.path());
        assert_eq!(resolved.source_source, ValueSource::Heuristic);
        assert_eq!(resolved.state_dir, temp.path());
        assert_eq!(resolved.state_source, ValueSource::Default);

        let status = inspect_runtime(&resolved);
        assert!(status.toc_exists);
        assert!(!status.html_dir_exists);
        assert_eq!(status.warnings.len(), 1);
        assert!(resolved.diagnostics().contains("source_dir="));
    }

    #[test]
    fn dotted_flags_resolve_to_the_same_paths_as_the_heuristic() {
        let temp = tempdir().expect("tempdir");
        let book = temp.path().join("book");
        fs::create_dir_all(book.join("chapters")).expect("book");
        fs::write(book.join("_toc.yml"), "parts: []\n").expect("toc");

        let heuristic = resolve_paths_with_lookup(
            &ResolutionContext { cwd: book.clone() },
            &PathOverrides::default(),
            |_| None,
        );
        for spelled in [".", "./", "chapters/..", "../book"] {
            let flagged = resolve_paths_with_lookup(
                &ResolutionContext { cwd: book.clone() },
                &PathOverrides {
                    source_dir: Some(spelled.into()),
                    ..PathOverrides::default()
                },
                |_| None,
            );
            assert_eq!(flagged.source_dir, heuristic.source_dir, "{spelled}");
            assert_eq!(flagged.html_dir, heuristic.html_dir, "{spelled}");
            assert_eq!(flagged.ledger_path, heuristic.ledger_path, "{spelled}");
        }
    }

    #[test]
    fn lexical_normalization_handles_dots() {
        assert_eq!(
            normalize_lexically(Path::new("/srv/book/./_build/../_build/html")),
            PathBuf::from("/srv/book/_build/html")
        );
        assert_eq!(normalize_lexically(Path::new("/../a")), PathBuf::from("/a"));
        assert_eq!(normalize_lexically(Path::new("../a/./b")), PathBuf::from("../a/b"));
    }
}
