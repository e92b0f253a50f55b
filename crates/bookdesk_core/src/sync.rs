use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::archive::{ArchiveReport, archive_book};
use crate::assets::{AssetFailure, AssetSettings, relocate_images};
use crate::book::{build_book, list_generated_pages, verify_html_outputs};
use crate::catalog::{SectionMapping, resolve_category, resolve_sections};
use crate::config::{FailurePolicy, MatchStrategy, SyncConfig};
use crate::error::SyncError;
use crate::helpcenter::{ArticleMetadata, HelpCenterApi, ZendeskClient, ZendeskClientConfig};
use crate::ledger::{Ledger, LedgerEntry, read_ledger, write_ledger};
use crate::links::rewrite_links;
use crate::reconcile::{
    ArticleFailure, ArticleTemplate, ReconcileSettings, extract_page, reconcile_articles,
};
use crate::runtime::{ResolvedPaths, normalize_for_display};
use crate::storage::{ObjectStore, S3Store};
use crate::toc::{TocEntry, read_toc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    pub archive: bool,
    pub draft: bool,
    pub public: bool,
    pub skip_build: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            archive: false,
            draft: true,
            public: true,
            skip_build: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PageAssetFailure {
    pub html_file_path: String,
    #[serde(flatten)]
    pub failure: AssetFailure,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct UnresolvedLink {
    pub html_file_path: String,
    pub href: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub success: bool,
    pub category_id: i64,
    pub sections: usize,
    pub created: usize,
    pub updated: usize,
    pub uploaded_images: usize,
    pub relinked: usize,
    pub articles: Vec<LedgerEntry>,
    pub article_failures: Vec<ArticleFailure>,
    pub asset_failures: Vec<PageAssetFailure>,
    pub unresolved_links: Vec<UnresolvedLink>,
    pub unlisted_pages: Vec<String>,
    pub ledger_path: String,
    pub request_count: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum RunReport {
    Synced(SyncReport),
    Archived(ArchiveReport),
}

/// Run the `build` command on its own.
pub fn build_only(paths: &ResolvedPaths, config: &SyncConfig) -> Result<()> {
    build_book(&config.book.build_command, &paths.source_dir)
}

/// Entry point for `sync`: archive the published book, or publish it.
pub fn sync_book(
    paths: &ResolvedPaths,
    config: &SyncConfig,
    options: &RunOptions,
) -> Result<RunReport> {
    if options.archive {
        let mut api = ZendeskClient::new(ZendeskClientConfig::from_sync_config(config)?)?;
        ensure_admin(&mut api)?;
        let report = archive_book(&mut api, &paths.ledger_path, &paths.build_dir)?;
        return Ok(RunReport::Archived(report));
    }

    let entries = read_toc(&paths.source_dir, config.book.include_root)?;
    let client_config = ZendeskClientConfig::from_sync_config(config)?;
    let mut store = S3Store::from_sync_config(config)?;
    let mut api = ZendeskClient::new(client_config)?;
    let report = run_sync_with_api(paths, config, options, &entries, &mut api, &mut store)?;
    Ok(RunReport::Synced(report))
}

fn ensure_admin<A: HelpCenterApi>(api: &mut A) -> Result<()> {
    let user = api
        .current_user()
        .context("failed to look up the authenticated help-center user")?;
    match user {
        None => Err(SyncError::Authorization(
            "help-center credentials do not resolve to a signed-in user".to_string(),
        )
        .into()),
        Some(user) if !user.is_admin() => Err(SyncError::Authorization(format!(
            "user `{}` has role `{}`; an admin is required",
            user.name, user.role
        ))
        .into()),
        Some(user) => {
            tracing::info!(user = %user.name, "authenticated as admin");
            Ok(())
        }
    }
}

fn article_template(config: &SyncConfig, options: &RunOptions) -> Result<ArticleTemplate> {
    let permission_group_id = config.require_permission_group()?;
    let user_segment_id = if options.public {
        None
    } else {
        Some(config.user_segment_id.ok_or_else(|| {
            SyncError::Config(
                "--no-public requires [zendesk].user_segment_id".to_string(),
            )
        })?)
    };
    Ok(ArticleTemplate {
        locale: config.locale.clone(),
        permission_group_id,
        user_segment_id,
        draft: options.draft,
    })
}

pub fn run_sync_with_api<A: HelpCenterApi, S: ObjectStore>(
    paths: &ResolvedPaths,
    config: &SyncConfig,
    options: &RunOptions,
    entries: &[TocEntry],
    api: &mut A,
    store: &mut S,
) -> Result<SyncReport> {
    let category_name = config.require_category()?.to_string();
    let template = article_template(config, options)?;
    ensure_admin(api)?;

    if options.skip_build {
        tracing::info!("skipping book build");
    } else {
        build_book(&config.book.build_command, &paths.source_dir)?;
    }

    let category_id = resolve_category(
        api,
        &category_name,
        &config.locale,
        config.create_missing_category,
    )?;
    let mappings = resolve_sections(api, category_id, &config.locale, entries, &paths.html_dir)?;
    verify_html_outputs(&mappings)?;

    let previous = read_ledger(&paths.ledger_path);
    let remote_articles = match config.match_strategy {
        MatchStrategy::RemoteTitle => api
            .list_articles_in_category(category_id)
            .map_err(|error| {
                SyncError::RemoteResource(format!(
                    "failed to list articles in category {category_id}: {error:#}"
                ))
            })?,
        MatchStrategy::Ledger => Vec::new(),
    };

    let mut report = SyncReport {
        success: true,
        category_id,
        sections: mappings
            .iter()
            .map(|mapping| mapping.section_id)
            .collect::<BTreeSet<_>>()
            .len(),
        created: 0,
        updated: 0,
        uploaded_images: 0,
        relinked: 0,
        articles: Vec::new(),
        article_failures: Vec::new(),
        asset_failures: Vec::new(),
        unresolved_links: Vec::new(),
        unlisted_pages: Vec::new(),
        ledger_path: normalize_for_display(&paths.ledger_path),
        request_count: 0,
    };

    let asset_settings = AssetSettings {
        main_content_id: &config.book.main_content_id,
        key_prefix: &config.storage.key_prefix,
    };
    let mut publishable = Vec::with_capacity(mappings.len());
    for mapping in &mappings {
        let html_file_path = mapping.html_file_path.display().to_string();
        match relocate_images(&mapping.html_file_path, store, asset_settings) {
            Ok(assets) => {
                report.uploaded_images += assets.uploaded.len();
                report
                    .asset_failures
                    .extend(assets.failures.into_iter().map(|failure| PageAssetFailure {
                        html_file_path: html_file_path.clone(),
                        failure,
                    }));
                publishable.push(mapping.clone());
            }
            Err(error) => {
                if config.failure_policy == FailurePolicy::Abort {
                    return Err(error.context(format!(
                        "aborting sync at {html_file_path} during image relocation"
                    )));
                }
                tracing::warn!(path = %html_file_path, error = %format!("{error:#}"), "image relocation failed");
                report.article_failures.push(ArticleFailure {
                    html_file_path,
                    message: format!("{error:#}"),
                });
            }
        }
    }

    let outcome = reconcile_articles(
        api,
        &publishable,
        &previous,
        &remote_articles,
        ReconcileSettings {
            template: &template,
            book: &config.book,
            match_strategy: config.match_strategy,
            failure_policy: config.failure_policy,
        },
    )?;
    report.created = outcome.created;
    report.updated = outcome.updated;
    report.article_failures.extend(outcome.failures);

    // Every article now has a URL; links can only be resolved past this point.
    for entry in &outcome.entries {
        match relink_article(api, entry, &outcome.entries, config, &template) {
            Ok((relinked, unresolved)) => {
                report.relinked += relinked;
                report
                    .unresolved_links
                    .extend(unresolved.into_iter().map(|href| UnresolvedLink {
                        html_file_path: entry.html_file_path.clone(),
                        href,
                    }));
            }
            Err(error) => {
                if config.failure_policy == FailurePolicy::Abort {
                    return Err(error.context(format!(
                        "aborting sync at {} during link rewrite",
                        entry.html_file_path
                    )));
                }
                tracing::warn!(path = %entry.html_file_path, error = %format!("{error:#}"), "second pass failed");
                report.article_failures.push(ArticleFailure {
                    html_file_path: entry.html_file_path.clone(),
                    message: format!("{error:#}"),
                });
            }
        }
    }

    let articles = merge_ledger_entries(&mappings, &outcome.entries, &previous);
    write_ledger(&paths.ledger_path, &Ledger::stamped(articles.clone()))?;
    tracing::info!(path = %paths.ledger_path.display(), articles = articles.len(), "ledger written");

    report.unlisted_pages = unlisted_pages(paths, &mappings)?;
    report.articles = articles;
    report.success = report.article_failures.is_empty();
    report.request_count = api.request_count();
    Ok(report)
}

/// Second pass for one article: rewrite anchors, then resend body and metadata.
fn relink_article<A: HelpCenterApi>(
    api: &mut A,
    entry: &LedgerEntry,
    entries: &[LedgerEntry],
    config: &SyncConfig,
    template: &ArticleTemplate,
) -> Result<(usize, Vec<String>)> {
    let path = PathBuf::from(&entry.html_file_path);
    let links = rewrite_links(&path, entries, &config.book.main_content_id)?;
    let source =
        fs::read_to_string(&path).with_context(|| format!("failed to read {}", path.display()))?;
    let page = extract_page(&source, &config.book)
        .with_context(|| format!("failed to extract article from {}", path.display()))?;

    api.update_translation(
        entry.article_id,
        &template.locale,
        &page.title,
        &page.body,
        template.draft,
    )
    .with_context(|| format!("failed to update article {}", entry.article_id))?;
    let metadata = ArticleMetadata {
        section_id: entry.section_id,
        permission_group_id: template.permission_group_id,
        user_segment_id: template.user_segment_id,
        label_names: page.labels,
    };
    api.update_article_metadata(entry.article_id, &metadata)
        .with_context(|| format!("failed to update metadata of article {}", entry.article_id))?;
    Ok((links.rewritten.len(), links.unresolved))
}

/// Ledger contents in TOC order. Files that failed this run keep their
/// previous entry so their article ids are not forgotten.
fn merge_ledger_entries(
    mappings: &[SectionMapping],
    current: &[LedgerEntry],
    previous: &Ledger,
) -> Vec<LedgerEntry> {
    mappings
        .iter()
        .filter_map(|mapping| {
            let path = mapping.html_file_path.display().to_string();
            current
                .iter()
                .find(|entry| entry.html_file_path == path)
                .or_else(|| previous.find_by_path(&path))
                .cloned()
        })
        .collect()
}

fn unlisted_pages(paths: &ResolvedPaths, mappings: &[SectionMapping]) -> Result<Vec<String>> {
    let listed = mappings
        .iter()
        .map(|mapping| mapping.html_file_path.clone())
        .collect::<BTreeSet<_>>();
    let unlisted = list_generated_pages(&paths.html_dir)?
        .into_iter()
        .filter(|page| !listed.contains(page))
        .map(|page| normalize_for_display(&page))
        .collect::<Vec<_>>();
    if !unlisted.is_empty() {
        tracing::info!(count = unlisted.len(), "generated pages not in the TOC were not published");
    }
    Ok(unlisted)
}
