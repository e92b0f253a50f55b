use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::Serialize;

use crate::catalog::SectionMapping;
use crate::config::{BookSettings, FailurePolicy, MatchStrategy};
use crate::helpcenter::{HelpCenterApi, RemoteArticle};
use crate::html;
use crate::ledger::{Ledger, LedgerEntry};

/// Theme chrome inside the main content that never belongs in an article.
const BOILERPLATE_CLASSES: &[&str] = &["prev-next-area", "headerlink"];

/// Run-wide article fields; every payload starts from a copy of these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArticleTemplate {
    pub locale: String,
    pub permission_group_id: i64,
    /// `None` publishes to everyone.
    pub user_segment_id: Option<i64>,
    pub draft: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArticlePayload {
    pub title: String,
    pub body: String,
    pub locale: String,
    pub permission_group_id: i64,
    pub user_segment_id: Option<i64>,
    pub draft: bool,
    pub label_names: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub title: String,
    pub body: String,
    pub labels: Vec<String>,
}

/// Title, cleaned main-content body and labels of one generated page.
pub fn extract_page(source: &str, settings: &BookSettings) -> Result<Page> {
    let tags = html::scan_tags(source);
    let Some(main) = html::find_by_id(&tags, &settings.main_content_id) else {
        bail!("no element with id `{}`", settings.main_content_id);
    };
    let mut cuts = BOILERPLATE_CLASSES
        .iter()
        .flat_map(|class| html::find_by_class(&tags, class, &main))
        .collect::<Vec<_>>();
    cuts.sort_by_key(|range| range.start);
    let body = html::slice_without(source, &main, &cuts);

    let title = html::extract_title(source, &tags).unwrap_or_default();
    let labels = html::meta_content(&tags, &settings.labels_meta)
        .map(|content| split_labels(&content))
        .unwrap_or_default();
    Ok(Page {
        title,
        body,
        labels,
    })
}

fn split_labels(content: &str) -> Vec<String> {
    content
        .split(',')
        .map(str::trim)
        .filter(|label| !label.is_empty())
        .map(ToString::to_string)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

pub fn build_payload(
    path: &Path,
    template: &ArticleTemplate,
    settings: &BookSettings,
) -> Result<ArticlePayload> {
    let source =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let page = extract_page(&source, settings)
        .with_context(|| format!("failed to extract article from {}", path.display()))?;
    if page.title.is_empty() {
        bail!("{} has no <title>", path.display());
    }
    Ok(ArticlePayload {
        title: page.title,
        body: page.body,
        locale: template.locale.clone(),
        permission_group_id: template.permission_group_id,
        user_segment_id: template.user_segment_id,
        draft: template.draft,
        label_names: page.labels,
    })
}

#[derive(Debug, Clone, Copy)]
pub struct ReconcileSettings<'a> {
    pub template: &'a ArticleTemplate,
    pub book: &'a BookSettings,
    pub match_strategy: MatchStrategy,
    pub failure_policy: FailurePolicy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArticleFailure {
    pub html_file_path: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileOutcome {
    pub entries: Vec<LedgerEntry>,
    pub created: usize,
    pub updated: usize,
    pub failures: Vec<ArticleFailure>,
}

enum Action {
    Create,
    Update { article_id: i64, html_url: String },
}

/// Create or update one article per mapping, in mapping order.
pub fn reconcile_articles<A: HelpCenterApi>(
    api: &mut A,
    mappings: &[SectionMapping],
    ledger: &Ledger,
    remote_articles: &[RemoteArticle],
    settings: ReconcileSettings<'_>,
) -> Result<ReconcileOutcome> {
    let mut outcome = ReconcileOutcome::default();
    for mapping in mappings {
        let html_file_path = mapping.html_file_path.display().to_string();
        match reconcile_one(api, mapping, &html_file_path, ledger, remote_articles, settings) {
            Ok((entry, created)) => {
                if created {
                    outcome.created += 1;
                } else {
                    outcome.updated += 1;
                }
                outcome.entries.push(entry);
            }
            Err(error) => {
                if settings.failure_policy == FailurePolicy::Abort {
                    return Err(error.context(format!("aborting sync at {html_file_path}")));
                }
                tracing::warn!(path = %html_file_path, error = %format!("{error:#}"), "article skipped");
                outcome.failures.push(ArticleFailure {
                    html_file_path,
                    message: format!("{error:#}"),
                });
            }
        }
    }
    Ok(outcome)
}

fn reconcile_one<A: HelpCenterApi>(
    api: &mut A,
    mapping: &SectionMapping,
    html_file_path: &str,
    ledger: &Ledger,
    remote_articles: &[RemoteArticle],
    settings: ReconcileSettings<'_>,
) -> Result<(LedgerEntry, bool)> {
    let payload = build_payload(&mapping.html_file_path, settings.template, settings.book)?;
    let action = match settings.match_strategy {
        MatchStrategy::Ledger => ledger.find_by_path(html_file_path).map(|entry| Action::Update {
            article_id: entry.article_id,
            html_url: entry.article_html_url.clone(),
        }),
        MatchStrategy::RemoteTitle => remote_articles
            .iter()
            .find(|article| {
                article.title == payload.title && article.section_id == Some(mapping.section_id)
            })
            .map(|article| Action::Update {
                article_id: article.id,
                html_url: article.html_url.clone(),
            }),
    }
    .unwrap_or(Action::Create);

    let (article_id, article_html_url, created) = match action {
        Action::Create => {
            let article = api
                .create_article(mapping.section_id, &payload)
                .with_context(|| format!("failed to create article `{}`", payload.title))?;
            tracing::info!(title = %payload.title, id = article.id, "created article");
            (article.id, article.html_url, true)
        }
        Action::Update {
            article_id,
            html_url,
        } => {
            api.update_translation(
                article_id,
                &payload.locale,
                &payload.title,
                &payload.body,
                payload.draft,
            )
            .with_context(|| format!("failed to update article {article_id}"))?;
            tracing::info!(title = %payload.title, id = article_id, "updated article");
            (article_id, html_url, false)
        }
    };

    Ok((
        LedgerEntry {
            section_name: mapping.section_name.clone(),
            section_id: mapping.section_id,
            html_file_path: html_file_path.to_string(),
            article_id,
            article_html_url,
        },
        created,
    ))
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use tempfile::tempdir;

    use super::{
        ArticleTemplate, ReconcileSettings, build_payload, extract_page, reconcile_articles,
    };
    use crate::catalog::SectionMapping;
    use crate::config::{BookSettings, FailurePolicy, MatchStrategy};
    use crate::helpcenter::RemoteArticle;
    use crate::ledger::{Ledger, LedgerEntry};
    use crate::test_support::MockApi;

    fn book_settings() -> BookSettings {
        BookSettings {
            build_command: vec!["jupyter-book".to_string(), "build".to_string()],
            include_root: false,
            main_content_id: "main-content".to_string(),
            labels_meta: "keywords".to_string(),
        }
    }

    fn template() -> ArticleTemplate {
        ArticleTemplate {
            locale: "en-us".to_string(),
            permission_group_id: 1326317,
            user_segment_id: None,
            draft: true,
        }
    }

    fn page(title: &str, body: &str) -> String {
        format!(
            "<html><head><title>{title}</title><meta name=\"keywords\" content=\"zeta, alpha,zeta , \"></head>\
             <body><nav>menu</nav><main id=\"main-content\"><h1>{title}<a class=\"headerlink\" href=\"#x\">#</a></h1>{body}\
             <div class=\"prev-next-area\"><a href=\"prev.html\">prev</a></div></main></body></html>"
        )
    }

    fn write_page(dir: &Path, name: &str, title: &str) -> SectionMapping {
        let path = dir.join(name);
        fs::write(&path, page(title, "<p>text</p>")).expect("write page");
        SectionMapping {
            section_name: "Basics".to_string(),
            section_id: 10,
            html_file_path: path,
        }
    }

    fn settings<'a>(
        template: &'a ArticleTemplate,
        book: &'a BookSettings,
        match_strategy: MatchStrategy,
        failure_policy: FailurePolicy,
    ) -> ReconcileSettings<'a> {
        ReconcileSettings {
            template,
            book,
            match_strategy,
            failure_policy,
        }
    }

    #[test]
    fn page_extraction_strips_boilerplate_and_sorts_labels() {
        let extracted = extract_page(&page("Install", "<p>hi</p>"), &book_settings())
            .expect("extract");
        assert_eq!(extracted.title, "Install");
        assert_eq!(
            extracted.body,
            "<main id=\"main-content\"><h1>Install</h1><p>hi</p></main>"
        );
        assert_eq!(extracted.labels, vec!["alpha", "zeta"]);
    }

    #[test]
    fn payload_copies_template_fields() {
        let temp = tempdir().expect("tempdir");
        let mapping = write_page(temp.path(), "install.html", "Install");
        let payload =
            build_payload(&mapping.html_file_path, &template(), &book_settings()).expect("payload");
        assert_eq!(payload.locale, "en-us");
        assert_eq!(payload.permission_group_id, 1326317);
        assert!(payload.draft);
        assert_eq!(payload.user_segment_id, None);

        let again =
            build_payload(&mapping.html_file_path, &template(), &book_settings()).expect("payload");
        assert_eq!(again, payload);
    }

    #[test]
    fn missing_main_content_fails_the_file() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("bare.html");
        fs::write(&path, "<html><title>Bare</title><body>x</body></html>").expect("write");
        let error = build_payload(&path, &template(), &book_settings()).expect_err("must fail");
        assert!(format!("{error:#}").contains("main-content"));
    }

    #[test]
    fn ledger_strategy_creates_then_updates() {
        let temp = tempdir().expect("tempdir");
        let mappings = vec![
            write_page(temp.path(), "one.html", "One"),
            write_page(temp.path(), "two.html", "Two"),
        ];
        let template = template();
        let book = book_settings();
        let settings = settings(&template, &book, MatchStrategy::Ledger, FailurePolicy::Continue);

        let mut api = MockApi::admin();
        let first = reconcile_articles(&mut api, &mappings, &Ledger::default(), &[], settings)
            .expect("first run");
        assert_eq!(first.created, 2);
        assert_eq!(api.created_articles.len(), 2);

        let ledger = Ledger::stamped(first.entries.clone());
        let second =
            reconcile_articles(&mut api, &mappings, &ledger, &[], settings).expect("second run");
        assert_eq!(second.created, 0);
        assert_eq!(second.updated, 2);
        assert_eq!(api.created_articles.len(), 2);
        assert_eq!(api.translations.len(), 2);
        assert_eq!(second.entries, first.entries);
    }

    #[test]
    fn remote_title_strategy_matches_title_and_section() {
        let temp = tempdir().expect("tempdir");
        let mappings = vec![
            write_page(temp.path(), "one.html", "One"),
            write_page(temp.path(), "two.html", "Two"),
        ];
        let remote = vec![
            RemoteArticle {
                id: 501,
                title: "One".to_string(),
                section_id: Some(10),
                html_url: "https://help.example.com/hc/en-us/articles/501".to_string(),
                draft: false,
            },
            RemoteArticle {
                id: 502,
                title: "Two".to_string(),
                section_id: Some(99),
                html_url: "https://help.example.com/hc/en-us/articles/502".to_string(),
                draft: false,
            },
        ];
        let template = template();
        let book = book_settings();
        let mut api = MockApi::admin();
        let outcome = reconcile_articles(
            &mut api,
            &mappings,
            &Ledger::default(),
            &remote,
            settings(&template, &book, MatchStrategy::RemoteTitle, FailurePolicy::Continue),
        )
        .expect("reconcile");

        assert_eq!(outcome.updated, 1);
        assert_eq!(outcome.created, 1);
        assert_eq!(outcome.entries[0].article_id, 501);
        assert_ne!(outcome.entries[1].article_id, 502);
    }

    #[test]
    fn failure_policy_decides_between_skip_and_abort() {
        let temp = tempdir().expect("tempdir");
        let mappings = vec![
            write_page(temp.path(), "one.html", "One"),
            write_page(temp.path(), "two.html", "Two"),
        ];
        let template = template();
        let book = book_settings();

        let mut api = MockApi::admin();
        api.fail_create_for_title = Some("One".to_string());
        let outcome = reconcile_articles(
            &mut api,
            &mappings,
            &Ledger::default(),
            &[],
            settings(&template, &book, MatchStrategy::Ledger, FailurePolicy::Continue),
        )
        .expect("continue");
        assert_eq!(outcome.failures.len(), 1);
        assert!(outcome.failures[0].html_file_path.ends_with("one.html"));
        assert_eq!(outcome.entries.len(), 1);

        let mut api = MockApi::admin();
        api.fail_create_for_title = Some("One".to_string());
        let error = reconcile_articles(
            &mut api,
            &mappings,
            &Ledger::default(),
            &[],
            settings(&template, &book, MatchStrategy::Ledger, FailurePolicy::Abort),
        )
        .expect_err("abort");
        assert!(format!("{error:#}").contains("one.html"));
        assert!(api.created_articles.is_empty());
    }

    #[test]
    fn ledger_url_is_reused_on_update() {
        let temp = tempdir().expect("tempdir");
        let mapping = write_page(temp.path(), "one.html", "One");
        let ledger = Ledger::stamped(vec![LedgerEntry {
            section_name: "Basics".to_string(),
            section_id: 10,
            html_file_path: mapping.html_file_path.display().to_string(),
            article_id: 77,
            article_html_url: "https://help.example.com/hc/en-us/articles/77-one".to_string(),
        }]);
        let template = template();
        let book = book_settings();
        let mut api = MockApi::admin();
        let outcome = reconcile_articles(
            &mut api,
            &[mapping],
            &ledger,
            &[],
            settings(&template, &book, MatchStrategy::Ledger, FailurePolicy::Continue),
        )
        .expect("reconcile");
        assert_eq!(outcome.entries, ledger.articles);
        assert_eq!(api.translations[0].0, 77);
    }
}
