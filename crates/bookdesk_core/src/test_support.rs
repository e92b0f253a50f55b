use std::path::{Path, PathBuf};

use anyhow::bail;

use crate::helpcenter::{
    ArticleMetadata, Category, HelpCenterApi, HelpCenterUser, RemoteArticle, Section,
};
use crate::reconcile::ArticlePayload;
use crate::storage::{ObjectStore, public_url};

/// In-memory help center shared by the catalog, reconcile, archive and sync tests.
#[derive(Default)]
pub(crate) struct MockApi {
    pub user: Option<HelpCenterUser>,
    pub categories: Vec<Category>,
    pub sections: Vec<Section>,
    pub articles: Vec<(i64, RemoteArticle)>,
    pub created_categories: Vec<String>,
    pub created_sections: Vec<(i64, String)>,
    pub created_articles: Vec<(i64, ArticlePayload)>,
    /// `(article_id, title, body, draft)`
    pub translations: Vec<(i64, String, String, bool)>,
    pub metadata_updates: Vec<(i64, ArticleMetadata)>,
    pub archived: Vec<i64>,
    pub archive_status: Option<u16>,
    pub fail_create_section: bool,
    pub fail_create_for_title: Option<String>,
    pub calls: Vec<String>,
    pub next_id: i64,
    pub request_count: usize,
}

impl MockApi {
    pub fn admin() -> Self {
        Self {
            user: Some(HelpCenterUser {
                id: 1,
                name: "Docs Admin".to_string(),
                role: "admin".to_string(),
            }),
            next_id: 100,
            ..Self::default()
        }
    }

    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

impl HelpCenterApi for MockApi {
    fn current_user(&mut self) -> anyhow::Result<Option<HelpCenterUser>> {
        self.request_count += 1;
        self.calls.push("current_user".to_string());
        Ok(self.user.clone())
    }

    fn list_categories(&mut self) -> anyhow::Result<Vec<Category>> {
        self.request_count += 1;
        self.calls.push("list_categories".to_string());
        Ok(self.categories.clone())
    }

    fn create_category(&mut self, name: &str, _locale: &str) -> anyhow::Result<Category> {
        self.request_count += 1;
        self.calls.push(format!("create_category:{name}"));
        let category = Category {
            id: self.allocate_id(),
            name: name.to_string(),
        };
        self.created_categories.push(name.to_string());
        self.categories.push(category.clone());
        Ok(category)
    }

    fn list_sections(&mut self) -> anyhow::Result<Vec<Section>> {
        self.request_count += 1;
        self.calls.push("list_sections".to_string());
        Ok(self.sections.clone())
    }

    fn create_section(
        &mut self,
        category_id: i64,
        name: &str,
        _locale: &str,
    ) -> anyhow::Result<Section> {
        self.request_count += 1;
        self.calls.push(format!("create_section:{name}"));
        if self.fail_create_section {
            bail!("HTTP 500");
        }
        let section = Section {
            id: self.allocate_id(),
            name: name.to_string(),
            category_id: Some(category_id),
        };
        self.created_sections.push((category_id, name.to_string()));
        self.sections.push(section.clone());
        Ok(section)
    }

    fn list_articles_in_category(
        &mut self,
        category_id: i64,
    ) -> anyhow::Result<Vec<RemoteArticle>> {
        self.request_count += 1;
        self.calls.push("list_articles_in_category".to_string());
        Ok(self
            .articles
            .iter()
            .filter(|(category, _)| *category == category_id)
            .map(|(_, article)| article.clone())
            .collect())
    }

    fn create_article(
        &mut self,
        section_id: i64,
        payload: &ArticlePayload,
    ) -> anyhow::Result<RemoteArticle> {
        self.request_count += 1;
        self.calls.push(format!("create_article:{}", payload.title));
        if self.fail_create_for_title.as_deref() == Some(payload.title.as_str()) {
            bail!("HTTP 422");
        }
        let id = self.allocate_id();
        self.created_articles.push((section_id, payload.clone()));
        Ok(RemoteArticle {
            id,
            title: payload.title.clone(),
            section_id: Some(section_id),
            html_url: format!("https://help.example.com/hc/en-us/articles/{id}"),
            draft: payload.draft,
        })
    }

    fn update_translation(
        &mut self,
        article_id: i64,
        _locale: &str,
        title: &str,
        body: &str,
        draft: bool,
    ) -> anyhow::Result<()> {
        self.request_count += 1;
        self.calls.push(format!("update_translation:{article_id}"));
        self.translations
            .push((article_id, title.to_string(), body.to_string(), draft));
        Ok(())
    }

    fn update_article_metadata(
        &mut self,
        article_id: i64,
        metadata: &ArticleMetadata,
    ) -> anyhow::Result<()> {
        self.request_count += 1;
        self.calls.push(format!("update_article_metadata:{article_id}"));
        self.metadata_updates.push((article_id, metadata.clone()));
        Ok(())
    }

    fn archive_article(&mut self, article_id: i64) -> anyhow::Result<u16> {
        self.request_count += 1;
        self.calls.push(format!("archive_article:{article_id}"));
        self.archived.push(article_id);
        Ok(self.archive_status.unwrap_or(204))
    }

    fn request_count(&self) -> usize {
        self.request_count
    }
}

/// Records uploads; a missing local file fails like a real upload would.
#[derive(Default)]
pub(crate) struct MockStore {
    pub uploads: Vec<(PathBuf, String)>,
}

impl ObjectStore for MockStore {
    fn put_public(&mut self, local: &Path, key: &str) -> anyhow::Result<String> {
        if !local.is_file() {
            bail!("no such file: {}", local.display());
        }
        self.uploads.push((local.to_path_buf(), key.to_string()));
        Ok(public_url("https://s3.amazonaws.com/", "docs-assets", key))
    }
}
