use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::Serialize;

use crate::error::SyncError;
use crate::helpcenter::{HelpCenterApi, Section};
use crate::toc::{TocEntry, html_path_for};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SectionMapping {
    pub section_name: String,
    pub section_id: i64,
    pub html_file_path: PathBuf,
}

/// Find the category called `name`, creating it when allowed.
pub fn resolve_category<A: HelpCenterApi>(
    api: &mut A,
    name: &str,
    locale: &str,
    create_missing: bool,
) -> Result<i64> {
    let categories = api
        .list_categories()
        .map_err(|error| SyncError::RemoteResource(format!("failed to list categories: {error:#}")))?;
    let matches = categories
        .iter()
        .filter(|category| category.name == name)
        .collect::<Vec<_>>();

    match matches.as_slice() {
        [category] => {
            tracing::info!(category = name, id = category.id, "using existing category");
            Ok(category.id)
        }
        [] if create_missing => {
            let created = api.create_category(name, locale).map_err(|error| {
                SyncError::RemoteResource(format!("failed to create category `{name}`: {error:#}"))
            })?;
            tracing::info!(category = name, id = created.id, "created category");
            Ok(created.id)
        }
        [] => Err(SyncError::RemoteResource(format!(
            "category `{name}` does not exist and creation is disabled"
        ))
        .into()),
        many => Err(SyncError::RemoteResource(format!(
            "category name `{name}` is ambiguous: {} categories match (ids {})",
            many.len(),
            many.iter()
                .map(|category| category.id.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
        .into()),
    }
}

/// One mapping per TOC entry, in TOC order. Each missing section name is
/// created once inside `category_id`.
pub fn resolve_sections<A: HelpCenterApi>(
    api: &mut A,
    category_id: i64,
    locale: &str,
    entries: &[TocEntry],
    html_dir: &Path,
) -> Result<Vec<SectionMapping>> {
    let mut sections: Vec<Section> = api
        .list_sections()
        .map_err(|error| SyncError::RemoteResource(format!("failed to list sections: {error:#}")))?
        .into_iter()
        .filter(|section| section.category_id == Some(category_id))
        .collect();

    let mut mappings = Vec::with_capacity(entries.len());
    for entry in entries {
        let existing = sections
            .iter()
            .find(|section| section.name == entry.section_name)
            .map(|section| section.id);
        let section_id = match existing {
            Some(id) => id,
            None => {
                let mut created = api
                    .create_section(category_id, &entry.section_name, locale)
                    .map_err(|error| {
                        SyncError::RemoteResource(format!(
                            "failed to create section `{}`: {error:#}",
                            entry.section_name
                        ))
                    })?;
                tracing::info!(section = %entry.section_name, id = created.id, "created section");
                created.category_id = Some(category_id);
                let id = created.id;
                sections.push(created);
                id
            }
        };
        mappings.push(SectionMapping {
            section_name: entry.section_name.clone(),
            section_id,
            html_file_path: html_path_for(html_dir, &entry.source_file),
        });
    }
    Ok(mappings)
}
