use std::path::Path;

use anyhow::{Context, Result};
use keith_schema::Resource;
use serde::{Deserialize, Serialize};

use crate::ResourceStore;

/// YAML seed file: a top-level `resources:` list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogFile {
    #[serde(default)]
    pub resources: Vec<Resource>,
}

pub fn load_catalog(path: &Path) -> Result<CatalogFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_yaml::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))
}

/// Inserts every record of the catalog file, returning how many were stored.
/// Records that are already present (same name) are skipped.
pub async fn import_catalog(store: &dyn ResourceStore, path: &Path) -> Result<usize> {
    let catalog = load_catalog(path)?;
    let mut imported = 0;
    for resource in catalog.resources {
        let exists = store
            .find_by_name(&resource.name)
            .await?
            .is_some_and(|r| r.name.eq_ignore_ascii_case(resource.name.trim()));
        if exists {
            tracing::debug!(name = %resource.name, "resource already in catalog, skipping");
            continue;
        }
        store.insert(resource).await?;
        imported += 1;
    }
    tracing::info!(imported, path = %path.display(), "resource catalog imported");
    Ok(imported)
}
