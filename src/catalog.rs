//! Catalog lookup: resolve a catalog identifier to candidate titles.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("catalog unavailable: {0}")]
    Unavailable(String),
}

pub trait CatalogLookup: Send + Sync {
    /// Titles recorded for `key`, best match first. An empty list means no match.
    fn search(&self, key: &str) -> Result<Vec<String>, CatalogError>;
}

#[derive(Debug, Deserialize)]
struct CatalogRow {
    catalog_id: String,
    title: String,
}

/// Catalog loaded from a CSV file with `catalog_id,title` columns.
#[derive(Debug, Default)]
pub struct CsvCatalog {
    titles: HashMap<String, Vec<String>>,
}

impl CsvCatalog {
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let mut reader = csv::Reader::from_path(path)?;
        let mut titles: HashMap<String, Vec<String>> = HashMap::new();
        for row in reader.deserialize::<CatalogRow>() {
            let row = row?;
            titles
                .entry(row.catalog_id.trim().to_string())
                .or_default()
                .push(row.title.trim().to_string());
        }
        Ok(Self { titles })
    }

    pub fn len(&self) -> usize {
        self.titles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.titles.is_empty()
    }
}

impl CatalogLookup for CsvCatalog {
    fn search(&self, key: &str) -> Result<Vec<String>, CatalogError> {
        Ok(self.titles.get(key.trim()).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_titles_by_catalog_id() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("catalog.csv");
        std::fs::write(
            &path,
            "catalog_id,title\n\
             101,Dutch road atlas\n\
             102,\"Encyclopedie, deel 1\"\n\
             101,Dutch road atlas (reprint)\n",
        )
        .expect("write");

        let catalog = CsvCatalog::load(&path).expect("load");
        assert_eq!(catalog.len(), 2);
        assert_eq!(
            catalog.search("101").expect("search"),
            vec!["Dutch road atlas", "Dutch road atlas (reprint)"]
        );
        assert_eq!(catalog.search(" 102 ").expect("search"), vec!["Encyclopedie, deel 1"]);
        assert!(catalog.search("999").expect("search").is_empty());
    }

    #[test]
    fn missing_catalog_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(CsvCatalog::load(&dir.path().join("none.csv")).is_err());
    }
}
