use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use crate::batch::Rejection;
use crate::catalog::CatalogLookup;

/// One physical medium accepted for imaging. Immutable once submitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Carrier {
    pub job_id: String,
    pub catalog_id: Option<String>,
    pub title: String,
    pub volume_number: u32,
    pub source_device: PathBuf,
}

/// What the operator entered for the next carrier.
#[derive(Debug, Clone, Default)]
pub struct CarrierRequest {
    pub catalog_id: Option<String>,
    pub title: Option<String>,
    pub volume_number: u32,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

impl CarrierRequest {
    /// Validate the request, resolve its title and assign a job identifier.
    ///
    /// With a catalog the title comes from the first search hit; an empty
    /// result and an unreachable catalog are both `NoTitle`.
    pub fn resolve(
        &self,
        catalog: Option<&dyn CatalogLookup>,
        source_device: &Path,
    ) -> Result<Carrier, Rejection> {
        if self.volume_number < 1 {
            return Err(Rejection::InvalidVolume(self.volume_number));
        }

        let catalog_id = non_empty(&self.catalog_id).map(str::to_string);
        let title = match catalog {
            Some(catalog) => {
                let key = catalog_id
                    .as_deref()
                    .ok_or_else(|| Rejection::NoTitle("no catalog identifier entered".into()))?;
                let titles = catalog.search(key).map_err(|err| {
                    warn!("catalog lookup for {key} failed: {err}");
                    Rejection::NoTitle(format!("catalog lookup failed for {key}"))
                })?;
                titles
                    .into_iter()
                    .map(|t| t.trim().to_string())
                    .find(|t| !t.is_empty())
                    .ok_or_else(|| Rejection::NoTitle(format!("no catalog record for {key}")))?
            }
            None => non_empty(&self.title)
                .map(str::to_string)
                .ok_or_else(|| Rejection::NoTitle("no title entered".into()))?,
        };

        Ok(Carrier {
            job_id: Uuid::now_v7().to_string(),
            catalog_id,
            title,
            volume_number: self.volume_number,
            source_device: source_device.to_path_buf(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CatalogError;

    struct FixedCatalog(Vec<String>);

    impl CatalogLookup for FixedCatalog {
        fn search(&self, _key: &str) -> Result<Vec<String>, CatalogError> {
            Ok(self.0.clone())
        }
    }

    struct DownCatalog;

    impl CatalogLookup for DownCatalog {
        fn search(&self, _key: &str) -> Result<Vec<String>, CatalogError> {
            Err(CatalogError::Unavailable("connection refused".into()))
        }
    }

    fn request(catalog_id: Option<&str>, title: Option<&str>, volume: u32) -> CarrierRequest {
        CarrierRequest {
            catalog_id: catalog_id.map(str::to_string),
            title: title.map(str::to_string),
            volume_number: volume,
        }
    }

    #[test]
    fn resolves_operator_title_without_catalog() {
        let carrier = request(None, Some("  Holiday photos "), 2)
            .resolve(None, Path::new("/dev/sdb"))
            .expect("carrier");
        assert_eq!(carrier.title, "Holiday photos");
        assert_eq!(carrier.volume_number, 2);
        assert_eq!(carrier.catalog_id, None);
        assert!(Uuid::parse_str(&carrier.job_id).is_ok());
    }

    #[test]
    fn job_ids_are_unique() {
        let req = request(None, Some("T"), 1);
        let a = req.resolve(None, Path::new("/dev/sr0")).expect("a");
        let b = req.resolve(None, Path::new("/dev/sr0")).expect("b");
        assert_ne!(a.job_id, b.job_id);
    }

    #[test]
    fn takes_first_catalog_title() {
        let catalog = FixedCatalog(vec!["First".into(), "Second".into()]);
        let carrier = request(Some("42"), None, 1)
            .resolve(Some(&catalog), Path::new("/dev/sr0"))
            .expect("carrier");
        assert_eq!(carrier.title, "First");
        assert_eq!(carrier.catalog_id.as_deref(), Some("42"));
    }

    #[test]
    fn empty_and_unreachable_catalog_are_both_no_title() {
        let empty = FixedCatalog(Vec::new());
        let err = request(Some("42"), None, 1)
            .resolve(Some(&empty), Path::new("/dev/sr0"))
            .expect_err("empty");
        assert!(matches!(err, Rejection::NoTitle(_)));
        let err = request(Some("42"), None, 1)
            .resolve(Some(&DownCatalog), Path::new("/dev/sr0"))
            .expect_err("down");
        assert!(matches!(err, Rejection::NoTitle(_)));
        let err = request(Some(" "), None, 1)
            .resolve(Some(&empty), Path::new("/dev/sr0"))
            .expect_err("blank key");
        assert!(matches!(err, Rejection::NoTitle(_)));
    }

    #[test]
    fn rejects_volume_zero_and_missing_title() {
        let err = request(None, Some("T"), 0)
            .resolve(None, Path::new("/dev/sr0"))
            .expect_err("volume");
        assert_eq!(err, Rejection::InvalidVolume(0));
        let err = request(None, None, 1)
            .resolve(None, Path::new("/dev/sr0"))
            .expect_err("title");
        assert!(matches!(err, Rejection::NoTitle(_)));
    }
}
