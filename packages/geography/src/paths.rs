#![allow(clippy::module_name_repetitions)]
//! Canonical file locations under the data directory.
//!
//! ```text
//! {root}/snapshots/{FL,PA}_tracts.csv
//! {root}/gazetteer/{year}_Gaz_tracts_{fips}.txt
//! {root}/boundaries/{FL,PA}_tracts.geojson
//! {root}/competitors.csv
//! ```

use std::path::{Path, PathBuf};

use site_predict_geography_models::Region;

/// Resolves data file paths relative to a root directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPaths {
    root: PathBuf,
}

impl DataPaths {
    /// Creates a resolver rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The data directory itself.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding one catalog snapshot per region.
    #[must_use]
    pub fn snapshots_dir(&self) -> PathBuf {
        self.root.join("snapshots")
    }

    /// Catalog snapshot for a region.
    #[must_use]
    pub fn snapshot(&self, region: Region) -> PathBuf {
        self.snapshots_dir()
            .join(format!("{}_tracts.csv", region.code()))
    }

    /// Census Gazetteer tract file for a region and vintage year.
    #[must_use]
    pub fn gazetteer(&self, region: Region, year: u16) -> PathBuf {
        self.root
            .join("gazetteer")
            .join(format!("{year}_Gaz_tracts_{}.txt", region.state_fips()))
    }

    /// Directory holding one tract boundary file per region.
    #[must_use]
    pub fn boundaries_dir(&self) -> PathBuf {
        self.root.join("boundaries")
    }

    /// Tract boundary `GeoJSON` for a region.
    #[must_use]
    pub fn boundaries(&self, region: Region) -> PathBuf {
        self.boundaries_dir()
            .join(format!("{}_tracts.geojson", region.code()))
    }

    /// Competitor roster.
    #[must_use]
    pub fn competitors(&self) -> PathBuf {
        self.root.join("competitors.csv")
    }
}

/// Ensures a directory exists, creating it if necessary.
///
/// # Errors
///
/// Returns an I/O error if the directory cannot be created.
pub fn ensure_dir(path: &Path) -> std::io::Result<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }
    Ok(())
}

/// Writes `contents` to `path` atomically: the bytes go to a sibling
/// temporary file which is flushed to disk and then renamed over the
/// target, so readers never observe a partial file.
///
/// # Errors
///
/// Returns an I/O error if any step fails. The temporary file is removed
/// on failure.
pub fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    use std::io::Write as _;

    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }

    let file_name = path
        .file_name()
        .map_or_else(|| "data".into(), |n| n.to_string_lossy().into_owned());
    let tmp = path.with_file_name(format!(".{file_name}.tmp"));

    let result = (|| {
        let mut file = std::fs::File::create(&tmp)?;
        file.write_all(contents)?;
        file.sync_all()?;
        std::fs::rename(&tmp, path)
    })();

    if result.is_err() {
        let _ = std::fs::remove_file(&tmp);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_uses_region_codes_and_fips() {
        let paths = DataPaths::new("/data");
        assert_eq!(
            paths.snapshot(Region::Florida),
            PathBuf::from("/data/snapshots/FL_tracts.csv")
        );
        assert_eq!(
            paths.gazetteer(Region::Pennsylvania, 2023),
            PathBuf::from("/data/gazetteer/2023_Gaz_tracts_42.txt")
        );
        assert_eq!(
            paths.boundaries(Region::Florida),
            PathBuf::from("/data/boundaries/FL_tracts.geojson")
        );
        assert_eq!(paths.competitors(), PathBuf::from("/data/competitors.csv"));
    }

    #[test]
    fn atomic_write_replaces_contents() {
        let dir = std::env::temp_dir().join("site_predict_test_atomic_write");
        let _ = std::fs::remove_dir_all(&dir);
        let target = dir.join("nested").join("file.csv");

        write_atomic(&target, b"first").unwrap();
        write_atomic(&target, b"second").unwrap();

        assert_eq!(std::fs::read_to_string(&target).unwrap(), "second");
        assert!(!dir.join("nested").join(".file.csv.tmp").exists());

        let _ = std::fs::remove_dir_all(&dir);
    }
}
