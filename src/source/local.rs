//! Local filesystem raster catalog.
//!
//! Scans directories for `GeoTIFF` files without opening them; rasters are
//! only read when a pipeline stage consumes them.

use std::path::{Component, Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};
use walkdir::WalkDir;

use super::{RasterCatalog, RasterEntry};

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("directory does not exist: {0}")]
    MissingRoot(PathBuf),
}

/// Options for scanning local directories.
#[derive(Debug, Clone)]
pub struct LocalScanOptions {
    /// Minimum directory depth to scan (0 = include root files)
    pub min_depth: usize,
    /// Maximum directory depth to scan (None = unlimited)
    pub max_depth: Option<usize>,
    /// File extensions to consider as `GeoTIFFs` (case-insensitive)
    pub extensions: Vec<String>,
    /// Only keep files whose name contains this substring
    pub name_filter: Option<String>,
    /// Whether to follow symbolic links
    pub follow_links: bool,
}

impl Default for LocalScanOptions {
    fn default() -> Self {
        Self {
            min_depth: 1,
            max_depth: None,
            extensions: vec![
                "tif".to_string(),
                "tiff".to_string(),
                "geotiff".to_string(),
                "geotif".to_string(),
            ],
            name_filter: None,
            follow_links: false,
        }
    }
}

impl LocalScanOptions {
    /// `root/<tile>/<file>.tif` layout: exactly one directory level below the root.
    #[must_use]
    pub fn tiles() -> Self {
        Self {
            min_depth: 2,
            max_depth: Some(2),
            ..Default::default()
        }
    }

    /// Files directly inside the root.
    #[must_use]
    pub fn flat() -> Self {
        Self {
            min_depth: 1,
            max_depth: Some(1),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_min_depth(mut self, depth: usize) -> Self {
        self.min_depth = depth;
        self
    }

    #[must_use]
    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = Some(depth);
        self
    }

    /// Keep only files whose name contains `token`.
    #[must_use]
    pub fn name_contains(mut self, token: impl Into<String>) -> Self {
        self.name_filter = Some(token.into());
        self
    }

    fn accepts(&self, path: &Path) -> bool {
        let is_geotiff = path
            .extension()
            .and_then(|s| s.to_str())
            .is_some_and(|e| self.extensions.iter().any(|x| x.eq_ignore_ascii_case(e)));
        if !is_geotiff {
            return false;
        }
        match &self.name_filter {
            Some(token) => path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.contains(token.as_str())),
            None => true,
        }
    }
}

/// Raster catalog built from a directory scan.
#[derive(Debug, Clone, Default)]
pub struct LocalRasterCatalog {
    root: PathBuf,
    entries: Vec<RasterEntry>,
}

impl LocalRasterCatalog {
    /// Scan a directory for raster files.
    ///
    /// Entries are sorted by path. Unreadable directory entries are logged and skipped.
    ///
    /// # Errors
    /// Returns an error if the root directory does not exist.
    pub fn scan<P: AsRef<Path>>(root: P, options: &LocalScanOptions) -> Result<Self, ScanError> {
        let root = root.as_ref();
        if !root.is_dir() {
            return Err(ScanError::MissingRoot(root.to_path_buf()));
        }

        let mut walker = WalkDir::new(root)
            .min_depth(options.min_depth)
            .follow_links(options.follow_links)
            .sort_by_file_name();
        if let Some(max) = options.max_depth {
            walker = walker.max_depth(max);
        }

        let mut entries = Vec::new();
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(root = %root.display(), error = %e, "Skipping unreadable directory entry");
                    continue;
                }
            };
            let path = entry.path();
            if !entry.file_type().is_file() || !options.accepts(path) {
                continue;
            }

            let name = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("unknown")
                .to_string();
            let tile = tile_of(root, path);
            debug!(path = %path.display(), tile = ?tile, "Discovered raster");
            entries.push(RasterEntry {
                name,
                tile,
                path: path.to_path_buf(),
            });
        }

        Ok(Self {
            root: root.to_path_buf(),
            entries,
        })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Distinct tile names, in scan order.
    #[must_use]
    pub fn tiles(&self) -> Vec<&str> {
        let mut tiles: Vec<&str> = Vec::new();
        for tile in self.entries.iter().filter_map(|e| e.tile.as_deref()) {
            if !tiles.contains(&tile) {
                tiles.push(tile);
            }
        }
        tiles
    }
}

/// First directory component below `root`, if the file is nested.
fn tile_of(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let mut components = relative.components();
    let first = components.next()?;
    // A file directly in the root has no tile
    components.next()?;
    match first {
        Component::Normal(name) => Some(name.to_string_lossy().into_owned()),
        _ => None,
    }
}

impl RasterCatalog for LocalRasterCatalog {
    fn entries(&self) -> &[RasterEntry] {
        &self.entries
    }
}
