//! Raster discovery on the local filesystem.
//!
//! Pipeline stages exchange data through directories: tiles of input stacks,
//! a flat folder of composites, a flat folder of mosaics. This module turns
//! such a directory into an ordered list of [`RasterEntry`] values.
//!
//! # Example
//!
//! ```rust,no_run
//! use geocomposite::source::{LocalRasterCatalog, LocalScanOptions, RasterCatalog};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     // One directory per tile, product stacks inside
//!     let tiles = LocalRasterCatalog::scan("/data/force", &LocalScanOptions::tiles().name_contains("NDV"))?;
//!     for entry in tiles.entries() {
//!         println!("{} / {}", entry.tile.as_deref().unwrap_or("-"), entry.name);
//!     }
//!     Ok(())
//! }
//! ```

pub mod local;

pub use local::{LocalRasterCatalog, LocalScanOptions};

use std::path::PathBuf;

/// A raster file found during discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RasterEntry {
    /// File stem, e.g. `2018-2018_182-243_HL_TSA_SEN2L_NDV_TSS`
    pub name: String,
    /// Name of the tile directory the file sits in, when scanning tile layouts
    pub tile: Option<String>,
    pub path: PathBuf,
}

impl RasterEntry {
    /// File name including extension, used as a column identity when sampling.
    #[must_use]
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map_or_else(|| self.name.clone(), |n| n.to_string_lossy().into_owned())
    }
}

/// A discovered, ordered collection of rasters.
pub trait RasterCatalog {
    /// Entries in deterministic (path-sorted) order.
    fn entries(&self) -> &[RasterEntry];

    fn len(&self) -> usize {
        self.entries().len()
    }

    fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}
