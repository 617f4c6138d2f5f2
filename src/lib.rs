#![doc = include_str!("../README.md")]
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`raster`]: In-memory [`RasterDataset`] and the [`RasterStore`] trait
//! - [`geotiff_reader`] / [`geotiff_writer`]: Pure-Rust GeoTIFF store
//! - [`band_date`]: Band label → date → compositing bucket
//! - [`composite`]: Per-tile temporal median composites via [`Compositor`]
//! - [`mosaic`]: Nodata-preserving mosaics via [`MosaicBuilder`]
//! - [`point_layer`]: GeoJSON point layers
//! - [`point_query`]: Pixel sampling via the [`PointQuery`] trait
//! - [`extract`]: Stack sampling into a [`SampleTable`]
//! - [`source`]: Raster discovery on the local filesystem
//! - [`geometry`]: Affine transforms, bounding boxes and projections
//! - [`config`] / [`pipeline`]: Run configuration and stage wiring

// ============================================================================
// Public modules
// ============================================================================

pub mod band_date;
pub mod casting;
pub mod composite;
pub mod config;
pub mod extract;
pub mod geometry;
pub mod geotiff_reader;
pub mod geotiff_writer;
pub mod mosaic;
pub mod pipeline;
pub mod point_layer;
pub mod point_query;
pub mod raster;
pub mod source;

// ============================================================================
// Rasters & Storage
// ============================================================================

pub use raster::{
    RasterDataset,
    RasterError,
    RasterStore,
    matches_sentinel,
};

pub use geotiff_reader::GeoTiffStore;

pub use geotiff_writer::{
    GeoTiffCompression,
    GeoTiffWriter,
};

// ============================================================================
// Temporal Compositing
// ============================================================================
// Primary API: Compositor::new(&store, &config).run(entries)

pub use band_date::{
    Bucket,
    BucketTable,
    DateConvention,
    PeriodUnit,
    YyyymmddPrefix,
};

pub use composite::{
    CompositeOutput,
    CompositeReport,
    Compositor,
    nan_median,
};

// ============================================================================
// Mosaicking
// ============================================================================
// Primary API: MosaicBuilder::new(&store, &config).run(&catalog)

pub use mosaic::{
    MosaicBuilder,
    MosaicGroup,
    MosaicReport,
    merge_first_valid,
    rescale,
    unique_output_path,
};

// ============================================================================
// Point Sampling
// ============================================================================
// Primary API: PointSampler::new(&RasterStack::open(&store, &paths)?).sample(layer)

pub use point_layer::{
    Feature,
    PointLayer,
    PointLayerError,
};

pub use point_query::{
    PointQuery,
    PointQueryResult,
};

pub use extract::{
    PointSampler,
    RasterStack,
    SampleError,
    SampleRow,
    SampleTable,
    StackMember,
};

// ============================================================================
// Geometry & Projections
// ============================================================================

pub use geometry::{BoundingBox, GeoTransform};
pub use geometry::projection::{
    ProjectionError,
    Reprojector,
    get_proj_string,
    is_geographic_crs,
    project_point,
};

// ============================================================================
// Source Discovery
// ============================================================================

pub use source::{
    LocalRasterCatalog,
    LocalScanOptions,
    RasterCatalog,
    RasterEntry,
};

// ============================================================================
// Configuration & Pipeline
// ============================================================================

pub use config::{ConfigError, PipelineConfig};
pub use pipeline::{Pipeline, PipelineError, RunReport};
