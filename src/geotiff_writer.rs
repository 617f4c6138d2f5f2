//! GeoTIFF writer for [`RasterDataset`]s.
//!
//! Writes float32 GeoTIFFs using pure Rust libraries (no GDAL dependency),
//! including the georeferencing tags plus the two GDAL private tags that
//! carry the nodata sentinel and per-band descriptions, so the output opens
//! with the same metadata in GDAL-based tools.
//!
//! # Example
//!
//! ```rust,no_run
//! use geocomposite::geometry::GeoTransform;
//! use geocomposite::geotiff_writer::{GeoTiffCompression, GeoTiffWriter};
//! use geocomposite::RasterDataset;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     let raster = RasterDataset::new(
//!         2, 2, 1,
//!         vec![0.1, 0.2, 0.3, f32::NAN],
//!         GeoTransform::north_up(500_000.0, 5_600_000.0, 10.0, 10.0),
//!         Some(32632),
//!     )?
//!     .with_nodata(Some(f64::NAN));
//!
//!     GeoTiffWriter::new(&raster)
//!         .compression(GeoTiffCompression::Deflate)
//!         .write("mosaic.tif")?;
//!     Ok(())
//! }
//! ```

use std::fs::File;
use std::io::{BufWriter, Seek, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tiff::encoder::colortype::{Gray32Float, RGB32Float, RGBA32Float};
use tiff::encoder::{Compression, DirectoryEncoder, TiffEncoder, TiffKind};
use tiff::tags::Tag;
use tracing::debug;

use crate::casting::usize_to_u32;
use crate::geometry::projection::{get_proj_string, is_geographic_crs};
use crate::raster::{RasterDataset, RasterError};

// GeoTIFF tag IDs
pub(crate) const GEOTIFF_MODELPIXELSCALE: u16 = 33550;
pub(crate) const GEOTIFF_MODELTIEPOINT: u16 = 33922;
pub(crate) const GEOTIFF_MODELTRANSFORMATION: u16 = 34264;
pub(crate) const GEOTIFF_GEOKEYDIRECTORY: u16 = 34735;
const GEOTIFF_GEOASCIIPARAMS: u16 = 34737;

// GDAL private tags
pub(crate) const GDAL_METADATA: u16 = 42112;
pub(crate) const GDAL_NODATA: u16 = 42113;

// GeoKey IDs
const GT_MODEL_TYPE_GEO_KEY: u16 = 1024;
const GT_RASTER_TYPE_GEO_KEY: u16 = 1025;
pub(crate) const GEOGRAPHIC_TYPE_GEO_KEY: u16 = 2048;
pub(crate) const PROJECTED_CS_TYPE_GEO_KEY: u16 = 3072;

// GeoKey values
const MODEL_TYPE_PROJECTED: u16 = 1;
const MODEL_TYPE_GEOGRAPHIC: u16 = 2;
const RASTER_PIXEL_IS_AREA: u16 = 1;

/// Compression method for GeoTIFF output
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeoTiffCompression {
    /// No compression - fastest but largest files
    None,
    /// LZW compression - good balance of speed and size
    Lzw,
    /// Deflate (zlib) compression
    #[default]
    Deflate,
}

/// Tag lookup that matches how the decoder keys its IFD entries.
pub(crate) fn tag(code: u16) -> Tag {
    Tag::from_u16_exhaustive(code)
}

/// Render the nodata sentinel the way GDAL stores it in `GDAL_NODATA`.
pub(crate) fn format_nodata(nodata: f64) -> String {
    if nodata.is_nan() {
        "nan".to_string()
    } else {
        format!("{nodata}")
    }
}

/// Build the `GDAL_METADATA` XML document holding band descriptions.
pub(crate) fn band_metadata_xml(labels: &[Option<String>]) -> Option<String> {
    if labels.iter().all(Option::is_none) {
        return None;
    }
    let mut xml = String::from("<GDALMetadata>\n");
    for (sample, label) in labels.iter().enumerate() {
        if let Some(label) = label {
            xml.push_str(&format!(
                "  <Item name=\"DESCRIPTION\" sample=\"{sample}\" role=\"description\">{}</Item>\n",
                quick_xml::escape::escape(label.as_str())
            ));
        }
    }
    xml.push_str("</GDALMetadata>");
    Some(xml)
}

/// Builder for configuring GeoTIFF output
pub struct GeoTiffWriter<'a> {
    raster: &'a RasterDataset,
    compression: GeoTiffCompression,
}

impl<'a> GeoTiffWriter<'a> {
    #[must_use]
    pub fn new(raster: &'a RasterDataset) -> Self {
        Self {
            raster,
            compression: GeoTiffCompression::default(),
        }
    }

    #[must_use]
    pub fn compression(mut self, compression: GeoTiffCompression) -> Self {
        self.compression = compression;
        self
    }

    /// Write to a file path, creating parent directories as needed.
    ///
    /// # Errors
    /// Returns an error if the file cannot be created or the raster cannot be encoded.
    pub fn write<P: AsRef<Path>>(self, path: P) -> Result<(), RasterError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| RasterError::io(parent, e))?;
        }
        let file = File::create(path).map_err(|e| RasterError::io(path, e))?;
        let mut writer = BufWriter::new(file);
        self.write_to(&mut writer, path)?;
        writer.flush().map_err(|e| RasterError::io(path, e))
    }

    /// Encode into an in-memory GeoTIFF.
    ///
    /// # Errors
    /// Returns an error if the raster cannot be encoded.
    pub fn to_bytes(self) -> Result<Vec<u8>, RasterError> {
        let mut buffer = std::io::Cursor::new(Vec::new());
        self.write_to(&mut buffer, Path::new("<memory>"))?;
        Ok(buffer.into_inner())
    }

    fn write_to<W: Write + Seek>(self, writer: W, path: &Path) -> Result<(), RasterError> {
        let raster = self.raster;
        if raster.pixels.is_empty() || raster.width == 0 || raster.height == 0 {
            return Err(RasterError::InvalidData("raster has no pixel data".to_string()));
        }

        let width = usize_to_u32(raster.width).map_err(RasterError::InvalidData)?;
        let height = usize_to_u32(raster.height).map_err(RasterError::InvalidData)?;

        let compression = match self.compression {
            GeoTiffCompression::None => Compression::Uncompressed,
            GeoTiffCompression::Lzw => Compression::Lzw,
            GeoTiffCompression::Deflate => Compression::Deflate(tiff::encoder::DeflateLevel::Fast),
        };

        let encoder = TiffEncoder::new(writer)
            .map_err(|e| RasterError::tiff(path, e))?
            .with_compression(compression);
        self.write_image(encoder, width, height)
            .map_err(|e| RasterError::tiff(path, e))
    }

    fn write_image<W: Write + Seek>(
        &self,
        mut encoder: TiffEncoder<W>,
        width: u32,
        height: u32,
    ) -> tiff::TiffResult<()> {
        // Storage is band-sequential; TIFF wants pixel-interleaved samples.
        let interleaved = interleave(self.raster);

        match self.raster.bands {
            1 => {
                let mut image = encoder.new_image::<Gray32Float>(width, height)?;
                self.write_geotiff_tags(image.encoder())?;
                image.write_data(&interleaved)?;
            }
            3 => {
                let mut image = encoder.new_image::<RGB32Float>(width, height)?;
                self.write_geotiff_tags(image.encoder())?;
                image.write_data(&interleaved)?;
            }
            4 => {
                let mut image = encoder.new_image::<RGBA32Float>(width, height)?;
                self.write_geotiff_tags(image.encoder())?;
                image.write_data(&interleaved)?;
            }
            _ => self.write_multiband_image(encoder, width, height, &interleaved)?,
        }
        Ok(())
    }

    /// Arbitrary band counts through the low-level directory API, as a single
    /// uncompressed strip.
    fn write_multiband_image<W: Write + Seek>(
        &self,
        mut encoder: TiffEncoder<W>,
        width: u32,
        height: u32,
        interleaved: &[f32],
    ) -> tiff::TiffResult<()> {
        let bands = self.raster.bands;
        if self.compression != GeoTiffCompression::None {
            debug!(
                bands,
                compression = ?self.compression,
                "Compression ignored for stacks of more than four bands; writing uncompressed"
            );
        }
        let samples = u16::try_from(bands).map_err(|_| tiff::TiffError::IntSizeError)?;

        let mut dir = encoder.image_directory()?;

        dir.write_tag(Tag::ImageWidth, width)?;
        dir.write_tag(Tag::ImageLength, height)?;
        dir.write_tag(Tag::BitsPerSample, vec![32u16; bands].as_slice())?;
        dir.write_tag(Tag::Compression, 1u16)?;
        // BlackIsZero
        dir.write_tag(Tag::PhotometricInterpretation, 1u16)?;
        dir.write_tag(Tag::SamplesPerPixel, samples)?;
        // IEEE floating point
        dir.write_tag(Tag::SampleFormat, vec![3u16; bands].as_slice())?;
        // Chunky
        dir.write_tag(Tag::PlanarConfiguration, 1u16)?;
        dir.write_tag(Tag::RowsPerStrip, height)?;
        if bands > 1 {
            dir.write_tag(Tag::ExtraSamples, vec![0u16; bands - 1].as_slice())?;
        }

        self.write_geotiff_tags(&mut dir)?;

        let pixel_bytes: Vec<u8> = interleaved.iter().flat_map(|f| f.to_le_bytes()).collect();
        let strip_offset = dir.write_data(pixel_bytes.as_slice())?;
        let strip_offset = u32::try_from(strip_offset).map_err(|_| tiff::TiffError::IntSizeError)?;
        let strip_bytes =
            u32::try_from(pixel_bytes.len()).map_err(|_| tiff::TiffError::IntSizeError)?;
        dir.write_tag(Tag::StripOffsets, strip_offset)?;
        dir.write_tag(Tag::StripByteCounts, strip_bytes)?;

        dir.finish()
    }

    fn write_geotiff_tags<W: Write + Seek, K: TiffKind>(
        &self,
        dir: &mut DirectoryEncoder<W, K>,
    ) -> tiff::TiffResult<()> {
        let raster = self.raster;
        let gt = &raster.geo_transform;

        if gt.is_north_up() {
            let (pixel_width, pixel_height) = gt.pixel_size();
            let (origin_x, origin_y) = gt.origin();
            let pixel_scale = [pixel_width, pixel_height, 0.0];
            dir.write_tag(tag(GEOTIFF_MODELPIXELSCALE), pixel_scale.as_slice())?;
            let tiepoint = [0.0, 0.0, 0.0, origin_x, origin_y, 0.0];
            dir.write_tag(tag(GEOTIFF_MODELTIEPOINT), tiepoint.as_slice())?;
        } else {
            let c = &gt.coefficients;
            let matrix = [
                c[1], c[2], 0.0, c[0], //
                c[4], c[5], 0.0, c[3], //
                0.0, 0.0, 0.0, 0.0, //
                0.0, 0.0, 0.0, 1.0,
            ];
            dir.write_tag(tag(GEOTIFF_MODELTRANSFORMATION), matrix.as_slice())?;
        }

        let geokeys = build_geokey_directory(raster.crs);
        dir.write_tag(tag(GEOTIFF_GEOKEYDIRECTORY), geokeys.as_slice())?;

        if let Some(proj_string) = raster.crs.and_then(get_proj_string) {
            let ascii_params = format!("{proj_string}|");
            dir.write_tag(tag(GEOTIFF_GEOASCIIPARAMS), ascii_params.as_str())?;
        }

        if let Some(nodata) = raster.nodata {
            dir.write_tag(tag(GDAL_NODATA), format_nodata(nodata).as_str())?;
        }

        if let Some(xml) = band_metadata_xml(&raster.band_labels) {
            dir.write_tag(tag(GDAL_METADATA), xml.as_str())?;
        }

        Ok(())
    }
}

/// Pixel-interleave a band-sequential buffer.
fn interleave(raster: &RasterDataset) -> Vec<f32> {
    if raster.bands == 1 {
        return raster.pixels.clone();
    }
    let len = raster.band_len();
    let mut out = Vec::with_capacity(raster.pixels.len());
    for i in 0..len {
        for b in 0..raster.bands {
            out.push(raster.pixels[b * len + i]);
        }
    }
    out
}

/// GeoKeyDirectory: header `[version, revision, minor, count]` followed by
/// `[key, location, count, value]` entries.
fn build_geokey_directory(crs: Option<i32>) -> Vec<u16> {
    let is_geographic = crs.is_some_and(is_geographic_crs);
    let crs_key = crs.and_then(|code| u16::try_from(code).ok());

    let mut keys = vec![1, 1, 0, if crs_key.is_some() { 3 } else { 2 }];
    keys.extend_from_slice(&[
        GT_MODEL_TYPE_GEO_KEY,
        0,
        1,
        if is_geographic {
            MODEL_TYPE_GEOGRAPHIC
        } else {
            MODEL_TYPE_PROJECTED
        },
    ]);
    keys.extend_from_slice(&[GT_RASTER_TYPE_GEO_KEY, 0, 1, RASTER_PIXEL_IS_AREA]);

    if let Some(code) = crs_key {
        let key = if is_geographic {
            GEOGRAPHIC_TYPE_GEO_KEY
        } else {
            PROJECTED_CS_TYPE_GEO_KEY
        };
        keys.extend_from_slice(&[key, 0, 1, code]);
    }
    keys
}
