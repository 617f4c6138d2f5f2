//! GeoTIFF-backed [`RasterStore`].
//!
//! Reads every band into memory as `f32`, together with the georeferencing
//! tags, the `GDAL_NODATA` sentinel and the band descriptions GDAL keeps in
//! `GDAL_METADATA`. Both pixel-interleaved (chunky) and band-interleaved
//! (planar-separate) sample layouts are read.

use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;

use quick_xml::events::Event;
use quick_xml::Reader;
use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::tags::Tag;
use tracing::debug;

use crate::casting::u32_to_usize;
use crate::geometry::GeoTransform;
use crate::geotiff_writer::{
    tag, GeoTiffCompression, GeoTiffWriter, GDAL_METADATA, GDAL_NODATA, GEOGRAPHIC_TYPE_GEO_KEY,
    GEOTIFF_GEOKEYDIRECTORY, GEOTIFF_MODELPIXELSCALE, GEOTIFF_MODELTIEPOINT,
    GEOTIFF_MODELTRANSFORMATION, PROJECTED_CS_TYPE_GEO_KEY,
};
use crate::raster::{RasterDataset, RasterError, RasterStore};

/// GeoKey value meaning "user defined", which carries no EPSG code.
const USER_DEFINED: u16 = 32767;

/// Reads and writes rasters as GeoTIFF files.
#[derive(Debug, Clone, Copy, Default)]
pub struct GeoTiffStore {
    compression: GeoTiffCompression,
}

impl GeoTiffStore {
    #[must_use]
    pub fn new(compression: GeoTiffCompression) -> Self {
        Self { compression }
    }
}

impl RasterStore for GeoTiffStore {
    fn open(&self, path: &Path) -> Result<RasterDataset, RasterError> {
        let file = File::open(path).map_err(|e| RasterError::io(path, e))?;
        let decoder = Decoder::new(BufReader::new(file)).map_err(|e| RasterError::tiff(path, e))?;
        // Whole-tile stacks easily exceed the decoder's default buffer limit
        let mut decoder = decoder.with_limits(Limits::unlimited());
        let raster = read_dataset(&mut decoder, path)?;
        debug!(
            path = %path.display(),
            bands = raster.bands,
            width = raster.width,
            height = raster.height,
            "Read raster"
        );
        Ok(raster)
    }

    fn write(&self, path: &Path, raster: &RasterDataset) -> Result<(), RasterError> {
        GeoTiffWriter::new(raster).compression(self.compression).write(path)?;
        debug!(path = %path.display(), bands = raster.bands, "Wrote raster");
        Ok(())
    }
}

fn read_dataset<R: Read + Seek>(
    decoder: &mut Decoder<R>,
    path: &Path,
) -> Result<RasterDataset, RasterError> {
    let tiff_err = |e| RasterError::tiff(path, e);

    let (width, height) = decoder.dimensions().map_err(tiff_err)?;
    let (width, height) = (u32_to_usize(width), u32_to_usize(height));

    let planar = match decoder.find_tag(Tag::PlanarConfiguration).map_err(tiff_err)? {
        Some(value) => value.into_u32().map_err(tiff_err)? == 2,
        None => false,
    };

    let geo_transform = read_geo_transform(decoder, path)?;
    let crs = read_epsg(decoder, path)?;
    let nodata = read_nodata(decoder, path)?;
    let metadata_xml = match decoder.find_tag(tag(GDAL_METADATA)).map_err(tiff_err)? {
        Some(value) => Some(value.into_string().map_err(tiff_err)?),
        None => None,
    };

    let pixel_count = width * height;
    if pixel_count == 0 {
        return Err(RasterError::metadata(path, "image has zero pixels"));
    }

    let (bands, pixels) = if planar {
        let bands = match decoder.find_tag(Tag::SamplesPerPixel).map_err(tiff_err)? {
            Some(value) => u32_to_usize(value.into_u32().map_err(tiff_err)?),
            None => 1,
        };
        (bands, read_planes(decoder, path, width, height, bands)?)
    } else {
        let interleaved = decode_to_f32(decoder.read_image().map_err(tiff_err)?, path)?;
        if interleaved.len() % pixel_count != 0 {
            return Err(RasterError::metadata(
                path,
                format!(
                    "decoded {} samples for a {width}x{height} image",
                    interleaved.len()
                ),
            ));
        }
        let bands = interleaved.len() / pixel_count;
        (bands, deinterleave(&interleaved, bands))
    };

    let band_labels = match metadata_xml {
        Some(xml) => parse_band_descriptions(&xml, bands)
            .map_err(|message| RasterError::metadata(path, message))?,
        None => vec![None; bands],
    };

    Ok(RasterDataset::new(width, height, bands, pixels, geo_transform, crs)?
        .with_nodata(nodata)
        .with_band_labels(band_labels))
}

fn read_f64_tag<R: Read + Seek>(
    decoder: &mut Decoder<R>,
    code: u16,
    path: &Path,
) -> Result<Option<Vec<f64>>, RasterError> {
    decoder
        .find_tag(tag(code))
        .and_then(|value| value.map(tiff::decoder::ifd::Value::into_f64_vec).transpose())
        .map_err(|e| RasterError::tiff(path, e))
}

fn read_geo_transform<R: Read + Seek>(
    decoder: &mut Decoder<R>,
    path: &Path,
) -> Result<GeoTransform, RasterError> {
    if let Some(matrix) = read_f64_tag(decoder, GEOTIFF_MODELTRANSFORMATION, path)? {
        return GeoTransform::from_model_transformation(&matrix)
            .ok_or_else(|| RasterError::metadata(path, "ModelTransformation needs 16 values"));
    }

    let scale = read_f64_tag(decoder, GEOTIFF_MODELPIXELSCALE, path)?;
    let tiepoint = read_f64_tag(decoder, GEOTIFF_MODELTIEPOINT, path)?;
    match (tiepoint, scale) {
        (Some(tiepoint), Some(scale)) => GeoTransform::from_tiepoint_scale(&tiepoint, &scale)
            .ok_or_else(|| RasterError::metadata(path, "malformed tiepoint or pixel scale")),
        // No georeferencing: pixel coordinates
        _ => Ok(GeoTransform::default()),
    }
}

fn read_epsg<R: Read + Seek>(
    decoder: &mut Decoder<R>,
    path: &Path,
) -> Result<Option<i32>, RasterError> {
    let Some(directory) = decoder
        .find_tag(tag(GEOTIFF_GEOKEYDIRECTORY))
        .and_then(|value| value.map(tiff::decoder::ifd::Value::into_u16_vec).transpose())
        .map_err(|e| RasterError::tiff(path, e))?
    else {
        return Ok(None);
    };
    Ok(epsg_from_geokeys(&directory))
}

/// Pull the EPSG code out of a GeoKeyDirectory, preferring the projected CRS key.
pub(crate) fn epsg_from_geokeys(directory: &[u16]) -> Option<i32> {
    let mut geographic = None;
    let mut projected = None;
    for entry in directory.get(4..)?.chunks_exact(4) {
        let (key, location, value) = (entry[0], entry[1], entry[3]);
        // Inline values only; EPSG codes are never stored in the param tags
        if location != 0 || value == 0 || value == USER_DEFINED {
            continue;
        }
        match key {
            PROJECTED_CS_TYPE_GEO_KEY => projected = Some(i32::from(value)),
            GEOGRAPHIC_TYPE_GEO_KEY => geographic = Some(i32::from(value)),
            _ => {}
        }
    }
    projected.or(geographic)
}

fn read_nodata<R: Read + Seek>(
    decoder: &mut Decoder<R>,
    path: &Path,
) -> Result<Option<f64>, RasterError> {
    let Some(value) = decoder
        .find_tag(tag(GDAL_NODATA))
        .map_err(|e| RasterError::tiff(path, e))?
    else {
        return Ok(None);
    };
    let text = value.into_string().map_err(|e| RasterError::tiff(path, e))?;
    parse_nodata(&text)
        .map(Some)
        .ok_or_else(|| RasterError::metadata(path, format!("unparseable GDAL_NODATA {text:?}")))
}

/// Parse a `GDAL_NODATA` string; accepts `nan`, `inf` and plain numbers.
pub(crate) fn parse_nodata(text: &str) -> Option<f64> {
    text.trim_matches(char::from(0)).trim().parse::<f64>().ok()
}

/// Extract per-band `DESCRIPTION` items from a `GDAL_METADATA` document.
pub(crate) fn parse_band_descriptions(
    xml: &str,
    bands: usize,
) -> Result<Vec<Option<String>>, String> {
    let mut labels = vec![None; bands];
    let mut reader = Reader::from_str(xml.trim_matches(char::from(0)));
    reader.trim_text(true);

    // Sample index of the description item currently open
    let mut current: Option<usize> = None;
    loop {
        match reader.read_event().map_err(|e| e.to_string())? {
            Event::Start(e) if e.name().as_ref() == b"Item" => {
                let mut is_description = false;
                let mut sample = None;
                for attr in e.attributes().flatten() {
                    let value = attr.unescape_value().map_err(|e| e.to_string())?;
                    match attr.key.as_ref() {
                        b"name" => is_description = value == "DESCRIPTION",
                        b"sample" => sample = value.parse::<usize>().ok(),
                        _ => {}
                    }
                }
                current = if is_description { sample } else { None };
            }
            Event::Text(text) => {
                if let Some(slot) = current.and_then(|i| labels.get_mut(i)) {
                    *slot = Some(text.unescape().map_err(|e| e.to_string())?.into_owned());
                }
            }
            Event::End(_) => current = None,
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(labels)
}

#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
fn decode_to_f32(result: DecodingResult, path: &Path) -> Result<Vec<f32>, RasterError> {
    Ok(match result {
        DecodingResult::U8(buf) => buf.into_iter().map(f32::from).collect(),
        DecodingResult::U16(buf) => buf.into_iter().map(f32::from).collect(),
        DecodingResult::U32(buf) => buf.into_iter().map(|v| v as f32).collect(),
        DecodingResult::U64(buf) => buf.into_iter().map(|v| v as f32).collect(),
        DecodingResult::I8(buf) => buf.into_iter().map(f32::from).collect(),
        DecodingResult::I16(buf) => buf.into_iter().map(f32::from).collect(),
        DecodingResult::I32(buf) => buf.into_iter().map(|v| v as f32).collect(),
        DecodingResult::I64(buf) => buf.into_iter().map(|v| v as f32).collect(),
        DecodingResult::F32(buf) => buf,
        DecodingResult::F64(buf) => buf.into_iter().map(|v| v as f32).collect(),
        #[allow(unreachable_patterns)]
        _ => {
            return Err(RasterError::Unsupported {
                path: path.display().to_string(),
                message: "pixel sample format".to_string(),
            })
        }
    })
}

/// Decode a planar-separate (`INTERLEAVE=BAND`) image chunk by chunk.
///
/// Each band is stored as its own run of strips or tiles, numbered after all
/// chunks of the previous band, so the planes land band-sequential directly.
fn read_planes<R: Read + Seek>(
    decoder: &mut Decoder<R>,
    path: &Path,
    width: usize,
    height: usize,
    bands: usize,
) -> Result<Vec<f32>, RasterError> {
    let (chunk_width, chunk_height) = decoder.chunk_dimensions();
    let (chunk_width, chunk_height) = (u32_to_usize(chunk_width), u32_to_usize(chunk_height));
    if bands == 0 || chunk_width == 0 || chunk_height == 0 {
        return Err(RasterError::metadata(path, "planar image without samples or chunks"));
    }
    let across = width.div_ceil(chunk_width);
    let down = height.div_ceil(chunk_height);
    let per_plane = across * down;
    let band_len = width * height;

    let mut pixels = vec![0.0; band_len * bands];
    for (band, plane) in pixels.chunks_exact_mut(band_len).enumerate() {
        for chunk in 0..per_plane {
            let index = u32::try_from(band * per_plane + chunk)
                .map_err(|_| RasterError::metadata(path, "chunk index exceeds u32"))?;
            let values = decode_to_f32(
                decoder.read_chunk(index).map_err(|e| RasterError::tiff(path, e))?,
                path,
            )?;

            let col0 = (chunk % across) * chunk_width;
            let row0 = (chunk / across) * chunk_height;
            let data_width = chunk_width.min(width - col0);
            let data_height = chunk_height.min(height - row0);
            // Edge tiles may decode padded to the full tile size
            let stride = if values.len() == data_width * data_height {
                data_width
            } else if values.len() == chunk_width * chunk_height {
                chunk_width
            } else {
                return Err(RasterError::metadata(
                    path,
                    format!("chunk {index} decoded {} samples", values.len()),
                ));
            };

            for row in 0..data_height {
                let src = &values[row * stride..row * stride + data_width];
                let start = (row0 + row) * width + col0;
                plane[start..start + data_width].copy_from_slice(src);
            }
        }
    }
    Ok(pixels)
}

/// Split pixel-interleaved samples into band-sequential order.
fn deinterleave(interleaved: &[f32], bands: usize) -> Vec<f32> {
    if bands == 1 {
        return interleaved.to_vec();
    }
    let len = interleaved.len() / bands;
    let mut out = vec![0.0; interleaved.len()];
    for (i, pixel) in interleaved.chunks_exact(bands).enumerate() {
        for (b, &v) in pixel.iter().enumerate() {
            out[b * len + i] = v;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labelled_stack() -> RasterDataset {
        RasterDataset::new(
            2,
            2,
            3,
            vec![
                1000.0, 1.0, 2.0, 3.0, //
                2000.0, 4.0, 5.0, 6.0, //
                -9999.0, 7.0, 8.0, 9.0,
            ],
            GeoTransform::north_up(399_960.0, 5_800_020.0, 10.0, 10.0),
            Some(32632),
        )
        .unwrap()
        .with_nodata(Some(-9999.0))
        .with_band_labels([Some("20180705_x"), Some("20180714_x"), Some("20180822_x")])
    }

    #[test]
    fn test_roundtrip_metadata_and_pixels() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stack.tif");
        let store = GeoTiffStore::default();
        let original = labelled_stack();
        store.write(&path, &original).unwrap();

        let read = store.open(&path).unwrap();
        assert_eq!((read.width, read.height, read.bands), (2, 2, 3));
        assert_eq!(read.pixels, original.pixels);
        assert_eq!(read.nodata, Some(-9999.0));
        assert_eq!(read.crs, Some(32632));
        assert_eq!(read.geo_transform, original.geo_transform);
        assert_eq!(read.band_label(0), Some("20180705_x"));
        assert_eq!(read.band_label(2), Some("20180822_x"));
    }

    #[test]
    fn test_roundtrip_nan_nodata_single_band() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mosaic.tif");
        let store = GeoTiffStore::new(GeoTiffCompression::Lzw);
        let raster = RasterDataset::new(
            2,
            1,
            1,
            vec![0.25, f32::NAN],
            GeoTransform::north_up(0.0, 10.0, 1.0, 1.0),
            Some(4326),
        )
        .unwrap()
        .with_nodata(Some(f64::NAN));
        store.write(&path, &raster).unwrap();

        let read = store.open(&path).unwrap();
        assert!(read.nodata.unwrap().is_nan());
        assert_eq!(read.band(0)[0], 0.25);
        assert!(read.band(0)[1].is_nan());
        assert_eq!(read.band_label(0), None);
    }

    /// Int16 GeoTIFF stored band-interleaved (`PlanarConfiguration=2`), as
    /// GDAL writes with `INTERLEAVE=BAND`.
    fn write_band_interleaved(path: &Path, width: u32, planes: &[Vec<i16>], rows_per_strip: u32) {
        use tiff::encoder::TiffEncoder;

        let height = u32::try_from(planes[0].len()).unwrap() / width;
        let bands = planes.len();
        let file = std::fs::File::create(path).unwrap();
        let mut encoder = TiffEncoder::new(std::io::BufWriter::new(file)).unwrap();
        let mut dir = encoder.image_directory().unwrap();
        dir.write_tag(Tag::ImageWidth, width).unwrap();
        dir.write_tag(Tag::ImageLength, height).unwrap();
        dir.write_tag(Tag::BitsPerSample, vec![16u16; bands].as_slice()).unwrap();
        dir.write_tag(Tag::Compression, 1u16).unwrap();
        dir.write_tag(Tag::PhotometricInterpretation, 1u16).unwrap();
        dir.write_tag(Tag::SamplesPerPixel, u16::try_from(bands).unwrap()).unwrap();
        dir.write_tag(Tag::SampleFormat, vec![2u16; bands].as_slice()).unwrap();
        dir.write_tag(Tag::PlanarConfiguration, 2u16).unwrap();
        dir.write_tag(Tag::RowsPerStrip, rows_per_strip).unwrap();
        dir.write_tag(tag(GDAL_NODATA), "-9999").unwrap();

        let strip_len = (width * rows_per_strip) as usize;
        let mut offsets = Vec::new();
        let mut counts = Vec::new();
        for plane in planes {
            for strip in plane.chunks(strip_len) {
                offsets.push(u32::try_from(dir.write_data(strip).unwrap()).unwrap());
                counts.push(u32::try_from(strip.len() * 2).unwrap());
            }
        }
        dir.write_tag(Tag::StripOffsets, offsets.as_slice()).unwrap();
        dir.write_tag(Tag::StripByteCounts, counts.as_slice()).unwrap();
        dir.finish().unwrap();
    }

    #[test]
    fn test_open_band_interleaved() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("planar.tif");
        write_band_interleaved(&path, 2, &[vec![1000, 2000], vec![3000, 4000]], 1);

        let read = GeoTiffStore::default().open(&path).unwrap();
        assert_eq!((read.width, read.height, read.bands), (2, 1, 2));
        assert_eq!(read.pixels, vec![1000.0, 2000.0, 3000.0, 4000.0]);
        assert_eq!(read.nodata, Some(-9999.0));
    }

    #[test]
    fn test_open_band_interleaved_multiple_strips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("planar_strips.tif");
        // 2x3 image in strips of two rows; the last strip of each band is short
        let red = vec![1, 2, 3, 4, 5, 6];
        let nir = vec![10, 20, 30, 40, 50, -9999];
        write_band_interleaved(&path, 2, &[red, nir], 2);

        let read = GeoTiffStore::default().open(&path).unwrap();
        assert_eq!((read.width, read.height, read.bands), (2, 3, 2));
        assert_eq!(read.band(0), &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert_eq!(read.band(1), &[10.0, 20.0, 30.0, 40.0, 50.0, -9999.0]);
        assert_eq!(read.value(1, 1, 2), Some(-9999.0));
    }

    #[test]
    fn test_open_missing_file() {
        let err = GeoTiffStore::default()
            .open(Path::new("/nonexistent/raster.tif"))
            .unwrap_err();
        assert!(matches!(err, RasterError::Io { .. }));
    }

    #[test]
    fn test_open_non_tiff() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bogus.tif");
        std::fs::write(&path, b"definitely not a tiff").unwrap();
        assert!(GeoTiffStore::default().open(&path).is_err());
    }

    #[test]
    fn test_epsg_from_geokeys() {
        let keys = [1, 1, 0, 3, 1024, 0, 1, 1, 1025, 0, 1, 1, 3072, 0, 1, 32632];
        assert_eq!(epsg_from_geokeys(&keys), Some(32632));

        let geographic = [1, 1, 0, 2, 1024, 0, 1, 2, 2048, 0, 1, 4326];
        assert_eq!(epsg_from_geokeys(&geographic), Some(4326));

        let user_defined = [1, 1, 0, 1, 3072, 0, 1, USER_DEFINED];
        assert_eq!(epsg_from_geokeys(&user_defined), None);
        assert_eq!(epsg_from_geokeys(&[1, 1]), None);
    }

    #[test]
    fn test_parse_nodata() {
        assert_eq!(parse_nodata("-9999"), Some(-9999.0));
        assert_eq!(parse_nodata("-9999\0"), Some(-9999.0));
        assert!(parse_nodata("nan").unwrap().is_nan());
        assert_eq!(parse_nodata("none"), None);
    }

    #[test]
    fn test_parse_gdal_metadata() {
        let xml = r#"<GDALMetadata>
  <Item name="AREA_OR_POINT">Area</Item>
  <Item name="DESCRIPTION" sample="1" role="description">20180714_LEVEL2_SEN2A_NDV</Item>
  <Item name="DESCRIPTION" sample="0" role="description">20180705_LEVEL2_SEN2B_NDV</Item>
  <Item name="DESCRIPTION" sample="9" role="description">out of range</Item>
</GDALMetadata>"#;
        let labels = parse_band_descriptions(xml, 3).unwrap();
        assert_eq!(labels[0].as_deref(), Some("20180705_LEVEL2_SEN2B_NDV"));
        assert_eq!(labels[1].as_deref(), Some("20180714_LEVEL2_SEN2A_NDV"));
        assert_eq!(labels[2], None);
    }

    #[test]
    fn test_deinterleave() {
        assert_eq!(
            deinterleave(&[1.0, 10.0, 2.0, 20.0, 3.0, 30.0], 2),
            vec![1.0, 2.0, 3.0, 10.0, 20.0, 30.0]
        );
    }
}
