//! Georeferencing primitives: affine transforms, bounding boxes and projections.

pub mod projection;

/// GDAL-style affine geotransform.
///
/// Coefficients follow the GDAL ordering:
/// `[origin_x, pixel_width, row_rotation, origin_y, col_rotation, pixel_height]`,
/// so that world `x = c[0] + col * c[1] + row * c[2]` and
/// `y = c[3] + col * c[4] + row * c[5]`. For north-up rasters `c[5]` is negative.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoTransform {
    pub coefficients: [f64; 6],
}

impl Default for GeoTransform {
    /// Identity transform: world coordinates equal pixel coordinates.
    fn default() -> Self {
        Self {
            coefficients: [0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
        }
    }
}

impl GeoTransform {
    #[must_use]
    pub fn new(coefficients: [f64; 6]) -> Self {
        Self { coefficients }
    }

    /// North-up transform from an upper-left origin and a positive pixel size.
    #[must_use]
    pub fn north_up(origin_x: f64, origin_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self::new([origin_x, pixel_width, 0.0, origin_y, 0.0, -pixel_height.abs()])
    }

    /// Build from the GeoTIFF `ModelTiepoint` + `ModelPixelScale` pair.
    ///
    /// Tiepoint `(i, j, k, x, y, z)` ties raster cell `(i, j)` to world `(x, y)`.
    #[must_use]
    pub fn from_tiepoint_scale(tiepoint: &[f64], scale: &[f64]) -> Option<Self> {
        if tiepoint.len() < 6 || scale.len() < 2 {
            return None;
        }
        let (i, j, x, y) = (tiepoint[0], tiepoint[1], tiepoint[3], tiepoint[4]);
        let (sx, sy) = (scale[0], scale[1]);
        Some(Self::new([x - i * sx, sx, 0.0, y + j * sy, 0.0, -sy]))
    }

    /// Build from the 4x4 row-major GeoTIFF `ModelTransformation` matrix.
    #[must_use]
    pub fn from_model_transformation(matrix: &[f64]) -> Option<Self> {
        if matrix.len() < 8 {
            return None;
        }
        Some(Self::new([
            matrix[3], matrix[0], matrix[1], matrix[7], matrix[4], matrix[5],
        ]))
    }

    #[inline]
    #[must_use]
    pub fn origin(&self) -> (f64, f64) {
        (self.coefficients[0], self.coefficients[3])
    }

    /// Absolute pixel size `(width, height)` in world units.
    #[inline]
    #[must_use]
    pub fn pixel_size(&self) -> (f64, f64) {
        (self.coefficients[1].abs(), self.coefficients[5].abs())
    }

    #[inline]
    #[must_use]
    pub fn is_north_up(&self) -> bool {
        self.coefficients[2] == 0.0 && self.coefficients[4] == 0.0 && self.coefficients[5] < 0.0
    }

    /// World coordinate of the upper-left corner of pixel `(col, row)`.
    #[inline]
    #[must_use]
    pub fn pixel_to_world(&self, col: f64, row: f64) -> (f64, f64) {
        let c = &self.coefficients;
        (
            c[0] + col * c[1] + row * c[2],
            c[3] + col * c[4] + row * c[5],
        )
    }

    /// Fractional pixel coordinate `(col, row)` of a world coordinate.
    ///
    /// Returns `None` when the transform is degenerate.
    #[must_use]
    pub fn world_to_pixel(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        let c = &self.coefficients;
        let det = c[1] * c[5] - c[2] * c[4];
        if det == 0.0 || !det.is_finite() {
            return None;
        }
        let dx = x - c[0];
        let dy = y - c[3];
        let col = (c[5] * dx - c[2] * dy) / det;
        let row = (c[1] * dy - c[4] * dx) / det;
        Some((col, row))
    }
}

/// Bounding box in a coordinate reference system
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub minx: f64,
    pub miny: f64,
    pub maxx: f64,
    pub maxy: f64,
}

impl BoundingBox {
    #[must_use]
    pub fn new(minx: f64, miny: f64, maxx: f64, maxy: f64) -> Self {
        Self { minx, miny, maxx, maxy }
    }

    /// Smallest box covering both `self` and `other`.
    #[must_use]
    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox::new(
            self.minx.min(other.minx),
            self.miny.min(other.miny),
            self.maxx.max(other.maxx),
            self.maxy.max(other.maxy),
        )
    }

    #[inline]
    #[must_use]
    pub fn width(&self) -> f64 {
        self.maxx - self.minx
    }

    #[inline]
    #[must_use]
    pub fn height(&self) -> f64 {
        self.maxy - self.miny
    }

    #[must_use]
    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.minx && x < self.maxx && y > self.miny && y <= self.maxy
    }
}
