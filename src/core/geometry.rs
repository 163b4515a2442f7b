//! Raster placement math: matrices, bounds, DPI derivation and recentering.
//!
//! Host matrices are 2D affine `[a b c d tx ty]` mapping raster pixels to
//! artboard points. Uses glam::DAffine2 for the actual math.
//!
//! ```text
//! artboard = (a*x + c*y + tx, b*x + d*y + ty)
//! ```

use glam::{DAffine2, DMat2, DVec2};
use serde::{Deserialize, Serialize};

/// Host 2D affine matrix
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RealMatrix {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub tx: f64,
    pub ty: f64,
}

impl Default for RealMatrix {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl RealMatrix {
    pub const IDENTITY: RealMatrix = RealMatrix { a: 1.0, b: 0.0, c: 0.0, d: 1.0, tx: 0.0, ty: 0.0 };

    /// Uniform scale + translation
    pub fn scale_translate(scale: f64, tx: f64, ty: f64) -> Self {
        Self { a: scale, b: 0.0, c: 0.0, d: scale, tx, ty }
    }

    pub fn to_affine(&self) -> DAffine2 {
        DAffine2::from_mat2_translation(
            DMat2::from_cols_array(&[self.a, self.b, self.c, self.d]),
            DVec2::new(self.tx, self.ty),
        )
    }

    pub fn from_affine(m: DAffine2) -> Self {
        let cols = m.matrix2.to_cols_array();
        Self { a: cols[0], b: cols[1], c: cols[2], d: cols[3], tx: m.translation.x, ty: m.translation.y }
    }

    pub fn transform_point(&self, p: DVec2) -> DVec2 {
        self.to_affine().transform_point2(p)
    }

    pub fn translation(&self) -> DVec2 {
        DVec2::new(self.tx, self.ty)
    }
}

/// Artboard-space rectangle in points
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RealRect {
    pub left: f64,
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
}

impl RealRect {
    pub fn new(left: f64, top: f64, right: f64, bottom: f64) -> Self {
        Self { left, top, right, bottom }
    }

    pub fn width(&self) -> f64 {
        (self.right - self.left).abs()
    }

    pub fn height(&self) -> f64 {
        (self.bottom - self.top).abs()
    }

    pub fn center(&self) -> DVec2 {
        DVec2::new((self.left + self.right) * 0.5, (self.top + self.bottom) * 0.5)
    }

    /// Every edge multiplied by `factor` (probe bounds).
    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            left: self.left * factor,
            top: self.top * factor,
            right: self.right * factor,
            bottom: self.bottom * factor,
        }
    }

    /// Bounding box of the image of a `width x height` pixel grid under `m`.
    pub fn from_pixel_grid(m: &RealMatrix, width: i32, height: i32) -> Self {
        let corners = [
            m.transform_point(DVec2::ZERO),
            m.transform_point(DVec2::new(width as f64, 0.0)),
            m.transform_point(DVec2::new(0.0, height as f64)),
            m.transform_point(DVec2::new(width as f64, height as f64)),
        ];
        let min = corners.iter().fold(DVec2::splat(f64::INFINITY), |acc, p| acc.min(*p));
        let max = corners.iter().fold(DVec2::splat(f64::NEG_INFINITY), |acc, p| acc.max(*p));
        Self { left: min.x, top: min.y, right: max.x, bottom: max.y }
    }
}

/// Integer pixel rectangle (raster bounds)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IntRect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl IntRect {
    pub fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self { left, top, right, bottom }
    }

    /// Origin-anchored `(0, 0, width, height)`
    pub fn sized(width: u32, height: u32) -> Self {
        Self { left: 0, top: 0, right: width as i32, bottom: height as i32 }
    }

    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }
}

// ============================================================================
// Reconciliation math
// ============================================================================

/// True device resolution from a probe rasterization.
///
/// The probe is rasterized at `base_dpi`; the host's effective resolution shows
/// up as the matrix scale: `dpi = base_dpi / a`. Returns None for a degenerate
/// matrix.
pub fn derive_dpi(base_dpi: f64, probe: &RealMatrix) -> Option<f64> {
    let dpi = base_dpi / probe.a;
    if probe.a > 0.0 && dpi.is_finite() {
        Some(dpi)
    } else {
        None
    }
}

/// Artboard points per pixel on each axis, from the original raster.
pub fn expanded_ratio(art_bounds: &RealRect, pixel_bounds: &IntRect) -> DVec2 {
    let w = pixel_bounds.width().max(1) as f64;
    let h = pixel_bounds.height().max(1) as f64;
    DVec2::new(art_bounds.width() / w, art_bounds.height() / h)
}

/// Matrix for a resized result that stays centered on the source artwork.
///
/// Scale comes from `source`; translation moves back by half the size change,
/// converted to artboard units with `ratio`.
pub fn recenter(source: &RealMatrix, width_diff: i64, height_diff: i64, ratio: DVec2) -> RealMatrix {
    let shift = DVec2::new(width_diff as f64 / 2.0, height_diff as f64 / 2.0) * ratio;
    let mut m = *source;
    m.tx -= shift.x;
    m.ty -= shift.y;
    m
}
