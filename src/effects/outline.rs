//! Outline effect: strokes the alpha silhouette and grows the canvas.
//!
//! The output is `size` device pixels larger on every side, so the host has
//! to place a new, recentered raster. Distance to the silhouette comes from
//! an exact Euclidean distance transform (Felzenszwalb-Huttenlocher, two
//! separable 1D passes).

use super::schema::{FLAG_PIXELS, ParamDef, ParamSchema, ParamType};
use super::{GoContext, LiveEffect, Params, UiContext, par_rows};
use crate::core::image::ImageBuffer;
use crate::ui::tree::{Direction, UiNode};

const OUTLINE_DEFS: &[ParamDef] = &[
    ParamDef::real("size", 0.1, 200.0, 3.0, FLAG_PIXELS),
    ParamDef::new("color", ParamType::Color { default: [0.0, 0.0, 0.0, 1.0] }, 0),
    ParamDef::new("outline_only", ParamType::Bool { default: false }, 0),
];

pub static OUTLINE_SCHEMA: ParamSchema = ParamSchema::new("outline", OUTLINE_DEFS);

/// Alpha at or above this counts as inside the silhouette
const OPAQUE: u8 = 128;
const FAR: f64 = 1e20;

pub struct Outline;

impl LiveEffect for Outline {
    fn id(&self) -> &'static str {
        "outline"
    }

    fn title(&self) -> &'static str {
        "Outline"
    }

    fn schema(&self) -> &'static ParamSchema {
        &OUTLINE_SCHEMA
    }

    fn render_ui(&self, params: &Params, ui: &mut UiContext) -> UiNode {
        UiNode::group(
            Direction::Col,
            vec![
                ui.numeric_row("Size", &OUTLINE_DEFS[0], params),
                UiNode::group(Direction::Row, vec![UiNode::text("Color"), ui.color(&OUTLINE_DEFS[1], params)]),
                ui.checkbox(&OUTLINE_DEFS[2], "Outline only", params),
            ],
        )
    }

    fn go(&self, params: &Params, ctx: &mut GoContext<'_>, input: ImageBuffer) -> Result<ImageBuffer, String> {
        let size = ctx.px(OUTLINE_SCHEMA.real(params, "size")).max(0.0);
        let color = OUTLINE_SCHEMA.color(params, "color").to_u8();
        let outline_only = OUTLINE_SCHEMA.bool(params, "outline_only");
        apply(&input, size, color, outline_only).map_err(|e| e.to_string())
    }
}

/// Stroke `input` with a `size` pixel outline. Output grows by `ceil(size)`
/// on each side.
pub fn apply(
    input: &ImageBuffer,
    size: f64,
    color: [u8; 4],
    outline_only: bool,
) -> Result<ImageBuffer, crate::core::image::ImageError> {
    let pad = size.ceil() as u32;
    let (w, h) = input.resolution();
    let (ow, oh) = (w + 2 * pad, h + 2 * pad);
    let mut out = ImageBuffer::filled(ow, oh, [0, 0, 0, 0])?;

    let source = |x: u32, y: u32| -> [u8; 4] {
        if x < pad || y < pad || x >= pad + w || y >= pad + h {
            return [0, 0, 0, 0];
        }
        let px = input.pixel(x - pad, y - pad);
        [px[0], px[1], px[2], px[3]]
    };

    let mut dist2: Vec<f64> = Vec::with_capacity((ow * oh) as usize);
    for y in 0..oh {
        for x in 0..ow {
            dist2.push(if source(x, y)[3] >= OPAQUE { 0.0 } else { FAR });
        }
    }
    distance_transform(&mut dist2, ow as usize, oh as usize);

    par_rows(out.data_mut(), ow, |y, row| {
        for (x, px) in row.chunks_exact_mut(4).enumerate() {
            let src = source(x as u32, y as u32);
            let d = dist2[y * ow as usize + x].sqrt();
            let coverage = if d == 0.0 { 0.0 } else { (size + 0.5 - d).clamp(0.0, 1.0) };
            let stroke = [color[0], color[1], color[2], (color[3] as f64 * coverage).round() as u8];
            let result = if outline_only { stroke } else { over(src, stroke) };
            px.copy_from_slice(&result);
        }
    });
    Ok(out)
}

/// Straight-alpha `top` over `bottom`
fn over(top: [u8; 4], bottom: [u8; 4]) -> [u8; 4] {
    let ta = top[3] as f64 / 255.0;
    let ba = bottom[3] as f64 / 255.0;
    let a = ta + ba * (1.0 - ta);
    if a <= 0.0 {
        return [0, 0, 0, 0];
    }
    let mix = |t: u8, b: u8| ((t as f64 * ta + b as f64 * ba * (1.0 - ta)) / a).round() as u8;
    [mix(top[0], bottom[0]), mix(top[1], bottom[1]), mix(top[2], bottom[2]), (a * 255.0).round() as u8]
}

/// In-place squared EDT over a `width x height` grid of seeds (0) and FAR.
fn distance_transform(grid: &mut [f64], width: usize, height: usize) {
    let n = width.max(height);
    let mut f = vec![0.0; n];
    let mut d = vec![0.0; n];
    let mut v = vec![0usize; n];
    let mut z = vec![0.0; n + 1];

    for x in 0..width {
        for y in 0..height {
            f[y] = grid[y * width + x];
        }
        edt_1d(&f[..height], &mut d[..height], &mut v, &mut z);
        for y in 0..height {
            grid[y * width + x] = d[y];
        }
    }
    for y in 0..height {
        let row = &mut grid[y * width..(y + 1) * width];
        f[..width].copy_from_slice(row);
        edt_1d(&f[..width], &mut d[..width], &mut v, &mut z);
        row.copy_from_slice(&d[..width]);
    }
}

fn edt_1d(f: &[f64], d: &mut [f64], v: &mut [usize], z: &mut [f64]) {
    let n = f.len();
    if n == 0 {
        return;
    }
    let parabola = |q: usize, p: usize| {
        ((f[q] + (q * q) as f64) - (f[p] + (p * p) as f64)) / (2.0 * q as f64 - 2.0 * p as f64)
    };

    let mut k = 0usize;
    v[0] = 0;
    z[0] = f64::NEG_INFINITY;
    z[1] = f64::INFINITY;
    for q in 1..n {
        let mut s = parabola(q, v[k]);
        while s <= z[k] {
            k -= 1;
            s = parabola(q, v[k]);
        }
        k += 1;
        v[k] = q;
        z[k] = s;
        z[k + 1] = f64::INFINITY;
    }

    k = 0;
    for (q, out) in d.iter_mut().enumerate() {
        while z[k + 1] < q as f64 {
            k += 1;
        }
        let dq = q as f64 - v[k] as f64;
        *out = dq * dq + f[v[k]];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edt_1d() {
        let f = [FAR, FAR, 0.0, FAR, FAR, FAR];
        let mut d = [0.0; 6];
        let mut v = [0usize; 6];
        let mut z = [0.0; 7];
        edt_1d(&f, &mut d, &mut v, &mut z);
        assert_eq!(d, [4.0, 1.0, 0.0, 1.0, 4.0, 9.0]);
    }

    /// Test: Canvas growth and stroke placement
    /// Validates: 4x4 opaque square + size 2 -> 8x8, stroke next to the edge,
    /// corners beyond reach stay clear
    #[test]
    fn test_outline_grows_canvas() {
        let input = ImageBuffer::filled(4, 4, [255, 255, 255, 255]).unwrap();
        let out = apply(&input, 2.0, [255, 0, 0, 255], false).unwrap();
        assert_eq!(out.resolution(), (8, 8));
        assert_eq!(out.pixel(3, 3), &[255, 255, 255, 255]);
        assert_eq!(out.pixel(1, 3), &[255, 0, 0, 255]);
        assert_eq!(out.pixel(0, 0)[3], 0);
    }

    #[test]
    fn test_outline_only_drops_fill() {
        let input = ImageBuffer::filled(2, 2, [255, 255, 255, 255]).unwrap();
        let out = apply(&input, 1.0, [0, 0, 0, 255], true).unwrap();
        assert_eq!(out.resolution(), (4, 4));
        assert_eq!(out.pixel(1, 1)[3], 0);
        assert_eq!(out.pixel(0, 1), &[0, 0, 0, 255]);
    }
}
