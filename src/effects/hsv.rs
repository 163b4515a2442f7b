//! HSV (Hue, Saturation, Value) adjustment effect.
//!
//! # Parameters
//!
//! - `hue_shift`: -180 to 180 degrees rotation on color wheel
//! - `saturation`: 0.0 (grayscale) to 2.0 (oversaturated), 1.0 = no change
//! - `value`: 0.0 (black) to 2.0 (overbright), 1.0 = no change
//!
//! # Algorithm
//!
//! 1. Convert each pixel RGB -> HSV
//! 2. H += hue_shift (wrap around 0-360)
//! 3. S *= saturation (clamp 0-1)
//! 4. V *= value (clamp 0-1)
//! 5. Convert HSV -> RGB

use super::schema::{ParamDef, ParamSchema};
use super::{GoContext, LiveEffect, Params, UiContext, par_rows};
use crate::core::image::ImageBuffer;
use crate::ui::tree::{Direction, UiNode};

const HSV_DEFS: &[ParamDef] = &[
    ParamDef::real("hue_shift", -180.0, 180.0, 0.0, 0),
    ParamDef::real("saturation", 0.0, 2.0, 1.0, 0),
    ParamDef::real("value", 0.0, 2.0, 1.0, 0),
];

pub static HSV_ADJUST_SCHEMA: ParamSchema = ParamSchema::new("adjust-hsv", HSV_DEFS);

pub struct AdjustHsv;

impl LiveEffect for AdjustHsv {
    fn id(&self) -> &'static str {
        "adjust-hsv"
    }

    fn title(&self) -> &'static str {
        "Adjust HSV"
    }

    fn schema(&self) -> &'static ParamSchema {
        &HSV_ADJUST_SCHEMA
    }

    fn render_ui(&self, params: &Params, ui: &mut UiContext) -> UiNode {
        let mut rows: Vec<UiNode> = ["Hue", "Saturation", "Value"]
            .iter()
            .zip(HSV_DEFS)
            .map(|(label, def)| ui.numeric_row(label, def, params))
            .collect();

        // Quick complementary flip
        rows.push(ui.button("Complement", |p, _| {
            let h = p.get("hue_shift").and_then(|v| v.as_f64()).unwrap_or(0.0);
            let flipped = if h > 0.0 { h - 180.0 } else { h + 180.0 };
            p.insert("hue_shift".into(), serde_json::json!(flipped));
        }));
        UiNode::group(Direction::Col, rows)
    }

    fn go(&self, params: &Params, _ctx: &mut GoContext<'_>, input: ImageBuffer) -> Result<ImageBuffer, String> {
        let hue_shift = HSV_ADJUST_SCHEMA.real(params, "hue_shift") as f32;
        let saturation = HSV_ADJUST_SCHEMA.real(params, "saturation") as f32;
        let value = HSV_ADJUST_SCHEMA.real(params, "value") as f32;
        Ok(apply(input, hue_shift, saturation, value))
    }
}

pub fn apply(mut image: ImageBuffer, hue_shift: f32, saturation: f32, value: f32) -> ImageBuffer {
    // No adjustment needed
    if hue_shift.abs() < 0.01 && (saturation - 1.0).abs() < 0.001 && (value - 1.0).abs() < 0.001 {
        return image;
    }

    let width = image.width();
    par_rows(image.data_mut(), width, |_, row| {
        for px in row.chunks_exact_mut(4) {
            let (h, s, v) = rgb_to_hsv(px[0] as f32 / 255.0, px[1] as f32 / 255.0, px[2] as f32 / 255.0);
            let (r, g, b) = hsv_to_rgb(h + hue_shift, (s * saturation).clamp(0.0, 1.0), (v * value).clamp(0.0, 1.0));
            px[0] = (r.clamp(0.0, 1.0) * 255.0).round() as u8;
            px[1] = (g.clamp(0.0, 1.0) * 255.0).round() as u8;
            px[2] = (b.clamp(0.0, 1.0) * 255.0).round() as u8;
        }
    });
    image
}

/// RGB (0-1) to HSV (H in degrees)
fn rgb_to_hsv(r: f32, g: f32, b: f32) -> (f32, f32, f32) {
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let s = if max > 0.0 { delta / max } else { 0.0 };

    let h = if delta.abs() < 0.0001 {
        0.0 // Achromatic
    } else if (max - r).abs() < 0.0001 {
        60.0 * (((g - b) / delta) % 6.0)
    } else if (max - g).abs() < 0.0001 {
        60.0 * ((b - r) / delta + 2.0)
    } else {
        60.0 * ((r - g) / delta + 4.0)
    };

    let h = if h < 0.0 { h + 360.0 } else { h };
    (h, s, max)
}

fn hsv_to_rgb(h: f32, s: f32, v: f32) -> (f32, f32, f32) {
    if s <= 0.0 {
        return (v, v, v);
    }

    let h = h.rem_euclid(360.0);
    let c = v * s;
    let h_prime = h / 60.0;
    let x = c * (1.0 - ((h_prime % 2.0) - 1.0).abs());
    let m = v - c;

    let (r1, g1, b1) = match h_prime as i32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };

    (r1 + m, g1 + m, b1 + m)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hsv_roundtrip() {
        for (r, g, b) in [(1.0, 0.0, 0.0), (0.2, 0.6, 0.4), (0.5, 0.5, 0.5), (0.1, 0.2, 0.9)] {
            let (h, s, v) = rgb_to_hsv(r, g, b);
            let (r2, g2, b2) = hsv_to_rgb(h, s, v);
            assert!((r - r2).abs() < 1e-4 && (g - g2).abs() < 1e-4 && (b - b2).abs() < 1e-4);
        }
    }

    #[test]
    fn test_hue_rotation_red_to_green() {
        let img = ImageBuffer::filled(1, 1, [255, 0, 0, 255]).unwrap();
        let out = apply(img, 120.0, 1.0, 1.0);
        assert_eq!(out.pixel(0, 0), &[0, 255, 0, 255]);
    }

    #[test]
    fn test_desaturate() {
        let img = ImageBuffer::filled(1, 1, [200, 50, 50, 128]).unwrap();
        let out = apply(img, 0.0, 0.0, 1.0);
        let px = out.pixel(0, 0);
        assert_eq!(px[0], px[1]);
        assert_eq!(px[1], px[2]);
        assert_eq!(px[3], 128);
    }
}
