//! Brightness/Contrast effect implementation.
//!
//! `output = (input - 0.5) * (1 + contrast) + 0.5 + brightness`
//!
//! # Parameters
//!
//! - `brightness`: -1.0 (black) to 1.0 (white), 0.0 = no change
//! - `contrast`: -1.0 (flat gray) to 1.0 (high contrast), 0.0 = no change
//!
//! Alpha is left untouched.

use super::schema::{ParamDef, ParamSchema};
use super::{GoContext, LiveEffect, Params, UiContext, par_rows};
use crate::core::image::ImageBuffer;
use crate::ui::tree::{Direction, UiNode};

const BC_DEFS: &[ParamDef] = &[
    ParamDef::real("brightness", -1.0, 1.0, 0.0, 0),
    ParamDef::real("contrast", -1.0, 1.0, 0.0, 0),
];

pub static BRIGHTNESS_CONTRAST_SCHEMA: ParamSchema = ParamSchema::new("brightness-contrast", BC_DEFS);

pub struct BrightnessContrast;

impl LiveEffect for BrightnessContrast {
    fn id(&self) -> &'static str {
        "brightness-contrast"
    }

    fn title(&self) -> &'static str {
        "Brightness/Contrast"
    }

    fn schema(&self) -> &'static ParamSchema {
        &BRIGHTNESS_CONTRAST_SCHEMA
    }

    fn render_ui(&self, params: &Params, ui: &mut UiContext) -> UiNode {
        UiNode::group(
            Direction::Col,
            vec![
                ui.numeric_row("Brightness", &BC_DEFS[0], params),
                ui.numeric_row("Contrast", &BC_DEFS[1], params),
            ],
        )
    }

    fn go(&self, params: &Params, _ctx: &mut GoContext<'_>, input: ImageBuffer) -> Result<ImageBuffer, String> {
        let brightness = BRIGHTNESS_CONTRAST_SCHEMA.real(params, "brightness") as f32;
        let contrast = BRIGHTNESS_CONTRAST_SCHEMA.real(params, "contrast") as f32;
        Ok(apply(input, brightness, contrast))
    }
}

pub fn apply(mut image: ImageBuffer, brightness: f32, contrast: f32) -> ImageBuffer {
    // No adjustment needed
    if brightness.abs() < 0.0001 && contrast.abs() < 0.0001 {
        return image;
    }

    // Contrast factor: 1.0 = no change, 0.0 = flat, 2.0 = double contrast
    let cf = 1.0 + contrast;
    let adjust = |v: u8| {
        let v = v as f32 / 255.0;
        (((v - 0.5) * cf + 0.5 + brightness).clamp(0.0, 1.0) * 255.0).round() as u8
    };

    let width = image.width();
    par_rows(image.data_mut(), width, |_, row| {
        for px in row.chunks_exact_mut(4) {
            px[0] = adjust(px[0]);
            px[1] = adjust(px[1]);
            px[2] = adjust(px[2]);
        }
    });
    image
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_change() {
        let img = ImageBuffer::filled(2, 2, [12, 34, 56, 78]).unwrap();
        assert_eq!(apply(img.clone(), 0.0, 0.0), img);
    }

    #[test]
    fn test_brightness_increase() {
        let img = ImageBuffer::filled(2, 2, [128, 128, 128, 255]).unwrap();
        let out = apply(img, 0.5, 0.0);
        // Mid-gray + 0.5 brightness should be ~white, alpha unchanged
        assert!(out.pixel(0, 0)[0] > 200);
        assert_eq!(out.pixel(1, 1)[3], 255);
    }

    #[test]
    fn test_flat_contrast() {
        let img = ImageBuffer::filled(1, 1, [10, 240, 128, 255]).unwrap();
        let out = apply(img, 0.0, -1.0);
        assert_eq!(out.pixel(0, 0), &[128, 128, 128, 255]);
    }
}
