//! Pixelate (block mosaic) effect.
//!
//! The image is cut into `size x size` device-pixel blocks anchored at the
//! top-left corner. Each block becomes one color:
//!
//! - `average`: alpha-weighted mean of the block
//! - `center`: the block's center sample

use serde_json::json;

use super::schema::{FLAG_PIXELS, FLAG_STEP, ParamDef, ParamSchema, ParamType};
use super::{GoContext, LiveEffect, Params, UiContext};
use crate::core::image::ImageBuffer;
use crate::ui::tree::{Direction, UiNode};

const PIXELATE_DEFS: &[ParamDef] = &[
    ParamDef::int("size", 1, 256, 8, FLAG_PIXELS),
    ParamDef::new("mode", ParamType::Choice { options: &["average", "center"], default: "average" }, FLAG_STEP),
];

pub static PIXELATE_SCHEMA: ParamSchema = ParamSchema::new("pixelate", PIXELATE_DEFS);

pub struct Pixelate;

fn resize_block(p: &mut Params, factor: f64) {
    let size = p.get("size").and_then(|v| v.as_f64()).unwrap_or(8.0);
    p.insert("size".into(), json!((size * factor).round().max(1.0)));
}

impl LiveEffect for Pixelate {
    fn id(&self) -> &'static str {
        "pixelate"
    }

    fn title(&self) -> &'static str {
        "Pixelate"
    }

    fn schema(&self) -> &'static ParamSchema {
        &PIXELATE_SCHEMA
    }

    fn render_ui(&self, params: &Params, ui: &mut UiContext) -> UiNode {
        let size_row = ui.numeric_row("Block size", &PIXELATE_DEFS[0], params);
        let mode_row = UiNode::group(
            Direction::Row,
            vec![UiNode::text("Mode"), ui.select(&PIXELATE_DEFS[1], &["Average", "Center sample"], params)],
        );
        let buttons = UiNode::group(
            Direction::Row,
            vec![
                ui.button("Half", |p, _| resize_block(p, 0.5)),
                ui.button("Double", |p, _| resize_block(p, 2.0)),
            ],
        );
        UiNode::group(Direction::Col, vec![size_row, mode_row, buttons])
    }

    fn go(&self, params: &Params, ctx: &mut GoContext<'_>, input: ImageBuffer) -> Result<ImageBuffer, String> {
        let block = ctx.px(PIXELATE_SCHEMA.real(params, "size")).round().max(1.0) as u32;
        let center = PIXELATE_SCHEMA.choice(params, "mode") == "center";
        if block > input.width().max(input.height()) {
            ctx.alert(format!(
                "Block size {}px is larger than the artwork ({}x{})",
                block,
                input.width(),
                input.height()
            ));
        }
        Ok(apply(input, block, center))
    }
}

pub fn apply(mut image: ImageBuffer, block: u32, center: bool) -> ImageBuffer {
    if block <= 1 {
        return image;
    }
    let (w, h) = (image.width() as usize, image.height() as usize);
    let b = block as usize;

    for by in (0..h).step_by(b) {
        for bx in (0..w).step_by(b) {
            let (x1, y1) = ((bx + b).min(w), (by + b).min(h));
            let color = if center {
                let px = image.pixel(((bx + x1) / 2) as u32, ((by + y1) / 2) as u32);
                [px[0], px[1], px[2], px[3]]
            } else {
                block_average(&image, bx, by, x1, y1)
            };

            let data = image.data_mut();
            for y in by..y1 {
                for x in bx..x1 {
                    let i = (y * w + x) * 4;
                    data[i..i + 4].copy_from_slice(&color);
                }
            }
        }
    }
    image
}

fn block_average(image: &ImageBuffer, x0: usize, y0: usize, x1: usize, y1: usize) -> [u8; 4] {
    let mut acc = [0u64; 4];
    let mut n = 0u64;
    for y in y0..y1 {
        for x in x0..x1 {
            let px = image.pixel(x as u32, y as u32);
            let a = px[3] as u64;
            acc[0] += px[0] as u64 * a;
            acc[1] += px[1] as u64 * a;
            acc[2] += px[2] as u64 * a;
            acc[3] += a;
            n += 1;
        }
    }
    if acc[3] == 0 {
        return [0, 0, 0, 0];
    }
    [
        (acc[0] / acc[3]) as u8,
        (acc[1] / acc[3]) as u8,
        (acc[2] / acc[3]) as u8,
        (acc[3] / n.max(1)) as u8,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::LiveEffectEnv;

    #[test]
    fn test_block_average() {
        // 2x1: red and blue, both opaque -> purple
        let img = ImageBuffer::rgba(2, 1, vec![255, 0, 0, 255, 0, 0, 255, 255]).unwrap();
        let out = apply(img, 2, false);
        assert_eq!(out.pixel(0, 0), &[127, 0, 127, 255]);
        assert_eq!(out.pixel(1, 0), out.pixel(0, 0));
    }

    #[test]
    fn test_transparent_block_stays_clear() {
        let img = ImageBuffer::filled(4, 4, [50, 60, 70, 0]).unwrap();
        let out = apply(img, 4, false);
        assert_eq!(out.pixel(3, 3), &[0, 0, 0, 0]);
    }

    #[test]
    fn test_oversized_block_alerts() {
        let env = LiveEffectEnv { dpi: 72.0, base_dpi: 72.0, is_in_preview: false };
        let mut alerts = Vec::new();
        let params = PIXELATE_SCHEMA.normalize(&json!({"size": 64}));
        let img = ImageBuffer::filled(8, 8, [1, 2, 3, 255]).unwrap();
        let out = Pixelate.go(&params, &mut GoContext::new(&env, &mut alerts), img).unwrap();
        assert_eq!(out.resolution(), (8, 8));
        assert_eq!(alerts.len(), 1);
    }
}
