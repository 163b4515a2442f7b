//! Built-in live effects hosted by the native runtime.
//!
//! # Architecture
//!
//! ```text
//! NativeRuntime
//!   └── effects: IndexMap<id, Box<dyn LiveEffect>>
//!         ├── gaussian-blur        {radius}
//!         ├── brightness-contrast  {brightness, contrast}
//!         ├── adjust-hsv           {hue_shift, saturation, value}
//!         ├── pixelate             {size, mode}
//!         └── outline              {size, color, outline_only}
//!
//! go():
//!   params = schema.normalize(params)  -> edit_params()
//!   image  = effect.go(params, ctx, image)   // RGBA in, RGBA out (size may change)
//! ```
//!
//! # Effect Types
//!
//! | Id | Parameters | Description |
//! |----|------------|-------------|
//! | **gaussian-blur** | `radius: 0-200 px` | Separable blur, O(n*r) per pass |
//! | **brightness-contrast** | `brightness: -1..1`, `contrast: -1..1` | Color adjustment |
//! | **adjust-hsv** | `hue_shift: -180..180`, `saturation: 0..2`, `value: 0..2` | HSV color space |
//! | **pixelate** | `size: 1-256 px`, `mode` | Block mosaic |
//! | **outline** | `size: 0.1-200 px`, `color`, `outline_only` | Alpha outline, grows the canvas |
//!
//! Pixel-length params are authored at base dpi and multiplied by
//! `env.dpi / env.baseDpi` at execution time.
//!
//! # Adding New Effects
//!
//! 1. Create a schema constant (e.g. `MY_EFFECT_SCHEMA`) in the effect file
//! 2. Implement [`LiveEffect`] for a unit struct
//! 3. Add it to [`builtin_effects`]

pub mod blur;
pub mod brightness;
pub mod hsv;
pub mod outline;
pub mod pixelate;
pub mod schema;

use std::rc::Rc;

use serde_json::{Map, Value};

use crate::core::image::ImageBuffer;
use crate::runtime::{EffectVersion, LiveEffectEnv};
use crate::ui::tree::{DataType, Direction, NodeKind, Rgba, SelectOption, UiEvent, UiNode};
use schema::{ParamDef, ParamSchema, ParamType};

pub type Params = Map<String, Value>;

/// Event handler attached to a rendered node
pub type Handler = Rc<dyn Fn(&mut Params, &UiEvent)>;

/// Marker prefix for handler-bearing nodes before ids are assigned
pub const HANDLER_MARKER: &str = "@handler:";

// ============================================================================
// Contexts
// ============================================================================

/// Collects node handlers while an effect renders its UI.
#[derive(Default)]
pub struct UiContext {
    handlers: Vec<Handler>,
}

impl UiContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach `handler` to `node`; it runs when the node fires an event.
    pub fn on_event(&mut self, mut node: UiNode, handler: impl Fn(&mut Params, &UiEvent) + 'static) -> UiNode {
        node.node_id = format!("{}{}", HANDLER_MARKER, self.handlers.len());
        self.handlers.push(Rc::new(handler));
        node
    }

    pub fn button(&mut self, text: &str, handler: impl Fn(&mut Params, &UiEvent) + 'static) -> UiNode {
        self.on_event(UiNode::new(NodeKind::Button { text: text.to_string() }), handler)
    }

    /// Handler registered under a marker id
    pub fn handler(&self, marker: &str) -> Option<Handler> {
        let idx: usize = marker.strip_prefix(HANDLER_MARKER)?.parse().ok()?;
        self.handlers.get(idx).cloned()
    }

    // Schema-driven widgets

    pub fn slider(&self, def: &ParamDef, params: &Params) -> UiNode {
        let value = params.get(def.name).and_then(Value::as_f64).unwrap_or(0.0);
        let (min, max, data_type) = range_of(def);
        UiNode::new(NodeKind::Slider { value, min, max, data_type, key: Some(def.name.to_string()) })
    }

    pub fn number(&self, def: &ParamDef, params: &Params) -> UiNode {
        let value = params.get(def.name).and_then(Value::as_f64).unwrap_or(0.0);
        let (min, max, data_type) = range_of(def);
        let step = match data_type {
            DataType::Int => 1.0,
            DataType::Float => 0.1,
        };
        UiNode::new(NodeKind::NumberInput {
            value,
            data_type,
            min: Some(min),
            max: Some(max),
            step: Some(step),
            key: Some(def.name.to_string()),
        })
    }

    pub fn checkbox(&self, def: &ParamDef, label: &str, params: &Params) -> UiNode {
        let value = params.get(def.name).and_then(Value::as_bool).unwrap_or(false);
        UiNode::new(NodeKind::Checkbox { value, label: label.to_string(), key: Some(def.name.to_string()) })
    }

    pub fn color(&self, def: &ParamDef, params: &Params) -> UiNode {
        let value = params.get(def.name).and_then(schema::color_of).unwrap_or_default();
        UiNode::new(NodeKind::ColorInput { value, key: Some(def.name.to_string()) })
    }

    pub fn select(&self, def: &ParamDef, labels: &[&str], params: &Params) -> UiNode {
        let ParamType::Choice { options, .. } = def.ty else {
            return UiNode::text(def.name);
        };
        let current = params.get(def.name).and_then(Value::as_str).unwrap_or("");
        let selected_index = options.iter().position(|o| *o == current).map_or(-1, |i| i as i64);
        let options = options
            .iter()
            .enumerate()
            .map(|(i, o)| SelectOption {
                value: o.to_string(),
                label: labels.get(i).copied().unwrap_or(o).to_string(),
            })
            .collect();
        UiNode::new(NodeKind::Select { options, selected_index, key: Some(def.name.to_string()) })
    }

    /// `label | slider | number` row for a numeric param
    pub fn numeric_row(&self, label: &str, def: &ParamDef, params: &Params) -> UiNode {
        UiNode::group(
            Direction::Row,
            vec![UiNode::text(label), self.slider(def, params), self.number(def, params)],
        )
    }
}

fn range_of(def: &ParamDef) -> (f64, f64, DataType) {
    match def.ty {
        ParamType::Real { min, max, .. } => (min, max, DataType::Float),
        ParamType::Int { min, max, .. } => (min as f64, max as f64, DataType::Int),
        _ => (0.0, 1.0, DataType::Float),
    }
}

/// Execution context for [`LiveEffect::go`].
pub struct GoContext<'a> {
    pub env: &'a LiveEffectEnv,
    alerts: &'a mut Vec<String>,
}

impl<'a> GoContext<'a> {
    pub fn new(env: &'a LiveEffectEnv, alerts: &'a mut Vec<String>) -> Self {
        Self { env, alerts }
    }

    /// Pixel length authored at base dpi, in device pixels.
    pub fn px(&self, authored: f64) -> f64 {
        authored * self.env.dpi_scale()
    }

    /// Queue a message for the host alert dialog.
    pub fn alert(&mut self, msg: impl Into<String>) {
        self.alerts.push(msg.into());
    }
}

// ============================================================================
// Effect trait
// ============================================================================

/// A built-in effect.
///
/// Only `id`, `title`, `schema`, `render_ui` and `go` are required; the
/// param operations default to schema-driven behavior.
pub trait LiveEffect {
    fn id(&self) -> &'static str;
    fn title(&self) -> &'static str;

    fn version(&self) -> EffectVersion {
        EffectVersion { major: 1, minor: 0 }
    }

    fn schema(&self) -> &'static ParamSchema;

    /// Extra validation after schema coercion. Must be idempotent.
    fn edit_params(&self, params: Params) -> Params {
        params
    }

    fn render_ui(&self, params: &Params, ui: &mut UiContext) -> UiNode;

    /// Process an RGBA image. The result may have a different size.
    fn go(&self, params: &Params, ctx: &mut GoContext<'_>, input: ImageBuffer) -> Result<ImageBuffer, String>;

    /// None means "nothing to scale".
    fn scale_params(&self, params: &Params, factor: f64) -> Option<Params> {
        self.schema().scale(params, factor)
    }

    fn interpolate(&self, a: &Params, b: &Params, t: f64) -> Params {
        self.schema().interpolate(a, b, t)
    }

    fn adjust_colors(&self, params: &Params, adjust: &mut dyn FnMut(Rgba) -> Rgba) -> Params {
        self.schema().adjust_colors(params, adjust)
    }
}

/// Every built-in effect, in menu order.
pub fn builtin_effects() -> Vec<Box<dyn LiveEffect>> {
    vec![
        Box::new(blur::GaussianBlur),
        Box::new(brightness::BrightnessContrast),
        Box::new(hsv::AdjustHsv),
        Box::new(pixelate::Pixelate),
        Box::new(outline::Outline),
    ]
}

/// Run `f` over every row of a packed RGBA buffer, in parallel.
pub(crate) fn par_rows(data: &mut [u8], width: u32, f: impl Fn(usize, &mut [u8]) + Sync + Send) {
    use rayon::prelude::*;
    data.par_chunks_mut(width as usize * 4).enumerate().for_each(|(y, row)| f(y, row));
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builtin_ids_unique() {
        let effects = builtin_effects();
        let mut ids: Vec<_> = effects.iter().map(|e| e.id()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), effects.len());
    }

    #[test]
    fn test_ui_context_handler_lookup() {
        let mut ui = UiContext::new();
        let node = ui.button("Reset", |p, _| {
            p.insert("x".into(), json!(1));
        });
        let handler = ui.handler(&node.node_id).unwrap();
        let mut params = Params::new();
        handler(&mut params, &UiEvent::click("n"));
        assert_eq!(params["x"], json!(1));
        assert!(ui.handler("nope").is_none());
    }
}
