//! Effect runtime boundary.
//!
//! The effect runtime is an opaque engine: JSON values and owned pixel
//! buffers go in, JSON values and fresh buffers come out. All marshaling to a
//! concrete engine stays inside the adapter, the rest of the crate only sees
//! [`EffectRuntime`].
//!
//! Adapters:
//! - [`native::NativeRuntime`] - built-in effects, in process
//! - [`ffi::ForeignRuntime`] - C ABI function table, optionally from a shared library

pub mod ffi;
pub mod native;

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::image::ImageBuffer;
use crate::ui::tree::Rgba;

/// Effect metadata for registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectDescriptor {
    pub id: String,
    pub title: String,
    pub version: EffectVersion,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EffectVersion {
    pub major: i32,
    pub minor: i32,
}

/// `envJson` passed with every execution.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveEffectEnv {
    pub dpi: f64,
    pub base_dpi: f64,
    pub is_in_preview: bool,
}

impl LiveEffectEnv {
    /// Pixel-size params are authored at `base_dpi`.
    pub fn dpi_scale(&self) -> f64 {
        if self.base_dpi > 0.0 { self.dpi / self.base_dpi } else { 1.0 }
    }
}

/// Runtime-side failure
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeError {
    UnknownEffect(String),
    /// The effect ran and reported failure
    Failed(String),
    /// Payload could not be converted across the boundary
    Marshal(String),
    /// Runtime library could not be loaded or is missing symbols
    Library(String),
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeError::UnknownEffect(id) => write!(f, "effect not found: {}", id),
            RuntimeError::Failed(msg) => write!(f, "{}", msg),
            RuntimeError::Marshal(msg) => write!(f, "marshal error: {}", msg),
            RuntimeError::Library(msg) => write!(f, "runtime library: {}", msg),
        }
    }
}

impl std::error::Error for RuntimeError {}

/// Color mapping callback handed to `adjust_colors`
pub type ColorAdjuster<'a> = dyn FnMut(Rgba) -> Rgba + 'a;

/// Engine-agnostic effect runtime.
///
/// Every call blocks until the engine returns. Calls are never concurrent.
pub trait EffectRuntime {
    /// Adapter name for logs
    fn name(&self) -> &str;

    fn effects(&mut self) -> Result<Vec<EffectDescriptor>, RuntimeError>;

    /// Run the effect. `image` is RGBA; the result must be RGBA too.
    fn go(
        &mut self,
        effect_id: &str,
        params: &Value,
        env: &LiveEffectEnv,
        image: ImageBuffer,
    ) -> Result<ImageBuffer, RuntimeError>;

    /// Validate and clamp params. Must be idempotent.
    fn normalize_params(&mut self, effect_id: &str, params: &Value) -> Result<Value, RuntimeError>;

    /// UI tree JSON for `params`.
    fn render_tree(&mut self, effect_id: &str, params: &Value) -> Result<Value, RuntimeError>;

    /// Returns `{updated:false}` or `{updated:true, params, tree}`.
    fn fire_event(&mut self, effect_id: &str, event: &Value, params: &Value) -> Result<Value, RuntimeError>;

    /// Returns `{hasChanged, params}`.
    fn scale_params(&mut self, effect_id: &str, params: &Value, factor: f64) -> Result<Value, RuntimeError>;

    /// Blend two param sets, `percent` in 0..1.
    fn interpolate_params(
        &mut self,
        effect_id: &str,
        a: &Value,
        b: &Value,
        percent: f64,
    ) -> Result<Value, RuntimeError>;

    /// Returns `{hasChanged, params}`.
    fn adjust_colors(
        &mut self,
        effect_id: &str,
        params: &Value,
        adjust: &mut ColorAdjuster<'_>,
    ) -> Result<Value, RuntimeError>;

    /// Alerts raised by effects since the last drain.
    fn drain_alerts(&mut self) -> Vec<String> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_env_wire_format() {
        let env = LiveEffectEnv { dpi: 300.0, base_dpi: 72.0, is_in_preview: true };
        assert_eq!(
            serde_json::to_value(env).unwrap(),
            json!({"dpi": 300.0, "baseDpi": 72.0, "isInPreview": true})
        );
        assert!((env.dpi_scale() - 300.0 / 72.0).abs() < 1e-12);
    }
}
