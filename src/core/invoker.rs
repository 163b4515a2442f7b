//! Synchronous call boundary to the effect runtime.
//!
//! `EffectInvoker` owns no effect state. Each call hands JSON (and for
//! `invoke`, an owned [`ImageBuffer`]) to the runtime, blocks, and wraps the
//! answer in an [`EffectInvocationResult`]. Runtime errors never escape as
//! panics or `Err`: they become `success == false` results.
//!
//! Callers pick the typed view they need:
//!
//! ```ignore
//! let tree = invoker.render_tree("blur", &params).into_tree("blur")?;
//! let outcome = invoker.fire_event("blur", &event, &params).into_fire_outcome("blur")?;
//! ```

use std::time::Instant;

use log::{debug, warn};
use serde_json::Value;

use super::error::EffectInvocationFailure;
use super::image::{ImageBuffer, RGBA};
use crate::runtime::{ColorAdjuster, EffectDescriptor, EffectRuntime, LiveEffectEnv, RuntimeError};
use crate::ui::tree::{UiEvent, UiNode};

/// Outcome of one runtime call. When `success` is false, `image` and `json`
/// are both absent.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectInvocationResult {
    success: bool,
    error_info: Option<String>,
    image: Option<ImageBuffer>,
    json: Option<Value>,
    marshal: bool,
}

impl EffectInvocationResult {
    pub fn succeeded(json: Option<Value>, image: Option<ImageBuffer>) -> Self {
        Self { success: true, error_info: None, image, json, marshal: false }
    }

    pub fn failed(info: impl Into<String>) -> Self {
        Self { success: false, error_info: Some(info.into()), image: None, json: None, marshal: false }
    }

    fn marshal_failed(info: impl Into<String>) -> Self {
        Self { marshal: true, ..Self::failed(info) }
    }

    fn from_error(err: RuntimeError) -> Self {
        match err {
            RuntimeError::Marshal(_) => Self::marshal_failed(err.to_string()),
            other => Self::failed(other.to_string()),
        }
    }

    pub fn success(&self) -> bool {
        self.success
    }

    pub fn error_info(&self) -> Option<&str> {
        self.error_info.as_deref()
    }

    pub fn image(&self) -> Option<&ImageBuffer> {
        self.image.as_ref()
    }

    pub fn json(&self) -> Option<&Value> {
        self.json.as_ref()
    }

    fn failure(&self, effect_id: &str) -> EffectInvocationFailure {
        let info = self.error_info.clone().unwrap_or_else(|| "unknown error".to_string());
        if self.marshal {
            EffectInvocationFailure::marshal(effect_id, info)
        } else {
            EffectInvocationFailure::runtime(effect_id, info)
        }
    }

    /// Result image, taking ownership.
    pub fn into_image(self, effect_id: &str) -> Result<ImageBuffer, EffectInvocationFailure> {
        if !self.success {
            return Err(self.failure(effect_id));
        }
        self.image
            .ok_or_else(|| EffectInvocationFailure::marshal(effect_id, "result carries no image"))
    }

    pub fn into_json(self, effect_id: &str) -> Result<Value, EffectInvocationFailure> {
        if !self.success {
            return Err(self.failure(effect_id));
        }
        self.json
            .ok_or_else(|| EffectInvocationFailure::marshal(effect_id, "result carries no json"))
    }

    /// Params object (normalize / interpolate results).
    pub fn into_params(self, effect_id: &str) -> Result<Value, EffectInvocationFailure> {
        let json = self.into_json(effect_id)?;
        if !json.is_object() {
            return Err(EffectInvocationFailure::marshal(effect_id, "params result is not an object"));
        }
        Ok(json)
    }

    pub fn into_tree(self, effect_id: &str) -> Result<UiNode, EffectInvocationFailure> {
        let json = self.into_json(effect_id)?;
        serde_json::from_value(json)
            .map_err(|e| EffectInvocationFailure::marshal(effect_id, format!("invalid UI tree: {}", e)))
    }

    pub fn into_fire_outcome(self, effect_id: &str) -> Result<FireEventOutcome, EffectInvocationFailure> {
        let json = self.into_json(effect_id)?;
        FireEventOutcome::from_json(json)
            .map_err(|info| EffectInvocationFailure::marshal(effect_id, info))
    }

    pub fn into_changed_params(self, effect_id: &str) -> Result<ChangedParams, EffectInvocationFailure> {
        let json = self.into_json(effect_id)?;
        serde_json::from_value(json)
            .map_err(|e| EffectInvocationFailure::marshal(effect_id, format!("invalid change result: {}", e)))
    }
}

/// Decoded `fireEvent` answer.
#[derive(Debug, Clone, PartialEq)]
pub enum FireEventOutcome {
    Ignored,
    Updated { params: Value, tree: UiNode },
}

impl FireEventOutcome {
    fn from_json(json: Value) -> Result<Self, String> {
        let updated = json.get("updated").and_then(Value::as_bool).unwrap_or(false);
        if !updated {
            return Ok(FireEventOutcome::Ignored);
        }
        let params = match json.get("params") {
            Some(p @ Value::Object(_)) => p.clone(),
            _ => return Err("updated event result without params object".to_string()),
        };
        let tree = json
            .get("tree")
            .cloned()
            .ok_or_else(|| "updated event result without tree".to_string())
            .and_then(|t| serde_json::from_value(t).map_err(|e| format!("invalid UI tree: {}", e)))?;
        Ok(FireEventOutcome::Updated { params, tree })
    }
}

/// `{hasChanged, params}` answer of scale / adjust-colors.
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangedParams {
    pub has_changed: bool,
    pub params: Value,
}

/// Blocking call boundary over an [`EffectRuntime`].
pub struct EffectInvoker {
    runtime: Box<dyn EffectRuntime>,
}

impl EffectInvoker {
    pub fn new(runtime: Box<dyn EffectRuntime>) -> Self {
        Self { runtime }
    }

    pub fn runtime_name(&self) -> &str {
        self.runtime.name()
    }

    pub fn effects(&mut self) -> Result<Vec<EffectDescriptor>, RuntimeError> {
        self.runtime.effects()
    }

    fn json_call(
        &mut self,
        op: &str,
        effect_id: &str,
        f: impl FnOnce(&mut dyn EffectRuntime) -> Result<Value, RuntimeError>,
    ) -> EffectInvocationResult {
        let start = Instant::now();
        let result = match f(self.runtime.as_mut()) {
            Ok(json) => EffectInvocationResult::succeeded(Some(json), None),
            Err(e) => {
                warn!("{} '{}' failed: {}", op, effect_id, e);
                EffectInvocationResult::from_error(e)
            }
        };
        debug!("{} '{}' took {:.2}ms", op, effect_id, start.elapsed().as_secs_f64() * 1000.0);
        result
    }

    /// Run the effect on `image`. The buffer is consumed; a fresh one
    /// comes back in the result.
    pub fn invoke(
        &mut self,
        effect_id: &str,
        params: &Value,
        env: &LiveEffectEnv,
        image: ImageBuffer,
    ) -> EffectInvocationResult {
        let image = if image.channel_order() == RGBA { image } else { image.to_channel_order(RGBA) };
        let (w, h) = image.resolution();
        debug!("invoke '{}' input {}x{} env {:?}", effect_id, w, h, env);

        let start = Instant::now();
        let result = match self.runtime.go(effect_id, params, env, image) {
            Ok(out) if out.channel_order() != RGBA => {
                EffectInvocationResult::marshal_failed("result image is not RGBA")
            }
            Ok(out) => {
                debug!("invoke '{}' output {}x{}", effect_id, out.width(), out.height());
                EffectInvocationResult::succeeded(None, Some(out))
            }
            Err(e) => {
                warn!("invoke '{}' failed: {}", effect_id, e);
                EffectInvocationResult::from_error(e)
            }
        };
        debug!("invoke '{}' took {:.2}ms", effect_id, start.elapsed().as_secs_f64() * 1000.0);
        result
    }

    pub fn normalize_params(&mut self, effect_id: &str, params: &Value) -> EffectInvocationResult {
        self.json_call("normalizeParams", effect_id, |rt| rt.normalize_params(effect_id, params))
    }

    pub fn render_tree(&mut self, effect_id: &str, params: &Value) -> EffectInvocationResult {
        self.json_call("renderTree", effect_id, |rt| rt.render_tree(effect_id, params))
    }

    pub fn fire_event(&mut self, effect_id: &str, event: &UiEvent, params: &Value) -> EffectInvocationResult {
        let event = event.to_value();
        self.json_call("fireEvent", effect_id, |rt| rt.fire_event(effect_id, &event, params))
    }

    pub fn scale_params(&mut self, effect_id: &str, params: &Value, factor: f64) -> EffectInvocationResult {
        self.json_call("scaleParams", effect_id, |rt| rt.scale_params(effect_id, params, factor))
    }

    pub fn interpolate_params(
        &mut self,
        effect_id: &str,
        a: &Value,
        b: &Value,
        percent: f64,
    ) -> EffectInvocationResult {
        self.json_call("interpolateParams", effect_id, |rt| rt.interpolate_params(effect_id, a, b, percent))
    }

    pub fn adjust_colors(
        &mut self,
        effect_id: &str,
        params: &Value,
        adjust: &mut ColorAdjuster<'_>,
    ) -> EffectInvocationResult {
        self.json_call("adjustColors", effect_id, |rt| rt.adjust_colors(effect_id, params, adjust))
    }

    pub fn drain_alerts(&mut self) -> Vec<String> {
        self.runtime.drain_alerts()
    }
}
