//! In-process runtime over the built-in [`LiveEffect`] implementations.
//!
//! Rendering remembers which handler sits behind which node id, for the most
//! recent render only. `fireEvent` looks the node up in that map; anything
//! it cannot resolve answers `{updated:false}`.

use std::collections::HashMap;

use indexmap::IndexMap;
use log::{debug, trace};
use serde_json::{Value, json};

use super::{ColorAdjuster, EffectDescriptor, EffectRuntime, LiveEffectEnv, RuntimeError};
use crate::core::image::ImageBuffer;
use crate::effects::{GoContext, Handler, LiveEffect, Params, UiContext, builtin_effects};
use crate::ui::tree::{Direction, UiEvent, UiNode};

/// Handlers of the last rendered tree
struct NodeState {
    effect_id: String,
    handlers: HashMap<String, Handler>,
}

pub struct NativeRuntime {
    effects: IndexMap<&'static str, Box<dyn LiveEffect>>,
    node_state: Option<NodeState>,
    alerts: Vec<String>,
}

impl Default for NativeRuntime {
    fn default() -> Self {
        Self::new()
    }
}

fn lookup<'a>(
    effects: &'a IndexMap<&'static str, Box<dyn LiveEffect>>,
    effect_id: &str,
) -> Result<&'a dyn LiveEffect, RuntimeError> {
    effects
        .get(effect_id)
        .map(|e| e.as_ref())
        .ok_or_else(|| RuntimeError::UnknownEffect(effect_id.to_string()))
}

/// Schema coercion followed by the effect's own validation.
fn normalized(effect: &dyn LiveEffect, params: &Value) -> Params {
    effect.edit_params(effect.schema().normalize(params))
}

/// Effect body plus the shared footer, ids assigned.
fn render(effect: &dyn LiveEffect, params: &Params) -> (UiNode, HashMap<String, Handler>) {
    let mut ui = UiContext::new();
    let body = effect.render_ui(params, &mut ui);

    let defaults = effect.schema().defaults();
    let reset = ui.button("Reset", move |p, _| {
        for (k, v) in &defaults {
            p.insert(k.clone(), v.clone());
        }
    });
    let version = effect.version();
    let footer = UiNode::group(
        Direction::Row,
        vec![UiNode::small_text(format!("{} v{}.{}", effect.title(), version.major, version.minor)), reset],
    );

    let mut tree = UiNode::group(Direction::Col, vec![body, UiNode::separator(), footer]);
    let handlers = tree
        .assign_node_ids()
        .into_iter()
        .filter_map(|(marker, id)| ui.handler(&marker).map(|h| (id, h)))
        .collect();
    (tree, handlers)
}

impl NativeRuntime {
    /// Empty runtime
    pub fn new() -> Self {
        Self { effects: IndexMap::new(), node_state: None, alerts: Vec::new() }
    }

    pub fn with_builtin_effects() -> Self {
        let mut rt = Self::new();
        for effect in builtin_effects() {
            rt.register(effect);
        }
        rt
    }

    /// Add an effect. A second effect with the same id replaces the first.
    pub fn register(&mut self, effect: Box<dyn LiveEffect>) {
        debug!("native runtime: register '{}'", effect.id());
        self.effects.insert(effect.id(), effect);
    }

    fn render_and_remember(&mut self, effect_id: &str, params: &Params) -> Result<UiNode, RuntimeError> {
        let effect = lookup(&self.effects, effect_id)?;
        let (tree, handlers) = render(effect, params);
        trace!("render '{}': {} handler(s)", effect_id, handlers.len());
        self.node_state = Some(NodeState { effect_id: effect_id.to_string(), handlers });
        Ok(tree)
    }
}

impl EffectRuntime for NativeRuntime {
    fn name(&self) -> &str {
        "native"
    }

    fn effects(&mut self) -> Result<Vec<EffectDescriptor>, RuntimeError> {
        Ok(self
            .effects
            .values()
            .map(|e| EffectDescriptor { id: e.id().to_string(), title: e.title().to_string(), version: e.version() })
            .collect())
    }

    fn go(
        &mut self,
        effect_id: &str,
        params: &Value,
        env: &LiveEffectEnv,
        image: ImageBuffer,
    ) -> Result<ImageBuffer, RuntimeError> {
        let effect = lookup(&self.effects, effect_id)?;
        let params = normalized(effect, params);
        let mut ctx = GoContext::new(env, &mut self.alerts);
        effect.go(&params, &mut ctx, image).map_err(RuntimeError::Failed)
    }

    fn normalize_params(&mut self, effect_id: &str, params: &Value) -> Result<Value, RuntimeError> {
        let effect = lookup(&self.effects, effect_id)?;
        Ok(Value::Object(normalized(effect, params)))
    }

    fn render_tree(&mut self, effect_id: &str, params: &Value) -> Result<Value, RuntimeError> {
        let params = normalized(lookup(&self.effects, effect_id)?, params);
        Ok(self.render_and_remember(effect_id, &params)?.to_value())
    }

    fn fire_event(&mut self, effect_id: &str, event: &Value, params: &Value) -> Result<Value, RuntimeError> {
        let ignored = json!({"updated": false});
        let event: UiEvent =
            serde_json::from_value(event.clone()).map_err(|e| RuntimeError::Marshal(format!("event: {}", e)))?;

        let Ok(effect) = lookup(&self.effects, effect_id) else {
            return Ok(ignored);
        };
        let handler = match &self.node_state {
            Some(state) if state.effect_id == effect_id => state.handlers.get(&event.node_id).cloned(),
            _ => None,
        };
        let Some(handler) = handler else {
            trace!("fireEvent '{}': no handler for {}", effect_id, event.node_id);
            return Ok(ignored);
        };

        let current = normalized(effect, params);
        let mut next = current.clone();
        handler(&mut next, &event);
        let next = normalized(effect, &Value::Object(next));
        if next == current {
            return Ok(ignored);
        }

        let tree = self.render_and_remember(effect_id, &next)?;
        Ok(json!({"updated": true, "params": next, "tree": tree.to_value()}))
    }

    fn scale_params(&mut self, effect_id: &str, params: &Value, factor: f64) -> Result<Value, RuntimeError> {
        let effect = lookup(&self.effects, effect_id)?;
        let params = normalized(effect, params);
        Ok(match effect.scale_params(&params, factor) {
            Some(scaled) => json!({"hasChanged": true, "params": normalized(effect, &Value::Object(scaled))}),
            None => json!({"hasChanged": false, "params": params}),
        })
    }

    fn interpolate_params(
        &mut self,
        effect_id: &str,
        a: &Value,
        b: &Value,
        percent: f64,
    ) -> Result<Value, RuntimeError> {
        let effect = lookup(&self.effects, effect_id)?;
        let (a, b) = (normalized(effect, a), normalized(effect, b));
        Ok(Value::Object(effect.interpolate(&a, &b, percent)))
    }

    fn adjust_colors(
        &mut self,
        effect_id: &str,
        params: &Value,
        adjust: &mut ColorAdjuster<'_>,
    ) -> Result<Value, RuntimeError> {
        let effect = lookup(&self.effects, effect_id)?;
        let params = normalized(effect, params);
        let adjusted = effect.adjust_colors(&params, adjust);
        Ok(json!({"hasChanged": adjusted != params, "params": adjusted}))
    }

    fn drain_alerts(&mut self) -> Vec<String> {
        std::mem::take(&mut self.alerts)
    }
}
