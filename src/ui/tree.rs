//! Declarative settings UI: node tree, emissions and patch merge.
//!
//! The effect runtime rebuilds the whole tree on every parameter change. A
//! renderer never mutates it: it only reports user input against a node, and
//! [`UiNode::emit`] turns that input into the wire payloads:
//!
//! ```text
//! numberInput{key:"size", min:1, max:64, dataType:int}  + input 70.6
//!   -> patch  {"size": 64}
//!   -> event  {"type":"change", "nodeId":".root.0-numberInput", "value": 64}
//! ```
//!
//! Patches are merged into the current params with [`merge_patch`] (RFC 7396).
//! Events go to the runtime's `fireEvent` and are never merged automatically.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Number, Value};

/// Color value, channels in 0..1
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rgba {
    pub r: f64,
    pub g: f64,
    pub b: f64,
    pub a: f64,
}

impl Default for Rgba {
    fn default() -> Self {
        Self { r: 0.0, g: 0.0, b: 0.0, a: 1.0 }
    }
}

impl Rgba {
    pub fn new(r: f64, g: f64, b: f64, a: f64) -> Self {
        Self { r, g, b, a }
    }

    pub fn clamped(&self) -> Self {
        Self {
            r: self.r.clamp(0.0, 1.0),
            g: self.g.clamp(0.0, 1.0),
            b: self.b.clamp(0.0, 1.0),
            a: self.a.clamp(0.0, 1.0),
        }
    }

    pub fn to_u8(&self) -> [u8; 4] {
        let c = self.clamped();
        [
            (c.r * 255.0).round() as u8,
            (c.g * 255.0).round() as u8,
            (c.b * 255.0).round() as u8,
            (c.a * 255.0).round() as u8,
        ]
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Row,
    #[default]
    Col,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Int,
    #[default]
    Float,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextSize {
    Sm,
    #[default]
    Normal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectOption {
    pub value: String,
    pub label: String,
}

/// One node of the settings tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UiNode {
    /// Effect-assigned id correlating events to nodes
    #[serde(rename = "nodeId", default, skip_serializing_if = "String::is_empty")]
    pub node_id: String,
    #[serde(flatten)]
    pub kind: NodeKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum NodeKind {
    Group {
        #[serde(default)]
        direction: Direction,
        #[serde(default, deserialize_with = "skip_null_children")]
        children: Vec<UiNode>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        disabled: Option<bool>,
    },
    Text {
        text: String,
        #[serde(default)]
        size: TextSize,
    },
    Button {
        text: String,
    },
    TextInput {
        #[serde(default)]
        value: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        key: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    NumberInput {
        value: f64,
        #[serde(default)]
        data_type: DataType,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        step: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        key: Option<String>,
    },
    ColorInput {
        value: Rgba,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        key: Option<String>,
    },
    Checkbox {
        value: bool,
        #[serde(default)]
        label: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        key: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Slider {
        value: f64,
        min: f64,
        max: f64,
        #[serde(default)]
        data_type: DataType,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        key: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Select {
        options: Vec<SelectOption>,
        #[serde(default)]
        selected_index: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        key: Option<String>,
    },
    Separator,
}

/// Conditional children arrive as `null`.
fn skip_null_children<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<UiNode>, D::Error> {
    let items: Vec<Option<UiNode>> = Vec::deserialize(d)?;
    Ok(items.into_iter().flatten().collect())
}

impl NodeKind {
    /// Wire name of the node type
    pub fn type_name(&self) -> &'static str {
        match self {
            NodeKind::Group { .. } => "group",
            NodeKind::Text { .. } => "text",
            NodeKind::Button { .. } => "button",
            NodeKind::TextInput { .. } => "textInput",
            NodeKind::NumberInput { .. } => "numberInput",
            NodeKind::ColorInput { .. } => "colorInput",
            NodeKind::Checkbox { .. } => "checkbox",
            NodeKind::Slider { .. } => "slider",
            NodeKind::Select { .. } => "select",
            NodeKind::Separator => "separator",
        }
    }
}

// ============================================================================
// Events and emissions
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UiEventKind {
    Click,
    Change,
}

/// `{type, nodeId, value?}` payload delivered to `fireEvent`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UiEvent {
    #[serde(rename = "type")]
    pub kind: UiEventKind,
    #[serde(rename = "nodeId")]
    pub node_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl UiEvent {
    pub fn click(node_id: &str) -> Self {
        Self { kind: UiEventKind::Click, node_id: node_id.to_string(), value: None }
    }

    pub fn change(node_id: &str, value: Value) -> Self {
        Self { kind: UiEventKind::Change, node_id: node_id.to_string(), value: Some(value) }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Raw user input against one widget, before clamping.
#[derive(Debug, Clone, PartialEq)]
pub enum WidgetInput {
    Click,
    Text(String),
    Number(f64),
    Color(Rgba),
    Bool(bool),
    SelectIndex(usize),
}

/// What a single widget interaction produces.
#[derive(Debug, Clone, PartialEq)]
pub struct Emission {
    /// `{key: value}` for keyed leaves
    pub patch: Option<Map<String, Value>>,
    pub event: UiEvent,
}

fn number_value(v: f64, data_type: DataType) -> Value {
    match data_type {
        DataType::Int => Value::from(v.floor() as i64),
        DataType::Float => Number::from_f64(v).map(Value::Number).unwrap_or(Value::Null),
    }
}

fn clamp_opt(v: f64, min: Option<f64>, max: Option<f64>) -> f64 {
    let v = min.map_or(v, |m| v.max(m));
    max.map_or(v, |m| v.min(m))
}

impl UiNode {
    pub fn new(kind: NodeKind) -> Self {
        Self { node_id: String::new(), kind }
    }

    pub fn group(direction: Direction, children: Vec<UiNode>) -> Self {
        Self::new(NodeKind::Group { direction, children, disabled: None })
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::new(NodeKind::Text { text: text.into(), size: TextSize::Normal })
    }

    pub fn small_text(text: impl Into<String>) -> Self {
        Self::new(NodeKind::Text { text: text.into(), size: TextSize::Sm })
    }

    pub fn separator() -> Self {
        Self::new(NodeKind::Separator)
    }

    pub fn key(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::TextInput { key, .. }
            | NodeKind::NumberInput { key, .. }
            | NodeKind::ColorInput { key, .. }
            | NodeKind::Checkbox { key, .. }
            | NodeKind::Slider { key, .. }
            | NodeKind::Select { key, .. } => key.as_deref(),
            _ => None,
        }
    }

    /// Turn widget input into a patch (keyed leaves) and an event.
    ///
    /// Returns None when the input does not apply to this node type or
    /// the node is a container.
    pub fn emit(&self, input: WidgetInput) -> Option<Emission> {
        let value = match (&self.kind, input) {
            (NodeKind::Button { .. }, WidgetInput::Click) => {
                return Some(Emission { patch: None, event: UiEvent::click(&self.node_id) });
            }
            (NodeKind::TextInput { .. }, WidgetInput::Text(s)) => Value::String(s),
            (NodeKind::NumberInput { min, max, data_type, .. }, WidgetInput::Number(v)) => {
                number_value(clamp_opt(v, *min, *max), *data_type)
            }
            (NodeKind::Slider { min, max, data_type, .. }, WidgetInput::Number(v)) => {
                number_value(v.clamp(min.min(*max), max.max(*min)), *data_type)
            }
            (NodeKind::ColorInput { .. }, WidgetInput::Color(c)) => c.clamped().to_value(),
            (NodeKind::Checkbox { .. }, WidgetInput::Bool(b)) => Value::Bool(b),
            (NodeKind::Select { options, .. }, WidgetInput::SelectIndex(i)) => {
                Value::String(options.get(i)?.value.clone())
            }
            _ => return None,
        };

        let patch = self.key().map(|k| {
            let mut m = Map::new();
            m.insert(k.to_string(), value.clone());
            m
        });
        Some(Emission { patch, event: UiEvent::change(&self.node_id, value) })
    }

    /// Depth-first lookup by node id.
    pub fn find(&self, node_id: &str) -> Option<&UiNode> {
        if self.node_id == node_id {
            return Some(self);
        }
        match &self.kind {
            NodeKind::Group { children, .. } => children.iter().find_map(|c| c.find(node_id)),
            _ => None,
        }
    }

    /// Assign ids: `.root` for this node, `<parent>.<index>-<type>` below.
    ///
    /// Returns `(previous, assigned)` for every node that already carried an
    /// id, so callers can rebind anything keyed on the old one.
    pub fn assign_node_ids(&mut self) -> Vec<(String, String)> {
        fn walk(node: &mut UiNode, id: String, renamed: &mut Vec<(String, String)>) {
            let previous = std::mem::replace(&mut node.node_id, id);
            if !previous.is_empty() {
                renamed.push((previous, node.node_id.clone()));
            }
            if let NodeKind::Group { children, .. } = &mut node.kind {
                for (i, child) in children.iter_mut().enumerate() {
                    let child_id = format!("{}.{}-{}", node.node_id, i, child.kind.type_name());
                    walk(child, child_id, renamed);
                }
            }
        }
        let mut renamed = Vec::new();
        walk(self, ".root".to_string(), &mut renamed);
        renamed
    }

    /// Every node, parents before children.
    pub fn visit(&self, f: &mut dyn FnMut(&UiNode)) {
        f(self);
        if let NodeKind::Group { children, .. } = &self.kind {
            for c in children {
                c.visit(f);
            }
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// RFC 7396 merge patch: `null` removes, objects merge recursively,
/// anything else replaces.
pub fn merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch_map) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(target_map) = target {
        for (k, v) in patch_map {
            if v.is_null() {
                target_map.remove(k);
            } else {
                merge_patch(target_map.entry(k.clone()).or_insert(Value::Null), v);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// Test: Patch merge scenario
    /// Validates: {"a":1,"b":2} + {"b":3} == {"a":1,"b":3}
    #[test]
    fn test_merge_patch_replaces_key() {
        let mut params = json!({"a": 1, "b": 2});
        merge_patch(&mut params, &json!({"b": 3}));
        assert_eq!(params, json!({"a": 1, "b": 3}));
    }

    #[test]
    fn test_merge_patch_rfc7396() {
        let mut v = json!({"a": {"x": 1, "y": 2}, "b": 1});
        merge_patch(&mut v, &json!({"a": {"y": null, "z": 3}, "b": null, "c": [1]}));
        assert_eq!(v, json!({"a": {"x": 1, "z": 3}, "c": [1]}));
    }

    /// Test: Tree parse from runtime JSON
    /// Validates: Null children skipped, camelCase fields, ids assigned
    #[test]
    fn test_parse_tree_and_assign_ids() {
        let raw = json!({
            "type": "group",
            "direction": "col",
            "children": [
                {"type": "numberInput", "key": "size", "dataType": "int", "value": 8, "min": 1, "max": 64},
                null,
                {"type": "select", "key": "mode", "options": [
                    {"value": "square", "label": "Square"},
                    {"value": "hex", "label": "Hex"}
                ], "selectedIndex": 0},
                {"type": "button", "text": "Reset"}
            ]
        });
        let mut tree: UiNode = serde_json::from_value(raw).unwrap();
        tree.assign_node_ids();

        assert_eq!(tree.node_id, ".root");
        let NodeKind::Group { children, .. } = &tree.kind else { panic!("not a group") };
        assert_eq!(children.len(), 3);
        assert_eq!(children[0].node_id, ".root.0-numberInput");
        assert_eq!(children[2].node_id, ".root.2-button");
        assert!(tree.find(".root.1-select").is_some());
    }

    /// Test: Number emission clamps and floors
    /// Validates: Patch and event carry the same clamped value
    #[test]
    fn test_number_emission_clamped() {
        let node = UiNode {
            node_id: ".root.0-numberInput".into(),
            kind: NodeKind::NumberInput {
                value: 8.0,
                data_type: DataType::Int,
                min: Some(1.0),
                max: Some(64.0),
                step: None,
                key: Some("size".into()),
            },
        };
        let e = node.emit(WidgetInput::Number(70.6)).unwrap();
        assert_eq!(e.patch.unwrap()["size"], json!(64));
        assert_eq!(e.event.to_value(), json!({"type": "change", "nodeId": ".root.0-numberInput", "value": 64}));

        let e = node.emit(WidgetInput::Number(3.9)).unwrap();
        assert_eq!(e.event.value, Some(json!(3)));
    }

    #[test]
    fn test_select_emits_option_value() {
        let node = UiNode {
            node_id: "s".into(),
            kind: NodeKind::Select {
                options: vec![
                    SelectOption { value: "square".into(), label: "Square".into() },
                    SelectOption { value: "hex".into(), label: "Hex".into() },
                ],
                selected_index: 0,
                key: Some("mode".into()),
            },
        };
        let e = node.emit(WidgetInput::SelectIndex(1)).unwrap();
        assert_eq!(e.patch.unwrap()["mode"], json!("hex"));
        assert!(node.emit(WidgetInput::SelectIndex(5)).is_none());
    }

    #[test]
    fn test_button_and_unkeyed_emit_no_patch() {
        let button = UiNode { node_id: "b".into(), kind: NodeKind::Button { text: "Go".into() } };
        let e = button.emit(WidgetInput::Click).unwrap();
        assert!(e.patch.is_none());
        assert_eq!(e.event, UiEvent::click("b"));

        let unkeyed = UiNode {
            node_id: "c".into(),
            kind: NodeKind::Checkbox { value: false, label: "x".into(), key: None },
        };
        let e = unkeyed.emit(WidgetInput::Bool(true)).unwrap();
        assert!(e.patch.is_none());
        assert_eq!(e.event.value, Some(json!(true)));

        assert!(UiNode::separator().emit(WidgetInput::Click).is_none());
    }
}
