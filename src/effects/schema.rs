//! Static parameter schemas for built-in effects.
//!
//! A schema lists every parameter with its type, range and default. It is the
//! single source for default filling, clamping, scaling, interpolation and
//! color adjustment of a params object.

use serde_json::{Map, Number, Value};

use crate::ui::tree::Rgba;

/// Value is a length in pixels at base dpi (scaled with dpi and ScaleParameters)
pub const FLAG_PIXELS: u8 = 0x01;
/// Never interpolated, switches at t = 0.5
pub const FLAG_STEP: u8 = 0x02;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamType {
    Real { min: f64, max: f64, default: f64 },
    Int { min: i64, max: i64, default: i64 },
    Bool { default: bool },
    /// RGBA in 0..1
    Color { default: [f64; 4] },
    Choice { options: &'static [&'static str], default: &'static str },
}

/// Single parameter definition
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamDef {
    pub name: &'static str,
    pub ty: ParamType,
    pub flags: u8,
}

impl ParamDef {
    pub const fn new(name: &'static str, ty: ParamType, flags: u8) -> Self {
        Self { name, ty, flags }
    }

    pub const fn real(name: &'static str, min: f64, max: f64, default: f64, flags: u8) -> Self {
        Self::new(name, ParamType::Real { min, max, default }, flags)
    }

    pub const fn int(name: &'static str, min: i64, max: i64, default: i64, flags: u8) -> Self {
        Self::new(name, ParamType::Int { min, max, default }, flags)
    }

    pub const fn is_pixels(&self) -> bool {
        self.flags & FLAG_PIXELS != 0
    }

    pub fn default_value(&self) -> Value {
        match self.ty {
            ParamType::Real { default, .. } => real(default),
            ParamType::Int { default, .. } => Value::from(default),
            ParamType::Bool { default } => Value::Bool(default),
            ParamType::Color { default: [r, g, b, a] } => Rgba::new(r, g, b, a).to_value(),
            ParamType::Choice { default, .. } => Value::String(default.to_string()),
        }
    }

    /// Coerce any JSON value to this parameter's type and range.
    pub fn coerce(&self, v: &Value) -> Value {
        match self.ty {
            ParamType::Real { min, max, .. } => match v.as_f64() {
                Some(f) if f.is_finite() => real(f.clamp(min, max)),
                _ => self.default_value(),
            },
            ParamType::Int { min, max, .. } => match v.as_f64() {
                Some(f) if f.is_finite() => Value::from((f.round() as i64).clamp(min, max)),
                _ => self.default_value(),
            },
            ParamType::Bool { .. } => v.as_bool().map(Value::Bool).unwrap_or_else(|| self.default_value()),
            ParamType::Color { .. } => match color_of(v) {
                Some(c) => c.clamped().to_value(),
                None => self.default_value(),
            },
            ParamType::Choice { options, .. } => match v.as_str() {
                Some(s) if options.contains(&s) => Value::String(s.to_string()),
                _ => self.default_value(),
            },
        }
    }
}

/// Attribute schema: named list of parameter definitions.
#[derive(Debug)]
pub struct ParamSchema {
    pub name: &'static str,
    pub defs: &'static [ParamDef],
}

fn real(f: f64) -> Value {
    Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
}

pub fn color_of(v: &Value) -> Option<Rgba> {
    serde_json::from_value(v.clone()).ok()
}

fn lerp(a: f64, b: f64, t: f64) -> f64 {
    a + (b - a) * t
}

impl ParamSchema {
    pub const fn new(name: &'static str, defs: &'static [ParamDef]) -> Self {
        Self { name, defs }
    }

    pub fn get(&self, name: &str) -> Option<&ParamDef> {
        self.defs.iter().find(|d| d.name == name)
    }

    pub fn defaults(&self) -> Map<String, Value> {
        self.defs.iter().map(|d| (d.name.to_string(), d.default_value())).collect()
    }

    /// Defaults filled in, known keys coerced, unknown keys kept.
    pub fn normalize(&self, params: &Value) -> Map<String, Value> {
        let mut out = match params {
            Value::Object(m) => m.clone(),
            _ => Map::new(),
        };
        for def in self.defs {
            let v = match out.get(def.name) {
                Some(v) => def.coerce(v),
                None => def.default_value(),
            };
            out.insert(def.name.to_string(), v);
        }
        out
    }

    pub fn real(&self, params: &Map<String, Value>, name: &str) -> f64 {
        params.get(name).and_then(Value::as_f64).unwrap_or_else(|| {
            self.get(name).and_then(|d| d.default_value().as_f64()).unwrap_or(0.0)
        })
    }

    pub fn int(&self, params: &Map<String, Value>, name: &str) -> i64 {
        self.real(params, name).round() as i64
    }

    pub fn bool(&self, params: &Map<String, Value>, name: &str) -> bool {
        params.get(name).and_then(Value::as_bool).unwrap_or(false)
    }

    pub fn color(&self, params: &Map<String, Value>, name: &str) -> Rgba {
        params.get(name).and_then(color_of).unwrap_or_default()
    }

    pub fn choice<'a>(&self, params: &'a Map<String, Value>, name: &str) -> &'a str {
        params.get(name).and_then(Value::as_str).unwrap_or("")
    }

    /// Multiply pixel-length params by `factor`. None when the schema has none.
    pub fn scale(&self, params: &Map<String, Value>, factor: f64) -> Option<Map<String, Value>> {
        let mut out = params.clone();
        let mut any = false;
        for def in self.defs.iter().filter(|d| d.is_pixels()) {
            any = true;
            let scaled = self.real(params, def.name) * factor;
            out.insert(def.name.to_string(), def.coerce(&real(scaled)));
        }
        any.then_some(out)
    }

    /// Lerp numbers and colors, step everything else at `t = 0.5`.
    pub fn interpolate(&self, a: &Map<String, Value>, b: &Map<String, Value>, t: f64) -> Map<String, Value> {
        let t = t.clamp(0.0, 1.0);
        let mut out = a.clone();
        for def in self.defs {
            let step = if t < 0.5 { a.get(def.name) } else { b.get(def.name) };
            let v = match def.ty {
                _ if def.flags & FLAG_STEP != 0 => step.cloned().unwrap_or_else(|| def.default_value()),
                ParamType::Real { .. } | ParamType::Int { .. } => {
                    def.coerce(&real(lerp(self.real(a, def.name), self.real(b, def.name), t)))
                }
                ParamType::Color { .. } => {
                    let (ca, cb) = (self.color(a, def.name), self.color(b, def.name));
                    Rgba::new(
                        lerp(ca.r, cb.r, t),
                        lerp(ca.g, cb.g, t),
                        lerp(ca.b, cb.b, t),
                        lerp(ca.a, cb.a, t),
                    )
                    .to_value()
                }
                ParamType::Bool { .. } | ParamType::Choice { .. } => {
                    step.cloned().unwrap_or_else(|| def.default_value())
                }
            };
            out.insert(def.name.to_string(), v);
        }
        out
    }

    /// Map every color param through `adjust`.
    pub fn adjust_colors(
        &self,
        params: &Map<String, Value>,
        adjust: &mut dyn FnMut(Rgba) -> Rgba,
    ) -> Map<String, Value> {
        let mut out = params.clone();
        for def in self.defs.iter().filter(|d| matches!(d.ty, ParamType::Color { .. })) {
            let mapped = adjust(self.color(params, def.name));
            out.insert(def.name.to_string(), def.coerce(&mapped.to_value()));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const DEFS: &[ParamDef] = &[
        ParamDef::real("radius", 0.0, 100.0, 5.0, FLAG_PIXELS),
        ParamDef::int("count", 1, 10, 3, 0),
        ParamDef::new("mode", ParamType::Choice { options: &["a", "b"], default: "a" }, 0),
        ParamDef::new("tint", ParamType::Color { default: [0.0, 0.0, 0.0, 1.0] }, 0),
    ];
    static SCHEMA: ParamSchema = ParamSchema::new("test", DEFS);

    #[test]
    fn test_normalize_fills_and_clamps() {
        let p = SCHEMA.normalize(&json!({"radius": 500, "count": 2.6, "mode": "z", "keep": 1}));
        assert_eq!(p["radius"], json!(100.0));
        assert_eq!(p["count"], json!(3));
        assert_eq!(p["mode"], json!("a"));
        assert_eq!(p["keep"], json!(1));
        assert_eq!(p["tint"], json!({"r": 0.0, "g": 0.0, "b": 0.0, "a": 1.0}));
    }

    #[test]
    fn test_scale_pixels_only() {
        let p = SCHEMA.normalize(&json!({"radius": 10.0, "count": 4}));
        let scaled = SCHEMA.scale(&p, 2.5).unwrap();
        assert_eq!(scaled["radius"], json!(25.0));
        assert_eq!(scaled["count"], json!(4));
    }

    #[test]
    fn test_interpolate() {
        let a = SCHEMA.normalize(&json!({"radius": 0.0, "mode": "a"}));
        let b = SCHEMA.normalize(&json!({"radius": 10.0, "mode": "b", "tint": {"r": 1.0, "g": 1.0, "b": 1.0, "a": 1.0}}));
        let mid = SCHEMA.interpolate(&a, &b, 0.25);
        assert_eq!(mid["radius"], json!(2.5));
        assert_eq!(mid["mode"], json!("a"));
        assert_eq!(mid["tint"]["r"], json!(0.25));
        assert_eq!(SCHEMA.interpolate(&a, &b, 0.75)["mode"], json!("b"));
    }
}
