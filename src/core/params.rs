//! Effect parameter persistence.
//!
//! Each effect instance carries a host record with two string fields:
//!
//! | Key | Value |
//! |-----|-------|
//! | `livefx.effectId` | normalized effect id (prefix stripped) |
//! | `livefx.params` | compact JSON object |
//!
//! Nothing is cached between host callbacks: every callback loads fresh.

use log::{debug, warn};
use serde_json::{Map, Value};

use super::error::{HostWriteError, ParamsDecodeError};
use crate::host::ParamRecord;

/// Registered effect name prefix
pub const EFFECT_PREFIX: &str = "livefx.";

pub const KEY_EFFECT_ID: &str = "livefx.effectId";
pub const KEY_PARAMS: &str = "livefx.params";

/// Strip the registration prefix from a host effect name.
pub fn normalize_effect_id(name: &str) -> &str {
    name.strip_prefix(EFFECT_PREFIX).unwrap_or(name)
}

/// Effect id + opaque params object. `params` is never null.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectParameters {
    pub effect_id: String,
    pub params: Value,
}

impl EffectParameters {
    pub fn new(effect_id: &str, params: Value) -> Self {
        let params = match params {
            Value::Null => Value::Object(Map::new()),
            v => v,
        };
        Self { effect_id: normalize_effect_id(effect_id).to_string(), params }
    }

    /// Empty `{}` params for an effect
    pub fn empty(effect_id: &str) -> Self {
        Self::new(effect_id, Value::Object(Map::new()))
    }
}

fn kind_of(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Parse persisted params text. Anything but an object is rejected.
pub fn decode_params(text: &str) -> Result<Value, ParamsDecodeError> {
    let value: Value = serde_json::from_str(text).map_err(ParamsDecodeError::Syntax)?;
    match value {
        Value::Object(_) => Ok(value),
        other => Err(ParamsDecodeError::NotAnObject(kind_of(&other))),
    }
}

/// Reads and writes [`EffectParameters`] on a host record.
pub struct ParameterStore;

impl ParameterStore {
    /// Load params, falling back to `defaults` field by field.
    ///
    /// A missing or unreadable field takes the default. Params text that is
    /// present but does not decode is an error: callers treat it as a
    /// corrupted session (see [`ParameterStore::load_or_default`]).
    pub fn load(
        record: &dyn ParamRecord,
        defaults: &EffectParameters,
    ) -> Result<EffectParameters, ParamsDecodeError> {
        let effect_id = match record.get_string(KEY_EFFECT_ID) {
            Ok(Some(id)) if !id.is_empty() => normalize_effect_id(&id).to_string(),
            Ok(_) => defaults.effect_id.clone(),
            Err(e) => {
                debug!("{}: {}, using default '{}'", KEY_EFFECT_ID, e, defaults.effect_id);
                defaults.effect_id.clone()
            }
        };

        let params = match record.get_string(KEY_PARAMS) {
            Ok(Some(text)) => decode_params(&text)?,
            Ok(None) => defaults.params.clone(),
            Err(e) => {
                debug!("{}: {}, using defaults", KEY_PARAMS, e);
                defaults.params.clone()
            }
        };

        Ok(EffectParameters::new(&effect_id, params))
    }

    /// [`ParameterStore::load`], substituting `defaults` on decode failure.
    pub fn load_or_default(record: &dyn ParamRecord, defaults: &EffectParameters) -> EffectParameters {
        match Self::load(record, defaults) {
            Ok(p) => p,
            Err(e) => {
                warn!("Corrupt params for '{}' ({}), using defaults", defaults.effect_id, e);
                defaults.clone()
            }
        }
    }

    /// Write both fields. A failure on the second field reports `partial`.
    pub fn save(record: &mut dyn ParamRecord, params: &EffectParameters) -> Result<(), HostWriteError> {
        let text = params.params.to_string();

        record
            .set_string(KEY_EFFECT_ID, &params.effect_id)
            .map_err(|source| HostWriteError { field: KEY_EFFECT_ID, partial: false, source })?;
        record
            .set_string(KEY_PARAMS, &text)
            .map_err(|source| HostWriteError { field: KEY_PARAMS, partial: true, source })?;

        debug!("Saved params for '{}': {}", params.effect_id, text);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::memory::MemoryRecord;
    use serde_json::json;

    /// Test: save -> load round trip
    /// Validates: Identical effect id and JSON-equal params
    #[test]
    fn test_save_load_roundtrip() {
        let mut record = MemoryRecord::default();
        let saved = EffectParameters::new("pixelate", json!({"size": 8, "mode": "square", "nested": {"x": [1, 2.5]}}));
        ParameterStore::save(&mut record, &saved).unwrap();

        let loaded = ParameterStore::load(&record, &EffectParameters::empty("other")).unwrap();
        assert_eq!(loaded.effect_id, "pixelate");
        assert_eq!(loaded.params, saved.params);
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let record = MemoryRecord::default();
        let defaults = EffectParameters::new("blur", json!({"radius": 3}));
        let loaded = ParameterStore::load(&record, &defaults).unwrap();
        assert_eq!(loaded, defaults);
    }

    /// Test: Corrupt params text
    /// Validates: load() errors, load_or_default() falls back
    #[test]
    fn test_corrupt_params_fallback() {
        let mut record = MemoryRecord::default();
        record.set_string(KEY_EFFECT_ID, "blur").unwrap();
        record.set_string(KEY_PARAMS, "{not json").unwrap();

        let defaults = EffectParameters::new("blur", json!({"radius": 3}));
        assert!(matches!(
            ParameterStore::load(&record, &defaults),
            Err(ParamsDecodeError::Syntax(_))
        ));
        assert_eq!(ParameterStore::load_or_default(&record, &defaults), defaults);

        record.set_string(KEY_PARAMS, "[1,2]").unwrap();
        assert!(matches!(
            ParameterStore::load(&record, &defaults),
            Err(ParamsDecodeError::NotAnObject("array"))
        ));
    }

    #[test]
    fn test_null_params_become_empty_object() {
        let p = EffectParameters::new("livefx.blur", Value::Null);
        assert_eq!(p.effect_id, "blur");
        assert_eq!(p.params, json!({}));
    }

    #[test]
    fn test_partial_write_reported() {
        let mut record = MemoryRecord::default();
        record.fail_writes_for(KEY_PARAMS);
        let err = ParameterStore::save(&mut record, &EffectParameters::empty("blur")).unwrap_err();
        assert_eq!(err.field, KEY_PARAMS);
        assert!(err.partial);
        assert_eq!(record.get_string(KEY_EFFECT_ID).unwrap().as_deref(), Some("blur"));
    }
}
