//! JSON <-> JavaScript Value Conversions
//!
//! Bidirectional conversion between `serde_json::Value` and Boa's `JsValue`.
//! They are used to:
//!
//! - Bind a request's params payload into the script's global scope
//! - Turn a host callback's return value into something the script can use
//! - Let host callbacks read script arguments as JSON
//!
//! # Type Mapping
//!
//! | JSON Type | JavaScript Type |
//! |-----------|-----------------|
//! | null | null |
//! | boolean | Boolean |
//! | number | Number |
//! | string | String |
//! | array | Array |
//! | object | Object |
//!
//! # Limitations
//!
//! - Symbol keys in JavaScript objects are skipped during conversion
//! - JavaScript symbols and functions are converted to JSON null
//! - Structures nested deeper than [`MAX_DEPTH`] are rejected, which also
//!   stops cyclic objects from recursing forever
//! - Script arrays longer than [`MAX_ARRAY_LEN`] are rejected; a sparse array
//!   can claim a length far beyond what it actually stores

use boa_engine::{
    Context,
    js_string,
    object::{JsObject, builtins::JsArray},
    property::PropertyKey,
    value::JsValue,
};
use prerender_common::{RenderError, Result};
use serde_json::Value as JsonValue;

/// Deepest nesting either direction will follow.
pub const MAX_DEPTH: usize = 128;

/// Longest script array [`js_value_to_json`] will walk.
pub const MAX_ARRAY_LEN: u64 = 1 << 20;

/// Upper bound on what an array's reported length may preallocate.
const PREALLOC_LIMIT: u64 = 1024;

/// Convert a `serde_json::Value` into a Boa `JsValue`.
///
/// # Errors
///
/// Returns `RenderError::ParamsBinding` if:
/// - The value is nested deeper than [`MAX_DEPTH`]
/// - A number cannot be represented as a JavaScript Number
/// - Object property creation or array push fails
///
/// # Examples
///
/// ```ignore
/// let mut ctx = Context::default();
/// let js_value = json_to_js_value(&json!({"name": "test", "value": 42}), &mut ctx)?;
/// ```
pub fn json_to_js_value(json: &JsonValue, ctx: &mut Context) -> Result<JsValue> {
    json_to_js_at_depth(json, ctx, 0)
}

fn json_to_js_at_depth(json: &JsonValue, ctx: &mut Context, depth: usize) -> Result<JsValue> {
    if depth > MAX_DEPTH {
        return Err(RenderError::ParamsBinding(format!(
            "value nested deeper than {} levels",
            MAX_DEPTH
        )));
    }

    match json {
        JsonValue::Null => Ok(JsValue::null()),
        JsonValue::Bool(b) => Ok(JsValue::new(*b)),
        JsonValue::Number(n) => n
            .as_f64()
            .map(JsValue::new)
            .ok_or_else(|| RenderError::ParamsBinding(format!("number {} out of range", n))),
        JsonValue::String(s) => Ok(JsValue::new(js_string!(s.as_str()))),
        JsonValue::Array(arr) => {
            let js_array = JsArray::new(ctx);
            for (i, v) in arr.iter().enumerate() {
                let js_value = json_to_js_at_depth(v, ctx, depth + 1)?;
                js_array.push(js_value, ctx).map_err(|e| {
                    RenderError::ParamsBinding(format!("failed to push array element {}: {}", i, e))
                })?;
            }
            Ok(js_array.into())
        }
        JsonValue::Object(obj) => {
            let js_obj = JsObject::with_object_proto(ctx.intrinsics());

            for (key, value) in obj {
                let js_value = json_to_js_at_depth(value, ctx, depth + 1)?;
                js_obj
                    .create_data_property_or_throw(js_string!(key.as_str()), js_value, ctx)
                    .map_err(|e| {
                        RenderError::ParamsBinding(format!("failed to set property '{}': {}", key, e))
                    })?;
            }

            Ok(js_obj.into())
        }
    }
}

/// Convert a Boa `JsValue` into a `serde_json::Value`.
///
/// # Conversion Rules
///
/// - `undefined` and `null` → JSON `null`
/// - `Boolean`, `Number`, `String` → the matching JSON primitive
/// - `Array` → JSON `array` (recursively converts elements)
/// - `Object` → JSON `object` (skips symbol keys, recursively converts values)
/// - Non-finite numbers, symbols and functions → JSON `null`
///
/// # Errors
///
/// Returns `RenderError::Script` if property access throws, and
/// `RenderError::ParamsBinding` if the value is nested too deeply or holds an
/// array longer than [`MAX_ARRAY_LEN`].
pub fn js_value_to_json(value: &JsValue, ctx: &mut Context) -> Result<JsonValue> {
    js_to_json_at_depth(value, ctx, 0)
}

fn js_to_json_at_depth(value: &JsValue, ctx: &mut Context, depth: usize) -> Result<JsonValue> {
    if depth > MAX_DEPTH {
        return Err(RenderError::ParamsBinding(format!(
            "value nested deeper than {} levels",
            MAX_DEPTH
        )));
    }

    if value.is_undefined() || value.is_null() {
        return Ok(JsonValue::Null);
    }

    if let Some(b) = value.as_boolean() {
        return Ok(JsonValue::Bool(b));
    }

    if let Some(i) = value.as_i32() {
        return Ok(JsonValue::Number(i.into()));
    }

    if let Some(n) = value.as_number() {
        if n.fract() == 0.0 && n.abs() < (1u64 << 53) as f64 {
            return Ok(JsonValue::Number((n as i64).into()));
        }
        return Ok(serde_json::Number::from_f64(n)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null));
    }

    if let Some(s) = value.as_string() {
        return Ok(JsonValue::String(s.to_std_string_escaped()));
    }

    let Some(obj) = value.as_object() else {
        // Symbols and bigints have no JSON form
        return Ok(JsonValue::Null);
    };

    if obj.is_callable() {
        return Ok(JsonValue::Null);
    }

    if obj.is_array() {
        let array = JsArray::from_object(obj.clone())
            .map_err(|e| RenderError::Script(format!("object is not a valid array: {}", e)))?;

        let length = array
            .length(ctx)
            .map_err(|e| RenderError::Script(format!("failed to get array length: {}", e)))?;

        if length > MAX_ARRAY_LEN {
            return Err(RenderError::ParamsBinding(format!(
                "array of length {} exceeds the limit of {}",
                length, MAX_ARRAY_LEN
            )));
        }

        let mut result = Vec::with_capacity(length.min(PREALLOC_LIMIT) as usize);
        for i in 0..length {
            let elem = array
                .get(i, ctx)
                .map_err(|e| RenderError::Script(format!("failed to get array element {}: {}", i, e)))?;
            result.push(js_to_json_at_depth(&elem, ctx, depth + 1)?);
        }
        return Ok(JsonValue::Array(result));
    }

    let keys = obj
        .own_property_keys(ctx)
        .map_err(|e| RenderError::Script(format!("failed to get object keys: {}", e)))?;

    let mut result = serde_json::Map::new();

    for key in keys {
        let key_str = match &key {
            PropertyKey::String(s) => s.to_std_string_escaped(),
            PropertyKey::Index(i) => i.get().to_string(),
            PropertyKey::Symbol(_) => continue,
        };

        let prop_value = obj
            .get(key.clone(), ctx)
            .map_err(|e| RenderError::Script(format!("failed to get property '{}': {}", key_str, e)))?;
        result.insert(key_str, js_to_json_at_depth(&prop_value, ctx, depth + 1)?);
    }

    Ok(JsonValue::Object(result))
}
