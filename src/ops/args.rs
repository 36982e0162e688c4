use std::collections::HashMap;

use serde_json::Value;

use crate::error::{ServerError, ServerResult};

/// JSON-pointer argument extraction against a tool's `op.map`. Every typed
/// accessor validates once at this boundary; handlers then work with typed
/// data only.
pub struct ArgMap<'a> {
    map: &'a HashMap<String, String>,
    args: &'a Value,
}

impl<'a> ArgMap<'a> {
    pub fn new(map: &'a HashMap<String, String>, args: &'a Value) -> Self {
        Self { map, args }
    }

    fn resolve(&self, key: &str) -> Option<&'a Value> {
        self.map.get(key).and_then(|ptr| self.args.pointer(ptr))
    }

    fn missing(key: &str) -> ServerError {
        ServerError::invalid_arguments(format!("missing required argument '{key}'"))
    }

    fn wrong_type(key: &str, expected: &str) -> ServerError {
        ServerError::invalid_arguments(format!("argument '{key}' must be {expected}"))
    }

    pub fn req_str(&self, key: &str) -> ServerResult<String> {
        let v = self.resolve(key).ok_or_else(|| Self::missing(key))?;
        v.as_str()
            .map(str::to_string)
            .ok_or_else(|| Self::wrong_type(key, "a string"))
    }

    pub fn opt_str(&self, key: &str) -> ServerResult<Option<String>> {
        match self.resolve(key) {
            None => Ok(None),
            Some(Value::Null) => Ok(None),
            Some(v) => v
                .as_str()
                .map(|s| Some(s.to_string()))
                .ok_or_else(|| Self::wrong_type(key, "a string")),
        }
    }

    pub fn opt_i64(&self, key: &str) -> ServerResult<Option<i64>> {
        match self.resolve(key) {
            None => Ok(None),
            Some(Value::Null) => Ok(None),
            Some(v) => v
                .as_i64()
                .map(Some)
                .ok_or_else(|| Self::wrong_type(key, "an integer")),
        }
    }

    pub fn req_i64(&self, key: &str) -> ServerResult<i64> {
        self.opt_i64(key)?.ok_or_else(|| Self::missing(key))
    }

    pub fn opt_bool(&self, key: &str) -> ServerResult<Option<bool>> {
        match self.resolve(key) {
            None => Ok(None),
            Some(Value::Null) => Ok(None),
            Some(v) => v
                .as_bool()
                .map(Some)
                .ok_or_else(|| Self::wrong_type(key, "a boolean")),
        }
    }

    pub fn req_value(&self, key: &str) -> ServerResult<Value> {
        self.resolve(key)
            .cloned()
            .ok_or_else(|| Self::missing(key))
    }

    pub fn opt_value(&self, key: &str) -> Option<Value> {
        self.resolve(key).cloned().filter(|v| !v.is_null())
    }

    pub fn req_i64_vec(&self, key: &str) -> ServerResult<Vec<i64>> {
        let v = self.resolve(key).ok_or_else(|| Self::missing(key))?;
        let arr = v
            .as_array()
            .ok_or_else(|| Self::wrong_type(key, "an array of integers"))?;
        arr.iter()
            .map(|x| {
                x.as_i64()
                    .ok_or_else(|| Self::wrong_type(key, "an array of integers"))
            })
            .collect()
    }

    pub fn opt_str_vec(&self, key: &str) -> ServerResult<Option<Vec<String>>> {
        let Some(v) = self.resolve(key) else {
            return Ok(None);
        };
        if v.is_null() {
            return Ok(None);
        }
        let arr = v
            .as_array()
            .ok_or_else(|| Self::wrong_type(key, "an array of strings"))?;
        arr.iter()
            .map(|x| {
                x.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| Self::wrong_type(key, "an array of strings"))
            })
            .collect::<ServerResult<Vec<_>>>()
            .map(Some)
    }
}
