//! Engine construction parameters.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

/// The key/value set handed to the engine constructor.
///
/// The engine treats an explicit null differently from an omitted key, so
/// empty values never make it into the map: `set` drops them, and setting an
/// empty value over an existing key removes that key.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct EngineParams(BTreeMap<String, Value>);

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

impl EngineParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: &str, value: impl Into<Value>) -> &mut Self {
        let value = value.into();
        if is_empty(&value) {
            self.0.remove(key);
        } else {
            self.0.insert(key.to_string(), value);
        }
        self
    }

    pub fn set_opt<T: Into<Value>>(&mut self, key: &str, value: Option<T>) -> &mut Self {
        match value {
            Some(v) => self.set(key, v),
            None => {
                self.0.remove(key);
                self
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn model(&self) -> Option<&str> {
        self.get("model").and_then(Value::as_str)
    }

    /// Name the engine answers to: the served alias if one is set, else the model.
    pub fn served_name(&self) -> Option<&str> {
        self.get("served_model_name")
            .and_then(Value::as_str)
            .or_else(|| self.model())
    }

    pub fn max_model_len(&self) -> Option<u32> {
        self.get("max_model_len")
            .and_then(Value::as_u64)
            .and_then(|v| u32::try_from(v).ok())
    }

    /// Renders the parameters as `vllm serve` command-line arguments.
    ///
    /// `model` becomes the positional argument; `true` booleans become bare
    /// flags and `false` ones are omitted; objects are passed as JSON.
    pub fn to_cli_args(&self) -> Vec<String> {
        let mut args = Vec::with_capacity(self.0.len() * 2 + 1);
        if let Some(model) = self.model() {
            args.push(model.to_string());
        }

        for (key, value) in self.iter() {
            if key == "model" {
                continue;
            }
            let flag = format!("--{}", key.replace('_', "-"));
            match value {
                Value::Bool(true) => args.push(flag),
                Value::Bool(false) | Value::Null => {}
                Value::String(s) => {
                    args.push(flag);
                    args.push(s.clone());
                }
                Value::Number(n) => {
                    args.push(flag);
                    args.push(n.to_string());
                }
                Value::Array(_) | Value::Object(_) => {
                    args.push(flag);
                    args.push(value.to_string());
                }
            }
        }
        args
    }
}
