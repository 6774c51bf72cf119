//! Task config blob parsing.
//!
//! Task configuration arrives as an opaque JSON blob authored by the control
//! plane. `Parser` walks it field by field, substituting defaults for
//! anything invalid while accumulating error messages keyed by config path
//! (`"channels.0.port"`). Factories check `ok()` once at the end and report
//! the whole error map in a single `variant=error` state record, so an
//! operator sees every problem with a blob at once rather than one per
//! round-trip.

use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};

pub struct Parser {
    value: Value,
    prefix: String,
    errors: Vec<(String, String)>,
}

impl Parser {
    /// Parses a raw JSON blob. A malformed blob yields a parser that is
    /// immediately not-ok, with the syntax error recorded at the root path.
    pub fn new(raw: &str) -> Self {
        match serde_json::from_str(raw) {
            Ok(value) => Parser::from_value(value),
            Err(err) => {
                let mut p = Parser::from_value(Value::Null);
                p.errors.push(("config".to_string(), format!("invalid JSON: {err}")));
                p
            }
        }
    }

    pub fn from_value(value: Value) -> Self {
        Parser {
            value,
            prefix: String::new(),
            errors: Vec::new(),
        }
    }

    fn path(&self, key: &str) -> String {
        if self.prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}.{}", self.prefix, key)
        }
    }

    /// Reads a required field, recording an error and returning the type's
    /// default when the field is missing or of the wrong shape.
    pub fn required<T>(&mut self, key: &str) -> T
    where
        T: DeserializeOwned + Default,
    {
        match self.value.get(key) {
            None => {
                self.record(key, "required field missing");
                T::default()
            }
            Some(field) => match serde_json::from_value(field.clone()) {
                Ok(v) => v,
                Err(err) => {
                    self.record(key, format!("invalid value: {err}"));
                    T::default()
                }
            },
        }
    }

    /// Reads an optional field, falling back to the given default when
    /// absent. A present-but-malformed field is still an error.
    pub fn optional<T>(&mut self, key: &str, default: T) -> T
    where
        T: DeserializeOwned,
    {
        match self.value.get(key) {
            None => default,
            Some(field) => match serde_json::from_value(field.clone()) {
                Ok(v) => v,
                Err(err) => {
                    self.record(key, format!("invalid value: {err}"));
                    default
                }
            },
        }
    }

    /// Visits each element of an array field with a child parser whose error
    /// paths are prefixed `key.<index>`. A missing or non-array field is an
    /// error.
    pub fn iter(&mut self, key: &str, mut f: impl FnMut(&mut Parser)) {
        let elements = match self.value.get(key) {
            Some(Value::Array(elements)) => elements.clone(),
            Some(_) => {
                self.record(key, "expected an array");
                return;
            }
            None => {
                self.record(key, "required field missing");
                return;
            }
        };
        let base = self.path(key);
        for (i, element) in elements.into_iter().enumerate() {
            let mut child = Parser {
                value: element,
                prefix: format!("{base}.{i}"),
                errors: Vec::new(),
            };
            f(&mut child);
            self.errors.append(&mut child.errors);
        }
    }

    /// Records a semantic error at a field path, for rules that span fields
    /// (e.g. rate divisibility).
    pub fn record(&mut self, key: &str, message: impl Into<String>) {
        let path = self.path(key);
        self.errors.push((path, message.into()));
    }

    /// The raw value under this parser, for opaque pass-through config.
    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn ok(&self) -> bool {
        self.errors.is_empty()
    }

    /// The accumulated errors as a `path -> message` JSON object, written
    /// verbatim into `variant=error` state details.
    pub fn error_json(&self) -> Value {
        let mut map = Map::new();
        for (path, message) in &self.errors {
            map.insert(path.clone(), json!(message));
        }
        Value::Object(map)
    }
}
