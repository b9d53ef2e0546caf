use serde_yaml::{Mapping, Value};

use crate::error::{RelayError, RelayResult};

/// Read-only view over one named configuration section.
///
/// Sections are dynamically typed: each plugin owns the schema of its own
/// section and pulls options out with the typed getters below. A type
/// mismatch is a configuration error, which is fatal at load time.
#[derive(Debug, Clone, Copy)]
pub struct Section<'a> {
    name: &'a str,
    // None models a section that is present but empty (`segment-proxy:`).
    map: Option<&'a Mapping>,
}

impl<'a> Section<'a> {
    pub(crate) fn new(name: &'a str, map: Option<&'a Mapping>) -> Self {
        Self { name, map }
    }

    /// The section name, which is also the owning plugin's name.
    pub fn name(&self) -> &str {
        self.name
    }

    /// Raw access to an option value.
    pub fn get(&self, key: &str) -> Option<&'a Value> {
        self.map.and_then(|m| m.get(key))
    }

    /// Whether an option is present (with any value, including null).
    pub fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Whether the section carries no options at all.
    pub fn is_empty(&self) -> bool {
        self.map.map(|m| m.is_empty()).unwrap_or(true)
    }

    fn type_error(&self, key: &str, expected: &str) -> RelayError {
        RelayError::config(format!(
            "option '{}.{}' must be {}",
            self.name, key, expected
        ))
    }

    /// An option parsed as a string.
    pub fn get_str(&self, key: &str) -> RelayResult<Option<String>> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(_) => Err(self.type_error(key, "a string")),
        }
    }

    /// An option parsed as a non-negative integer.
    pub fn get_u64(&self, key: &str) -> RelayResult<Option<u64>> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(n)) => n
                .as_u64()
                .map(Some)
                .ok_or_else(|| self.type_error(key, "a non-negative integer")),
            Some(_) => Err(self.type_error(key, "a non-negative integer")),
        }
    }

    /// An option parsed as a boolean.
    pub fn get_bool(&self, key: &str) -> RelayResult<Option<bool>> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(*b)),
            Some(_) => Err(self.type_error(key, "a boolean")),
        }
    }

    /// An option parsed as an ordered list of strings.
    pub fn get_str_list(&self, key: &str) -> RelayResult<Option<Vec<String>>> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Sequence(seq)) => {
                let mut out = Vec::with_capacity(seq.len());
                for item in seq {
                    match item {
                        Value::String(s) => out.push(s.clone()),
                        _ => return Err(self.type_error(key, "a list of strings")),
                    }
                }
                Ok(Some(out))
            }
            Some(_) => Err(self.type_error(key, "a list of strings")),
        }
    }

    /// An option parsed as an ordered string-to-string mapping.
    pub fn get_str_map(&self, key: &str) -> RelayResult<Option<Vec<(String, String)>>> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Mapping(map)) => {
                let mut out = Vec::with_capacity(map.len());
                for (k, v) in map {
                    match (k, v) {
                        (Value::String(k), Value::String(v)) => out.push((k.clone(), v.clone())),
                        _ => return Err(self.type_error(key, "a mapping of strings to strings")),
                    }
                }
                Ok(Some(out))
            }
            Some(_) => Err(self.type_error(key, "a mapping of strings to strings")),
        }
    }

    /// An option parsed as an ordered string-to-anything mapping, with
    /// values converted to JSON values.
    pub fn get_value_map(&self, key: &str) -> RelayResult<Option<Vec<(String, serde_json::Value)>>> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Mapping(map)) => {
                let mut out = Vec::with_capacity(map.len());
                for (k, v) in map {
                    let Value::String(k) = k else {
                        return Err(self.type_error(key, "a mapping with string keys"));
                    };
                    let v = serde_json::to_value(v).map_err(|e| {
                        RelayError::config(format!(
                            "option '{}.{}.{}' is not representable: {}",
                            self.name, key, k, e
                        ))
                    })?;
                    out.push((k.clone(), v));
                }
                Ok(Some(out))
            }
            Some(_) => Err(self.type_error(key, "a mapping")),
        }
    }

    /// All string-valued options of the section, in declaration order. Used
    /// by plugins whose whole section is one mapping (path rewrite rules).
    pub fn str_entries(&self) -> RelayResult<Vec<(String, String)>> {
        let Some(map) = self.map else {
            return Ok(Vec::new());
        };
        let mut out = Vec::with_capacity(map.len());
        for (k, v) in map {
            match (k, v) {
                (Value::String(k), Value::String(v)) => out.push((k.clone(), v.clone())),
                (Value::String(k), _) => {
                    return Err(RelayError::config(format!(
                        "option '{}.{}' must be a string",
                        self.name, k
                    )))
                }
                _ => {
                    return Err(RelayError::config(format!(
                        "section '{}' must use string keys",
                        self.name
                    )))
                }
            }
        }
        Ok(out)
    }

    /// An option parsed as an ordered list of single-entry string mappings,
    /// the shape used for rule lists such as `block-content.body`.
    pub fn get_rule_list(&self, key: &str) -> RelayResult<Option<Vec<(String, String)>>> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Sequence(seq)) => {
                let mut out = Vec::with_capacity(seq.len());
                for item in seq {
                    let Value::Mapping(map) = item else {
                        return Err(self.type_error(key, "a list of single-entry mappings"));
                    };
                    if map.len() != 1 {
                        return Err(self.type_error(key, "a list of single-entry mappings"));
                    }
                    for (k, v) in map {
                        match (k, v) {
                            (Value::String(k), Value::String(v)) => {
                                out.push((k.clone(), v.clone()))
                            }
                            _ => {
                                return Err(
                                    self.type_error(key, "a list of single-entry string mappings")
                                )
                            }
                        }
                    }
                }
                Ok(Some(out))
            }
            Some(_) => Err(self.type_error(key, "a list of single-entry mappings")),
        }
    }
}
