//! Removal of gateway-injected fields from the final response.
//!
//! The sanitizer adds `id` and `__typename` selections the client never
//! asked for. Each injection is recorded here under the response path of
//! its parent so the whole batch can be deleted after execution.

use std::collections::BTreeMap;

use crate::json_ext::Object;
use crate::json_ext::Value;
use crate::spec::TYPENAME;

const PATH_SEPARATOR: &str = ".";

/// `(insertion path, type name) -> fields to delete`.
#[derive(Debug, Clone, Default)]
pub struct ScrubFields {
    entries: BTreeMap<String, BTreeMap<String, Vec<String>>>,
}

impl ScrubFields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn hash(path: &[String]) -> String {
        path.join(PATH_SEPARATOR)
    }

    fn unhash(key: &str) -> Vec<&str> {
        if key.is_empty() {
            Vec::new()
        } else {
            key.split(PATH_SEPARATOR).collect()
        }
    }

    pub fn set(&mut self, path: &[String], type_name: &str, field: &str) {
        let fields = self
            .entries
            .entry(Self::hash(path))
            .or_default()
            .entry(type_name.to_string())
            .or_default();
        if !fields.iter().any(|known| known == field) {
            fields.push(field.to_string());
        }
    }

    pub fn get(&self, path: &[String], type_name: &str) -> Option<&[String]> {
        self.entries
            .get(&Self::hash(path))?
            .get(type_name)
            .map(|fields| fields.as_slice())
    }

    pub fn merge(&mut self, other: ScrubFields) {
        for (key, by_type) in other.entries {
            let target = self.entries.entry(key).or_default();
            for (type_name, fields) in by_type {
                let known = target.entry(type_name).or_default();
                for field in fields {
                    if !known.iter().any(|existing| existing == &field) {
                        known.push(field);
                    }
                }
            }
        }
    }

    /// Delete every registered synthetic field from the payload. Never
    /// fails: unexpected shapes are simply left alone.
    pub fn clean(&self, payload: &mut Object) {
        for (key, fields) in &self.entries {
            let path = Self::unhash(key);
            clean_object(payload, &path, fields);
        }
    }
}

/// Returns true when the object ended up empty and should be removed from
/// its parent.
fn clean_object(
    payload: &mut Object,
    path: &[&str],
    fields: &BTreeMap<String, Vec<String>>,
) -> bool {
    if path.is_empty() {
        let typename = payload
            .get(TYPENAME)
            .and_then(|value| value.as_str())
            .map(|value| value.to_string());
        for (type_name, field_names) in fields {
            if let Some(typename) = &typename {
                if typename != type_name {
                    continue;
                }
            }
            for field in field_names {
                payload.remove(field.as_str());
            }
            break;
        }
        return payload.is_empty();
    }

    let key = path[0];
    let Some(value) = payload.get_mut(key) else {
        return false;
    };

    let remove_parent = match value {
        Value::Object(object) => clean_object(object, &path[1..], fields),
        Value::Array(items) => {
            if items.is_empty() {
                false
            } else {
                let mut remove = true;
                for item in items {
                    if let Value::Object(object) = item {
                        remove &= clean_object(object, &path[1..], fields);
                    }
                }
                remove
            }
        }
        // null and scalar leaves stay put
        _ => false,
    };

    if remove_parent {
        payload.remove(key);
    }

    payload.is_empty()
}
