//! JSON manipulation for stitched responses.

use serde_json_bytes::ByteString;
use serde_json_bytes::Entry;
use serde_json_bytes::Map;
pub(crate) use serde_json_bytes::Value;

use crate::spec::ID_FIELD;

/// A JSON object.
pub(crate) type Object = Map<ByteString, Value>;

/// Extension trait for [`serde_json_bytes::Value`].
pub(crate) trait ValueExt {
    /// Deep merge `other` into `self`. Objects merge key-by-key; arrays are
    /// aligned by entity `id` when present, positionally otherwise.
    fn deep_merge(&mut self, other: Self);
}

impl ValueExt for Value {
    fn deep_merge(&mut self, other: Self) {
        match (self, other) {
            (Value::Object(left), Value::Object(right)) => merge_objects(left, right),
            (Value::Array(left), Value::Array(right)) => merge_arrays(left, right),
            (left, right) => *left = right,
        }
    }
}

pub(crate) fn merge_objects(left: &mut Object, right: Object) {
    for (key, value) in right {
        match left.entry(key) {
            Entry::Vacant(entry) => {
                entry.insert(value);
            }
            Entry::Occupied(entry) => {
                entry.into_mut().deep_merge(value);
            }
        }
    }
}

/// Merge the right array into the left one. An element carrying an `id` is
/// merged into the left element with the same `id`; elements without a
/// usable identity merge positionally, and the remainder is appended.
fn merge_arrays(left: &mut Vec<Value>, right: Vec<Value>) {
    for (index, value) in right.into_iter().enumerate() {
        let id = value
            .as_object()
            .and_then(|object| object.get(ID_FIELD))
            .cloned();
        if let Some(id) = id {
            if let Some(target) = left.iter_mut().find(|candidate| {
                candidate
                    .as_object()
                    .and_then(|object| object.get(ID_FIELD))
                    .is_some_and(|candidate_id| *candidate_id == id)
            }) {
                target.deep_merge(value);
                continue;
            }
        }
        if index < left.len() {
            if value.is_object() {
                left[index].deep_merge(value);
            } else {
                left.push(value);
            }
        } else {
            left.push(value);
        }
    }
}
