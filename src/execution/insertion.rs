//! Locating where step results belong in the accumulated response.

use crate::error::FetchError;
use crate::execution::point_data::is_list_element;
use crate::execution::point_data::CachedPointDataExtractor;
use crate::json_ext::Object;
use crate::json_ext::Value;
use crate::spec::find_selection;
use crate::spec::Selection;
use crate::spec::ID_FIELD;
use crate::spec::TYPENAME;

/// Walks `source` along `path`, materializing objects and list slots that
/// don't exist yet, and returns the object at the end of the path. This is
/// the write side of stitching: the caller merges a step result into the
/// returned object.
pub(crate) fn extract_value_modifying_source<'a>(
    extractor: &CachedPointDataExtractor,
    source: &'a mut Object,
    path: &[String],
) -> Result<&'a mut Object, FetchError> {
    let mut current = source;

    for point in path {
        let data = extractor.extract(point)?;

        if is_list_element(point) {
            let index = data.index.unwrap_or(0);
            let entry = current
                .entry(data.field.as_str())
                .or_insert_with(|| Value::Array(Vec::new()));
            let Value::Array(list) = entry else {
                return Err(FetchError::stitching(format!(
                    "did not encounter a list when expected. Point: {point}"
                )));
            };
            while list.len() <= index {
                list.push(Value::Object(Object::default()));
            }
            current = match &mut list[index] {
                Value::Object(object) => object,
                other => {
                    return Err(FetchError::stitching(format!(
                        "did not encounter a map when expected. Point: {point}. Value: {other:?}"
                    )))
                }
            };
        } else {
            let entry = current
                .entry(data.field.as_str())
                .or_insert_with(|| Value::Object(Object::default()));
            if entry.is_null() {
                *entry = Value::Object(Object::default());
            }
            current = match entry {
                Value::Object(object) => object,
                other => {
                    return Err(FetchError::stitching(format!(
                        "did not encounter a map when expected. Point: {point}. Value: {other:?}"
                    )))
                }
            };
        }
    }

    Ok(current)
}

/// Computes the concrete insertion points for a child step: one per
/// materialized entity reachable along `target_points` in `result`.
///
/// `starting_points` carries the branches accumulated so far; it is
/// non-empty when the caller is already iterating list elements.
pub(crate) fn find_insertion_points(
    target_points: &[String],
    selection_set: &[Selection],
    result: &Object,
    starting_points: Vec<Vec<String>>,
) -> Result<Vec<Vec<String>>, FetchError> {
    let mut branches = starting_points;

    let starting_index = branches.first().map(|branch| branch.len()).unwrap_or(0);
    if let Some(first) = branches.first() {
        if first.len() == target_points.len() {
            return Ok(branches);
        }
    }

    let mut selection_root = selection_set;
    let mut chunk = result;

    for point_index in starting_index..target_points.len() {
        let point = &target_points[point_index];
        let last_segment = point_index == target_points.len() - 1;

        let Some(found) = find_selection(selection_root, point) else {
            return Ok(Vec::new());
        };
        selection_root = &found.selection_set;

        let Some(root_value) = chunk.get(point.as_str()) else {
            return Ok(Vec::new());
        };

        if root_value.is_null() {
            if found.ty.non_null {
                return Err(FetchError::stitching(format!(
                    "received null for required field: {}",
                    found.name
                )));
            }
            return Ok(Vec::new());
        }

        if found.ty.is_list {
            let Value::Array(list) = root_value else {
                return Err(FetchError::stitching(format!(
                    "root value of result chunk was not a list. Point: {point}"
                )));
            };

            let mut collected = Vec::new();
            for (entry_index, entry) in list.iter().enumerate() {
                let Value::Object(entry_object) = entry else {
                    return Err(FetchError::stitching("entry in result wasn't a map"));
                };

                let mut entry_point = format!("{}:{entry_index}", found.response_key());

                let mut next_branches = branches.clone();
                if next_branches.is_empty() {
                    next_branches.push(vec![entry_point.clone()]);
                } else {
                    if last_segment {
                        match extract_id(entry_object)? {
                            Some(id) => entry_point = format!("{entry_point}#{id}"),
                            None => return Ok(Vec::new()),
                        }
                    }
                    for branch in &mut next_branches {
                        branch.push(entry_point.clone());
                    }
                }

                collected.extend(find_insertion_points(
                    target_points,
                    selection_root,
                    entry_object,
                    next_branches,
                )?);
            }
            return Ok(collected);
        }

        if let Value::Object(next) = root_value {
            chunk = next;
        }

        for branch in &mut branches {
            branch.push(point.clone());
        }

        if last_segment {
            match root_value {
                // the caller is iterating a list: branch i maps to entry i
                Value::Array(list) => {
                    for (index, branch) in branches.iter_mut().enumerate() {
                        let entry = list
                            .get(index)
                            .and_then(|value| value.as_object())
                            .ok_or_else(|| {
                                FetchError::stitching("item in root list isn't a map")
                            })?;
                        match extract_id(entry)? {
                            Some(id) => {
                                if let Some(last) = branch.last_mut() {
                                    *last = format!("{last}:{index}#{id}");
                                }
                            }
                            None => return Ok(Vec::new()),
                        }
                    }
                }
                Value::Object(object) => {
                    for branch in &mut branches {
                        match extract_id(object)? {
                            Some(id) => {
                                if let Some(last) = branch.last_mut() {
                                    *last = format!("{last}#{id}");
                                }
                            }
                            None => return Ok(Vec::new()),
                        }
                    }
                }
                other => {
                    return Err(FetchError::stitching(format!(
                        "root value of result chunk was not an object. Point: {point}. Value: {other:?}"
                    )))
                }
            }
        }
    }

    Ok(branches)
}

/// The entity's id, rendered into a path atom. An object carrying only
/// `__typename` is an implementer the query did not select into; it yields
/// no insertion point rather than an error.
fn extract_id(object: &Object) -> Result<Option<String>, FetchError> {
    match object.get(ID_FIELD) {
        Some(Value::String(id)) => Ok(Some(id.as_str().to_string())),
        Some(other) => Ok(Some(other.to_string())),
        None => {
            if object.len() == 1 && object.contains_key(TYPENAME) {
                return Ok(None);
            }
            Err(FetchError::stitching(format!(
                "could not find the id for elements in target list: {object:?}"
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json_bytes::json;

    use super::*;
    use crate::spec::Schema;

    fn object(value: Value) -> Object {
        match value {
            Value::Object(object) => object,
            other => panic!("expected an object, got {other:?}"),
        }
    }

    fn selections(query: &str) -> Vec<Selection> {
        let schema = Schema::parse(
            r#"
            interface Node { id: ID! }
            type Photo implements Node { id: ID! url: String }
            type User implements Node {
                id: ID!
                name: String
                photo: Photo
                friends: [User]
                photos: [Photo]!
            }
            type Query { user: User users: [User] }
            "#,
        )
        .unwrap();
        let document = schema.parse_operation(query).unwrap();
        let operation = document.operations.get(None).unwrap();
        Selection::from_operation(operation, &document)
    }

    #[test]
    fn modifying_extraction_builds_missing_structure() {
        let extractor = CachedPointDataExtractor::new();
        let mut source = Object::default();
        {
            let target = extract_value_modifying_source(
                &extractor,
                &mut source,
                &["users".to_string(), "friends:1".to_string()],
            )
            .unwrap();
            target.insert("name", json!("iris"));
        }
        assert_eq!(
            Value::Object(source),
            json!({"users": {"friends": [{}, {"name": "iris"}]}})
        );
    }

    #[test]
    fn modifying_extraction_descends_existing_structure() {
        let extractor = CachedPointDataExtractor::new();
        let mut source = object(json!({"user": {"id": "1", "friends": [{"id": "2"}]}}));
        {
            let target = extract_value_modifying_source(
                &extractor,
                &mut source,
                &["user".to_string(), "friends:0#2".to_string()],
            )
            .unwrap();
            target.insert("name", json!("ada"));
        }
        assert_eq!(
            Value::Object(source),
            json!({"user": {"id": "1", "friends": [{"id": "2", "name": "ada"}]}})
        );
    }

    #[test]
    fn modifying_extraction_rejects_shape_mismatches() {
        let extractor = CachedPointDataExtractor::new();
        let mut source = object(json!({"users": {"not": "a list"}}));
        let error = extract_value_modifying_source(
            &extractor,
            &mut source,
            &["users:0".to_string()],
        )
        .unwrap_err();
        assert!(error.to_string().contains("did not encounter a list"));
    }

    #[test]
    fn single_object_yields_one_point_with_id() {
        let set = selections("{ user { id photo { id url } } }");
        let user_set = &set[0].as_field().unwrap().selection_set;
        let result = object(json!({"id": "User_1", "photo": {"id": "Photo_1"}}));
        let points = find_insertion_points(
            &["user".to_string(), "photo".to_string()],
            user_set,
            &result,
            vec![vec!["user".to_string()]],
        )
        .unwrap();
        assert_eq!(points, vec![vec!["user".to_string(), "photo#Photo_1".to_string()]]);
    }

    #[test]
    fn lists_fan_out_one_point_per_entity() {
        let set = selections("{ users { id friends { id } } }");
        let result = object(json!({
            "users": [
                {"id": "1", "friends": [{"id": "2"}, {"id": "3"}]},
                {"id": "4", "friends": [{"id": "5"}]}
            ]
        }));
        let points = find_insertion_points(
            &["users".to_string(), "friends".to_string()],
            &set,
            &result,
            vec![Vec::new()],
        )
        .unwrap();
        assert_eq!(
            points,
            vec![
                vec!["users:0".to_string(), "friends:0#2".to_string()],
                vec!["users:0".to_string(), "friends:1#3".to_string()],
                vec!["users:1".to_string(), "friends:0#5".to_string()],
            ]
        );
    }

    #[test]
    fn missing_keys_yield_no_points() {
        let set = selections("{ user { id photo { id url } } }");
        let user_set = &set[0].as_field().unwrap().selection_set;
        let points = find_insertion_points(
            &["user".to_string(), "photo".to_string()],
            user_set,
            &object(json!({"id": "User_1"})),
            vec![vec!["user".to_string()]],
        )
        .unwrap();
        assert!(points.is_empty());
    }

    #[test]
    fn null_on_nullable_yields_no_points() {
        let set = selections("{ user { id photo { id url } } }");
        let user_set = &set[0].as_field().unwrap().selection_set;
        let points = find_insertion_points(
            &["user".to_string(), "photo".to_string()],
            user_set,
            &object(json!({"id": "User_1", "photo": null})),
            vec![vec!["user".to_string()]],
        )
        .unwrap();
        assert!(points.is_empty());
    }

    #[test]
    fn null_on_non_null_is_an_error() {
        let set = selections("{ user { id photos { id url } } }");
        let user_set = &set[0].as_field().unwrap().selection_set;
        let error = find_insertion_points(
            &["user".to_string(), "photos".to_string()],
            user_set,
            &object(json!({"id": "User_1", "photos": null})),
            vec![vec!["user".to_string()]],
        )
        .unwrap_err();
        assert!(error.to_string().contains("received null for required field"));
    }

    #[test]
    fn typename_only_entities_are_skipped() {
        let set = selections("{ users { id photo { id } } }");
        let points = find_insertion_points(
            &["users".to_string()],
            &set,
            &object(json!({"users": [{"__typename": "OtherUser"}]})),
            vec![Vec::new()],
        )
        .unwrap();
        assert!(points.is_empty());
    }

    #[test]
    fn entities_without_ids_are_errors() {
        let set = selections("{ users { id photo { id } } }");
        let error = find_insertion_points(
            &["users".to_string()],
            &set,
            &object(json!({"users": [{"name": "no id"}]})),
            vec![Vec::new()],
        )
        .unwrap_err();
        assert!(error.to_string().contains("could not find the id"));
    }
}
