use serde_json::Value;
use tracing::warn;

use crate::deep_merge::DeepMerge;
use crate::plan::FlattenPathSegment;
use crate::response::ResponsePathSegment;

/// Walks `remaining` through `data`, invoking the callback once per value
/// the path resolves to, together with the concrete path that reached it.
/// `@` fans out over arrays (recording the index), field steps descend into
/// objects, and a trailing array is flattened element-wise. Dead ends (null
/// or absent values) produce no callbacks.
pub(crate) fn traverse_path<'a, Callback>(
    data: &'a Value,
    current_path: Vec<ResponsePathSegment>,
    remaining: &[FlattenPathSegment],
    callback: &mut Callback,
) where
    Callback: FnMut(Vec<ResponsePathSegment>, &'a Value),
{
    if data.is_null() {
        return;
    }
    if remaining.is_empty() {
        match data {
            Value::Array(items) => {
                for (index, item) in items.iter().enumerate() {
                    if item.is_null() {
                        continue;
                    }
                    let mut item_path = current_path.clone();
                    item_path.push(ResponsePathSegment::Index(index));
                    callback(item_path, item);
                }
            }
            _ => callback(current_path, data),
        }
        return;
    }

    let rest = &remaining[1..];
    match &remaining[0] {
        FlattenPathSegment::List => {
            if let Value::Array(items) = data {
                for (index, item) in items.iter().enumerate() {
                    let mut item_path = current_path.clone();
                    item_path.push(ResponsePathSegment::Index(index));
                    traverse_path(item, item_path, rest, callback);
                }
            } else {
                warn!("expected an array at '@', found: {:?}", data);
            }
        }
        FlattenPathSegment::Field(field_name) => {
            if let Value::Object(map) = data {
                if let Some(next) = map.get(field_name) {
                    let mut field_path = current_path;
                    field_path.push(ResponsePathSegment::Field(field_name.to_string()));
                    traverse_path(next, field_path, rest, callback);
                }
            } else {
                warn!(
                    "expected an object at path segment '{}', found: {:?}",
                    field_name, data
                );
            }
        }
    }
}

/// Places `value` at a concrete path, growing intermediate objects and
/// arrays as needed and deep-merging at the destination.
pub(crate) trait SetPathValue {
    fn set_path_value(&mut self, path: &[ResponsePathSegment], value: Value);
}

impl SetPathValue for Value {
    fn set_path_value(&mut self, path: &[ResponsePathSegment], value: Value) {
        let Some(current_segment) = path.first() else {
            self.deep_merge(value);
            return;
        };
        let rest = &path[1..];

        if self.is_null() {
            *self = match current_segment {
                ResponsePathSegment::Index(index) => Value::Array(vec![Value::Null; index + 1]),
                ResponsePathSegment::Field(_) => Value::Object(serde_json::Map::with_capacity(1)),
            };
        }

        match (self, current_segment) {
            (Value::Array(items), ResponsePathSegment::Index(index)) => {
                if *index >= items.len() {
                    items.resize(index + 1, Value::Null);
                }
                items[*index].set_path_value(rest, value);
            }
            (Value::Object(map), ResponsePathSegment::Field(field)) => {
                map.entry(field.to_string())
                    .or_insert(Value::Null)
                    .set_path_value(rest, value);
            }
            (data, segment) => {
                warn!(
                    "cannot place value at path segment {:?} in {:?}",
                    segment, data
                );
            }
        }
    }
}
