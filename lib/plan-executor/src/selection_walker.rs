use serde_json::{Map, Value};

use crate::deep_merge::DeepMerge;
use crate::rewrites::{update_rewrites, PendingRewrite, RewriteStep};
use crate::schema_metadata::SchemaMetadata;
use crate::selection::{SelectionItem, SelectionSet};
use crate::TYPENAME_FIELD;

/// Builds the representation object for one entity out of the response
/// tree. Returns `None` when the entity is unusable: a selected field is
/// absent because an earlier fetch nullified it (the entity is dropped
/// without a duplicate error), or a required `__typename` is missing.
pub(crate) fn execute_selection_set(
    metadata: &SchemaMetadata,
    source: &Value,
    selections: &SelectionSet,
    rewrites: &[PendingRewrite<'_>],
) -> Option<Value> {
    let source_obj = match source {
        Value::Object(map) => map,
        _ => return None,
    };

    let mut output = Map::new();
    for selection in &selections.items {
        match selection {
            SelectionItem::Field(field) => {
                let response_key = field.response_key();
                let source_value = source_obj.get(response_key)?;
                let updated = update_rewrites(
                    rewrites,
                    RewriteStep::Field(response_key),
                    &metadata.possible_types,
                );
                let field_value = match updated.complete {
                    Some(replacement) => replacement.clone(),
                    None => project_field_value(
                        metadata,
                        source_value,
                        field.selections.as_ref(),
                        &updated.advancing,
                    )?,
                };
                merge_entry(&mut output, response_key, field_value);
            }
            SelectionItem::InlineFragment(fragment) => {
                let fragment_rewrites;
                match &fragment.type_condition {
                    Some(condition) => {
                        let type_name = source_obj.get(TYPENAME_FIELD)?.as_str()?;
                        if !metadata
                            .possible_types
                            .entity_satisfies_type_condition(type_name, condition)
                        {
                            continue;
                        }
                        fragment_rewrites = update_rewrites(
                            rewrites,
                            RewriteStep::TypeCondition(condition),
                            &metadata.possible_types,
                        )
                        .advancing;
                    }
                    None => fragment_rewrites = rewrites.to_vec(),
                }
                let fragment_value =
                    execute_selection_set(metadata, source, &fragment.selections, &fragment_rewrites)?;
                if let Value::Object(fragment_obj) = fragment_value {
                    for (key, value) in fragment_obj {
                        merge_entry(&mut output, &key, value);
                    }
                }
            }
        }
    }

    if output.is_empty() {
        return None;
    }
    Some(Value::Object(output))
}

/// A representation is only sent when it names its runtime type.
pub(crate) fn extract_representation(
    metadata: &SchemaMetadata,
    source: &Value,
    requires: &SelectionSet,
    rewrites: &[PendingRewrite<'_>],
) -> Option<Value> {
    let representation = execute_selection_set(metadata, source, requires, rewrites)?;
    match representation.get(TYPENAME_FIELD) {
        Some(Value::String(_)) => Some(representation),
        _ => None,
    }
}

fn project_field_value(
    metadata: &SchemaMetadata,
    source_value: &Value,
    selections: Option<&SelectionSet>,
    rewrites: &[PendingRewrite<'_>],
) -> Option<Value> {
    match (source_value, selections) {
        (Value::Null, _) => Some(Value::Null),
        (Value::Array(items), _) => {
            let mut projected = Vec::with_capacity(items.len());
            for item in items {
                projected.push(project_field_value(metadata, item, selections, rewrites)?);
            }
            Some(Value::Array(projected))
        }
        (Value::Object(_), Some(selections)) if !selections.is_empty() => {
            execute_selection_set(metadata, source_value, selections, rewrites)
        }
        (value, _) => Some(value.clone()),
    }
}

fn merge_entry(output: &mut Map<String, Value>, key: &str, value: Value) {
    match output.get_mut(key) {
        Some(existing) => existing.deep_merge(value),
        None => {
            output.insert(key.to_string(), value);
        }
    }
}
