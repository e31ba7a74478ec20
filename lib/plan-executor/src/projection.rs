use std::collections::HashMap;

use serde_json::{Map, Value};
use tracing::{instrument, warn};

use crate::plan::OperationDefinition;
use crate::response::GraphQLError;
use crate::schema_metadata::SchemaMetadata;
use crate::selection::{FieldSelection, SelectionItem, SelectionSet};
use crate::TYPENAME_FIELD;

/// Resolves `__schema` / `__type` selections against the API schema. The
/// executor never answers introspection itself.
pub type IntrospectionHandler<'a> = &'a (dyn Fn(&FieldSelection) -> Value + Send + Sync);

#[derive(Debug, Clone, thiserror::Error)]
pub enum ProjectionError {
    #[error("operation root resolved to {found} instead of an object")]
    NonObjectRoot { found: &'static str },
}

/// Shapes the unfiltered merged tree against the client operation. Enum
/// leaves are validated against the API schema and invalid values null out
/// their position with an error; fields the plan never populated project as
/// null. Returns `None` when there is no data to shape.
#[instrument(level = "debug", skip_all, name = "post_processing")]
pub fn project_by_operation(
    data: &Value,
    operation: &OperationDefinition,
    api_metadata: &SchemaMetadata,
    variable_values: &Option<HashMap<String, Value>>,
    introspection: IntrospectionHandler<'_>,
    errors: &mut Vec<GraphQLError>,
) -> Result<Option<Value>, ProjectionError> {
    match data {
        Value::Null => Ok(None),
        Value::Object(obj) => {
            let mut output = Map::new();
            project_object_selections(
                obj,
                &mut output,
                errors,
                &operation.selection_set,
                operation.root_type_name(),
                api_metadata,
                variable_values,
                introspection,
            );
            Ok(Some(Value::Object(output)))
        }
        other => Err(ProjectionError::NonObjectRoot {
            found: json_type_name(other),
        }),
    }
}

#[allow(clippy::too_many_arguments)]
fn project_object_selections(
    obj: &Map<String, Value>,
    output: &mut Map<String, Value>,
    errors: &mut Vec<GraphQLError>,
    selection_set: &SelectionSet,
    static_type_name: &str,
    metadata: &SchemaMetadata,
    variable_values: &Option<HashMap<String, Value>>,
    introspection: IntrospectionHandler<'_>,
) {
    let type_name = match obj.get(TYPENAME_FIELD) {
        Some(Value::String(type_name)) => type_name.as_str(),
        _ => static_type_name,
    };
    for selection in &selection_set.items {
        match selection {
            SelectionItem::Field(field) => {
                if field_is_excluded(field, variable_values) {
                    continue;
                }
                let response_key = field.response_key();
                if field.name == TYPENAME_FIELD {
                    output.insert(
                        response_key.to_string(),
                        Value::String(type_name.to_string()),
                    );
                    continue;
                }
                if field.name == "__schema" || field.name == "__type" {
                    output.insert(response_key.to_string(), introspection(field));
                    continue;
                }
                let Some(field_map) = metadata.type_fields.get(type_name) else {
                    // Unreachable for validated operations.
                    warn!("type '{}' not found, skipping projection", type_name);
                    continue;
                };
                let Some(field_type) = field_map.get(&field.name) else {
                    warn!(
                        "field '{}' not found in type '{}', skipping projection",
                        field.name, type_name
                    );
                    continue;
                };
                let projected = match obj.get(response_key) {
                    None => Value::Null,
                    Some(value) => project_field(
                        value,
                        errors,
                        field.selections.as_ref(),
                        field_type,
                        metadata,
                        variable_values,
                        introspection,
                    ),
                };
                output.insert(response_key.to_string(), projected);
            }
            SelectionItem::InlineFragment(fragment) => {
                let applies = match &fragment.type_condition {
                    Some(condition) => metadata
                        .possible_types
                        .entity_satisfies_type_condition(type_name, condition),
                    None => true,
                };
                if applies {
                    project_object_selections(
                        obj,
                        output,
                        errors,
                        &fragment.selections,
                        type_name,
                        metadata,
                        variable_values,
                        introspection,
                    );
                }
            }
        }
    }
}

fn project_field(
    value: &Value,
    errors: &mut Vec<GraphQLError>,
    selections: Option<&SelectionSet>,
    type_name: &str,
    metadata: &SchemaMetadata,
    variable_values: &Option<HashMap<String, Value>>,
    introspection: IntrospectionHandler<'_>,
) -> Value {
    match value {
        Value::Null => Value::Null,
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| {
                    project_field(
                        item,
                        errors,
                        selections,
                        type_name,
                        metadata,
                        variable_values,
                        introspection,
                    )
                })
                .collect(),
        ),
        Value::Object(obj) => match selections {
            Some(selections) if !selections.is_empty() => {
                let mut output = Map::new();
                project_object_selections(
                    obj,
                    &mut output,
                    errors,
                    selections,
                    type_name,
                    metadata,
                    variable_values,
                    introspection,
                );
                Value::Object(output)
            }
            // A custom scalar with an object value passes through.
            _ => value.clone(),
        },
        Value::String(raw) => {
            if let Some(enum_values) = metadata.enum_values.get(type_name) {
                if !enum_values.contains(raw) {
                    errors.push(GraphQLError::from_message(format!(
                        "Value is not a valid enum value for type '{}'",
                        type_name
                    )));
                    return Value::Null;
                }
            }
            value.clone()
        }
        _ => value.clone(),
    }
}

fn field_is_excluded(
    field: &FieldSelection,
    variable_values: &Option<HashMap<String, Value>>,
) -> bool {
    let variable_is_true = |name: &String| {
        variable_values
            .as_ref()
            .and_then(|values| values.get(name))
            == Some(&Value::Bool(true))
    };
    if let Some(skip_variable) = &field.skip_if {
        if variable_is_true(skip_variable) {
            return true;
        }
    }
    if let Some(include_variable) = &field.include_if {
        if !variable_is_true(include_variable) {
            return true;
        }
    }
    false
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
