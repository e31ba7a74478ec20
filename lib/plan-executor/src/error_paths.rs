use serde_json::Value;

use crate::plan::FlattenPathSegment;
use crate::response::{GraphQLError, ResponsePathSegment};

pub(crate) const DOWNSTREAM_SERVICE_ERROR_CODE: &str = "DOWNSTREAM_SERVICE_ERROR";

/// Stamps the originating subgraph onto an error. An error code already set
/// by the subgraph is kept; otherwise the generic downstream code applies.
pub(crate) fn add_subgraph_info_to_error(
    mut error: GraphQLError,
    service_name: &str,
) -> GraphQLError {
    let extensions = error.extensions.get_or_insert_with(Default::default);
    if !extensions.contains_key("serviceName") {
        extensions.insert(
            "serviceName".to_string(),
            Value::String(service_name.to_string()),
        );
    }
    if !extensions.contains_key("code") {
        extensions.insert(
            "code".to_string(),
            Value::String(DOWNSTREAM_SERVICE_ERROR_CODE.to_string()),
        );
    }
    error
}

/// Maps subgraph error paths onto client-response paths.
///
/// Entity fetches return errors addressed as `[_entities, i, ...rest]`; the
/// `i`-th representation's recorded concrete path replaces the prefix, so
/// `[_entities, 1, email]` under `["users", "@"]` becomes
/// `["users", 1, "email"]`. Errors that do not address an entity fall back
/// to the field prefix of the fetch path. Path-less errors stay path-less.
pub(crate) fn hydrate_subgraph_errors(
    service_name: &str,
    fetch_path: &[FlattenPathSegment],
    representation_paths: Option<&[Vec<ResponsePathSegment>]>,
    errors: Vec<GraphQLError>,
) -> Vec<GraphQLError> {
    errors
        .into_iter()
        .map(|mut error| {
            let hydrated = match (&error.path, representation_paths) {
                (Some(path), Some(representation_paths)) => match entity_index_of(path)
                    .and_then(|entity_index| representation_paths.get(entity_index))
                {
                    Some(prefix) => {
                        let mut real_path = prefix.clone();
                        real_path.extend_from_slice(&path[2..]);
                        Some(real_path)
                    }
                    None => Some(prefix_fields(fetch_path)),
                },
                (Some(path), None) => {
                    let mut real_path = prefix_fields(fetch_path);
                    real_path.extend_from_slice(path);
                    Some(real_path)
                }
                (None, _) => None,
            };
            if let Some(real_path) = hydrated {
                error.path = if real_path.is_empty() {
                    None
                } else {
                    Some(real_path)
                };
            }
            add_subgraph_info_to_error(error, service_name)
        })
        .collect()
}

fn entity_index_of(path: &[ResponsePathSegment]) -> Option<usize> {
    match path {
        [ResponsePathSegment::Field(head), ResponsePathSegment::Index(index), ..]
            if head == "_entities" =>
        {
            Some(*index)
        }
        _ => None,
    }
}

/// The field steps of a fetch path up to the first list fan-out; the only
/// part of the path that is concrete without entity indexes.
fn prefix_fields(fetch_path: &[FlattenPathSegment]) -> Vec<ResponsePathSegment> {
    let mut prefix = Vec::new();
    for segment in fetch_path {
        match segment {
            FlattenPathSegment::Field(field_name) => {
                prefix.push(ResponsePathSegment::Field(field_name.to_string()));
            }
            FlattenPathSegment::List => break,
        }
    }
    prefix
}
