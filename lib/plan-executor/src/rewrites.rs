use serde_json::Value;
use tracing::warn;

use crate::plan::{FetchPathSegment, FetchRewrite, KeyRenamer, ValueSetter};
use crate::schema_metadata::PossibleTypes;
use crate::TYPENAME_FIELD;

/// A value-setting rewrite part-way through the representation walk: the
/// path steps already consumed are gone, `remaining` is what still has to
/// match.
#[derive(Clone, Copy)]
pub(crate) struct PendingRewrite<'a> {
    pub setter: &'a ValueSetter,
    pub remaining: &'a [FetchPathSegment],
}

/// Input rewrites of a fetch node, ready for threading through the walk.
/// Key renames make no sense on the input side and are skipped.
pub(crate) fn pending_input_rewrites(rewrites: Option<&Vec<FetchRewrite>>) -> Vec<PendingRewrite<'_>> {
    rewrites
        .into_iter()
        .flatten()
        .filter_map(|rewrite| match rewrite {
            FetchRewrite::ValueSetter(setter) => Some(PendingRewrite {
                setter,
                remaining: &setter.path,
            }),
            FetchRewrite::KeyRenamer(renamer) => {
                warn!(
                    "ignoring key rename of '{}' among input rewrites",
                    renamer.rename_key_to
                );
                None
            }
        })
        .collect()
}

pub(crate) enum RewriteStep<'a> {
    Field(&'a str),
    TypeCondition(&'a str),
}

pub(crate) struct UpdatedRewrites<'a> {
    /// Rewrites whose next path step matched and was consumed.
    pub advancing: Vec<PendingRewrite<'a>>,
    /// Set when a rewrite's path ends exactly at this step: the field value
    /// is replaced wholesale.
    pub complete: Option<&'a Value>,
}

/// Advances the pending rewrites over one step of the representation walk.
pub(crate) fn update_rewrites<'a>(
    pending: &[PendingRewrite<'a>],
    step: RewriteStep<'_>,
    possible_types: &PossibleTypes,
) -> UpdatedRewrites<'a> {
    let mut advancing = Vec::new();
    let mut complete = None;
    for rewrite in pending {
        match (&step, rewrite.remaining.first()) {
            (RewriteStep::Field(field_name), Some(FetchPathSegment::Key(key)))
                if key == field_name =>
            {
                let rest = &rewrite.remaining[1..];
                if rest.is_empty() {
                    complete = Some(&rewrite.setter.set_value_to);
                } else {
                    advancing.push(PendingRewrite {
                        setter: rewrite.setter,
                        remaining: rest,
                    });
                }
            }
            (
                RewriteStep::TypeCondition(condition),
                Some(FetchPathSegment::TypenameEquals(expected)),
            ) => {
                if possible_types.entity_satisfies_type_condition(condition, expected) {
                    advancing.push(PendingRewrite {
                        setter: rewrite.setter,
                        remaining: &rewrite.remaining[1..],
                    });
                }
            }
            // A fragment step does not consume key-addressed rewrites.
            (RewriteStep::TypeCondition(_), Some(FetchPathSegment::Key(_))) => {
                advancing.push(*rewrite);
            }
            _ => {}
        }
    }
    UpdatedRewrites {
        advancing,
        complete,
    }
}

/// Application of a rewrite to a value that already exists, used for output
/// rewrites on subgraph payloads.
pub(crate) trait ApplyFetchRewrite {
    fn apply(&self, possible_types: &PossibleTypes, value: &mut Value);
}

impl ApplyFetchRewrite for FetchRewrite {
    fn apply(&self, possible_types: &PossibleTypes, value: &mut Value) {
        match self {
            FetchRewrite::KeyRenamer(renamer) => {
                renamer.apply_path(possible_types, value, &renamer.path)
            }
            FetchRewrite::ValueSetter(setter) => {
                setter.apply_path(possible_types, value, &setter.path)
            }
        }
    }
}

impl FetchRewrite {
    pub(crate) fn path(&self) -> &[FetchPathSegment] {
        match self {
            FetchRewrite::ValueSetter(setter) => &setter.path,
            FetchRewrite::KeyRenamer(renamer) => &renamer.path,
        }
    }
}

fn typename_of<'a>(map: &'a serde_json::Map<String, Value>, fallback: &'a str) -> &'a str {
    match map.get(TYPENAME_FIELD) {
        Some(Value::String(type_name)) => type_name,
        _ => fallback,
    }
}

impl KeyRenamer {
    fn apply_path(&self, possible_types: &PossibleTypes, value: &mut Value, path: &[FetchPathSegment]) {
        let Some(current_segment) = path.first() else {
            return;
        };
        let rest = &path[1..];
        match value {
            Value::Array(items) => {
                for item in items {
                    self.apply_path(possible_types, item, path);
                }
            }
            Value::Object(map) => match current_segment {
                FetchPathSegment::TypenameEquals(type_condition) => {
                    let type_name = typename_of(map, type_condition).to_string();
                    if possible_types.entity_satisfies_type_condition(&type_name, type_condition) {
                        self.apply_path(possible_types, value, rest);
                    }
                }
                FetchPathSegment::Key(field_name) => {
                    if rest.is_empty() {
                        if *field_name != self.rename_key_to {
                            if let Some(taken) = map.remove(field_name) {
                                map.insert(self.rename_key_to.to_string(), taken);
                            }
                        }
                    } else if let Some(next) = map.get_mut(field_name) {
                        self.apply_path(possible_types, next, rest);
                    }
                }
            },
            _ => (),
        }
    }
}

impl ValueSetter {
    fn apply_path(&self, possible_types: &PossibleTypes, value: &mut Value, path: &[FetchPathSegment]) {
        if path.is_empty() {
            *value = self.set_value_to.clone();
            return;
        }
        let rest = &path[1..];
        match value {
            Value::Array(items) => {
                for item in items {
                    self.apply_path(possible_types, item, path);
                }
            }
            Value::Object(map) => match &path[0] {
                FetchPathSegment::TypenameEquals(type_condition) => {
                    let type_name = typename_of(map, type_condition).to_string();
                    if possible_types.entity_satisfies_type_condition(&type_name, type_condition) {
                        self.apply_path(possible_types, value, rest);
                    }
                }
                FetchPathSegment::Key(field_name) => {
                    if let Some(next) = map.get_mut(field_name) {
                        self.apply_path(possible_types, next, rest);
                    }
                }
            },
            other => {
                warn!(
                    "cannot apply value setter path {:?} to non-container: {:?}",
                    path, other
                );
            }
        }
    }
}
