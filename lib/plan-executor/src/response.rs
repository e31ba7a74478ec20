use std::fmt;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

/// One element of a concrete response path: a field key or an array index.
/// Serialized the way GraphQL error paths are: strings and numbers mixed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResponsePathSegment {
    Field(String),
    Index(usize),
}

impl Serialize for ResponsePathSegment {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ResponsePathSegment::Field(name) => serializer.serialize_str(name),
            ResponsePathSegment::Index(index) => serializer.serialize_u64(*index as u64),
        }
    }
}

impl<'de> Deserialize<'de> for ResponsePathSegment {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct SegmentVisitor;

        impl de::Visitor<'_> for SegmentVisitor {
            type Value = ResponsePathSegment;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a string or a non-negative integer path segment")
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<Self::Value, E> {
                Ok(ResponsePathSegment::Field(value.to_owned()))
            }

            fn visit_string<E: de::Error>(self, value: String) -> Result<Self::Value, E> {
                Ok(ResponsePathSegment::Field(value))
            }

            fn visit_u64<E: de::Error>(self, value: u64) -> Result<Self::Value, E> {
                Ok(ResponsePathSegment::Index(value as usize))
            }

            fn visit_i64<E: de::Error>(self, value: i64) -> Result<Self::Value, E> {
                if value < 0 {
                    return Err(E::custom(format!(
                        "path segment must be a non-negative integer, but got {}",
                        value
                    )));
                }
                Ok(ResponsePathSegment::Index(value as usize))
            }
        }

        deserializer.deserialize_any(SegmentVisitor)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct GraphQLError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locations: Option<Vec<GraphQLErrorLocation>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<ResponsePathSegment>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Map<String, Value>>,
}

impl GraphQLError {
    pub fn from_message(message: impl Into<String>) -> Self {
        GraphQLError {
            message: message.into(),
            locations: None,
            path: None,
            extensions: None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct GraphQLErrorLocation {
    pub line: usize,
    pub column: usize,
}

/// The final `{data, errors, extensions}` envelope returned to the caller.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ExecutionResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<GraphQLError>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Map<String, Value>>,
}

impl ExecutionResult {
    /// Empty errors and extensions collapse to absent keys.
    pub fn new(
        data: Option<Value>,
        errors: Vec<GraphQLError>,
        extensions: Map<String, Value>,
    ) -> Self {
        ExecutionResult {
            data,
            errors: if errors.is_empty() {
                None
            } else {
                Some(errors)
            },
            extensions: if extensions.is_empty() {
                None
            } else {
                Some(extensions)
            },
        }
    }

    pub fn from_error(error: GraphQLError) -> Self {
        ExecutionResult {
            data: None,
            errors: Some(vec![error]),
            extensions: None,
        }
    }
}

/// What a subgraph data source hands back for one operation.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct SubgraphResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<GraphQLError>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Map<String, Value>>,
}

impl SubgraphResponse {
    pub fn from_error_message(message: impl Into<String>) -> Self {
        SubgraphResponse {
            data: None,
            errors: Some(vec![GraphQLError::from_message(message)]),
            extensions: None,
        }
    }
}
