use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::selection::SelectionSet;

/// Planner output. The executor makes no assumptions about the tree beyond
/// the node variants below.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct QueryPlan {
    pub kind: String, // "QueryPlan"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<PlanNode>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "kind")]
pub enum PlanNode {
    Fetch(FetchNode),
    Sequence(SequenceNode),
    Parallel(ParallelNode),
    Flatten(FlattenNode),
    Defer(DeferNode),
    Condition(ConditionNode),
}

impl PlanNode {
    pub fn kind_name(&self) -> &'static str {
        match self {
            PlanNode::Fetch(_) => "Fetch",
            PlanNode::Sequence(_) => "Sequence",
            PlanNode::Parallel(_) => "Parallel",
            PlanNode::Flatten(_) => "Flatten",
            PlanNode::Defer(_) => "Defer",
            PlanNode::Condition(_) => "Condition",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct FetchNode {
    pub service_name: String,
    /// Subgraph operation text, sent verbatim to the data source.
    pub operation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_kind: Option<OperationKind>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variable_usages: Vec<String>,
    /// Selections used to build entity representations. Present on entity
    /// fetches, absent on root fetches.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requires: Option<SelectionSet>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_rewrites: Option<Vec<FetchRewrite>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_rewrites: Option<Vec<FetchRewrite>>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SequenceNode {
    pub nodes: Vec<PlanNode>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ParallelNode {
    pub nodes: Vec<PlanNode>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct FlattenNode {
    pub path: Vec<FlattenPathSegment>,
    pub node: Box<PlanNode>,
}

/// One step of a flatten path. `@` fans out over every element of an array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlattenPathSegment {
    Field(String),
    List,
}

impl Serialize for FlattenPathSegment {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            FlattenPathSegment::Field(name) => serializer.serialize_str(name),
            FlattenPathSegment::List => serializer.serialize_str("@"),
        }
    }
}

impl<'de> Deserialize<'de> for FlattenPathSegment {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(match raw.as_str() {
            "@" => FlattenPathSegment::List,
            _ => FlattenPathSegment::Field(raw),
        })
    }
}

/// Rewrites applied to representations before a fetch (`ValueSetter`) and to
/// payloads after a fetch (`KeyRenamer`).
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "kind")]
pub enum FetchRewrite {
    ValueSetter(ValueSetter),
    KeyRenamer(KeyRenamer),
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ValueSetter {
    pub path: Vec<FetchPathSegment>,
    pub set_value_to: Value,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct KeyRenamer {
    pub path: Vec<FetchPathSegment>,
    pub rename_key_to: String,
}

/// One step of a rewrite path: either a plain key, or a type condition
/// written as `... on T` and matched against `__typename`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchPathSegment {
    Key(String),
    TypenameEquals(String),
}

const TYPE_CONDITION_PREFIX: &str = "... on ";

impl Serialize for FetchPathSegment {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            FetchPathSegment::Key(key) => serializer.serialize_str(key),
            FetchPathSegment::TypenameEquals(type_name) => {
                serializer.serialize_str(&format!("{}{}", TYPE_CONDITION_PREFIX, type_name))
            }
        }
    }
}

impl<'de> Deserialize<'de> for FetchPathSegment {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(match raw.strip_prefix(TYPE_CONDITION_PREFIX) {
            Some(type_name) => FetchPathSegment::TypenameEquals(type_name.to_string()),
            None => FetchPathSegment::Key(raw),
        })
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum OperationKind {
    Query,
    Mutation,
    Subscription,
}

impl OperationKind {
    pub fn root_type_name(&self) -> &'static str {
        match self {
            OperationKind::Query => "Query",
            OperationKind::Mutation => "Mutation",
            OperationKind::Subscription => "Subscription",
        }
    }
}

/// The client operation the final response is shaped against.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct OperationDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_kind: Option<OperationKind>,
    pub selection_set: SelectionSet,
}

impl OperationDefinition {
    pub fn root_type_name(&self) -> &'static str {
        self.operation_kind
            .unwrap_or(OperationKind::Query)
            .root_type_name()
    }
}

/// Recognized so plans containing them deserialize, but not executable.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ConditionNode {
    pub condition: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub if_clause: Option<Box<PlanNode>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub else_clause: Option<Box<PlanNode>>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct DeferNode {
    pub primary: DeferPrimary,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deferred: Vec<DeferredNode>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct DeferPrimary {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subselection: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<Box<PlanNode>>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct DeferredNode {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub query_path: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subselection: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<Box<PlanNode>>,
}
