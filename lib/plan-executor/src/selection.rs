use serde::{Deserialize, Serialize};

/// Selections attached to plan nodes: the `requires` of an entity fetch and
/// the client operation both use this shape. Fragment spreads never appear
/// here; the planner inlines them.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(transparent)]
pub struct SelectionSet {
    pub items: Vec<SelectionItem>,
}

impl SelectionSet {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "kind")]
pub enum SelectionItem {
    Field(FieldSelection),
    InlineFragment(InlineFragmentSelection),
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct FieldSelection {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selections: Option<SelectionSet>,
    /// Variable name of a `@skip(if: $var)` directive on this field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_if: Option<String>,
    /// Variable name of an `@include(if: $var)` directive on this field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_if: Option<String>,
}

impl FieldSelection {
    /// The key this field occupies in the response tree.
    pub fn response_key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct InlineFragmentSelection {
    /// A fragment without a condition always applies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_condition: Option<String>,
    pub selections: SelectionSet,
}
